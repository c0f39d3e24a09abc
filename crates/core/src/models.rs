//! Domain model types persisted in the evolution index.
//!
//! These types bridge the semantic analyzer, the evolution store, the conflict
//! detector and the merge engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open key-value bag attached to a change or snapshot. Strategies must
/// tolerate missing keys.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Metadata key: identifiers referenced by an added element.
pub const META_DEPENDS_ON: &str = "depends_on";
/// Metadata key: call lines inserted at the top of a function body.
pub const META_HOOKS: &str = "hooks";
/// Metadata key: return expression before a wrap.
pub const META_RETURN_BEFORE: &str = "return_before";
/// Metadata key: return expression after a wrap.
pub const META_RETURN_AFTER: &str = "return_after";
/// Metadata key: the wrapping callee name.
pub const META_WRAPPER: &str = "wrapper";
/// Metadata key: callee whose argument list changed.
pub const META_CALLEE: &str = "callee";
/// Metadata key: full call line before an argument change.
pub const META_CALL_BEFORE: &str = "call_before";
/// Metadata key: full call line after an argument change.
pub const META_CALL_AFTER: &str = "call_after";
/// Metadata key: enclosing class of a method.
pub const META_PARENT: &str = "parent";
/// Metadata key: element kind of an import/variable/statement addition.
pub const META_ELEMENT_TYPE: &str = "element_type";

// ---------------------------------------------------------------------------
// Change type
// ---------------------------------------------------------------------------

/// Structural classification of a single change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    AddImport,
    RemoveImport,
    AddFunction,
    RemoveFunction,
    ModifyFunction,
    AddMethod,
    RemoveMethod,
    ModifyMethod,
    AddClass,
    RemoveClass,
    ModifyClass,
    AddVariable,
    RemoveVariable,
    ModifyVariable,
    AddStatement,
    RemoveStatement,
    /// A call statement inserted at the top of an existing function body.
    AddHookCall,
    /// An existing return expression wrapped in a call.
    WrapReturn,
    /// A call whose argument list changed, callee unchanged.
    ModifyCallArguments,
    /// Whitespace-only difference.
    FormattingOnly,
    /// Whole-file change for content the extractor does not understand.
    ModifyFile,
}

impl ChangeType {
    /// Pure insertion of a new element.
    pub fn is_additive(self) -> bool {
        matches!(
            self,
            Self::AddImport
                | Self::AddFunction
                | Self::AddMethod
                | Self::AddClass
                | Self::AddVariable
                | Self::AddStatement
        )
    }

    pub fn is_removal(self) -> bool {
        matches!(
            self,
            Self::RemoveImport
                | Self::RemoveFunction
                | Self::RemoveMethod
                | Self::RemoveClass
                | Self::RemoveVariable
                | Self::RemoveStatement
        )
    }

    /// Narrow in-body edits that strategies can replay without replacing
    /// the whole element.
    pub fn is_hook_shaped(self) -> bool {
        matches!(self, Self::AddHookCall | Self::WrapReturn)
    }

    /// Any change that rewrites an existing element in place.
    pub fn is_modification(self) -> bool {
        !self.is_additive() && !self.is_removal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddImport => "add_import",
            Self::RemoveImport => "remove_import",
            Self::AddFunction => "add_function",
            Self::RemoveFunction => "remove_function",
            Self::ModifyFunction => "modify_function",
            Self::AddMethod => "add_method",
            Self::RemoveMethod => "remove_method",
            Self::ModifyMethod => "modify_method",
            Self::AddClass => "add_class",
            Self::RemoveClass => "remove_class",
            Self::ModifyClass => "modify_class",
            Self::AddVariable => "add_variable",
            Self::RemoveVariable => "remove_variable",
            Self::ModifyVariable => "modify_variable",
            Self::AddStatement => "add_statement",
            Self::RemoveStatement => "remove_statement",
            Self::AddHookCall => "add_hook_call",
            Self::WrapReturn => "wrap_return",
            Self::ModifyCallArguments => "modify_call_arguments",
            Self::FormattingOnly => "formatting_only",
            Self::ModifyFile => "modify_file",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Semantic change
// ---------------------------------------------------------------------------

/// One classified structural change between two versions of a file.
///
/// `content_after` (or `metadata` for narrow edits) always carries enough to
/// re-apply the change without the original diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticChange {
    pub change_type: ChangeType,
    /// Qualified element name (`Parent.method` for methods).
    pub target: String,
    /// Conflict grouping key: `file_top`, `function:<name>`, `class:<name>`.
    pub location: String,
    pub line_start: usize,
    pub line_end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_after: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl SemanticChange {
    pub fn new(
        change_type: ChangeType,
        target: impl Into<String>,
        location: impl Into<String>,
        line_start: usize,
        line_end: usize,
    ) -> Self {
        Self {
            change_type,
            target: target.into(),
            location: location.into(),
            line_start,
            line_end,
            content_before: None,
            content_after: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_before(mut self, content: impl Into<String>) -> Self {
        self.content_before = Some(content.into());
        self
    }

    pub fn with_after(mut self, content: impl Into<String>) -> Self {
        self.content_after = Some(content.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// String-valued metadata entry, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// List-of-strings metadata entry; missing or malformed yields empty.
    pub fn metadata_list(&self, key: &str) -> Vec<String> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Unqualified name (`method` for `Parent.method`).
    pub fn simple_name(&self) -> &str {
        self.target.rsplit('.').next().unwrap_or(&self.target)
    }
}

// ---------------------------------------------------------------------------
// Task snapshot
// ---------------------------------------------------------------------------

/// One task's classified changes to one file, baseline to current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub task_intent: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub semantic_changes: Vec<SemanticChange>,
    /// Free-form metadata supplied by the caller at capture time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl TaskSnapshot {
    pub fn new(task_id: impl Into<String>, task_intent: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_intent: task_intent.into(),
            started_at: Utc::now(),
            completed_at: None,
            semantic_changes: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn has_modifications(&self) -> bool {
        !self.semantic_changes.is_empty()
    }

    /// Set `completed_at` once. Returns `false` if it was already set.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) -> bool {
        if self.completed_at.is_some() {
            return false;
        }
        self.completed_at = Some(at);
        true
    }
}

// ---------------------------------------------------------------------------
// File evolution
// ---------------------------------------------------------------------------

/// Baseline and per-task snapshots of one tracked file.
///
/// Baseline fields are written once at construction; at most one snapshot
/// exists per task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEvolution {
    /// Path relative to the project root, forward-slash separated.
    pub file_path: String,
    pub baseline_commit: String,
    pub baseline_captured_at: DateTime<Utc>,
    pub baseline_content_hash: String,
    /// Pointer into the content-addressed baseline store.
    pub baseline_snapshot_path: String,
    #[serde(default)]
    pub task_snapshots: Vec<TaskSnapshot>,
}

impl FileEvolution {
    pub fn new(
        file_path: impl Into<String>,
        baseline_commit: impl Into<String>,
        baseline_content_hash: impl Into<String>,
        baseline_snapshot_path: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            baseline_commit: baseline_commit.into(),
            baseline_captured_at: Utc::now(),
            baseline_content_hash: baseline_content_hash.into(),
            baseline_snapshot_path: baseline_snapshot_path.into(),
            task_snapshots: Vec::new(),
        }
    }

    pub fn get_task_snapshot(&self, task_id: &str) -> Option<&TaskSnapshot> {
        self.task_snapshots.iter().find(|s| s.task_id == task_id)
    }

    pub fn get_task_snapshot_mut(&mut self, task_id: &str) -> Option<&mut TaskSnapshot> {
        self.task_snapshots.iter_mut().find(|s| s.task_id == task_id)
    }

    /// Insert `snapshot`, or fold it into the task's existing snapshot.
    ///
    /// An existing snapshot keeps its `started_at`, `completed_at` and
    /// metadata; its changes are replaced, and its intent too when the new
    /// intent is non-empty.
    pub fn add_task_snapshot(&mut self, snapshot: TaskSnapshot) {
        match self.get_task_snapshot_mut(&snapshot.task_id) {
            Some(existing) => {
                existing.semantic_changes = snapshot.semantic_changes;
                if !snapshot.task_intent.is_empty() {
                    existing.task_intent = snapshot.task_intent;
                }
                for (key, value) in snapshot.metadata {
                    existing.metadata.entry(key).or_insert(value);
                }
            }
            None => self.task_snapshots.push(snapshot),
        }
    }

    /// Drop the task's snapshot. Returns whether one existed.
    pub fn remove_task(&mut self, task_id: &str) -> bool {
        let before = self.task_snapshots.len();
        self.task_snapshots.retain(|s| s.task_id != task_id);
        self.task_snapshots.len() != before
    }

    /// Task ids with at least one recorded change.
    pub fn modifying_tasks(&self) -> Vec<&str> {
        self.task_snapshots
            .iter()
            .filter(|s| s.has_modifications())
            .map(|s| s.task_id.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Aggregate statistics over the whole evolution index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvolutionSummary {
    pub total_files: usize,
    pub total_tasks: usize,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub total_changes: usize,
    /// Files modified by more than one task.
    pub files_with_multiple_tasks: usize,
    pub change_type_counts: BTreeMap<ChangeType, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_families() {
        assert!(ChangeType::AddFunction.is_additive());
        assert!(!ChangeType::AddHookCall.is_additive());
        assert!(ChangeType::AddHookCall.is_hook_shaped());
        assert!(ChangeType::RemoveClass.is_removal());
        assert!(ChangeType::ModifyMethod.is_modification());
        assert!(!ChangeType::AddImport.is_modification());
        assert_eq!(ChangeType::WrapReturn.to_string(), "wrap_return");
    }

    #[test]
    fn test_change_type_serde_snake_case() {
        let json = serde_json::to_string(&ChangeType::ModifyCallArguments).unwrap();
        assert_eq!(json, "\"modify_call_arguments\"");
        let back: ChangeType = serde_json::from_str("\"add_hook_call\"").unwrap();
        assert_eq!(back, ChangeType::AddHookCall);
    }

    #[test]
    fn test_metadata_accessors_tolerate_missing_keys() {
        let change = SemanticChange::new(ChangeType::AddFunction, "Api.helper", "class:Api", 3, 4)
            .with_metadata(META_DEPENDS_ON, vec!["a", "b"])
            .with_metadata(META_WRAPPER, "cache");
        assert_eq!(change.metadata_list(META_DEPENDS_ON), vec!["a", "b"]);
        assert_eq!(change.metadata_str(META_WRAPPER), Some("cache"));
        assert!(change.metadata_list(META_HOOKS).is_empty());
        assert_eq!(change.metadata_str(META_CALLEE), None);
        assert_eq!(change.simple_name(), "helper");
    }

    #[test]
    fn test_mark_completed_sets_once() {
        let mut snap = TaskSnapshot::new("t1", "add login");
        let first = Utc::now();
        assert!(snap.mark_completed(first));
        assert!(!snap.mark_completed(first + chrono::Duration::seconds(10)));
        assert_eq!(snap.completed_at, Some(first));
    }

    #[test]
    fn test_add_task_snapshot_replaces_changes_keeps_start() {
        let mut evo = FileEvolution::new("app.py", "abc", "hash", "baselines/hash");
        let mut first = TaskSnapshot::new("t1", "intent");
        first
            .semantic_changes
            .push(SemanticChange::new(ChangeType::AddFunction, "a", "function:a", 1, 1));
        let started = first.started_at;
        evo.add_task_snapshot(first);

        let mut second = TaskSnapshot::new("t1", "");
        second
            .semantic_changes
            .push(SemanticChange::new(ChangeType::AddFunction, "b", "function:b", 1, 1));
        evo.add_task_snapshot(second);

        assert_eq!(evo.task_snapshots.len(), 1);
        let snap = evo.get_task_snapshot("t1").unwrap();
        assert_eq!(snap.started_at, started);
        assert_eq!(snap.task_intent, "intent");
        assert_eq!(snap.semantic_changes[0].target, "b");
    }

    #[test]
    fn test_file_evolution_round_trips_through_json() {
        let mut evo = FileEvolution::new("src/app.py", "deadbeef", "h", "baselines/h");
        evo.add_task_snapshot(TaskSnapshot::new("t1", "x"));
        let json = serde_json::to_string(&evo).unwrap();
        let back: FileEvolution = serde_json::from_str(&json).unwrap();
        assert_eq!(back, evo);
        assert!(evo.remove_task("t1"));
        assert!(!evo.remove_task("t1"));
    }
}
