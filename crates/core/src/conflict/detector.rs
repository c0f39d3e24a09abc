//! Conflict detection over a file's task snapshots.
//!
//! Changes from every snapshot are grouped by location. Each location becomes
//! a [`ConflictRegion`] carrying the tasks and change types found there, a
//! severity, and whether a registered merge strategy can resolve it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::merge::StrategyRegistry;
use crate::models::{ChangeType, FileEvolution, SemanticChange};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How hard a region is to merge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    /// One task, or independent additions.
    None,
    Low,
    Medium,
    /// Overlapping edits of the same element; never auto-merged.
    High,
}

impl std::fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Every change at one location of one file, across the selected tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictRegion {
    pub file_path: String,
    pub location: String,
    pub tasks_involved: BTreeSet<String>,
    pub change_types: BTreeSet<ChangeType>,
    pub severity: ConflictSeverity,
    pub can_auto_merge: bool,
}

impl ConflictRegion {
    /// More than one task, or more than one kind of change.
    pub fn is_conflict(&self) -> bool {
        self.tasks_involved.len() > 1 || self.change_types.len() > 1
    }

    /// Every change at this location is a pure addition.
    pub fn is_additive(&self) -> bool {
        self.change_types.iter().all(|t| t.is_additive())
    }
}

/// A change together with the task that made it.
#[derive(Debug, Clone, Copy)]
pub struct RegionChange<'a> {
    pub task_id: &'a str,
    pub started_at: DateTime<Utc>,
    pub change: &'a SemanticChange,
}

/// Group the changes of `evolution` by location, keeping snapshot order.
///
/// `task_filter` restricts the snapshots considered; `None` means all.
pub fn changes_by_location<'a>(
    evolution: &'a FileEvolution,
    task_filter: Option<&[String]>,
) -> BTreeMap<String, Vec<RegionChange<'a>>> {
    let mut grouped: BTreeMap<String, Vec<RegionChange<'a>>> = BTreeMap::new();
    for snapshot in &evolution.task_snapshots {
        if let Some(filter) = task_filter {
            if !filter.iter().any(|t| t == &snapshot.task_id) {
                continue;
            }
        }
        for change in &snapshot.semantic_changes {
            grouped
                .entry(change.location.clone())
                .or_default()
                .push(RegionChange {
                    task_id: &snapshot.task_id,
                    started_at: snapshot.started_at,
                    change,
                });
        }
    }
    grouped
}

/// Severity of a group of changes at one location.
pub fn assess_severity(changes: &[RegionChange<'_>]) -> ConflictSeverity {
    let tasks: BTreeSet<&str> = changes.iter().map(|c| c.task_id).collect();
    if tasks.len() <= 1 {
        return ConflictSeverity::None;
    }

    let mut by_target: HashMap<&str, Vec<&RegionChange<'_>>> = HashMap::new();
    for change in changes {
        by_target
            .entry(change.change.target.as_str())
            .or_default()
            .push(change);
    }

    for (target, touching) in &by_target {
        let touching_tasks: BTreeSet<&str> = touching.iter().map(|c| c.task_id).collect();
        if touching_tasks.len() < 2 {
            continue;
        }
        if is_duplicate_addition(touching) {
            continue;
        }
        let non_hook_tasks: BTreeSet<&str> = touching
            .iter()
            .filter(|c| !c.change.change_type.is_hook_shaped())
            .map(|c| c.task_id)
            .collect();
        if non_hook_tasks.len() > 1 {
            debug!(element = *target, "element rewritten by several tasks");
            return ConflictSeverity::High;
        }
        let modifies = touching.iter().any(|c| c.change.change_type.is_modification());
        let adds_or_removes = touching
            .iter()
            .any(|c| c.change.change_type.is_additive() || c.change.change_type.is_removal());
        if modifies && adds_or_removes {
            debug!(element = *target, "modification mixed with add/remove of the same element");
            return ConflictSeverity::High;
        }
    }

    // A class rewritten or removed by one task while another edits a member.
    for change in changes {
        let kind = change.change.change_type;
        if !matches!(kind, ChangeType::ModifyClass | ChangeType::RemoveClass) {
            continue;
        }
        let prefix = format!("{}.", change.change.target);
        if changes
            .iter()
            .any(|other| other.task_id != change.task_id && other.change.target.starts_with(&prefix))
        {
            return ConflictSeverity::High;
        }
    }

    if changes.iter().all(|c| c.change.change_type.is_additive()) {
        return ConflictSeverity::None;
    }

    let types: BTreeSet<ChangeType> = changes.iter().map(|c| c.change.change_type).collect();
    match types.len() {
        0 | 1 => ConflictSeverity::Low,
        2 => ConflictSeverity::Medium,
        _ => ConflictSeverity::High,
    }
}

/// Several tasks adding the same element with identical content.
fn is_duplicate_addition(touching: &[&RegionChange<'_>]) -> bool {
    let Some(first) = touching.first() else {
        return false;
    };
    touching.iter().all(|c| {
        c.change.change_type.is_additive()
            && c.change.change_type == first.change.change_type
            && c.change.content_after.as_deref().map(str::trim)
                == first.change.content_after.as_deref().map(str::trim)
    })
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Reduces a file's snapshots to conflict regions.
pub struct ConflictDetector<'a> {
    registry: &'a StrategyRegistry,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(registry: &'a StrategyRegistry) -> Self {
        Self { registry }
    }

    /// One region per location touched by the selected tasks.
    pub fn analyze(
        &self,
        evolution: &FileEvolution,
        task_filter: Option<&[String]>,
    ) -> Vec<ConflictRegion> {
        let regions: Vec<ConflictRegion> = changes_by_location(evolution, task_filter)
            .into_iter()
            .map(|(location, changes)| self.build_region(&evolution.file_path, location, &changes))
            .collect();
        debug!(
            file = %evolution.file_path,
            regions = regions.len(),
            "analyzed file evolution"
        );
        regions
    }

    /// Only the regions that are actual conflicts (see
    /// [`ConflictRegion::is_conflict`]).
    pub fn detect_conflicts(
        &self,
        evolution: &FileEvolution,
        task_filter: Option<&[String]>,
    ) -> Vec<ConflictRegion> {
        let conflicts: Vec<ConflictRegion> = self
            .analyze(evolution, task_filter)
            .into_iter()
            .filter(ConflictRegion::is_conflict)
            .collect();
        if !conflicts.is_empty() {
            info!(
                file = %evolution.file_path,
                count = conflicts.len(),
                "detected conflict regions"
            );
        }
        conflicts
    }

    fn build_region(
        &self,
        file_path: &str,
        location: String,
        changes: &[RegionChange<'_>],
    ) -> ConflictRegion {
        let mut region = ConflictRegion {
            file_path: file_path.to_string(),
            location,
            tasks_involved: changes.iter().map(|c| c.task_id.to_string()).collect(),
            change_types: changes.iter().map(|c| c.change.change_type).collect(),
            severity: assess_severity(changes),
            can_auto_merge: false,
        };
        region.can_auto_merge = region.severity < ConflictSeverity::High
            && self.registry.find(&region, changes).is_some();
        debug!(
            location = %region.location,
            severity = %region.severity,
            can_auto_merge = region.can_auto_merge,
            "built region"
        );
        region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskSnapshot;

    fn snapshot(task: &str, changes: Vec<SemanticChange>) -> TaskSnapshot {
        let mut snap = TaskSnapshot::new(task, "");
        snap.semantic_changes = changes;
        snap
    }

    fn add_fn(name: &str, body: &str) -> SemanticChange {
        SemanticChange::new(ChangeType::AddFunction, name, format!("function:{name}"), 1, 2)
            .with_after(body)
    }

    fn evolution(snaps: Vec<TaskSnapshot>) -> FileEvolution {
        let mut evo = FileEvolution::new("app.py", "abc", "h", "baselines/h");
        for snap in snaps {
            evo.add_task_snapshot(snap);
        }
        evo
    }

    #[test]
    fn test_one_region_per_location() {
        let registry = StrategyRegistry::with_defaults();
        let detector = ConflictDetector::new(&registry);
        let evo = evolution(vec![
            snapshot("t1", vec![add_fn("helper", "def helper(): pass")]),
            snapshot(
                "t2",
                vec![SemanticChange::new(ChangeType::AddVariable, "X", "file_top", 1, 1)
                    .with_after("X = 1")],
            ),
        ]);
        let regions = detector.analyze(&evo, None);
        assert_eq!(regions.len(), 2);
        assert!(regions.iter().all(|r| r.severity == ConflictSeverity::None));
        assert!(regions.iter().all(|r| r.can_auto_merge));
        assert!(detector.detect_conflicts(&evo, None).is_empty());
    }

    #[test]
    fn test_task_filter() {
        let registry = StrategyRegistry::with_defaults();
        let detector = ConflictDetector::new(&registry);
        let evo = evolution(vec![
            snapshot("t1", vec![add_fn("a", "def a(): pass")]),
            snapshot("t2", vec![add_fn("b", "def b(): pass")]),
        ]);
        let regions = detector.analyze(&evo, Some(&["t2".to_string()][..]));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].location, "function:b");
    }

    #[test]
    fn test_two_tasks_rewriting_same_function_is_high() {
        let registry = StrategyRegistry::with_defaults();
        let detector = ConflictDetector::new(&registry);
        let modify = |task: &str| {
            snapshot(
                task,
                vec![SemanticChange::new(ChangeType::ModifyFunction, "f", "function:f", 1, 3)
                    .with_after(format!("def f():\n    return '{task}'"))],
            )
        };
        let evo = evolution(vec![modify("t1"), modify("t2")]);
        let regions = detector.detect_conflicts(&evo, None);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].severity, ConflictSeverity::High);
        assert!(!regions[0].can_auto_merge);
    }

    #[test]
    fn test_hooks_from_two_tasks_are_low_and_mergeable() {
        let registry = StrategyRegistry::with_defaults();
        let detector = ConflictDetector::new(&registry);
        let hook = |task: &str, call: &str| {
            snapshot(
                task,
                vec![SemanticChange::new(ChangeType::AddHookCall, "f", "function:f", 1, 3)
                    .with_metadata(crate::models::META_HOOKS, vec![call])],
            )
        };
        let evo = evolution(vec![hook("t1", "audit()"), hook("t2", "trace()")]);
        let regions = detector.detect_conflicts(&evo, None);
        assert_eq!(regions[0].severity, ConflictSeverity::Low);
        assert!(regions[0].can_auto_merge);
    }

    #[test]
    fn test_modify_with_add_same_name_is_high() {
        let changes = [
            SemanticChange::new(ChangeType::AddHookCall, "f", "function:f", 1, 3),
            SemanticChange::new(ChangeType::RemoveFunction, "f", "function:f", 1, 3),
        ];
        let started = Utc::now();
        let region = vec![
            RegionChange { task_id: "t1", started_at: started, change: &changes[0] },
            RegionChange { task_id: "t2", started_at: started, change: &changes[1] },
        ];
        assert_eq!(assess_severity(&region), ConflictSeverity::High);
    }

    #[test]
    fn test_identical_additions_are_not_conflicting() {
        let changes = [add_fn("f", "def f(): pass"), add_fn("f", "def f(): pass")];
        let started = Utc::now();
        let region = vec![
            RegionChange { task_id: "t1", started_at: started, change: &changes[0] },
            RegionChange { task_id: "t2", started_at: started, change: &changes[1] },
        ];
        assert_eq!(assess_severity(&region), ConflictSeverity::None);

        let differing = [add_fn("f", "def f(): pass"), add_fn("f", "def f(): return 1")];
        let region = vec![
            RegionChange { task_id: "t1", started_at: started, change: &differing[0] },
            RegionChange { task_id: "t2", started_at: started, change: &differing[1] },
        ];
        assert_eq!(assess_severity(&region), ConflictSeverity::High);
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(ConflictSeverity::Medium.to_string(), "medium");
        assert!(ConflictSeverity::Low < ConflictSeverity::High);
    }
}
