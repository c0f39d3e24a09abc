//! Project-level facade over the evolution store, conflict detection and
//! merging.
//!
//! The [`EvolutionTracker`] is what an orchestrator talks to:
//!
//! 1. `capture_baselines` when a task starts.
//! 2. `record_modification` / `refresh_from_git` as the task edits files.
//! 3. `mark_task_completed` when it finishes.
//! 4. `get_conflicting_files`, `export_for_merge` and `merge_file` at merge
//!    time, then `cleanup_task` once the task's work has landed.
//!
//! Every mutating call is one load-modify-save cycle of the index, taken
//! under the project lock when `storage.use_lock` is set.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::conflict::ConflictDetector;
use crate::errors::CoreError;
use crate::evolution::{BaselineCapture, EvolutionMap, EvolutionStore, ModificationTracker, ProjectLock};
use crate::merge::{FileMergeResult, MergeContext, MergeEngine, StrategyRegistry};
use crate::models::{EvolutionSummary, FileEvolution, Metadata, TaskSnapshot};

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

/// Tracks every task's evolution of a project's files.
pub struct EvolutionTracker {
    config: EngineConfig,
    store: EvolutionStore,
    registry: StrategyRegistry,
}

impl EvolutionTracker {
    /// Build a tracker from a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let store = EvolutionStore::from_config(&config);
        let registry = StrategyRegistry::from_config(&config.merge);
        info!(
            project = %config.project.root.display(),
            storage = %store.storage_dir().display(),
            strategies = registry.len(),
            "initializing evolution tracker"
        );
        Ok(Self {
            config,
            store,
            registry,
        })
    }

    /// Tracker with default settings for the project at `root`.
    pub fn for_project<P: AsRef<Path>>(root: P) -> Result<Self, CoreError> {
        Self::new(EngineConfig::for_project(root))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &EvolutionStore {
        &self.store
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    fn lock(&self) -> Result<Option<ProjectLock>, CoreError> {
        if !self.config.storage.use_lock {
            return Ok(None);
        }
        Ok(Some(ProjectLock::acquire(self.store.storage_dir())?))
    }

    /// One locked load-modify-save cycle.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut EvolutionMap) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let _lock = self.lock()?;
        let mut evolutions = self.store.load()?;
        let out = f(&mut evolutions)?;
        self.store.save(&evolutions)?;
        Ok(out)
    }

    fn relative(&self, file_path: &str) -> Result<String, CoreError> {
        Ok(self.store.get_relative_path(Path::new(file_path))?)
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Capture baselines for `files` (or every trackable file) and open a
    /// snapshot for `task_id` on each. Existing baselines are never
    /// overwritten.
    pub fn capture_baselines(
        &self,
        task_id: &str,
        files: Option<&[String]>,
        intent: &str,
        metadata: &Metadata,
    ) -> Result<Vec<FileEvolution>, CoreError> {
        self.mutate(|evolutions| {
            let capture = BaselineCapture::new(&self.store, &self.config.tracking);
            Ok(capture.capture_baselines(task_id, files, intent, metadata, evolutions)?)
        })
    }

    /// Record `task_id`'s edit of `file_path`. `Ok(None)` when the file is
    /// not tracked.
    pub fn record_modification(
        &self,
        task_id: &str,
        file_path: &str,
        old_content: Option<&str>,
        new_content: &str,
    ) -> Result<Option<TaskSnapshot>, CoreError> {
        self.mutate(|evolutions| {
            let tracker = ModificationTracker::new(&self.store);
            Ok(tracker.record_modification(task_id, file_path, old_content, new_content, evolutions)?)
        })
    }

    /// Rebuild `task_id`'s snapshots from its worktree's commits since the
    /// branch point with `project.base_branch`. Git failures yield no
    /// snapshots.
    pub fn refresh_from_git(
        &self,
        task_id: &str,
        worktree_path: &Path,
    ) -> Result<Vec<TaskSnapshot>, CoreError> {
        self.mutate(|evolutions| {
            let tracker = ModificationTracker::new(&self.store);
            Ok(tracker.refresh_from_git(
                task_id,
                worktree_path,
                &self.config.project.base_branch,
                evolutions,
            ))
        })
    }

    /// Complete every snapshot of `task_id`; idempotent. Returns how many
    /// snapshots were newly completed.
    pub fn mark_task_completed(&self, task_id: &str) -> Result<usize, CoreError> {
        self.mutate(|evolutions| {
            Ok(ModificationTracker::new(&self.store).mark_task_completed(task_id, evolutions))
        })
    }

    /// Drop `task_id`'s snapshots. Evolutions left without snapshots are
    /// removed, along with baseline blobs nothing else references.
    /// Returns the number of files the task was removed from.
    pub fn cleanup_task(&self, task_id: &str) -> Result<usize, CoreError> {
        self.mutate(|evolutions| {
            let mut touched = 0usize;
            let mut orphaned: Vec<String> = Vec::new();
            evolutions.retain(|_, evolution| {
                if evolution.remove_task(task_id) {
                    touched += 1;
                }
                if evolution.task_snapshots.is_empty() {
                    orphaned.push(evolution.baseline_snapshot_path.clone());
                    return false;
                }
                true
            });

            let referenced: HashSet<&str> = evolutions
                .values()
                .map(|e| e.baseline_snapshot_path.as_str())
                .collect();
            let mut blobs_removed = 0usize;
            for pointer in orphaned.iter().filter(|p| !referenced.contains(p.as_str())) {
                if self.store.remove_baseline(pointer)? {
                    blobs_removed += 1;
                }
            }
            info!(task_id, files = touched, blobs_removed, "cleaned up task");
            Ok(touched)
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_file_evolution(&self, file_path: &str) -> Result<Option<FileEvolution>, CoreError> {
        let rel = self.relative(file_path)?;
        Ok(self.store.load()?.remove(&rel))
    }

    /// Baseline text of a tracked file. A missing blob is an error.
    pub fn get_baseline_content(&self, file_path: &str) -> Result<Option<String>, CoreError> {
        match self.get_file_evolution(file_path)? {
            Some(evolution) => Ok(Some(
                self.store
                    .read_baseline_content(&evolution.baseline_snapshot_path)?,
            )),
            None => Ok(None),
        }
    }

    /// File path -> the task's snapshot, for files the task changed.
    pub fn get_task_modifications(
        &self,
        task_id: &str,
    ) -> Result<BTreeMap<String, TaskSnapshot>, CoreError> {
        let evolutions = self.store.load()?;
        Ok(evolutions
            .into_iter()
            .filter_map(|(path, evolution)| {
                evolution
                    .task_snapshots
                    .into_iter()
                    .find(|s| s.task_id == task_id && s.has_modifications())
                    .map(|snapshot| (path, snapshot))
            })
            .collect())
    }

    /// File path -> which of `task_ids` changed it.
    pub fn get_files_modified_by_tasks(
        &self,
        task_ids: &[String],
    ) -> Result<BTreeMap<String, Vec<String>>, CoreError> {
        let evolutions = self.store.load()?;
        Ok(files_modified_by(&evolutions, task_ids))
    }

    /// Files changed by more than one of `task_ids`.
    pub fn get_conflicting_files(&self, task_ids: &[String]) -> Result<Vec<String>, CoreError> {
        let evolutions = self.store.load()?;
        let conflicting: Vec<String> = files_modified_by(&evolutions, task_ids)
            .into_iter()
            .filter(|(_, tasks)| tasks.len() > 1)
            .map(|(path, _)| path)
            .collect();
        debug!(tasks = task_ids.len(), files = conflicting.len(), "conflicting files");
        Ok(conflicting)
    }

    /// One merge context per region of `file_path`, each over the stored
    /// baseline. Empty when the file is not tracked.
    pub fn export_for_merge(
        &self,
        file_path: &str,
        task_ids: Option<&[String]>,
    ) -> Result<Vec<MergeContext>, CoreError> {
        let Some(evolution) = self.get_file_evolution(file_path)? else {
            return Ok(Vec::new());
        };
        let baseline = self
            .store
            .read_baseline_content(&evolution.baseline_snapshot_path)?;
        let detector = ConflictDetector::new(&self.registry);
        Ok(detector
            .analyze(&evolution, task_ids)
            .into_iter()
            .map(|region| MergeContext {
                file_path: evolution.file_path.clone(),
                baseline_content: baseline.clone(),
                task_snapshots: evolution
                    .task_snapshots
                    .iter()
                    .filter(|s| region.tasks_involved.contains(&s.task_id))
                    .cloned()
                    .collect(),
                region,
            })
            .collect())
    }

    /// Merge the selected tasks' changes to `file_path` over its baseline.
    /// `Ok(None)` when the file is not tracked.
    pub fn merge_file(
        &self,
        file_path: &str,
        task_ids: Option<&[String]>,
    ) -> Result<Option<FileMergeResult>, CoreError> {
        let Some(evolution) = self.get_file_evolution(file_path)? else {
            return Ok(None);
        };
        let baseline = self
            .store
            .read_baseline_content(&evolution.baseline_snapshot_path)?;
        let result = MergeEngine::new(&self.registry).merge_file(&evolution, &baseline, task_ids);
        Ok(Some(result))
    }

    /// Tasks with at least one snapshot not yet completed.
    pub fn get_active_tasks(&self) -> Result<BTreeSet<String>, CoreError> {
        let evolutions = self.store.load()?;
        Ok(evolutions
            .values()
            .flat_map(|e| &e.task_snapshots)
            .filter(|s| !s.is_completed())
            .map(|s| s.task_id.clone())
            .collect())
    }

    pub fn get_evolution_summary(&self) -> Result<EvolutionSummary, CoreError> {
        Ok(summarize(&self.store.load()?))
    }
}

fn files_modified_by(evolutions: &EvolutionMap, task_ids: &[String]) -> BTreeMap<String, Vec<String>> {
    evolutions
        .iter()
        .filter_map(|(path, evolution)| {
            let tasks: Vec<String> = evolution
                .modifying_tasks()
                .into_iter()
                .filter(|t| task_ids.iter().any(|id| id.as_str() == *t))
                .map(str::to_string)
                .collect();
            (!tasks.is_empty()).then(|| (path.clone(), tasks))
        })
        .collect()
}

/// Aggregate statistics; a task is active if any of its snapshots is open.
fn summarize(evolutions: &EvolutionMap) -> EvolutionSummary {
    let mut summary = EvolutionSummary {
        total_files: evolutions.len(),
        ..EvolutionSummary::default()
    };
    let mut all_tasks = BTreeSet::new();
    let mut active = BTreeSet::new();
    for evolution in evolutions.values() {
        if evolution.modifying_tasks().len() > 1 {
            summary.files_with_multiple_tasks += 1;
        }
        for snapshot in &evolution.task_snapshots {
            all_tasks.insert(snapshot.task_id.as_str());
            if !snapshot.is_completed() {
                active.insert(snapshot.task_id.as_str());
            }
            summary.total_changes += snapshot.semantic_changes.len();
            for change in &snapshot.semantic_changes {
                *summary.change_type_counts.entry(change.change_type).or_default() += 1;
            }
        }
    }
    summary.total_tasks = all_tasks.len();
    summary.active_tasks = active.len();
    summary.completed_tasks = all_tasks.len() - active.len();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeType;
    use std::fs;

    fn tracker(dir: &Path) -> EvolutionTracker {
        EvolutionTracker::for_project(dir).unwrap()
    }

    #[test]
    fn test_untracked_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        let snapshot = tracker
            .record_modification("t1", "nowhere.py", Some(""), "x = 1\n")
            .unwrap();
        assert!(snapshot.is_none());
        assert!(tracker.get_file_evolution("nowhere.py").unwrap().is_none());
        assert!(tracker.merge_file("nowhere.py", None).unwrap().is_none());
    }

    #[test]
    fn test_summary_and_active_tasks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.py"), "def existing():\n    pass\n").unwrap();
        let tracker = tracker(dir.path());
        let files = vec!["app.py".to_string()];
        for task in ["t1", "t2"] {
            tracker
                .capture_baselines(task, Some(files.as_slice()), "work", &Metadata::new())
                .unwrap();
        }
        tracker
            .record_modification("t1", "app.py", None, "def existing():\n    pass\n\ndef a():\n    pass\n")
            .unwrap();
        tracker
            .record_modification("t2", "app.py", None, "def existing():\n    pass\n\ndef b():\n    pass\n")
            .unwrap();
        tracker.mark_task_completed("t1").unwrap();

        let summary = tracker.get_evolution_summary().unwrap();
        assert_eq!(summary.total_files, 1);
        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.active_tasks, 1);
        assert_eq!(summary.completed_tasks, 1);
        assert_eq!(summary.total_changes, 2);
        assert_eq!(summary.files_with_multiple_tasks, 1);
        assert_eq!(summary.change_type_counts.get(&ChangeType::AddFunction), Some(&2));

        let active = tracker.get_active_tasks().unwrap();
        assert_eq!(active.into_iter().collect::<Vec<_>>(), vec!["t2"]);
    }

    #[test]
    fn test_cleanup_removes_orphaned_baseline() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.py"), "X = 1\n").unwrap();
        let tracker = tracker(dir.path());
        let files = vec!["app.py".to_string()];
        let captured = tracker
            .capture_baselines("t1", Some(files.as_slice()), "", &Metadata::new())
            .unwrap();
        let pointer = captured[0].baseline_snapshot_path.clone();

        assert_eq!(tracker.cleanup_task("t1").unwrap(), 1);
        assert!(tracker.get_file_evolution("app.py").unwrap().is_none());
        assert!(tracker.store().read_baseline_content(&pointer).is_err());
        assert_eq!(tracker.cleanup_task("t1").unwrap(), 0);
    }
}
