//! Recording task modifications against captured baselines.

use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::{CoreError, GitError, StoreError};
use crate::evolution::store::{EvolutionMap, EvolutionStore};
use crate::git::GitTimeline;
use crate::models::TaskSnapshot;
use crate::semantic::SemanticAnalyzer;

/// Turns before/after content into task snapshots.
pub struct ModificationTracker<'a> {
    store: &'a EvolutionStore,
    analyzer: SemanticAnalyzer,
}

impl<'a> ModificationTracker<'a> {
    pub fn new(store: &'a EvolutionStore) -> Self {
        Self {
            store,
            analyzer: SemanticAnalyzer::new(),
        }
    }

    /// Classify `task_id`'s edit of `file_path` and store it as the task's
    /// snapshot, replacing any earlier one for the same file.
    ///
    /// `old_content = None` diffs against the stored baseline. Returns
    /// `Ok(None)` when the file has no baseline: the caller chose not to
    /// track it.
    pub fn record_modification(
        &self,
        task_id: &str,
        file_path: &str,
        old_content: Option<&str>,
        new_content: &str,
        evolutions: &mut EvolutionMap,
    ) -> Result<Option<TaskSnapshot>, StoreError> {
        let rel = self.store.get_relative_path(Path::new(file_path))?;
        let Some(evolution) = evolutions.get_mut(&rel) else {
            debug!(file = %rel, task_id, "file not tracked, ignoring modification");
            return Ok(None);
        };

        let old = match old_content {
            Some(old) => old.to_string(),
            None => self
                .store
                .read_baseline_content(&evolution.baseline_snapshot_path)?,
        };
        let changes = self.analyzer.analyze_diff(&rel, &old, new_content);

        let mut snapshot = TaskSnapshot::new(task_id, "");
        snapshot.semantic_changes = changes;
        let count = snapshot.semantic_changes.len();
        evolution.add_task_snapshot(snapshot);

        info!(file = %rel, task_id, changes = count, "recorded modification");
        Ok(evolution.get_task_snapshot(task_id).cloned())
    }

    /// Rebuild `task_id`'s snapshots from the commits in its worktree since
    /// the branch point with `base_branch`.
    ///
    /// Git failures degrade to an empty result with a warning.
    pub fn refresh_from_git(
        &self,
        task_id: &str,
        worktree_path: &Path,
        base_branch: &str,
        evolutions: &mut EvolutionMap,
    ) -> Vec<TaskSnapshot> {
        match self.try_refresh(task_id, worktree_path, base_branch, evolutions) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(
                    task_id,
                    worktree = %worktree_path.display(),
                    error = %e,
                    "git refresh failed, no snapshots updated"
                );
                Vec::new()
            }
        }
    }

    fn try_refresh(
        &self,
        task_id: &str,
        worktree_path: &Path,
        base_branch: &str,
        evolutions: &mut EvolutionMap,
    ) -> Result<Vec<TaskSnapshot>, CoreError> {
        let timeline = GitTimeline::open(worktree_path)?;
        let branch_point = timeline.merge_base(base_branch, "HEAD")?;
        let changed = timeline.files_changed_between(&branch_point, "HEAD")?;
        debug!(task_id, %branch_point, files = changed.len(), "refreshing from git");

        let prefix = self.project_prefix(&timeline, worktree_path);

        // Read every file before touching the index so a failure leaves it
        // unchanged.
        let mut pairs: Vec<(String, String, String)> = Vec::new();
        for file in changed {
            let Some(rel) = file.strip_prefix(prefix.as_str()) else {
                continue;
            };
            if !evolutions.contains_key(rel) {
                continue;
            }
            let contents = timeline
                .file_at_commit(&branch_point, &file)
                .and_then(|old| Ok((old, timeline.file_at_commit("HEAD", &file)?)));
            let (old, new) = match contents {
                Ok(pair) => pair,
                Err(GitError::NotUtf8 { path }) => {
                    warn!(file = %path, task_id, "skipping non-text file");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            pairs.push((rel.to_string(), old.unwrap_or_default(), new.unwrap_or_default()));
        }

        let mut snapshots = Vec::with_capacity(pairs.len());
        for (rel, old, new) in pairs {
            if let Some(snapshot) =
                self.record_modification(task_id, &rel, Some(&old), &new, evolutions)?
            {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    /// Where the project root sits inside the repository, as a path prefix.
    fn project_prefix(&self, timeline: &GitTimeline, worktree_path: &Path) -> String {
        GitTimeline::open(self.store.project_dir())
            .ok()
            .and_then(|project| project.path_prefix(self.store.project_dir()))
            .or_else(|| timeline.path_prefix(worktree_path))
            .unwrap_or_default()
    }

    /// Set `completed_at` on every snapshot of `task_id`. Snapshots already
    /// completed keep their time. Returns how many were newly completed.
    pub fn mark_task_completed(&self, task_id: &str, evolutions: &mut EvolutionMap) -> usize {
        let now = Utc::now();
        let completed = evolutions
            .values_mut()
            .filter_map(|evolution| evolution.get_task_snapshot_mut(task_id))
            .map(|snapshot| snapshot.mark_completed(now))
            .filter(|&newly| newly)
            .count();
        info!(task_id, completed, "marked task completed");
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeType, FileEvolution};

    fn tracked(dir: &Path, baseline: &str) -> (EvolutionStore, EvolutionMap) {
        let store = EvolutionStore::new(
            dir,
            dir.join(".taskmerge"),
            "file_evolution.json",
            "baselines",
        );
        let pointer = store.store_baseline_content("app.py", baseline, "t1").unwrap();
        let mut map = EvolutionMap::new();
        map.insert(
            "app.py".into(),
            FileEvolution::new("app.py", "abc", "hash", pointer),
        );
        (store, map)
    }

    #[test]
    fn test_untracked_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut map) = tracked(dir.path(), "");
        let tracker = ModificationTracker::new(&store);
        let result = tracker
            .record_modification("t1", "other.py", Some(""), "def f():\n    pass\n", &mut map)
            .unwrap();
        assert!(result.is_none());
        assert!(map["app.py"].task_snapshots.is_empty());
        assert!(!map.contains_key("other.py"));
    }

    #[test]
    fn test_record_against_baseline_and_replace() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut map) = tracked(dir.path(), "def existing():\n    pass\n");
        let tracker = ModificationTracker::new(&store);

        let snap = tracker
            .record_modification(
                "t1",
                "app.py",
                None,
                "def existing():\n    pass\n\ndef helper():\n    pass\n",
                &mut map,
            )
            .unwrap()
            .unwrap();
        assert_eq!(snap.semantic_changes.len(), 1);
        assert_eq!(snap.semantic_changes[0].change_type, ChangeType::AddFunction);

        let snap = tracker
            .record_modification(
                "t1",
                "app.py",
                None,
                "def existing():\n    pass\n\nX = 1\n",
                &mut map,
            )
            .unwrap()
            .unwrap();
        assert_eq!(map["app.py"].task_snapshots.len(), 1);
        assert_eq!(snap.semantic_changes[0].change_type, ChangeType::AddVariable);
    }

    #[test]
    fn test_mark_completed_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut map) = tracked(dir.path(), "");
        let tracker = ModificationTracker::new(&store);
        tracker
            .record_modification("t1", "app.py", None, "X = 1\n", &mut map)
            .unwrap();

        assert_eq!(tracker.mark_task_completed("t1", &mut map), 1);
        let first = map["app.py"].task_snapshots[0].completed_at;
        assert!(first.is_some());
        assert_eq!(tracker.mark_task_completed("t1", &mut map), 0);
        assert_eq!(map["app.py"].task_snapshots[0].completed_at, first);
    }

    #[test]
    fn test_refresh_without_repo_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut map) = tracked(dir.path(), "");
        let tracker = ModificationTracker::new(&store);
        let snapshots = tracker.refresh_from_git("t1", dir.path(), "main", &mut map);
        assert!(snapshots.is_empty());
    }

    fn commit(repo: &git2::Repository, files: &[(&str, &str)], message: &str) {
        let workdir = repo.workdir().unwrap().to_path_buf();
        let mut index = repo.index().unwrap();
        for (path, content) in files {
            std::fs::write(workdir.join(path), content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("Test", "test@test.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
    }

    #[test]
    fn test_refresh_failure_leaves_snapshots_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = git2::Repository::init_opts(dir.path(), &opts).unwrap();
        commit(&repo, &[("a.py", "A = 1\n"), ("b.py", "B = 1\n")], "base");
        let base = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("task-t1", &base, false).unwrap();
        repo.set_head("refs/heads/task-t1").unwrap();
        commit(&repo, &[("a.py", "A = 2\n"), ("b.py", "B = 2\n")], "task");

        // b.py's new blob goes missing, so its read fails after a.py's succeeds.
        let blob = git2::Oid::hash_object(git2::ObjectType::Blob, b"B = 2\n").unwrap();
        let hex = blob.to_string();
        std::fs::remove_file(dir.path().join(".git/objects").join(&hex[..2]).join(&hex[2..]))
            .unwrap();

        let store = EvolutionStore::new(
            dir.path(),
            dir.path().join(".taskmerge"),
            "file_evolution.json",
            "baselines",
        );
        let mut map = EvolutionMap::new();
        for file in ["a.py", "b.py"] {
            let pointer = store.store_baseline_content(file, "", "t1").unwrap();
            map.insert(file.into(), FileEvolution::new(file, "abc", "hash", pointer));
        }

        let tracker = ModificationTracker::new(&store);
        let snapshots = tracker.refresh_from_git("t1", dir.path(), "main", &mut map);
        assert!(snapshots.is_empty());
        assert!(map.values().all(|e| e.task_snapshots.is_empty()));
    }
}
