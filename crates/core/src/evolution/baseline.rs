//! First-touch baseline capture.
//!
//! The first task to touch a file fixes its baseline: content hash, blob
//! pointer and commit. Later captures for other tasks reuse it so every task
//! diffs against the same reference point.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::TrackingConfig;
use crate::errors::StoreError;
use crate::evolution::store::{content_hash, EvolutionMap, EvolutionStore};
use crate::git::GitTimeline;
use crate::models::{FileEvolution, Metadata, TaskSnapshot};

/// Commit id recorded when the project is not a readable git repository.
pub const UNKNOWN_COMMIT: &str = "unknown";

/// Captures baselines into an [`EvolutionMap`].
pub struct BaselineCapture<'a> {
    store: &'a EvolutionStore,
    tracking: &'a TrackingConfig,
}

impl<'a> BaselineCapture<'a> {
    pub fn new(store: &'a EvolutionStore, tracking: &'a TrackingConfig) -> Self {
        Self { store, tracking }
    }

    /// Project files eligible for tracking.
    ///
    /// Uses the git index when the project is a repository and falls back to
    /// walking the directory tree otherwise. Either way the result passes the
    /// extension, ignored-directory, glob and size filters, sorted.
    pub fn discover_trackable_files(&self) -> Vec<String> {
        let candidates = match self.git_tracked_files() {
            Some(files) => files,
            None => {
                debug!("no git index, walking project directory");
                let mut files = Vec::new();
                self.walk(self.store.project_dir(), "", &mut files);
                files
            }
        };

        let files: BTreeSet<String> = candidates
            .into_iter()
            .filter(|rel| self.tracking.accepts(rel))
            .filter(|rel| self.within_size_limit(rel))
            .collect();
        debug!(count = files.len(), "discovered trackable files");
        files.into_iter().collect()
    }

    /// Git-tracked paths relative to the project root.
    fn git_tracked_files(&self) -> Option<Vec<String>> {
        let timeline = GitTimeline::open(self.store.project_dir()).ok()?;
        let tracked = timeline.list_tracked_files().ok()?;
        let prefix = timeline.path_prefix(self.store.project_dir())?;
        if prefix.is_empty() {
            return Some(tracked);
        }
        Some(
            tracked
                .into_iter()
                .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
                .collect(),
        )
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                if !self.tracking.ignored_dirs.iter().any(|d| d == &name) {
                    self.walk(&entry.path(), &rel, out);
                }
            } else if file_type.is_file() {
                out.push(rel);
            }
        }
    }

    fn within_size_limit(&self, rel: &str) -> bool {
        if self.tracking.max_file_size == 0 {
            return true;
        }
        fs::metadata(self.store.project_dir().join(rel))
            .map(|m| m.len() <= self.tracking.max_file_size)
            .unwrap_or(false)
    }

    /// HEAD commit of the project, or [`UNKNOWN_COMMIT`].
    pub fn get_current_commit(&self) -> String {
        match GitTimeline::open(self.store.project_dir()).and_then(|t| t.head_sha()) {
            Ok(sha) => sha,
            Err(e) => {
                warn!(error = %e, "cannot resolve HEAD, recording unknown baseline commit");
                UNKNOWN_COMMIT.to_string()
            }
        }
    }

    /// Baseline `files` (or every trackable file) for `task_id`.
    ///
    /// Untracked files get a new [`FileEvolution`] whose baseline is their
    /// current content (empty if the file does not exist yet). Files already
    /// tracked keep their baseline. Either way the task gets an open
    /// snapshot on each file. Non-UTF-8 files are skipped.
    ///
    /// Returns the evolutions created or touched, in path order.
    pub fn capture_baselines(
        &self,
        task_id: &str,
        files: Option<&[String]>,
        intent: &str,
        metadata: &Metadata,
        evolutions: &mut EvolutionMap,
    ) -> Result<Vec<FileEvolution>, StoreError> {
        let files: Vec<String> = match files {
            Some(list) => {
                let mut normalized = BTreeSet::new();
                for file in list {
                    normalized.insert(self.store.get_relative_path(Path::new(file))?);
                }
                normalized.into_iter().collect()
            }
            None => self.discover_trackable_files(),
        };

        let commit = self.get_current_commit();
        let mut affected = Vec::new();
        let mut created = 0usize;

        for file in files {
            if !evolutions.contains_key(&file) {
                let content = match self.store.read_file_content(&file) {
                    Ok(content) => content.unwrap_or_default(),
                    Err(StoreError::BinaryContent(path)) => {
                        warn!(file = %path, task_id, "skipping non-text file");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let pointer = self.store.store_baseline_content(&file, &content, task_id)?;
                let evolution =
                    FileEvolution::new(&file, &commit, content_hash(&content), pointer);
                evolutions.insert(file.clone(), evolution);
                created += 1;
            } else {
                debug!(file = %file, task_id, "baseline already captured");
            }

            if let Some(evolution) = evolutions.get_mut(&file) {
                if evolution.get_task_snapshot(task_id).is_none() {
                    let mut snapshot = TaskSnapshot::new(task_id, intent);
                    snapshot.metadata = metadata.clone();
                    evolution.add_task_snapshot(snapshot);
                }
                affected.push(evolution.clone());
            }
        }

        info!(task_id, created, affected = affected.len(), commit = %commit, "captured baselines");
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, EvolutionStore, TrackingConfig) {
        let dir = tempfile::tempdir().unwrap();
        let store = EvolutionStore::new(
            dir.path(),
            dir.path().join(".taskmerge"),
            "file_evolution.json",
            "baselines",
        );
        (dir, store, TrackingConfig::default())
    }

    #[test]
    fn test_discover_without_git_walks_and_filters() {
        let (dir, store, tracking) = setup();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("src/app.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("src/image.png"), "png").unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "1").unwrap();
        fs::write(dir.path().join("main.go"), "package main\n").unwrap();

        let capture = BaselineCapture::new(&store, &tracking);
        assert_eq!(
            capture.discover_trackable_files(),
            vec!["main.go", "src/app.py"]
        );
        assert_eq!(capture.get_current_commit(), UNKNOWN_COMMIT);
    }

    #[test]
    fn test_capture_is_first_writer_wins() {
        let (dir, store, tracking) = setup();
        fs::write(dir.path().join("app.py"), "def existing():\n    pass\n").unwrap();
        let capture = BaselineCapture::new(&store, &tracking);
        let mut map = EvolutionMap::new();
        let files = vec!["app.py".to_string()];

        let first = capture
            .capture_baselines("t1", Some(files.as_slice()), "first", &Metadata::new(), &mut map)
            .unwrap();
        assert_eq!(first.len(), 1);
        let hash = map["app.py"].baseline_content_hash.clone();

        fs::write(dir.path().join("app.py"), "changed\n").unwrap();
        capture
            .capture_baselines("t2", Some(files.as_slice()), "second", &Metadata::new(), &mut map)
            .unwrap();

        let evo = &map["app.py"];
        assert_eq!(evo.baseline_content_hash, hash);
        assert_eq!(evo.task_snapshots.len(), 2);
        assert_eq!(
            store.read_baseline_content(&evo.baseline_snapshot_path).unwrap(),
            "def existing():\n    pass\n"
        );
    }

    #[test]
    fn test_capture_missing_file_has_empty_baseline() {
        let (_dir, store, tracking) = setup();
        let capture = BaselineCapture::new(&store, &tracking);
        let mut map = EvolutionMap::new();
        let mut metadata = Metadata::new();
        metadata.insert("ticket".into(), serde_json::json!("001"));
        capture
            .capture_baselines(
                "t1",
                Some(&["new_module.py".to_string()][..]),
                "create module",
                &metadata,
                &mut map,
            )
            .unwrap();
        let evo = &map["new_module.py"];
        assert_eq!(evo.baseline_content_hash, content_hash(""));
        let snap = evo.get_task_snapshot("t1").unwrap();
        assert_eq!(snap.task_intent, "create module");
        assert_eq!(snap.metadata["ticket"], "001");
    }
}
