//! Read-only Git history queries via `git2`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use git2::{Commit, Diff, DiffOptions, ErrorCode, Repository};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::errors::GitError;

/// Historical file content, diffs and worktree state of one repository.
pub struct GitTimeline {
    repo: Repository,
    repo_path: PathBuf,
}

/// Metadata of a single commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub summary: String,
    pub author_name: String,
    pub author_email: String,
    /// Seconds since the Unix epoch.
    pub author_time: i64,
}

impl GitTimeline {
    /// Open the repository containing `path` (a project root, subdirectory
    /// or linked worktree).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening git repository");
        let repo = Repository::discover(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Working directory, `None` for a bare repository.
    pub fn workdir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    /// Repository path of `dir` with a trailing `/`, empty at the root.
    /// `None` when `dir` is outside the working directory.
    pub fn path_prefix(&self, dir: &Path) -> Option<String> {
        let workdir = self.workdir()?;
        let workdir = workdir
            .canonicalize()
            .unwrap_or_else(|_| workdir.to_path_buf());
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let prefix = dir
            .strip_prefix(&workdir)
            .ok()?
            .to_string_lossy()
            .replace('\\', "/");
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            Some(String::new())
        } else {
            Some(format!("{prefix}/"))
        }
    }

    /// SHA of HEAD.
    pub fn head_sha(&self) -> Result<String, GitError> {
        Ok(self.resolve_commit("HEAD")?.id().to_string())
    }

    fn resolve_commit(&self, rev: &str) -> Result<Commit<'_>, GitError> {
        self.repo
            .revparse_single(rev)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|_| GitError::RefNotFound(rev.to_string()))
    }

    /// Content of `path` at `rev`; `None` if the file does not exist there.
    #[instrument(skip(self))]
    pub fn file_at_commit(&self, rev: &str, path: &str) -> Result<Option<String>, GitError> {
        let commit = self.resolve_commit(rev)?;
        let tree = commit.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let object = entry.to_object(&self.repo)?;
        let Some(blob) = object.as_blob() else {
            return Ok(None);
        };
        let text = std::str::from_utf8(blob.content()).map_err(|_| GitError::NotUtf8 {
            path: path.to_string(),
        })?;
        Ok(Some(text.to_string()))
    }

    /// Paths touched by `rev` relative to its first parent.
    #[instrument(skip(self))]
    pub fn files_changed_in_commit(&self, rev: &str) -> Result<Vec<String>, GitError> {
        let commit = self.resolve_commit(rev)?;
        let tree = commit.tree()?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(parent.tree()?),
            Err(_) => None,
        };
        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
        Ok(diff_paths(&diff))
    }

    /// Paths that differ between two commits.
    #[instrument(skip(self))]
    pub fn files_changed_between(&self, from: &str, to: &str) -> Result<Vec<String>, GitError> {
        let from_tree = self.resolve_commit(from)?.tree()?;
        let to_tree = self.resolve_commit(to)?.tree()?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)?;
        let paths = diff_paths(&diff);
        debug!(count = paths.len(), "diffed commits");
        Ok(paths)
    }

    /// Best common ancestor of two refs.
    #[instrument(skip(self))]
    pub fn merge_base(&self, a: &str, b: &str) -> Result<String, GitError> {
        let a = self.resolve_commit(a)?.id();
        let b = self.resolve_commit(b)?.id();
        Ok(self.repo.merge_base(a, b)?.to_string())
    }

    /// Summary and author metadata of `rev`.
    pub fn commit_info(&self, rev: &str) -> Result<CommitInfo, GitError> {
        let commit = self.resolve_commit(rev)?;
        let author = commit.author();
        Ok(CommitInfo {
            sha: commit.id().to_string(),
            summary: commit.summary().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("").to_string(),
            author_email: author.email().unwrap_or("").to_string(),
            author_time: author.when().seconds(),
        })
    }

    /// Files changed in this worktree relative to its branch point with
    /// `base_ref`, committed or not (untracked files included).
    #[instrument(skip(self))]
    pub fn worktree_changed_files(&self, base_ref: &str) -> Result<Vec<String>, GitError> {
        let base = self.merge_base(base_ref, "HEAD")?;
        let base_tree = self.resolve_commit(&base)?.tree()?;
        let mut opts = DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(Some(&base_tree), Some(&mut opts))?;
        let paths = diff_paths(&diff);
        info!(base = %base, count = paths.len(), "worktree changes");
        Ok(paths)
    }

    /// Every path in the index.
    pub fn list_tracked_files(&self) -> Result<Vec<String>, GitError> {
        let index = self.repo.index()?;
        let files = index
            .iter()
            .filter_map(|entry| String::from_utf8(entry.path).ok())
            .collect();
        Ok(files)
    }
}

/// Sorted, de-duplicated paths of every delta in `diff`.
fn diff_paths(diff: &Diff<'_>) -> Vec<String> {
    let paths: BTreeSet<String> = diff
        .deltas()
        .filter_map(|delta| {
            delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    paths.into_iter().collect()
}
