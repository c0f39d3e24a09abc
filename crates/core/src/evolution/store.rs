//! Persistent evolution index and content-addressed baseline blobs.
//!
//! Layout under the storage directory:
//!
//! ```text
//! <storage>/file_evolution.json     path -> FileEvolution
//! <storage>/baselines/<sha256-hex>  one blob per distinct baseline text
//! ```
//!
//! Every write goes through a temp file in the destination directory
//! followed by a rename.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::StoreError;
use crate::models::FileEvolution;

/// Relative file path -> evolution.
pub type EvolutionMap = BTreeMap<String, FileEvolution>;

/// Hex SHA-256 of `content`.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Write `data` to `path` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::OutsideProject(path.display().to_string()))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

/// On-disk home of one project's evolution state.
#[derive(Debug, Clone)]
pub struct EvolutionStore {
    project_dir: PathBuf,
    storage_dir: PathBuf,
    index_path: PathBuf,
    baselines_name: String,
}

impl EvolutionStore {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        storage_dir: impl Into<PathBuf>,
        index_file: &str,
        baselines_dir: &str,
    ) -> Self {
        let storage_dir = storage_dir.into();
        Self {
            project_dir: project_dir.into(),
            index_path: storage_dir.join(index_file),
            storage_dir,
            baselines_name: baselines_dir.trim_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            &config.project.root,
            config.storage_dir(),
            &config.storage.index_file,
            &config.storage.baselines_dir,
        )
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    fn baselines_dir(&self) -> PathBuf {
        self.storage_dir.join(&self.baselines_name)
    }

    // -----------------------------------------------------------------------
    // Index
    // -----------------------------------------------------------------------

    /// Load the index; a missing index file is an empty map.
    pub fn load(&self) -> Result<EvolutionMap, StoreError> {
        if !self.index_path.exists() {
            debug!(path = %self.index_path.display(), "no evolution index yet");
            return Ok(EvolutionMap::new());
        }
        let raw = fs::read_to_string(&self.index_path)?;
        if raw.trim().is_empty() {
            return Ok(EvolutionMap::new());
        }
        let map: EvolutionMap = serde_json::from_str(&raw)?;
        debug!(files = map.len(), "loaded evolution index");
        Ok(map)
    }

    /// Replace the index atomically.
    pub fn save(&self, evolutions: &EvolutionMap) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(evolutions)?;
        write_atomic(&self.index_path, &json)?;
        debug!(files = evolutions.len(), "saved evolution index");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Baseline blobs
    // -----------------------------------------------------------------------

    /// Store `content` as a baseline blob and return its pointer.
    ///
    /// Identical content maps to the same blob; storing it again is a no-op.
    pub fn store_baseline_content(
        &self,
        file_path: &str,
        content: &str,
        task_id: &str,
    ) -> Result<String, StoreError> {
        let hash = content_hash(content);
        let pointer = format!("{}/{hash}", self.baselines_name);
        let blob_path = self.baselines_dir().join(&hash);

        if blob_path.exists() {
            debug!(file = file_path, task_id, %pointer, "baseline blob already stored");
            return Ok(pointer);
        }
        write_atomic(&blob_path, content.as_bytes())?;
        info!(file = file_path, task_id, %pointer, bytes = content.len(), "stored baseline blob");
        Ok(pointer)
    }

    fn blob_path(&self, pointer: &str) -> Result<PathBuf, StoreError> {
        let hash = pointer
            .strip_prefix(self.baselines_name.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| StoreError::InvalidPointer(pointer.to_string()))?;
        Ok(self.baselines_dir().join(hash))
    }

    /// Text of the blob behind `pointer`.
    pub fn read_baseline_content(&self, pointer: &str) -> Result<String, StoreError> {
        let path = self.blob_path(pointer)?;
        match fs::read(&path) {
            Ok(bytes) => String::from_utf8(bytes)
                .map_err(|_| StoreError::BinaryContent(pointer.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::BlobNotFound(pointer.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the blob behind `pointer`. Returns whether it existed.
    pub fn remove_baseline(&self, pointer: &str) -> Result<bool, StoreError> {
        let path = self.blob_path(pointer)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(%pointer, "removed baseline blob");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Working copy
    // -----------------------------------------------------------------------

    /// Live content of a project file; `None` if it does not exist.
    pub fn read_file_content(&self, relative_path: &str) -> Result<Option<String>, StoreError> {
        let path = self.project_dir.join(relative_path);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match String::from_utf8(bytes) {
            Ok(text) => Ok(Some(text)),
            Err(_) => {
                warn!(file = relative_path, "file is not UTF-8 text");
                Err(StoreError::BinaryContent(relative_path.to_string()))
            }
        }
    }

    /// Normalize `path` to a forward-slash path relative to the project
    /// root. Relative inputs are taken as already project-relative.
    pub fn get_relative_path(&self, path: &Path) -> Result<String, StoreError> {
        let relative = if path.is_absolute() {
            match path.strip_prefix(&self.project_dir) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => {
                    let canonical_root = self
                        .project_dir
                        .canonicalize()
                        .unwrap_or_else(|_| self.project_dir.clone());
                    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
                    canonical
                        .strip_prefix(&canonical_root)
                        .map(Path::to_path_buf)
                        .map_err(|_| StoreError::OutsideProject(path.display().to_string()))?
                }
            }
        } else {
            path.to_path_buf()
        };

        let mut parts: Vec<String> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return Err(StoreError::OutsideProject(path.display().to_string())),
            }
        }
        if parts.is_empty() {
            return Err(StoreError::OutsideProject(path.display().to_string()));
        }
        Ok(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskSnapshot;

    fn store_in(dir: &Path) -> EvolutionStore {
        EvolutionStore::new(
            dir,
            dir.join(".taskmerge"),
            "file_evolution.json",
            "baselines",
        )
    }

    #[test]
    fn test_load_missing_index_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let mut map = EvolutionMap::new();
        let mut evo = FileEvolution::new("app.py", "abc", "h", "baselines/h");
        evo.add_task_snapshot(TaskSnapshot::new("t1", "intent"));
        map.insert("app.py".into(), evo);
        store.save(&map).unwrap();
        assert_eq!(store.load().unwrap(), map);
        assert!(store.index_path().exists());
    }

    #[test]
    fn test_baseline_round_trip_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        for text in ["", "def f():\n    pass\n", "ünïcödé ✓\r\n"] {
            let pointer = store.store_baseline_content("a.py", text, "t1").unwrap();
            assert_eq!(store.read_baseline_content(&pointer).unwrap(), text);
            let again = store.store_baseline_content("b.py", text, "t2").unwrap();
            assert_eq!(pointer, again);
        }
        let blobs = fs::read_dir(dir.path().join(".taskmerge/baselines"))
            .unwrap()
            .count();
        assert_eq!(blobs, 3);
    }

    #[test]
    fn test_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let pointer = store.store_baseline_content("a.py", "x", "t1").unwrap();
        assert!(store.remove_baseline(&pointer).unwrap());
        assert!(!store.remove_baseline(&pointer).unwrap());
        assert!(matches!(
            store.read_baseline_content(&pointer),
            Err(StoreError::BlobNotFound(_))
        ));
        assert!(matches!(
            store.read_baseline_content("elsewhere/abc"),
            Err(StoreError::InvalidPointer(_))
        ));
    }

    #[test]
    fn test_read_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, 0x00]).unwrap();
        assert_eq!(
            store.read_file_content("src/a.py").unwrap().as_deref(),
            Some("x = 1\n")
        );
        assert_eq!(store.read_file_content("nope.py").unwrap(), None);
        assert!(matches!(
            store.read_file_content("blob.bin"),
            Err(StoreError::BinaryContent(_))
        ));
    }

    #[test]
    fn test_get_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let abs = dir.path().join("src").join("app.py");
        assert_eq!(store.get_relative_path(&abs).unwrap(), "src/app.py");
        assert_eq!(
            store.get_relative_path(Path::new("./src/app.py")).unwrap(),
            "src/app.py"
        );
        assert!(matches!(
            store.get_relative_path(Path::new("/definitely/elsewhere.py")),
            Err(StoreError::OutsideProject(_))
        ));
        assert!(store.get_relative_path(Path::new("../up.py")).is_err());
    }

    #[test]
    fn test_content_hash_is_sha256() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
