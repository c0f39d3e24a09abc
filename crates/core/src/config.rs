//! TOML-based configuration for the taskmerge engine.
//!
//! Every section has serde defaults, so an empty file (or
//! [`EngineConfig::for_project`]) yields a working configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::merge::StrategyRegistry;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level engine configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Project root and VCS settings.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Where the evolution index and baseline blobs live.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Which files are eligible for baseline capture.
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Merge behaviour.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Project root and version-control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project root directory. Relative paths resolve against the process cwd.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Branch a task worktree was forked from; its merge-base with the
    /// worktree HEAD is the task's branch point.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_base_branch() -> String {
    "main".into()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            base_branch: default_base_branch(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Evolution store layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage directory, relative to the project root unless absolute.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,

    /// File name of the evolution index inside the storage directory.
    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// Sub-directory holding content-addressed baseline blobs.
    #[serde(default = "default_baselines_dir")]
    pub baselines_dir: String,

    /// Hold an exclusive advisory lock around each read-modify-write cycle.
    #[serde(default = "default_true")]
    pub use_lock: bool,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".taskmerge")
}
fn default_index_file() -> String {
    "file_evolution.json".into()
}
fn default_baselines_dir() -> String {
    "baselines".into()
}
fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            index_file: default_index_file(),
            baselines_dir: default_baselines_dir(),
            use_lock: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

/// File discovery filters used by baseline capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// File extensions (without the dot) eligible for tracking.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory names pruned anywhere in the tree.
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,

    /// Extra glob patterns matched against the relative path.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Maximum file size in bytes. 0 = no limit.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_extensions() -> Vec<String> {
    [
        "py", "js", "jsx", "ts", "tsx", "mjs", "cjs", "rs", "go", "json", "toml", "yaml", "yml",
        "md", "css", "html",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_ignored_dirs() -> Vec<String> {
    [
        ".git",
        "node_modules",
        "target",
        "__pycache__",
        ".venv",
        "venv",
        "dist",
        "build",
        ".taskmerge",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignored_dirs: default_ignored_dirs(),
            ignore_patterns: Vec::new(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl TrackingConfig {
    /// Whether `rel_path` (forward-slash separated) passes the extension,
    /// directory and glob filters. Size is checked separately.
    pub fn accepts(&self, rel_path: &str) -> bool {
        let path = rel_path.replace('\\', "/");
        if path
            .split('/')
            .any(|segment| self.ignored_dirs.iter().any(|d| d == segment))
        {
            return false;
        }
        if self
            .ignore_patterns
            .iter()
            .any(|pattern| glob_match::glob_match(&pattern.replace('\\', "/"), &path))
        {
            return false;
        }
        match Path::new(&path).extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions.iter().any(|e| e.trim_start_matches('.') == ext),
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// When false every region resolves to manual.
    #[serde(default = "default_true")]
    pub auto_merge: bool,

    /// Strategy names removed from the registry.
    #[serde(default)]
    pub disabled_strategies: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            auto_merge: true,
            disabled_strategies: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level or `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl EngineConfig {
    /// Default configuration rooted at `root`.
    pub fn for_project<P: AsRef<Path>>(root: P) -> Self {
        Self {
            project: ProjectConfig {
                root: root.as_ref().to_path_buf(),
                ..ProjectConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load an [`EngineConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.base_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "project.base_branch".into(),
                detail: "base branch must not be empty".into(),
            });
        }
        if self.storage.index_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.index_file".into(),
                detail: "index file name must not be empty".into(),
            });
        }
        if self.storage.baselines_dir.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.baselines_dir".into(),
                detail: "baselines directory must not be empty".into(),
            });
        }
        if self.tracking.extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tracking.extensions".into(),
                detail: "at least one extension must be tracked".into(),
            });
        }
        let known = StrategyRegistry::builtin_names();
        for name in &self.merge.disabled_strategies {
            if !known.contains(&name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "merge.disabled_strategies".into(),
                    detail: format!("unknown strategy '{name}'"),
                });
            }
        }
        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Absolute-or-root-relative storage directory.
    pub fn storage_dir(&self) -> PathBuf {
        if self.storage.dir.is_absolute() {
            self.storage.dir.clone()
        } else {
            self.project.root.join(&self.storage.dir)
        }
    }
}
