//! taskmerge core library.
//!
//! Tracks how concurrent tasks evolve the files of one project and merges
//! their edits: baseline capture, structural diffing, conflict detection,
//! and strategy-driven merging over a persistent evolution store.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod evolution;
pub mod git;
pub mod logging;
pub mod merge;
pub mod models;
pub mod semantic;
pub mod tracker;

// Re-exports for convenience.
pub use config::EngineConfig;
pub use conflict::{ConflictDetector, ConflictRegion, ConflictSeverity};
pub use errors::CoreError;
pub use evolution::EvolutionStore;
pub use merge::{FileMergeResult, MergeContext, MergeDecision, MergeResult, StrategyRegistry};
pub use models::{ChangeType, FileEvolution, SemanticChange, TaskSnapshot};
pub use semantic::SemanticAnalyzer;
pub use tracker::EvolutionTracker;
