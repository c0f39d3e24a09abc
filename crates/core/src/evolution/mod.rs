//! Per-file evolution tracking: baseline capture, task snapshots, and their
//! on-disk store.

pub mod baseline;
pub mod lock;
pub mod modification;
pub mod store;

pub use baseline::{BaselineCapture, UNKNOWN_COMMIT};
pub use lock::ProjectLock;
pub use modification::ModificationTracker;
pub use store::{content_hash, EvolutionMap, EvolutionStore};
