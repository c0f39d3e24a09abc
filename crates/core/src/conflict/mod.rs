//! Conflict detection over accumulated task snapshots.
//!
//! Changes are grouped by location (`file_top`, `function:<name>`,
//! `class:<name>`); each group becomes a region with a severity and an
//! auto-mergeability verdict.

pub mod detector;

pub use detector::{
    assess_severity, changes_by_location, ConflictDetector, ConflictRegion, ConflictSeverity,
    RegionChange,
};
