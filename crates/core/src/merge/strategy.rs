//! Merge strategy interface and its inputs/outputs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::conflict::{ConflictRegion, RegionChange};
use crate::models::{ChangeType, TaskSnapshot};

/// Outcome of resolving one region (or one file).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MergeDecision {
    AutoMerged,
    /// A strategy matched but could not apply safely.
    Conflict,
    /// No strategy covers the region.
    ManualRequired,
}

impl std::fmt::Display for MergeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoMerged => write!(f, "auto_merged"),
            Self::Conflict => write!(f, "conflict"),
            Self::ManualRequired => write!(f, "manual_required"),
        }
    }
}

/// Read-only input to a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeContext {
    pub file_path: String,
    /// Text the region's changes are applied to.
    pub baseline_content: String,
    /// Snapshots of the tasks involved in `region`.
    pub task_snapshots: Vec<TaskSnapshot>,
    pub region: ConflictRegion,
}

impl MergeContext {
    /// Changes at the region's location, in snapshot order.
    pub fn region_changes(&self) -> Vec<RegionChange<'_>> {
        self.task_snapshots
            .iter()
            .filter(|s| self.region.tasks_involved.contains(&s.task_id))
            .flat_map(|snapshot| {
                snapshot
                    .semantic_changes
                    .iter()
                    .filter(|c| c.location == self.region.location)
                    .map(move |change| RegionChange {
                        task_id: &snapshot.task_id,
                        started_at: snapshot.started_at,
                        change,
                    })
            })
            .collect()
    }
}

/// What a strategy produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeResult {
    pub decision: MergeDecision,
    /// Present only when `decision` is `AutoMerged`.
    pub merged_content: Option<String>,
    /// Strategy that produced the result, if any matched.
    pub strategy: Option<String>,
    pub explanation: String,
}

impl MergeResult {
    pub fn auto_merged(content: String, strategy: &str, explanation: impl Into<String>) -> Self {
        Self {
            decision: MergeDecision::AutoMerged,
            merged_content: Some(content),
            strategy: Some(strategy.to_string()),
            explanation: explanation.into(),
        }
    }

    pub fn conflict(strategy: Option<&str>, explanation: impl Into<String>) -> Self {
        Self {
            decision: MergeDecision::Conflict,
            merged_content: None,
            strategy: strategy.map(str::to_string),
            explanation: explanation.into(),
        }
    }

    pub fn manual(explanation: impl Into<String>) -> Self {
        Self {
            decision: MergeDecision::ManualRequired,
            merged_content: None,
            strategy: None,
            explanation: explanation.into(),
        }
    }

    pub fn is_auto_merged(&self) -> bool {
        self.decision == MergeDecision::AutoMerged
    }
}

/// A pure resolution rule for one shape of region.
///
/// Strategies never mutate their input and never partially apply: `execute`
/// either returns fully merged content or declines with `Conflict`.
pub trait MergeStrategy: Send + Sync + std::fmt::Debug {
    /// Stable name, usable in `merge.disabled_strategies`.
    fn name(&self) -> &'static str;

    /// Change types this strategy knows how to apply.
    fn supported_change_types(&self) -> &'static [ChangeType];

    /// Whether this strategy claims the region.
    fn precondition(&self, region: &ConflictRegion, changes: &[RegionChange<'_>]) -> bool;

    /// Apply the region's changes to `context.baseline_content`.
    fn execute(&self, context: &MergeContext) -> MergeResult;

    /// `types` is a subset of [`Self::supported_change_types`].
    fn supports(&self, types: &BTreeSet<ChangeType>) -> bool {
        let supported = self.supported_change_types();
        types.iter().all(|t| supported.contains(t))
    }
}
