//! Region resolution and file-level merging.
//!
//! A [`StrategyRegistry`] holds the strategies in priority order.
//! [`MergeEngine`] composes every region of a file over its baseline.

pub mod edit;
pub mod engine;
pub mod strategies;
pub mod strategy;

pub use engine::{FileMergeResult, MergeEngine, RegionMergeResult, StrategyRegistry};
pub use strategy::{MergeContext, MergeDecision, MergeResult, MergeStrategy};
