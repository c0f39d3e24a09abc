//! Git timeline access for baselines and worktree refreshes.

pub mod client;

pub use client::{CommitInfo, GitTimeline};
