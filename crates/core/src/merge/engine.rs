//! Strategy registry and file-level merge.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::strategies::{self, topo_sort};
use super::strategy::{MergeContext, MergeDecision, MergeResult, MergeStrategy};
use crate::config::MergeConfig;
use crate::conflict::{ConflictDetector, ConflictRegion, ConflictSeverity, RegionChange};
use crate::models::{FileEvolution, TaskSnapshot, META_DEPENDS_ON};
use crate::semantic::{extract_elements, Language};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

const BUILTIN_NAMES: &[&str] = &[
    "hooks_then_wrap",
    "hooks",
    "order_by_dependency",
    "append_functions",
    "append_methods",
    "append_statements",
    "order_by_time",
    "replay_disjoint",
];

/// Strategies in priority order; the first whose precondition holds wins.
#[derive(Debug)]
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn MergeStrategy>>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl StrategyRegistry {
    /// A registry that resolves nothing.
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Every built-in strategy.
    pub fn with_defaults() -> Self {
        Self {
            strategies: strategies::builtin(),
        }
    }

    /// Registry for `[merge]` settings: empty when auto-merge is off,
    /// otherwise the built-ins minus the disabled ones.
    pub fn from_config(config: &MergeConfig) -> Self {
        if !config.auto_merge {
            return Self::empty();
        }
        Self::with_defaults().without(&config.disabled_strategies)
    }

    /// Names of the built-in strategies, in priority order.
    pub fn builtin_names() -> &'static [&'static str] {
        BUILTIN_NAMES
    }

    /// Drop the named strategies.
    pub fn without(mut self, disabled: &[String]) -> Self {
        self.strategies
            .retain(|s| !disabled.iter().any(|d| d == s.name()));
        self
    }

    /// Append a strategy at the lowest priority.
    pub fn register(&mut self, strategy: Box<dyn MergeStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// First strategy that supports the region's change types and accepts
    /// its changes.
    pub fn find(
        &self,
        region: &ConflictRegion,
        changes: &[RegionChange<'_>],
    ) -> Option<&dyn MergeStrategy> {
        self.strategies
            .iter()
            .map(|s| s.as_ref())
            .find(|s| s.supports(&region.change_types) && s.precondition(region, changes))
    }

    pub fn can_resolve(&self, region: &ConflictRegion, changes: &[RegionChange<'_>]) -> bool {
        region.severity < ConflictSeverity::High && self.find(region, changes).is_some()
    }

    /// Resolve one region. High severity and unmatched regions are
    /// `ManualRequired`.
    pub fn resolve(&self, context: &MergeContext) -> MergeResult {
        let region = &context.region;
        if region.severity == ConflictSeverity::High {
            return MergeResult::manual(format!(
                "overlapping edits in {} by {} task(s)",
                region.location,
                region.tasks_involved.len()
            ));
        }
        let changes = context.region_changes();
        match self.find(region, &changes) {
            Some(strategy) => {
                let result = strategy.execute(context);
                debug!(
                    location = %region.location,
                    strategy = strategy.name(),
                    decision = %result.decision,
                    "resolved region"
                );
                result
            }
            None => MergeResult::manual(format!(
                "no strategy handles {} in {}",
                region
                    .change_types
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join("+"),
                region.location
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// File-level merge
// ---------------------------------------------------------------------------

/// Outcome for one region of a file merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionMergeResult {
    pub location: String,
    pub severity: ConflictSeverity,
    pub result: MergeResult,
}

/// Outcome of merging every region of one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMergeResult {
    pub file_path: String,
    pub decision: MergeDecision,
    /// Present only when every region auto-merged.
    pub merged_content: Option<String>,
    pub region_results: Vec<RegionMergeResult>,
    pub explanation: String,
}

impl FileMergeResult {
    pub fn is_auto_merged(&self) -> bool {
        self.decision == MergeDecision::AutoMerged
    }
}

/// Composes all regions of a file over its baseline.
pub struct MergeEngine<'a> {
    registry: &'a StrategyRegistry,
}

impl<'a> MergeEngine<'a> {
    pub fn new(registry: &'a StrategyRegistry) -> Self {
        Self { registry }
    }

    /// Merge the selected tasks' changes to one file.
    ///
    /// Non-additive regions are applied first, then additive regions in
    /// dependency order, then by earliest task start, then by location.
    /// Every added element must survive into the merged text.
    pub fn merge_file(
        &self,
        evolution: &FileEvolution,
        baseline_content: &str,
        task_ids: Option<&[String]>,
    ) -> FileMergeResult {
        let file_path = evolution.file_path.clone();
        let detector = ConflictDetector::new(self.registry);
        let regions = detector.analyze(evolution, task_ids);
        if regions.is_empty() {
            return FileMergeResult {
                file_path,
                decision: MergeDecision::AutoMerged,
                merged_content: Some(baseline_content.to_string()),
                region_results: Vec::new(),
                explanation: "no changes to merge".into(),
            };
        }

        let snapshots: Vec<&TaskSnapshot> = evolution
            .task_snapshots
            .iter()
            .filter(|s| task_ids.map_or(true, |ids| ids.iter().any(|t| t == &s.task_id)))
            .collect();

        let mut content = baseline_content.to_string();
        let mut region_results = Vec::with_capacity(regions.len());
        for region in order_regions(regions, &snapshots) {
            let context = MergeContext {
                file_path: file_path.clone(),
                baseline_content: content.clone(),
                task_snapshots: snapshots
                    .iter()
                    .filter(|s| region.tasks_involved.contains(&s.task_id))
                    .map(|s| (*s).clone())
                    .collect(),
                region,
            };
            let result = self.registry.resolve(&context);
            if let Some(merged) = result.merged_content.as_ref().filter(|_| result.is_auto_merged()) {
                content = merged.clone();
            }
            region_results.push(RegionMergeResult {
                location: context.region.location,
                severity: context.region.severity,
                result,
            });
        }

        let decision = if region_results
            .iter()
            .any(|r| r.result.decision == MergeDecision::Conflict)
        {
            MergeDecision::Conflict
        } else if region_results
            .iter()
            .any(|r| r.result.decision == MergeDecision::ManualRequired)
        {
            MergeDecision::ManualRequired
        } else {
            MergeDecision::AutoMerged
        };

        if decision != MergeDecision::AutoMerged {
            let pending: Vec<&str> = region_results
                .iter()
                .filter(|r| !r.result.is_auto_merged())
                .map(|r| r.location.as_str())
                .collect();
            info!(file = %file_path, %decision, regions = ?pending, "file needs attention");
            return FileMergeResult {
                file_path,
                decision,
                merged_content: None,
                explanation: format!("unresolved regions: {}", pending.join(", ")),
                region_results,
            };
        }

        let lost = lost_additions(&file_path, &content, &snapshots);
        if !lost.is_empty() {
            warn!(file = %file_path, lost = ?lost, "merged text dropped added elements");
            return FileMergeResult {
                file_path,
                decision: MergeDecision::Conflict,
                merged_content: None,
                explanation: format!("added elements missing after merge: {}", lost.join(", ")),
                region_results,
            };
        }

        info!(file = %file_path, regions = region_results.len(), "file auto-merged");
        FileMergeResult {
            file_path,
            decision: MergeDecision::AutoMerged,
            merged_content: Some(content),
            explanation: format!("auto-merged {} region(s)", region_results.len()),
            region_results,
        }
    }
}

/// Region application order. Non-additive regions keep location order and
/// come first. Additive regions are topologically sorted on cross-region
/// dependencies, ties broken by earliest task start then location. A
/// dependency cycle between regions falls back to the tie-break order.
fn order_regions(regions: Vec<ConflictRegion>, snapshots: &[&TaskSnapshot]) -> Vec<ConflictRegion> {
    let (additive, mut ordered): (Vec<ConflictRegion>, Vec<ConflictRegion>) =
        regions.into_iter().partition(ConflictRegion::is_additive);

    let mut provides: Vec<BTreeSet<String>> = vec![BTreeSet::new(); additive.len()];
    let mut needs: Vec<BTreeSet<String>> = vec![BTreeSet::new(); additive.len()];
    let mut earliest = vec![None; additive.len()];
    let index: HashMap<&str, usize> = additive
        .iter()
        .enumerate()
        .map(|(i, r)| (r.location.as_str(), i))
        .collect();
    for snapshot in snapshots {
        for change in &snapshot.semantic_changes {
            let Some(&i) = index.get(change.location.as_str()) else {
                continue;
            };
            provides[i].insert(change.simple_name().to_string());
            needs[i].extend(change.metadata_list(META_DEPENDS_ON));
            earliest[i] = Some(match earliest[i] {
                Some(at) if at <= snapshot.started_at => at,
                _ => snapshot.started_at,
            });
        }
    }

    let mut edges = Vec::new();
    for (dependent, wanted) in needs.iter().enumerate() {
        for (provider, offered) in provides.iter().enumerate() {
            if provider != dependent && !wanted.is_disjoint(offered) {
                edges.push((provider, dependent));
            }
        }
    }

    let rank = |n: usize| (earliest[n], additive[n].location.clone());
    let order = topo_sort(additive.len(), &edges, &rank).unwrap_or_else(|cycle| {
        debug!(regions = cycle.len(), "dependency cycle between regions, using start order");
        let mut fallback: Vec<usize> = (0..additive.len()).collect();
        fallback.sort_by_key(|&n| rank(n));
        fallback
    });

    let mut slots: Vec<Option<ConflictRegion>> = additive.into_iter().map(Some).collect();
    ordered.extend(order.into_iter().filter_map(|n| slots[n].take()));
    ordered
}

/// Added elements from `snapshots` that no longer extract from `merged`.
fn lost_additions(file_path: &str, merged: &str, snapshots: &[&TaskSnapshot]) -> Vec<String> {
    let lang = Language::from_path(file_path);
    if !lang.is_structured() {
        return Vec::new();
    }
    let present: BTreeSet<String> = extract_elements(merged, lang)
        .into_iter()
        .map(|e| e.name)
        .collect();
    let mut lost: Vec<String> = snapshots
        .iter()
        .flat_map(|s| &s.semantic_changes)
        .filter(|c| c.change_type.is_additive() && !present.contains(&c.target))
        .map(|c| c.target.clone())
        .collect();
    lost.sort();
    lost.dedup();
    lost
}
