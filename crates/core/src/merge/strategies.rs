//! Built-in merge strategies, in registry priority order.
//!
//! Each strategy claims a disjoint region shape through its precondition and
//! applies the region's changes to the context's baseline text with the
//! anchor-based edits in [`super::edit`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use super::edit;
use super::strategy::{MergeContext, MergeResult, MergeStrategy};
use crate::conflict::{ConflictRegion, RegionChange};
use crate::models::{
    ChangeType, SemanticChange, META_CALL_AFTER, META_CALL_BEFORE, META_DEPENDS_ON, META_HOOKS,
    META_PARENT, META_RETURN_AFTER, META_RETURN_BEFORE,
};
use crate::semantic::Language;

const ADDITIVE: &[ChangeType] = &[
    ChangeType::AddImport,
    ChangeType::AddFunction,
    ChangeType::AddMethod,
    ChangeType::AddClass,
    ChangeType::AddVariable,
    ChangeType::AddStatement,
];

const ALL: &[ChangeType] = &[
    ChangeType::AddImport,
    ChangeType::RemoveImport,
    ChangeType::AddFunction,
    ChangeType::RemoveFunction,
    ChangeType::ModifyFunction,
    ChangeType::AddMethod,
    ChangeType::RemoveMethod,
    ChangeType::ModifyMethod,
    ChangeType::AddClass,
    ChangeType::RemoveClass,
    ChangeType::ModifyClass,
    ChangeType::AddVariable,
    ChangeType::RemoveVariable,
    ChangeType::ModifyVariable,
    ChangeType::AddStatement,
    ChangeType::RemoveStatement,
    ChangeType::AddHookCall,
    ChangeType::WrapReturn,
    ChangeType::ModifyCallArguments,
    ChangeType::FormattingOnly,
    ChangeType::ModifyFile,
];

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn task_count(changes: &[RegionChange<'_>]) -> usize {
    changes.iter().map(|c| c.task_id).collect::<BTreeSet<_>>().len()
}

fn all_additive(changes: &[RegionChange<'_>]) -> bool {
    !changes.is_empty() && changes.iter().all(|c| c.change.change_type.is_additive())
}

/// Deterministic order: task start time, then task id, then position.
fn by_time(a: &(usize, &RegionChange<'_>), b: &(usize, &RegionChange<'_>)) -> Ordering {
    (a.1.started_at, a.1.task_id, a.0).cmp(&(b.1.started_at, b.1.task_id, b.0))
}

fn time_ordered<'c, 'a>(changes: &'c [RegionChange<'a>]) -> Vec<&'c RegionChange<'a>> {
    let mut indexed: Vec<(usize, &RegionChange<'a>)> = changes.iter().enumerate().collect();
    indexed.sort_by(by_time);
    indexed.into_iter().map(|(_, c)| c).collect()
}

/// Kahn's algorithm over `count` nodes. `edges` are `(before, after)`
/// pairs; among ready nodes the smallest `rank` goes first.
///
/// Returns the order, or the nodes left on a cycle.
pub(crate) fn topo_sort<K: Ord>(
    count: usize,
    edges: &[(usize, usize)],
    rank: impl Fn(usize) -> K,
) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    for &(before, after) in edges {
        in_degree[after] += 1;
        dependents[before].push(after);
    }

    let mut ready: BTreeSet<(K, usize)> = (0..count)
        .filter(|&n| in_degree[n] == 0)
        .map(|n| (rank(n), n))
        .collect();
    let mut order = Vec::with_capacity(count);
    while let Some((_, node)) = ready.pop_first() {
        order.push(node);
        for &next in &dependents[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert((rank(next), next));
            }
        }
    }

    if order.len() != count {
        let placed: BTreeSet<usize> = order.iter().copied().collect();
        return Err((0..count).filter(|n| !placed.contains(n)).collect());
    }
    Ok(order)
}

/// Dependency edges among `changes`: Y before X when X's `depends_on`
/// names Y's simple name.
fn dependency_edges<I>(names: &[&str], depends: I) -> Vec<(usize, usize)>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut providers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, name) in names.iter().enumerate() {
        providers.entry(*name).or_default().push(index);
    }
    let mut edges = BTreeSet::new();
    for (index, deps) in depends.into_iter().enumerate() {
        for dep in deps {
            for &provider in providers.get(dep.as_str()).into_iter().flatten() {
                if provider != index {
                    edges.insert((provider, index));
                }
            }
        }
    }
    edges.into_iter().collect()
}

fn region_edges(changes: &[RegionChange<'_>]) -> Vec<(usize, usize)> {
    let names: Vec<&str> = changes.iter().map(|c| c.change.simple_name()).collect();
    dependency_edges(
        &names,
        changes.iter().map(|c| c.change.metadata_list(META_DEPENDS_ON)),
    )
}

/// Owning class of a member change.
fn parent_of(change: &SemanticChange) -> Option<&str> {
    change
        .metadata_str(META_PARENT)
        .or_else(|| change.target.rsplit_once('.').map(|(parent, _)| parent))
}

fn first_seen<K: PartialEq, V>(groups: &mut Vec<(K, Vec<V>)>, key: K, value: V) {
    match groups.iter_mut().find(|(k, _)| *k == key) {
        Some((_, values)) => values.push(value),
        None => groups.push((key, vec![value])),
    }
}

/// Apply additive changes in the given order. Imports, statements and
/// top-level definitions are each inserted as one batch so their relative
/// order is kept.
fn apply_additive(content: &str, lang: Language, changes: &[&SemanticChange]) -> Result<String, String> {
    let mut imports: Vec<&str> = Vec::new();
    let mut statements: Vec<&str> = Vec::new();
    let mut top_level: Vec<(&str, &str)> = Vec::new();
    let mut members: Vec<(&str, Vec<(&str, &str)>)> = Vec::new();

    for change in changes {
        let text = change
            .content_after
            .as_deref()
            .ok_or_else(|| format!("{} {} carries no content", change.change_type, change.target))?;
        match change.change_type {
            ChangeType::AddImport => imports.push(text),
            ChangeType::AddVariable | ChangeType::AddStatement => statements.push(text),
            ChangeType::AddFunction | ChangeType::AddClass => {
                top_level.push((change.target.as_str(), text))
            }
            ChangeType::AddMethod => match parent_of(change) {
                Some(_) if lang == Language::Go => top_level.push((change.target.as_str(), text)),
                Some(parent) => first_seen(&mut members, parent, (change.target.as_str(), text)),
                None => top_level.push((change.target.as_str(), text)),
            },
            other => return Err(format!("{other} is not an addition")),
        }
    }

    let mut merged = edit::insert_imports(content, lang, &imports);
    merged = edit::insert_after_imports(&merged, lang, &statements);
    merged = edit::append_top_level(&merged, lang, &top_level);
    for (parent, methods) in members {
        merged = edit::append_to_class(&merged, lang, parent, &methods)
            .ok_or_else(|| format!("class {parent} not found for new methods"))?;
    }
    Ok(merged)
}

/// Apply one in-place change.
fn apply_change(content: &str, lang: Language, change: &SemanticChange) -> Result<String, String> {
    let target = change.target.as_str();
    let missing = || format!("{} anchor {target} not found", change.change_type);
    let meta = |key: &str| {
        change
            .metadata_str(key)
            .ok_or_else(|| format!("{} on {target} lacks {key}", change.change_type))
    };
    match change.change_type {
        ChangeType::AddHookCall => {
            edit::insert_hooks(content, lang, target, &change.metadata_list(META_HOOKS))
                .ok_or_else(missing)
        }
        ChangeType::WrapReturn => edit::wrap_return(
            content,
            lang,
            target,
            meta(META_RETURN_BEFORE)?,
            meta(META_RETURN_AFTER)?,
        )
        .ok_or_else(missing),
        ChangeType::ModifyCallArguments => edit::replace_line(
            content,
            lang,
            target,
            meta(META_CALL_BEFORE)?,
            meta(META_CALL_AFTER)?,
        )
        .ok_or_else(missing),
        ChangeType::ModifyFile => change
            .content_after
            .clone()
            .ok_or_else(|| format!("file rewrite of {target} carries no content")),
        kind if kind.is_removal() => {
            // Already gone is as good as removed.
            Ok(edit::remove_element(content, lang, target).unwrap_or_else(|| content.to_string()))
        }
        kind if kind.is_additive() => apply_additive(content, lang, &[change]),
        _ => {
            let after = change
                .content_after
                .as_deref()
                .ok_or_else(|| format!("{} on {target} carries no content", change.change_type))?;
            edit::replace_element(content, lang, target, after).ok_or_else(missing)
        }
    }
}

fn resolved(name: &'static str, result: Result<String, String>, what: String) -> MergeResult {
    match result {
        Ok(content) => MergeResult::auto_merged(content, name, what),
        Err(reason) => {
            debug!(strategy = name, %reason, "strategy declined");
            MergeResult::conflict(Some(name), reason)
        }
    }
}

/// Hooks grouped by target in time order, for hook-shaped strategies.
fn hooks_by_target<'c>(changes: &[&'c RegionChange<'_>]) -> BTreeMap<&'c str, Vec<String>> {
    let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for change in changes {
        if change.change.change_type == ChangeType::AddHookCall {
            grouped
                .entry(change.change.target.as_str())
                .or_default()
                .extend(change.change.metadata_list(META_HOOKS));
        }
    }
    grouped
}

fn apply_hooks(content: &str, lang: Language, hooks: &BTreeMap<&str, Vec<String>>) -> Result<String, String> {
    let mut merged = content.to_string();
    for (target, calls) in hooks {
        merged = edit::insert_hooks(&merged, lang, target, calls)
            .ok_or_else(|| format!("function {target} not found for hook calls"))?;
    }
    Ok(merged)
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Hook insertions followed by a single return wrap per function.
#[derive(Debug, Default)]
pub struct HooksThenWrap;

impl MergeStrategy for HooksThenWrap {
    fn name(&self) -> &'static str {
        "hooks_then_wrap"
    }

    fn supported_change_types(&self) -> &'static [ChangeType] {
        &[ChangeType::AddHookCall, ChangeType::WrapReturn]
    }

    fn precondition(&self, region: &ConflictRegion, changes: &[RegionChange<'_>]) -> bool {
        if !region.change_types.contains(&ChangeType::WrapReturn) {
            return false;
        }
        let mut wraps: HashMap<&str, usize> = HashMap::new();
        for change in changes {
            if change.change.change_type == ChangeType::WrapReturn {
                *wraps.entry(change.change.target.as_str()).or_default() += 1;
            }
        }
        wraps.values().all(|&n| n <= 1)
    }

    fn execute(&self, context: &MergeContext) -> MergeResult {
        let lang = Language::from_path(&context.file_path);
        let changes = context.region_changes();
        let ordered = time_ordered(&changes);
        let hooks = hooks_by_target(&ordered);
        let result = apply_hooks(&context.baseline_content, lang, &hooks).and_then(|mut merged| {
            for change in ordered
                .iter()
                .filter(|c| c.change.change_type == ChangeType::WrapReturn)
            {
                merged = apply_change(&merged, lang, change.change)?;
            }
            Ok(merged)
        });
        resolved(
            self.name(),
            result,
            format!("inserted hooks then wrapped returns in {}", context.region.location),
        )
    }
}

/// Independent hook calls at the top of the same function body.
#[derive(Debug, Default)]
pub struct Hooks;

impl MergeStrategy for Hooks {
    fn name(&self) -> &'static str {
        "hooks"
    }

    fn supported_change_types(&self) -> &'static [ChangeType] {
        &[ChangeType::AddHookCall]
    }

    fn precondition(&self, region: &ConflictRegion, _changes: &[RegionChange<'_>]) -> bool {
        region.change_types.len() == 1 && region.change_types.contains(&ChangeType::AddHookCall)
    }

    fn execute(&self, context: &MergeContext) -> MergeResult {
        let lang = Language::from_path(&context.file_path);
        let changes = context.region_changes();
        let hooks = hooks_by_target(&time_ordered(&changes));
        resolved(
            self.name(),
            apply_hooks(&context.baseline_content, lang, &hooks),
            format!(
                "inserted hook calls from {} task(s) in {}",
                context.region.tasks_involved.len(),
                context.region.location
            ),
        )
    }
}

/// Additions from several tasks where some depend on others.
#[derive(Debug, Default)]
pub struct OrderByDependency;

impl MergeStrategy for OrderByDependency {
    fn name(&self) -> &'static str {
        "order_by_dependency"
    }

    fn supported_change_types(&self) -> &'static [ChangeType] {
        ADDITIVE
    }

    fn precondition(&self, _region: &ConflictRegion, changes: &[RegionChange<'_>]) -> bool {
        if !all_additive(changes) || task_count(changes) < 2 {
            return false;
        }
        let edges = region_edges(changes);
        !edges.is_empty() && topo_sort(changes.len(), &edges, |n| n).is_ok()
    }

    fn execute(&self, context: &MergeContext) -> MergeResult {
        let lang = Language::from_path(&context.file_path);
        let changes = context.region_changes();
        let edges = region_edges(&changes);
        let rank = |n: usize| (changes[n].started_at, changes[n].task_id, n);
        let result = match topo_sort(changes.len(), &edges, rank) {
            Ok(order) => {
                let ordered: Vec<&SemanticChange> = order.iter().map(|&n| changes[n].change).collect();
                apply_additive(&context.baseline_content, lang, &ordered)
            }
            Err(cycle) => {
                let members: Vec<&str> = cycle.iter().map(|&n| changes[n].change.target.as_str()).collect();
                Err(format!("dependency cycle among [{}]", members.join(", ")))
            }
        };
        resolved(
            self.name(),
            result,
            format!("inserted additions in dependency order in {}", context.region.location),
        )
    }
}

fn single_task_subset(changes: &[RegionChange<'_>], region: &ConflictRegion, allowed: &[ChangeType]) -> bool {
    task_count(changes) == 1 && region.change_types.iter().all(|t| allowed.contains(t))
}

fn append_in_order(name: &'static str, context: &MergeContext, what: &str) -> MergeResult {
    let lang = Language::from_path(&context.file_path);
    let changes = context.region_changes();
    let ordered: Vec<&SemanticChange> = changes.iter().map(|c| c.change).collect();
    resolved(
        name,
        apply_additive(&context.baseline_content, lang, &ordered),
        format!("appended {} {what} in {}", ordered.len(), context.region.location),
    )
}

/// New functions or classes from one task, appended at end of file.
#[derive(Debug, Default)]
pub struct AppendFunctions;

impl MergeStrategy for AppendFunctions {
    fn name(&self) -> &'static str {
        "append_functions"
    }

    fn supported_change_types(&self) -> &'static [ChangeType] {
        &[ChangeType::AddFunction, ChangeType::AddClass]
    }

    fn precondition(&self, region: &ConflictRegion, changes: &[RegionChange<'_>]) -> bool {
        single_task_subset(changes, region, self.supported_change_types())
    }

    fn execute(&self, context: &MergeContext) -> MergeResult {
        append_in_order(self.name(), context, "definition(s)")
    }
}

/// New methods from one task, appended at the end of their class.
#[derive(Debug, Default)]
pub struct AppendMethods;

impl MergeStrategy for AppendMethods {
    fn name(&self) -> &'static str {
        "append_methods"
    }

    fn supported_change_types(&self) -> &'static [ChangeType] {
        &[ChangeType::AddMethod]
    }

    fn precondition(&self, region: &ConflictRegion, changes: &[RegionChange<'_>]) -> bool {
        single_task_subset(changes, region, self.supported_change_types())
    }

    fn execute(&self, context: &MergeContext) -> MergeResult {
        append_in_order(self.name(), context, "method(s)")
    }
}

/// New imports, variables and statements from one task.
#[derive(Debug, Default)]
pub struct AppendStatements;

impl MergeStrategy for AppendStatements {
    fn name(&self) -> &'static str {
        "append_statements"
    }

    fn supported_change_types(&self) -> &'static [ChangeType] {
        &[
            ChangeType::AddImport,
            ChangeType::AddVariable,
            ChangeType::AddStatement,
        ]
    }

    fn precondition(&self, region: &ConflictRegion, changes: &[RegionChange<'_>]) -> bool {
        single_task_subset(changes, region, self.supported_change_types())
    }

    fn execute(&self, context: &MergeContext) -> MergeResult {
        append_in_order(self.name(), context, "statement(s)")
    }
}

/// Independent additions from several tasks, ordered by task start time.
#[derive(Debug, Default)]
pub struct OrderByTime;

impl MergeStrategy for OrderByTime {
    fn name(&self) -> &'static str {
        "order_by_time"
    }

    fn supported_change_types(&self) -> &'static [ChangeType] {
        ADDITIVE
    }

    fn precondition(&self, _region: &ConflictRegion, changes: &[RegionChange<'_>]) -> bool {
        all_additive(changes) && task_count(changes) > 1 && region_edges(changes).is_empty()
    }

    fn execute(&self, context: &MergeContext) -> MergeResult {
        let lang = Language::from_path(&context.file_path);
        let changes = context.region_changes();
        let ordered: Vec<&SemanticChange> = time_ordered(&changes).into_iter().map(|c| c.change).collect();
        resolved(
            self.name(),
            apply_additive(&context.baseline_content, lang, &ordered),
            format!(
                "inserted additions from {} task(s) by start time in {}",
                context.region.tasks_involved.len(),
                context.region.location
            ),
        )
    }
}

/// Replays in-place edits when no element is touched by two tasks.
#[derive(Debug, Default)]
pub struct ReplayDisjoint;

impl MergeStrategy for ReplayDisjoint {
    fn name(&self) -> &'static str {
        "replay_disjoint"
    }

    fn supported_change_types(&self) -> &'static [ChangeType] {
        ALL
    }

    fn precondition(&self, _region: &ConflictRegion, changes: &[RegionChange<'_>]) -> bool {
        let in_place = changes.iter().any(|c| {
            let kind = c.change.change_type;
            !kind.is_additive() && !kind.is_hook_shaped()
        });
        let mut owners: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for change in changes {
            owners
                .entry(change.change.target.as_str())
                .or_default()
                .insert(change.task_id);
        }
        in_place && owners.values().all(|tasks| tasks.len() == 1)
    }

    fn execute(&self, context: &MergeContext) -> MergeResult {
        let lang = Language::from_path(&context.file_path);
        let changes = context.region_changes();
        let ordered = time_ordered(&changes);
        let (additions, edits): (Vec<&RegionChange<'_>>, Vec<&RegionChange<'_>>) = ordered
            .into_iter()
            .partition(|c| c.change.change_type.is_additive());

        let mut merged = context.baseline_content.clone();
        let mut result = Ok(());
        for change in &edits {
            match apply_change(&merged, lang, change.change) {
                Ok(next) => merged = next,
                Err(reason) => {
                    result = Err(reason);
                    break;
                }
            }
        }
        let result = result.and_then(|()| {
            let added: Vec<&SemanticChange> = additions.iter().map(|c| c.change).collect();
            apply_additive(&merged, lang, &added)
        });
        resolved(
            self.name(),
            result,
            format!("replayed {} change(s) in {}", changes.len(), context.region.location),
        )
    }
}

/// Built-in strategies in priority order.
pub fn builtin() -> Vec<Box<dyn MergeStrategy>> {
    vec![
        Box::new(HooksThenWrap),
        Box::new(Hooks),
        Box::new(OrderByDependency),
        Box::new(AppendFunctions),
        Box::new(AppendMethods),
        Box::new(AppendStatements),
        Box::new(OrderByTime),
        Box::new(ReplayDisjoint),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictSeverity;
    use crate::models::TaskSnapshot;
    use chrono::{Duration, Utc};

    fn context(file: &str, baseline: &str, snapshots: Vec<TaskSnapshot>, location: &str) -> MergeContext {
        let mut region = ConflictRegion {
            file_path: file.to_string(),
            location: location.to_string(),
            tasks_involved: BTreeSet::new(),
            change_types: BTreeSet::new(),
            severity: ConflictSeverity::None,
            can_auto_merge: true,
        };
        for snapshot in &snapshots {
            for change in snapshot.semantic_changes.iter().filter(|c| c.location == location) {
                region.tasks_involved.insert(snapshot.task_id.clone());
                region.change_types.insert(change.change_type);
            }
        }
        MergeContext {
            file_path: file.to_string(),
            baseline_content: baseline.to_string(),
            task_snapshots: snapshots,
            region,
        }
    }

    fn snapshot(task: &str, offset_secs: i64, changes: Vec<SemanticChange>) -> TaskSnapshot {
        let mut snap = TaskSnapshot::new(task, "");
        snap.started_at = Utc::now() - Duration::seconds(100 - offset_secs);
        snap.semantic_changes = changes;
        snap
    }

    fn hook(target: &str, calls: &[&str]) -> SemanticChange {
        SemanticChange::new(ChangeType::AddHookCall, target, format!("function:{target}"), 1, 3)
            .with_metadata(META_HOOKS, calls.to_vec())
    }

    fn add_var(name: &str, text: &str, deps: &[&str]) -> SemanticChange {
        SemanticChange::new(ChangeType::AddVariable, name, "file_top", 1, 1)
            .with_after(text)
            .with_metadata(META_DEPENDS_ON, deps.to_vec())
    }

    fn run(strategy: &dyn MergeStrategy, ctx: &MergeContext) -> MergeResult {
        let changes = ctx.region_changes();
        assert!(strategy.supports(&ctx.region.change_types));
        assert!(strategy.precondition(&ctx.region, &changes), "{} declined", strategy.name());
        strategy.execute(ctx)
    }

    #[test]
    fn test_topo_sort_orders_and_detects_cycles() {
        let order = topo_sort(3, &[(2, 0), (0, 1)], |n| n).unwrap();
        assert_eq!(order, vec![2, 0, 1]);
        let cycle = topo_sort(3, &[(0, 1), (1, 0)], |n| n).unwrap_err();
        assert_eq!(cycle, vec![0, 1]);
    }

    #[test]
    fn test_hooks_from_two_tasks() {
        let baseline = "def handler(req):\n    return process(req)\n";
        let ctx = context(
            "app.py",
            baseline,
            vec![
                snapshot("t2", 20, vec![hook("handler", &["trace()"])]),
                snapshot("t1", 10, vec![hook("handler", &["audit(req)"])]),
            ],
            "function:handler",
        );
        let result = run(&Hooks, &ctx);
        assert!(result.is_auto_merged());
        assert_eq!(
            result.merged_content.unwrap(),
            "def handler(req):\n    audit(req)\n    trace()\n    return process(req)\n"
        );
    }

    #[test]
    fn test_hooks_then_wrap() {
        let baseline = "function handler(req) {\n  return process(req);\n}\n";
        let wrap = SemanticChange::new(ChangeType::WrapReturn, "handler", "function:handler", 1, 3)
            .with_metadata(META_RETURN_BEFORE, "process(req)")
            .with_metadata(META_RETURN_AFTER, "cache(process(req))");
        let ctx = context(
            "app.js",
            baseline,
            vec![
                snapshot("t1", 10, vec![hook("handler", &["audit(req);"])]),
                snapshot("t2", 20, vec![wrap]),
            ],
            "function:handler",
        );
        assert!(!Hooks.precondition(&ctx.region, &ctx.region_changes()));
        let result = run(&HooksThenWrap, &ctx);
        assert_eq!(
            result.merged_content.unwrap(),
            "function handler(req) {\n  audit(req);\n  return cache(process(req));\n}\n"
        );
    }

    #[test]
    fn test_order_by_dependency_puts_dependency_first() {
        let baseline = "import os\n";
        // t1 started first but depends on t2's variable.
        let ctx = context(
            "app.py",
            baseline,
            vec![
                snapshot("t1", 10, vec![add_var("Y", "Y = X + 1", &["X"])]),
                snapshot("t2", 20, vec![add_var("X", "X = 1", &[])]),
            ],
            "file_top",
        );
        assert!(!OrderByTime.precondition(&ctx.region, &ctx.region_changes()));
        let result = run(&OrderByDependency, &ctx);
        assert_eq!(result.merged_content.unwrap(), "import os\n\nX = 1\nY = X + 1\n");
    }

    #[test]
    fn test_dependency_cycle_declines() {
        let ctx = context(
            "app.py",
            "",
            vec![
                snapshot("t1", 10, vec![add_var("A", "A = B", &["B"])]),
                snapshot("t2", 20, vec![add_var("B", "B = A", &["A"])]),
            ],
            "file_top",
        );
        let changes = ctx.region_changes();
        assert!(!OrderByDependency.precondition(&ctx.region, &changes));
        assert!(!OrderByTime.precondition(&ctx.region, &changes));
        let result = OrderByDependency.execute(&ctx);
        assert_eq!(result.decision, crate::merge::MergeDecision::Conflict);
        assert!(result.merged_content.is_none());
    }

    #[test]
    fn test_order_by_time_is_deterministic() {
        let baseline = "class Api:\n    def get(self):\n        return 1\n";
        let method = |name: &str| {
            SemanticChange::new(ChangeType::AddMethod, format!("Api.{name}"), "class:Api", 1, 2)
                .with_after(format!("    def {name}(self):\n        return 2"))
                .with_metadata(META_PARENT, "Api")
        };
        let ctx = context(
            "api.py",
            baseline,
            vec![
                snapshot("late", 50, vec![method("put")]),
                snapshot("early", 10, vec![method("post")]),
            ],
            "class:Api",
        );
        let first = run(&OrderByTime, &ctx).merged_content.unwrap();
        let second = run(&OrderByTime, &ctx).merged_content.unwrap();
        assert_eq!(first, second);
        assert!(first.find("def post").unwrap() < first.find("def put").unwrap());
    }

    #[test]
    fn test_append_functions_single_task() {
        let add = SemanticChange::new(ChangeType::AddFunction, "helper", "function:helper", 3, 4)
            .with_after("def helper():\n    pass");
        let ctx = context(
            "app.py",
            "def existing():\n    pass\n",
            vec![snapshot("t1", 0, vec![add])],
            "function:helper",
        );
        assert!(!AppendStatements.precondition(&ctx.region, &ctx.region_changes()));
        let merged = run(&AppendFunctions, &ctx).merged_content.unwrap();
        assert_eq!(merged, "def existing():\n    pass\n\n\ndef helper():\n    pass\n");
    }

    #[test]
    fn test_replay_disjoint_method_edits() {
        let baseline = "class Api:\n    def get(self):\n        return 1\n\n    def put(self):\n        return 2\n";
        let modify = SemanticChange::new(ChangeType::ModifyMethod, "Api.get", "class:Api", 2, 3)
            .with_after("    def get(self):\n        return 10");
        let remove = SemanticChange::new(ChangeType::RemoveMethod, "Api.put", "class:Api", 5, 6);
        let ctx = context(
            "api.py",
            baseline,
            vec![snapshot("t1", 0, vec![modify]), snapshot("t2", 5, vec![remove])],
            "class:Api",
        );
        let result = run(&ReplayDisjoint, &ctx);
        assert_eq!(
            result.merged_content.unwrap(),
            "class Api:\n    def get(self):\n        return 10\n"
        );
    }

    #[test]
    fn test_replay_missing_anchor_is_conflict() {
        let modify = SemanticChange::new(ChangeType::ModifyFunction, "gone", "function:gone", 1, 2)
            .with_after("def gone():\n    return 1");
        let ctx = context("app.py", "X = 1\n", vec![snapshot("t1", 0, vec![modify])], "function:gone");
        let result = run(&ReplayDisjoint, &ctx);
        assert_eq!(result.decision, crate::merge::MergeDecision::Conflict);
        assert_eq!(result.strategy.as_deref(), Some("replay_disjoint"));
    }

    #[test]
    fn test_replay_rejects_shared_target() {
        let modify = |task: &str| {
            snapshot(
                task,
                0,
                vec![SemanticChange::new(ChangeType::ModifyFunction, "f", "function:f", 1, 2)
                    .with_after("def f():\n    return 1")],
            )
        };
        let ctx = context("app.py", "", vec![modify("t1"), modify("t2")], "function:f");
        assert!(!ReplayDisjoint.precondition(&ctx.region, &ctx.region_changes()));
    }
}
