//! Merging task lists into one ordered plan.

use crate::consolidation::suggestion::{
    ConsolidationResult, CrossDependency, Duplicate, ParallelGroup, Suggestion,
};
use crate::core::{Issue, IssuePatch, Task, TaskGraph, TaskId};
use crate::error::Result;
use crate::state::StateStore;
use crate::{rlog, rlog_debug, rlog_warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Outcome of a consolidation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consolidated {
    /// Surviving tasks with rewritten dependencies and final groups.
    pub tasks: Vec<Task>,
    /// What was applied: the accepted duplicates and cross-dependencies,
    /// the final groups and the execution order.
    pub consolidation: ConsolidationResult,
    /// Nodes where the depth-first walk closed a cycle.
    pub cycles: Vec<TaskId>,
    pub cyclic_components: Vec<Vec<TaskId>>,
    /// Tasks left out of the order because they depend on a cycle.
    pub blocked: Vec<TaskId>,
}

impl Consolidated {
    pub fn is_acyclic(&self) -> bool {
        self.cycles.is_empty() && self.cyclic_components.is_empty()
    }

    /// Removed task id to the id it was merged into.
    pub fn replacements(&self) -> HashMap<TaskId, TaskId> {
        replacement_map(&self.consolidation.duplicates)
    }
}

fn replacement_map(duplicates: &[Duplicate]) -> HashMap<TaskId, TaskId> {
    duplicates
        .iter()
        .flat_map(|d| d.remove_ids.iter().map(move |id| (id.clone(), d.keep_id.clone())))
        .collect()
}

/// Merge `tasks` into one plan using `suggestion` where it is usable.
///
/// Applies duplicates, then cross-dependencies, then group hints; assigns
/// groups by fixed-point relaxation and orders the result depth-first,
/// seeded by the suggested order. Cycles are reported, never fatal.
pub fn consolidate(tasks: Vec<Task>, suggestion: &Suggestion) -> Consolidated {
    let suggested = suggestion.result();
    let mut tasks = dedupe_ids(tasks);
    for task in &mut tasks {
        task.normalize_dependencies();
    }

    let duplicates = apply_duplicates(&mut tasks, &suggested.duplicates);
    let replacements = replacement_map(&duplicates);
    let cross_dependencies =
        inject_cross_dependencies(&mut tasks, &suggested.cross_dependencies, &replacements);
    apply_group_hints(&mut tasks, &suggested.parallel_groups);

    let mut graph = TaskGraph::from_tasks(&tasks);
    let passes = graph.assign_parallel_groups();
    rlog_debug!("consolidation: groups settled after {} passes", passes);

    let seed: Vec<TaskId> = suggested
        .execution_order
        .iter()
        .map(|id| replacements.get(id).unwrap_or(id).clone())
        .collect();
    let ordered = graph.topological_sort(&seed);
    if !ordered.is_acyclic() {
        rlog_warn!(
            "consolidation: cycles at {:?}, {} tasks blocked",
            ordered.cycles.iter().map(TaskId::as_str).collect::<Vec<_>>(),
            ordered.blocked.len()
        );
    }

    for task in &mut tasks {
        if let Some(group) = graph.group_of(&task.id) {
            task.parallel_group = group;
        }
    }

    let excluded: HashSet<TaskId> = ordered
        .cyclic_components
        .iter()
        .flatten()
        .chain(ordered.blocked.iter())
        .cloned()
        .collect();
    let parallel_groups = graph
        .parallel_groups(&excluded)
        .into_iter()
        .map(|(group, task_ids)| ParallelGroup { group, task_ids })
        .collect();

    rlog!(
        "consolidation: {} tasks, {} merged away, {} ordered",
        tasks.len(),
        duplicates.iter().map(|d| d.remove_ids.len()).sum::<usize>(),
        ordered.order.len()
    );
    Consolidated {
        tasks,
        consolidation: ConsolidationResult {
            duplicates,
            cross_dependencies,
            parallel_groups,
            execution_order: ordered.order,
        },
        cycles: ordered.cycles,
        cyclic_components: ordered.cyclic_components,
        blocked: ordered.blocked,
    }
}

/// Keep the first task for each id.
fn dedupe_ids(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = HashSet::new();
    let total = tasks.len();
    let unique: Vec<Task> = tasks
        .into_iter()
        .filter(|task| seen.insert(task.id.clone()))
        .collect();
    if unique.len() < total {
        rlog_warn!("consolidation: dropped {} tasks with repeated ids", total - unique.len());
    }
    unique
}

/// Drop removed tasks and point their dependents at the kept task.
///
/// An entry whose kept task does not exist is skipped, so no task is removed
/// in favour of nothing. Returns the entries that were applied.
fn apply_duplicates(tasks: &mut Vec<Task>, duplicates: &[Duplicate]) -> Vec<Duplicate> {
    let present: HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
    let applied: Vec<Duplicate> = duplicates
        .iter()
        .filter(|d| {
            let keep = present.contains(&d.keep_id);
            if !keep {
                rlog_debug!("consolidation: keep id {} is not a task, entry skipped", d.keep_id);
            }
            keep
        })
        .cloned()
        .collect();
    if applied.is_empty() {
        return applied;
    }

    let replacements = replacement_map(&applied);
    tasks.retain(|task| !replacements.contains_key(&task.id));
    for task in tasks.iter_mut() {
        let mut rewritten = false;
        for dep in &mut task.depends_on {
            if let Some(keep) = replacements.get(dep) {
                *dep = keep.clone();
                rewritten = true;
            }
        }
        if rewritten {
            task.normalize_dependencies();
        }
    }
    applied
}

/// Add suggested dependencies to surviving tasks.
///
/// Entries for a task that no longer exists are dropped. Dependency ids that
/// were merged away are redirected to their kept task.
fn inject_cross_dependencies(
    tasks: &mut [Task],
    cross: &[CrossDependency],
    replacements: &HashMap<TaskId, TaskId>,
) -> Vec<CrossDependency> {
    let positions: HashMap<TaskId, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.clone(), i))
        .collect();

    let mut applied = Vec::new();
    for entry in cross {
        let Some(&i) = positions.get(&entry.task_id) else {
            rlog_debug!("consolidation: cross dependency for missing {} dropped", entry.task_id);
            continue;
        };
        let added: Vec<TaskId> = entry
            .depends_on
            .iter()
            .map(|dep| replacements.get(dep).unwrap_or(dep).clone())
            .filter(|dep| tasks[i].add_dependency(dep.clone()))
            .collect();
        if !added.is_empty() {
            applied.push(CrossDependency {
                task_id: entry.task_id.clone(),
                depends_on: added,
                reason: entry.reason.clone(),
            });
        }
    }
    applied
}

/// Start every task at group 0, or at its hinted group.
///
/// Hints are capped at the task count; no layering of `n` tasks needs a
/// higher group.
fn apply_group_hints(tasks: &mut [Task], hints: &[ParallelGroup]) {
    let cap = u32::try_from(tasks.len()).unwrap_or(u32::MAX);
    let mut hinted: HashMap<&TaskId, u32> = HashMap::new();
    for hint in hints {
        let floor = hint.group.min(cap);
        for id in &hint.task_ids {
            let group = hinted.entry(id).or_insert(floor);
            *group = (*group).max(floor);
        }
    }
    for task in tasks {
        task.parallel_group = hinted.get(&task.id).copied().unwrap_or(0);
    }
}

/// Consolidate the tasks stored for `work_dir` and persist the result.
///
/// Saves the surviving tasks and the graph projection, and points issues'
/// `related_task_ids` at the kept task of any merged duplicate.
pub async fn consolidate_in_store(
    store: &dyn StateStore,
    work_dir: &Path,
    suggestion: &Suggestion,
) -> Result<Consolidated> {
    let tasks = store.load_tasks(work_dir).await?;
    let consolidated = consolidate(tasks, suggestion);

    store.save_tasks(work_dir, &consolidated.tasks).await?;
    let graph = TaskGraph::from_tasks(&consolidated.tasks);
    store.save_graph(work_dir, graph.nodes()).await?;

    let replacements = consolidated.replacements();
    if !replacements.is_empty() {
        for issue in store.load_issues(work_dir).await? {
            if let Some(related) = rewrite_related(&issue, &replacements) {
                store
                    .update_issue(
                        work_dir,
                        &issue.id,
                        &IssuePatch {
                            related_task_ids: Some(related),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }
    }
    Ok(consolidated)
}

/// New related ids for `issue`, or `None` if none were merged away.
fn rewrite_related(issue: &Issue, replacements: &HashMap<TaskId, TaskId>) -> Option<Vec<TaskId>> {
    if !issue.related_task_ids.iter().any(|id| replacements.contains_key(id)) {
        return None;
    }
    let mut seen = HashSet::new();
    Some(
        issue
            .related_task_ids
            .iter()
            .map(|id| replacements.get(id).unwrap_or(id).clone())
            .filter(|id| seen.insert(id.clone()))
            .collect(),
    )
}
