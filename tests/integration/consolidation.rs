//! Consolidation engine: ordering, cycles, duplicates and groups.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use tempfile::TempDir;

use remedy::consolidation::{consolidate, consolidate_in_store, Consolidated, Suggestion};
use remedy::core::{Issue, Task, TaskId};
use remedy::state::{FileStateStore, StateStore};

use crate::fixtures::{layered_dag, linear_chain, task};

fn ids(list: &[&str]) -> Vec<TaskId> {
    list.iter().map(|s| TaskId::from(*s)).collect()
}

fn group_map(result: &Consolidated) -> HashMap<TaskId, u32> {
    result
        .tasks
        .iter()
        .map(|t| (t.id.clone(), t.parallel_group))
        .collect()
}

/// Every task appears once, after each of its surviving dependencies.
fn assert_valid_order(tasks: &[Task], order: &[TaskId]) {
    let position: HashMap<&TaskId, usize> = order.iter().enumerate().map(|(i, id)| (id, i)).collect();
    assert_eq!(position.len(), order.len(), "order has repeated ids: {:?}", order);
    assert_eq!(order.len(), tasks.len());
    for task in tasks {
        let at = position[&task.id];
        for dep in &task.depends_on {
            if let Some(&dep_at) = position.get(dep) {
                assert!(dep_at < at, "{} ordered before its dependency {}", task.id, dep);
            }
        }
    }
}

/// Test: Linear chain scenario
/// Given T1 <- T2 <- T3 <- T4 <- T5
/// Then the order is T1..T5 and groups are 0..4
#[test]
fn test_linear_chain_scenario() {
    let result = consolidate(linear_chain(5), &Suggestion::none());

    assert_eq!(
        result.consolidation.execution_order,
        ids(&["T1", "T2", "T3", "T4", "T5"])
    );
    let groups = group_map(&result);
    for i in 1..=5u32 {
        assert_eq!(groups[&TaskId::new(format!("T{}", i))], i - 1);
    }
    let tiers: Vec<u32> = result.consolidation.parallel_groups.iter().map(|g| g.group).collect();
    assert_eq!(tiers, vec![0, 1, 2, 3, 4]);
}

/// Test: Topological order on acyclic sets
/// Given layered acyclic task sets of several shapes
/// Then each task appears exactly once and after all of its dependencies
#[test]
fn test_acyclic_sets_order_every_task_once() {
    for seed in [1, 7, 42, 1234, 99991] {
        for n in [1, 5, 20, 60] {
            let tasks = layered_dag(n, seed);
            let result = consolidate(tasks, &Suggestion::none());
            assert!(result.is_acyclic());
            assert_valid_order(&result.tasks, &result.consolidation.execution_order);
        }
    }
}

/// Test: Group ordering
/// Given tasks with several dependencies each
/// Then every task's group exceeds the group of each dependency
#[test]
fn test_group_exceeds_every_dependency() {
    let tasks = vec![
        task("D1", &[]),
        task("D2", &["D1"]),
        task("D3", &[]),
        task("T", &["D2", "D3"]),
        task("U", &["T", "D1"]),
    ];
    let result = consolidate(tasks, &Suggestion::none());
    let groups = group_map(&result);
    for t in &result.tasks {
        for dep in &t.depends_on {
            assert!(groups[&t.id] > groups[dep], "{} vs {}", t.id, dep);
        }
    }
    assert_eq!(groups[&TaskId::from("T")], 2);
    assert_eq!(groups[&TaskId::from("U")], 3);

    for seed in [3, 5, 8] {
        let result = consolidate(layered_dag(40, seed), &Suggestion::none());
        let groups = group_map(&result);
        for t in &result.tasks {
            for dep in &t.depends_on {
                assert!(groups[&t.id] > groups[dep]);
            }
        }
    }
}

/// Test: Two-cycle detection
/// Given A depends on B and B depends on A
/// Then the cycle is reported, neither task is ordered twice and the
/// engine returns
#[test]
fn test_two_cycle_is_reported() {
    let tasks = vec![task("A", &["B"]), task("B", &["A"]), task("C", &[])];
    let result = consolidate(tasks, &Suggestion::none());

    assert!(!result.is_acyclic());
    assert_eq!(result.cycles.len(), 1);
    assert_eq!(result.cyclic_components, vec![ids(&["A", "B"])]);
    let order = &result.consolidation.execution_order;
    let unique: HashSet<&TaskId> = order.iter().collect();
    assert_eq!(unique.len(), order.len());
    assert!(!order.contains(&TaskId::from("A")));
    assert!(!order.contains(&TaskId::from("B")));
    assert_eq!(order, &ids(&["C"]));
}

/// Test: Cycle injected by a cross dependency
#[test]
fn test_cross_dependency_cycle() {
    let suggestion = Suggestion::from_value(&json!({
        "crossDependencies": [{"taskId": "T1", "dependsOn": ["T3"], "reason": "shared schema"}]
    }));
    let result = consolidate(linear_chain(4), &suggestion);

    assert_eq!(result.cyclic_components, vec![ids(&["T1", "T2", "T3"])]);
    assert_eq!(result.blocked, ids(&["T4"]));
    assert!(result.consolidation.execution_order.is_empty());
}

/// Test: Duplicate merge
/// Given duplicates [{keep: A, remove: [B, C]}]
/// Then no task depends on B or C and former dependents point at A
#[test]
fn test_duplicate_merge_rewrites_dependencies() {
    let tasks = vec![
        task("A", &[]),
        task("B", &[]),
        task("C", &[]),
        task("D", &["B"]),
        task("E", &["B", "C", "A"]),
        task("F", &["D"]),
    ];
    let suggestion = Suggestion::from_value(&json!({
        "duplicates": [{"keep": "A", "remove": ["B", "C"], "reason": "same null check"}]
    }));
    let result = consolidate(tasks, &suggestion);

    let removed = ids(&["B", "C"]);
    assert_eq!(result.tasks.len(), 4);
    for t in &result.tasks {
        assert!(!removed.contains(&t.id));
        assert!(t.depends_on.iter().all(|d| !removed.contains(d)), "{} still points at a removed task", t.id);
        assert!(!t.depends_on.contains(&t.id));
    }
    let by_id: HashMap<&TaskId, &Task> = result.tasks.iter().map(|t| (&t.id, t)).collect();
    assert_eq!(by_id[&TaskId::from("D")].depends_on, ids(&["A"]));
    assert_eq!(by_id[&TaskId::from("E")].depends_on, ids(&["A"]));
    assert_valid_order(&result.tasks, &result.consolidation.execution_order);
}

/// Test: Garbage suggestion
/// Given a suggestion that is not JSON at all
/// Then consolidation proceeds on the known edges only
#[test]
fn test_unusable_suggestion_is_ignored() {
    let suggestion = Suggestion::from_text("The tasks look independent to me.");
    assert!(!suggestion.is_valid());
    let result = consolidate(linear_chain(3), &suggestion);
    assert!(result.consolidation.duplicates.is_empty());
    assert_eq!(result.consolidation.execution_order, ids(&["T1", "T2", "T3"]));
}

/// Test: Store-level consolidation on the file store
/// Given tasks and issues saved under a work directory
/// When consolidation runs with a fenced suggestion
/// Then tasks, graph and issue links are persisted
#[tokio::test]
async fn test_consolidate_in_file_store() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::default();
    store
        .save_tasks(
            dir.path(),
            &[task("A", &[]), task("B", &[]), task("C", &["B"]), task("D", &["C"])],
        )
        .await
        .unwrap();
    let mut issue = Issue::new("I1", "missing bounds check");
    issue.related_task_ids = ids(&["B"]);
    store.save_issues(dir.path(), &[issue]).await.unwrap();

    let raw = "```json\n{\"duplicates\": [{\"keepId\": \"A\", \"removeIds\": [\"B\"]}], \"executionOrder\": [\"A\", \"C\", \"D\"]}\n```";
    let result = consolidate_in_store(&store, dir.path(), &Suggestion::from_text(raw))
        .await
        .unwrap();
    assert_eq!(result.consolidation.execution_order, ids(&["A", "C", "D"]));

    let tasks = store.load_tasks(dir.path()).await.unwrap();
    assert_eq!(tasks.len(), 3);
    let graph = store.load_graph(dir.path()).await.unwrap();
    let graph_groups: Vec<u32> = graph.iter().map(|n| n.parallel_group).collect();
    assert_eq!(graph_groups, vec![0, 1, 2]);
    let issues = store.load_issues(dir.path()).await.unwrap();
    assert_eq!(issues[0].related_task_ids, ids(&["A"]));
}
