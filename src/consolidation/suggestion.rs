//! Consolidation suggestions and their normalization.
//!
//! Consolidator output is semi-structured: field names drift between
//! camelCase and snake_case, single ids show up where arrays belong, and
//! entries contradict each other. Nothing here trusts that shape. A raw
//! suggestion goes through `Suggestion::from_value`, which keeps every entry
//! that survives validation and drops the rest.

use crate::agent::parse::extract_json;
use crate::core::TaskId;
use crate::{rlog_debug, rlog_warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Tasks to merge into one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Duplicate {
    pub keep_id: TaskId,
    pub remove_ids: Vec<TaskId>,
    #[serde(default)]
    pub reason: String,
}

/// Dependencies to add to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossDependency {
    pub task_id: TaskId,
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub reason: String,
}

/// Tasks sharing a parallel group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelGroup {
    pub group: u32,
    pub task_ids: Vec<TaskId>,
}

/// Validated consolidation data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationResult {
    #[serde(default)]
    pub duplicates: Vec<Duplicate>,
    #[serde(default)]
    pub cross_dependencies: Vec<CrossDependency>,
    #[serde(default)]
    pub parallel_groups: Vec<ParallelGroup>,
    #[serde(default)]
    pub execution_order: Vec<TaskId>,
}

impl ConsolidationResult {
    pub fn is_empty(&self) -> bool {
        self.duplicates.is_empty()
            && self.cross_dependencies.is_empty()
            && self.parallel_groups.is_empty()
            && self.execution_order.is_empty()
    }
}

/// A consolidation suggestion after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suggestion {
    Valid(ConsolidationResult),
    /// Unusable as a whole; consolidation proceeds as if none was given.
    Invalid { reason: String },
}

impl Default for Suggestion {
    fn default() -> Self {
        Self::none()
    }
}

impl Suggestion {
    /// No suggestion: an empty, valid consolidation.
    pub fn none() -> Self {
        Suggestion::Valid(ConsolidationResult::default())
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Suggestion::Valid(_))
    }

    /// The usable consolidation data. Empty when invalid.
    pub fn result(&self) -> ConsolidationResult {
        match self {
            Suggestion::Valid(result) => result.clone(),
            Suggestion::Invalid { .. } => ConsolidationResult::default(),
        }
    }

    /// Locate and normalize a suggestion in raw consolidator text.
    pub fn from_text(raw: &str) -> Self {
        match extract_json(raw) {
            Some(value) => Self::from_value(&value),
            None => Self::invalid("no JSON object in consolidator output"),
        }
    }

    /// Normalize a loosely-typed suggestion field by field.
    ///
    /// Only a non-object is rejected outright. Within an object, each list
    /// that is missing or not an array counts as empty and each entry that
    /// fails validation is dropped. A `consolidation` wrapper object is
    /// unwrapped first.
    pub fn from_value(value: &Value) -> Self {
        let Some(mut object) = value.as_object() else {
            return Self::invalid("suggestion is not a JSON object");
        };
        if let Some(inner) = object.get("consolidation").and_then(Value::as_object) {
            object = inner;
        }

        let mut dropped = 0;
        let duplicates = normalize_duplicates(object, &mut dropped);
        let cross_dependencies = normalize_cross_dependencies(object, &mut dropped);
        let parallel_groups = normalize_parallel_groups(object, &mut dropped);
        let execution_order = field(object, &["executionOrder", "execution_order", "order"])
            .map(|v| id_list(v, &mut dropped))
            .unwrap_or_default();

        if dropped > 0 {
            rlog_warn!("consolidation: dropped {} invalid suggestion entries", dropped);
        }
        Suggestion::Valid(ConsolidationResult {
            duplicates,
            cross_dependencies,
            parallel_groups,
            execution_order,
        })
    }

    fn invalid(reason: &str) -> Self {
        rlog_warn!("consolidation: ignoring suggestion: {}", reason);
        Suggestion::Invalid {
            reason: reason.to_string(),
        }
    }
}

impl From<ConsolidationResult> for Suggestion {
    fn from(result: ConsolidationResult) -> Self {
        Suggestion::Valid(result)
    }
}

/// First present key among `names`.
fn field<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| object.get(*name))
}

fn entries<'a>(object: &'a Map<String, Value>, names: &[&str]) -> &'a [Value] {
    field(object, names)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn task_id(value: &Value) -> Option<TaskId> {
    let id = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then(|| TaskId::new(id))
}

/// A single id or an array of ids; invalid elements are counted and skipped.
fn id_list(value: &Value, dropped: &mut usize) -> Vec<TaskId> {
    let mut seen = HashSet::new();
    let candidates: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut ids = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match task_id(candidate) {
            Some(id) => {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            None => *dropped += 1,
        }
    }
    ids
}

fn reason(object: &Map<String, Value>) -> String {
    object
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Duplicates with no self-merge and at most one owner per removed id.
///
/// Entries are taken in order. A keep id that an earlier entry already
/// removed invalidates its entry; a remove id that is already kept or
/// removed elsewhere is skipped.
fn normalize_duplicates(object: &Map<String, Value>, dropped: &mut usize) -> Vec<Duplicate> {
    let mut kept: HashSet<TaskId> = HashSet::new();
    let mut removed: HashSet<TaskId> = HashSet::new();
    let mut duplicates = Vec::new();

    for entry in entries(object, &["duplicates", "duplicate"]) {
        let Some(entry) = entry.as_object() else {
            *dropped += 1;
            continue;
        };
        let Some(keep_id) = field(entry, &["keepId", "keep_id", "keep"]).and_then(task_id) else {
            *dropped += 1;
            continue;
        };
        if removed.contains(&keep_id) {
            rlog_debug!("consolidation: {} is both kept and removed, entry dropped", keep_id);
            *dropped += 1;
            continue;
        }
        let remove_ids: Vec<TaskId> = field(entry, &["removeIds", "remove_ids", "remove"])
            .map(|v| id_list(v, dropped))
            .unwrap_or_default()
            .into_iter()
            .filter(|id| *id != keep_id && !kept.contains(id) && !removed.contains(id))
            .collect();
        if remove_ids.is_empty() {
            *dropped += 1;
            continue;
        }

        kept.insert(keep_id.clone());
        removed.extend(remove_ids.iter().cloned());
        duplicates.push(Duplicate {
            keep_id,
            remove_ids,
            reason: reason(entry),
        });
    }
    duplicates
}

fn normalize_cross_dependencies(
    object: &Map<String, Value>,
    dropped: &mut usize,
) -> Vec<CrossDependency> {
    let mut cross = Vec::new();
    for entry in entries(object, &["crossDependencies", "cross_dependencies", "dependencies"]) {
        let Some(entry) = entry.as_object() else {
            *dropped += 1;
            continue;
        };
        let Some(task) = field(entry, &["taskId", "task_id", "task"]).and_then(task_id) else {
            *dropped += 1;
            continue;
        };
        let depends_on: Vec<TaskId> = field(entry, &["dependsOn", "depends_on", "dependency"])
            .map(|v| id_list(v, dropped))
            .unwrap_or_default()
            .into_iter()
            .filter(|dep| *dep != task)
            .collect();
        if depends_on.is_empty() {
            *dropped += 1;
            continue;
        }
        cross.push(CrossDependency {
            task_id: task,
            depends_on,
            reason: reason(entry),
        });
    }
    cross
}

fn group_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|g| u32::try_from(g).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn normalize_parallel_groups(object: &Map<String, Value>, dropped: &mut usize) -> Vec<ParallelGroup> {
    let mut groups = Vec::new();
    for entry in entries(object, &["parallelGroups", "parallel_groups", "groups"]) {
        let Some(entry) = entry.as_object() else {
            *dropped += 1;
            continue;
        };
        let Some(group) = field(entry, &["group", "groupId", "group_id"]).and_then(group_number) else {
            *dropped += 1;
            continue;
        };
        let task_ids = field(entry, &["taskIds", "task_ids", "tasks"])
            .map(|v| id_list(v, dropped))
            .unwrap_or_default();
        if task_ids.is_empty() {
            *dropped += 1;
            continue;
        }
        groups.push(ParallelGroup { group, task_ids });
    }
    groups
}
