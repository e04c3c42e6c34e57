//! Edge diff between two relation lists of the same workflow.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::models::{EdgeKey, TaskRelation};

/// Outcome of comparing the stored edges with the edges about to be saved.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDiff {
    /// Whether saving `new` would change the stored structure.
    pub changed: bool,
    /// Edges of `new` absent from `old`.
    pub to_insert: Vec<TaskRelation>,
    /// Edges of `old` absent from `new`.
    pub to_delete: Vec<TaskRelation>,
}

/// Compare two edge lists by value, ignoring the workflow version each edge
/// was saved under.
///
/// Keys are compared with their multiplicity, so a duplicated edge counts as
/// a change even when the key sets agree.
pub fn compute_edge_diff(old: &[TaskRelation], new: &[TaskRelation]) -> EdgeDiff {
    let old_keys: HashSet<EdgeKey> = old.iter().map(TaskRelation::edge_key).collect();
    let new_keys: HashSet<EdgeKey> = new.iter().map(TaskRelation::edge_key).collect();

    let to_insert: Vec<TaskRelation> = new
        .iter()
        .filter(|r| !old_keys.contains(&r.edge_key()))
        .cloned()
        .collect();
    let to_delete: Vec<TaskRelation> = old
        .iter()
        .filter(|r| !new_keys.contains(&r.edge_key()))
        .cloned()
        .collect();

    EdgeDiff {
        changed: !to_insert.is_empty() || !to_delete.is_empty() || key_counts(old) != key_counts(new),
        to_insert,
        to_delete,
    }
}

fn key_counts(relations: &[TaskRelation]) -> HashMap<EdgeKey, usize> {
    let mut counts = HashMap::new();
    for relation in relations {
        *counts.entry(relation.edge_key()).or_insert(0) += 1;
    }
    counts
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConditionType;

    fn edge(pre: i64, post: i64, workflow_version: i32) -> TaskRelation {
        let mut relation = TaskRelation::new(1, 10, (pre, 1), (post, 1));
        relation.workflow_definition_version = workflow_version;
        relation
    }

    #[test]
    fn same_edges_at_new_workflow_version_are_unchanged() {
        let old = vec![edge(0, 1, 1), edge(1, 2, 1)];
        let new = vec![edge(1, 2, 2), edge(0, 1, 2)];
        let diff = compute_edge_diff(&old, &new);
        assert!(!diff.changed);
        assert!(diff.to_insert.is_empty());
        assert!(diff.to_delete.is_empty());
    }

    #[test]
    fn added_and_removed_edges_are_reported() {
        let old = vec![edge(0, 1, 1), edge(1, 2, 1)];
        let new = vec![edge(0, 1, 1), edge(1, 3, 1)];
        let diff = compute_edge_diff(&old, &new);
        assert!(diff.changed);
        assert_eq!(diff.to_insert, vec![edge(1, 3, 1)]);
        assert_eq!(diff.to_delete, vec![edge(1, 2, 1)]);
    }

    #[test]
    fn condition_change_is_a_change() {
        let old = vec![edge(1, 2, 1)];
        let mut judged = edge(1, 2, 1);
        judged.condition_type = ConditionType::Judge;
        let diff = compute_edge_diff(&old, &[judged]);
        assert!(diff.changed);
        assert_eq!(diff.to_insert.len(), 1);
        assert_eq!(diff.to_delete.len(), 1);
    }

    #[test]
    fn duplicate_count_alone_is_a_change() {
        let old = vec![edge(1, 2, 1)];
        let new = vec![edge(1, 2, 1), edge(1, 2, 1)];
        let diff = compute_edge_diff(&old, &new);
        assert!(diff.changed);
        assert!(diff.to_insert.is_empty());
        assert!(diff.to_delete.is_empty());
    }

    #[test]
    fn reshuffled_duplicates_of_equal_length_are_a_change() {
        let old = vec![edge(0, 1, 1), edge(0, 1, 1), edge(1, 2, 1)];
        let new = vec![edge(0, 1, 1), edge(1, 2, 1), edge(1, 2, 1)];
        let diff = compute_edge_diff(&old, &new);
        assert!(diff.changed);
        assert!(diff.to_insert.is_empty());
        assert!(diff.to_delete.is_empty());
    }
}
