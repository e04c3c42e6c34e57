//! DAG validation. Run this before persisting or releasing a workflow.
//!
//! Rules enforced on a submitted relation list:
//! 1. The list is non-empty and no edge points at the root code `0`.
//! 2. Every code an edge mentions has a task definition, and every task
//!    definition is the post task of at least one edge.
//! 3. Each task has either one root edge or real upstream edges, never both.
//! 4. The directed graph is acyclic. A duplicate arc counts as a cycle.

use std::collections::{HashMap, HashSet};

use nodes::TaskParameters;

use crate::{
    EngineError,
    graph::Graph,
    models::{TaskDefinition, TaskNode, TaskRelation},
    relation::check_root_invariant,
};

/// Whether the declared predecessor lists form a cycle.
///
/// Any arc the graph refuses (unknown endpoint, duplicate) is reported as a
/// cycle too; callers reject such node lists the same way.
pub fn graph_has_cycle(task_nodes: &[TaskNode]) -> bool {
    let mut graph = Graph::new();
    for node in task_nodes {
        graph.add_node(node.code, ());
    }

    for node in task_nodes {
        for pre in &node.pre_tasks {
            if !graph.add_edge(pre, &node.code) {
                return true;
            }
        }
    }

    graph.has_cycle()
}

/// Reject a node list that is empty, references unknown predecessors, or
/// is not a DAG.
///
/// # Errors
/// - [`EngineError::DataIsNull`] for an empty list.
/// - [`EngineError::TaskDefinitionNotExists`] for an unknown predecessor.
/// - [`EngineError::CycleDetected`] for a cycle or a duplicate arc.
pub fn validate_acyclic(task_nodes: &[TaskNode]) -> Result<(), EngineError> {
    if task_nodes.is_empty() {
        return Err(EngineError::DataIsNull("taskNodes".into()));
    }

    let known: HashSet<i64> = task_nodes.iter().map(|n| n.code).collect();
    if let Some(unknown) = task_nodes
        .iter()
        .flat_map(|n| &n.pre_tasks)
        .find(|code| !known.contains(code))
    {
        return Err(EngineError::TaskDefinitionNotExists(*unknown));
    }

    if graph_has_cycle(task_nodes) {
        return Err(EngineError::CycleDetected);
    }
    Ok(())
}

/// Turn an edge list plus the definitions it references into graph payloads,
/// one [`TaskNode`] per distinct post task, in first-seen order.
pub fn transform_tasks(
    relations: &[TaskRelation],
    definitions: &[TaskDefinition],
) -> Result<Vec<TaskNode>, EngineError> {
    let by_code: HashMap<i64, &TaskDefinition> =
        definitions.iter().map(|d| (d.code, d)).collect();

    let mut order: Vec<i64> = Vec::new();
    let mut pre_tasks: HashMap<i64, Vec<i64>> = HashMap::new();
    for relation in relations {
        let entry = pre_tasks.entry(relation.post_task_code).or_insert_with(|| {
            order.push(relation.post_task_code);
            Vec::new()
        });
        if !relation.is_root() {
            entry.push(relation.pre_task_code);
        }
    }

    order
        .into_iter()
        .map(|code| {
            let definition = by_code
                .get(&code)
                .ok_or(EngineError::TaskDefinitionNotExists(code))?;
            Ok(TaskNode {
                code,
                version: definition.version,
                name: definition.name.clone(),
                params: definition.params.clone(),
                pre_tasks: pre_tasks.remove(&code).unwrap_or_default(),
            })
        })
        .collect()
}

/// Build the validated graph of a workflow, keyed by task code.
///
/// # Errors
/// As [`validate_acyclic`], plus [`EngineError::TaskDefinitionNotExists`]
/// for a post task without definition.
pub fn build_dag(
    relations: &[TaskRelation],
    definitions: &[TaskDefinition],
) -> Result<Graph<i64, TaskNode>, EngineError> {
    let task_nodes = transform_tasks(relations, definitions)?;
    validate_acyclic(&task_nodes)?;

    let mut graph = Graph::new();
    for node in &task_nodes {
        graph.add_node(node.code, node.clone());
    }
    for node in &task_nodes {
        for pre in &node.pre_tasks {
            // Endpoints and duplicates were checked by validate_acyclic.
            graph.add_edge(pre, &node.code);
        }
    }
    Ok(graph)
}

/// Full check of a relation list submitted together with its task
/// definitions. Pure: runs before any persistence call.
pub fn check_relation_list(
    relations: &[TaskRelation],
    definitions: &[TaskDefinition],
) -> Result<(), EngineError> {
    if relations.is_empty() {
        return Err(EngineError::DataIsNull("taskRelationList".into()));
    }
    if let Some(relation) = relations.iter().find(|r| r.post_task_code == 0) {
        return Err(EngineError::DataIsNotValid(format!(
            "relation from {} has no post task",
            relation.pre_task_code
        )));
    }

    let defined: HashSet<i64> = definitions.iter().map(|d| d.code).collect();
    for definition in definitions {
        definition.params.validate()?;
        if let Some(code) = definition
            .params
            .referenced_task_codes()
            .into_iter()
            .find(|code| !defined.contains(code))
        {
            return Err(EngineError::TaskDefinitionNotExists(code));
        }
    }

    let post_codes: HashSet<i64> = relations.iter().map(|r| r.post_task_code).collect();
    if let Some(code) = relations
        .iter()
        .flat_map(|r| [r.pre_task_code, r.post_task_code])
        .find(|code| *code != 0 && !defined.contains(code))
    {
        return Err(EngineError::TaskDefinitionNotExists(code));
    }
    if let Some(orphan) = definitions.iter().find(|d| !post_codes.contains(&d.code)) {
        return Err(EngineError::DataIsNotValid(format!(
            "task {} is not the post task of any relation",
            orphan.code
        )));
    }

    check_root_invariant(relations)?;
    build_dag(relations, definitions).map(|_| ())
}
