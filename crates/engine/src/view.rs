//! Read-only projections of a workflow DAG joined with its run history.
//!
//! - [`build_tree_view`] walks the graph breadth-first from its begin nodes.
//!   Each task becomes exactly one tree node, however many parents it has;
//!   a task reachable along several paths is attached as a child of every
//!   parent but built and expanded once.
//! - [`build_gantt_view`] lays the task runs out in topological order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    EngineError,
    graph::Graph,
    models::{InstanceSummary, TaskInstanceSummary, TaskNode},
};

/// State reported for a task that did not run within an instance.
pub const NOT_RUNNING: &str = "NOT_RUNNING";

/// Kind of the synthetic tree root.
pub const ROOT_KIND: &str = "ROOT";

// ---------------------------------------------------------------------------
// Tree view
// ---------------------------------------------------------------------------

/// One run shown on a tree node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    /// `None` when the task did not run in this workflow instance.
    pub instance_id: Option<i64>,
    pub name: String,
    pub state: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub host: String,
    /// Milliseconds between start and end, once both are known.
    pub duration: Option<i64>,
}

impl InstanceView {
    fn of_workflow(instance: &InstanceSummary) -> Self {
        Self {
            instance_id: Some(instance.id),
            name: instance.name.clone(),
            state: instance.state.clone(),
            start_time: Some(instance.start_time),
            end_time: instance.end_time,
            host: instance.host.clone(),
            duration: duration_ms(Some(instance.start_time), instance.end_time),
        }
    }

    fn of_task(run: &TaskInstanceSummary) -> Self {
        Self {
            instance_id: Some(run.id),
            name: run.name.clone(),
            state: run.state.clone(),
            start_time: run.start_time,
            end_time: run.end_time,
            host: run.host.clone(),
            duration: duration_ms(run.start_time, run.end_time),
        }
    }

    fn not_running(name: &str) -> Self {
        Self {
            instance_id: None,
            name: name.to_owned(),
            state: NOT_RUNNING.to_owned(),
            start_time: None,
            end_time: None,
            host: String::new(),
            duration: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeViewNode {
    /// Task code; 0 for the root.
    pub code: i64,
    pub name: String,
    /// Task type, or [`ROOT_KIND`].
    pub kind: String,
    /// One entry per workflow instance, newest first.
    pub instances: Vec<InstanceView>,
    /// Indexes into [`TreeView::nodes`].
    pub children: Vec<usize>,
}

/// Arena of tree nodes; `nodes[0]` is the root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeView {
    pub nodes: Vec<TreeViewNode>,
}

impl TreeView {
    pub fn root(&self) -> Option<&TreeViewNode> {
        self.nodes.first()
    }

    /// The node built for `code`, with its index.
    pub fn node_for(&self, code: i64) -> Option<(usize, &TreeViewNode)> {
        self.nodes
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, node)| node.code == code)
    }

    pub fn children(&self, index: usize) -> impl Iterator<Item = &TreeViewNode> {
        self.nodes
            .get(index)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|child| self.nodes.get(*child))
    }
}

/// Build the tree view of `graph` over the `limit` most recent instances of
/// `history`.
pub fn build_tree_view(
    graph: &Graph<i64, TaskNode>,
    history: &[InstanceSummary],
    limit: usize,
) -> TreeView {
    let mut recent: Vec<&InstanceSummary> = history.iter().collect();
    recent.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    recent.truncate(limit);

    let mut nodes = vec![TreeViewNode {
        code: 0,
        name: "DAG".to_owned(),
        kind: ROOT_KIND.to_owned(),
        instances: recent.iter().map(|i| InstanceView::of_workflow(i)).collect(),
        children: Vec::new(),
    }];
    let mut created: HashMap<i64, usize> = HashMap::new();

    // Level-by-level walk. `parents` holds, for each code waiting on the
    // current level, every tree node that points at it.
    let mut level: Vec<i64> = graph.begin_nodes();
    let mut parents: HashMap<i64, Vec<usize>> =
        level.iter().map(|code| (*code, vec![0])).collect();

    while !level.is_empty() {
        let mut next_level: Vec<i64> = Vec::new();
        let mut next_parents: HashMap<i64, Vec<usize>> = HashMap::new();

        for code in level {
            let waiting = parents.remove(&code).unwrap_or_default();
            let Some(task) = graph.node(&code) else {
                continue;
            };

            let index = nodes.len();
            nodes.push(TreeViewNode {
                code,
                name: task.name.clone(),
                kind: task.task_type().to_string(),
                instances: recent
                    .iter()
                    .map(|instance| match instance.task(code) {
                        Some(run) => InstanceView::of_task(run),
                        None => InstanceView::not_running(&task.name),
                    })
                    .collect(),
                children: Vec::new(),
            });
            created.insert(code, index);
            for parent in waiting {
                nodes[parent].children.push(index);
            }

            for successor in graph.subsequent_nodes(&code) {
                if let Some(existing) = created.get(successor) {
                    nodes[index].children.push(*existing);
                } else if let Some(waiting) = parents.get_mut(successor) {
                    waiting.push(index);
                } else {
                    next_parents
                        .entry(*successor)
                        .or_insert_with(|| {
                            next_level.push(*successor);
                            Vec::new()
                        })
                        .push(index);
                }
            }
        }

        level = next_level;
        parents = next_parents;
    }

    TreeView { nodes }
}

// ---------------------------------------------------------------------------
// Gantt view
// ---------------------------------------------------------------------------

/// One task run on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GanttBar {
    pub workflow_instance_id: i64,
    pub task_instance_id: i64,
    pub state: String,
    pub host: String,
    pub start_time: DateTime<Utc>,
    /// `None` while the task is still running.
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GanttTask {
    pub task_code: i64,
    pub task_name: String,
    /// Runs ordered by start time.
    pub timeline: Vec<GanttBar>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GanttView {
    /// Task codes in topological order.
    pub task_codes: Vec<i64>,
    pub tasks: Vec<GanttTask>,
}

/// Build the Gantt view of `graph` over every instance of `history`.
///
/// Task runs that never started are left off the timeline.
///
/// # Errors
/// [`EngineError::CycleDetected`] if `graph` is cyclic.
pub fn build_gantt_view(
    graph: &Graph<i64, TaskNode>,
    history: &[InstanceSummary],
) -> Result<GanttView, EngineError> {
    let task_codes = graph.topological_sort()?;

    let tasks = task_codes
        .iter()
        .filter_map(|code| graph.node(code))
        .map(|task| {
            let mut timeline: Vec<GanttBar> = history
                .iter()
                .filter_map(|instance| {
                    let run = instance.task(task.code)?;
                    let start_time = run.start_time?;
                    Some(GanttBar {
                        workflow_instance_id: instance.id,
                        task_instance_id: run.id,
                        state: run.state.clone(),
                        host: run.host.clone(),
                        start_time,
                        end_time: run.end_time,
                        duration: duration_ms(run.start_time, run.end_time),
                    })
                })
                .collect();
            timeline.sort_by_key(|bar| bar.start_time);

            GanttTask {
                task_code: task.code,
                task_name: task.name.clone(),
                timeline,
            }
        })
        .collect();

    Ok(GanttView { task_codes, tasks })
}

fn duration_ms(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<i64> {
    Some((end? - start?).num_milliseconds())
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use nodes::{ShellParams, TaskParams};

    const A: i64 = 1;
    const B: i64 = 2;
    const C: i64 = 3;
    const D: i64 = 4;

    fn task(code: i64, pre_tasks: &[i64]) -> TaskNode {
        TaskNode {
            code,
            version: 1,
            name: format!("task-{code}"),
            params: TaskParams::Shell(ShellParams {
                raw_script: "echo".into(),
                local_params: Vec::new(),
            }),
            pre_tasks: pre_tasks.to_vec(),
        }
    }

    /// A -> {B, C} -> D
    fn diamond() -> Graph<i64, TaskNode> {
        let mut graph = Graph::new();
        for node in [task(A, &[]), task(B, &[A]), task(C, &[A]), task(D, &[B, C])] {
            graph.add_node(node.code, node);
        }
        for (from, to) in [(A, B), (A, C), (B, D), (C, D)] {
            assert!(graph.add_edge(&from, &to));
        }
        graph
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn run(id: i64, task_code: i64, start: i64) -> TaskInstanceSummary {
        TaskInstanceSummary {
            id,
            task_code,
            name: format!("task-{task_code}"),
            task_type: "SHELL".into(),
            state: "SUCCESS".into(),
            host: "worker-1".into(),
            start_time: Some(at(start)),
            end_time: Some(at(start + 1)),
        }
    }

    fn instance(id: i64, start: i64, tasks: Vec<TaskInstanceSummary>) -> InstanceSummary {
        InstanceSummary {
            id,
            name: format!("run-{id}"),
            state: "SUCCESS".into(),
            host: "master-1".into(),
            start_time: at(start),
            end_time: Some(at(start + 10)),
            tasks,
        }
    }

    #[test]
    fn diamond_bottom_is_built_once_with_two_parents() {
        let graph = diamond();
        let view = build_tree_view(&graph, &[], 10);

        // Root plus one node per task.
        assert_eq!(view.nodes.len(), 5);
        assert_eq!(view.nodes.iter().filter(|n| n.code == D).count(), 1);

        let (d_index, _) = view.node_for(D).unwrap();
        let (b_index, b) = view.node_for(B).unwrap();
        let (c_index, c) = view.node_for(C).unwrap();
        assert_eq!(b.children, vec![d_index]);
        assert_eq!(c.children, vec![d_index]);
        assert_ne!(b_index, c_index);
        assert!(view.children(d_index).next().is_none());
    }

    #[test]
    fn root_points_at_begin_nodes() {
        let view = build_tree_view(&diamond(), &[], 10);
        let root = view.root().unwrap();
        assert_eq!(root.kind, ROOT_KIND);
        let names: Vec<&str> = view.children(0).map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["task-1"]);
    }

    #[test]
    fn instances_are_newest_first_and_limited() {
        let history = vec![
            instance(10, 0, vec![run(100, A, 0)]),
            instance(11, 60, vec![run(110, A, 60), run(111, B, 61)]),
            instance(12, 120, vec![run(120, A, 120)]),
        ];
        let view = build_tree_view(&diamond(), &history, 2);

        let root_ids: Vec<Option<i64>> = view.root().unwrap().instances.iter().map(|i| i.instance_id).collect();
        assert_eq!(root_ids, vec![Some(12), Some(11)]);

        let (_, b) = view.node_for(B).unwrap();
        assert_eq!(b.instances.len(), 2);
        assert_eq!(b.instances[0].state, NOT_RUNNING);
        assert_eq!(b.instances[0].instance_id, None);
        assert_eq!(b.instances[1].instance_id, Some(111));
        assert_eq!(b.instances[1].duration, Some(60_000));
    }

    #[test]
    fn gantt_orders_tasks_topologically() {
        let history = vec![
            instance(11, 60, vec![run(110, A, 60), run(111, D, 62)]),
            instance(10, 0, vec![run(100, A, 0)]),
        ];
        let view = build_gantt_view(&diamond(), &history).unwrap();

        assert_eq!(view.task_codes.first(), Some(&A));
        assert_eq!(view.task_codes.last(), Some(&D));

        let a = &view.tasks[0];
        let starts: Vec<i64> = a.timeline.iter().map(|bar| bar.task_instance_id).collect();
        assert_eq!(starts, vec![100, 110]);
        let d = view.tasks.iter().find(|t| t.task_code == D).unwrap();
        assert_eq!(d.timeline.len(), 1);
    }

    #[test]
    fn gantt_skips_runs_that_never_started() {
        let mut pending = run(200, B, 0);
        pending.start_time = None;
        let view = build_gantt_view(&diamond(), &[instance(20, 0, vec![pending])]).unwrap();
        assert!(view.tasks.iter().all(|t| t.timeline.is_empty()));
    }
}
