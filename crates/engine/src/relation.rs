//! `TaskRelationSet`: the edge list of one workflow, edited in place.
//!
//! Every mutator validates first and touches the list only once the edit is
//! known to succeed, so a rejected edit leaves the set as it was. After each
//! successful edit every task still satisfies the root invariant: it has
//! either exactly one root edge `(0 -> task)` or at least one real upstream
//! edge, never both.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    EngineError,
    models::{ROOT_TASK_CODE, TaskRelation},
};

#[derive(Debug, Clone)]
pub struct TaskRelationSet {
    project_code: i64,
    workflow_code: i64,
    relations: Vec<TaskRelation>,
    /// Version to stamp on edges created for a task code.
    task_versions: HashMap<i64, i32>,
}

impl TaskRelationSet {
    pub fn new(
        project_code: i64,
        workflow_code: i64,
        relations: Vec<TaskRelation>,
        task_versions: HashMap<i64, i32>,
    ) -> Self {
        Self {
            project_code,
            workflow_code,
            relations,
            task_versions,
        }
    }

    pub fn relations(&self) -> &[TaskRelation] {
        &self.relations
    }

    pub fn into_relations(self) -> Vec<TaskRelation> {
        self.relations
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Edges ending at `task_code`, root edge included.
    pub fn upstream_of(&self, task_code: i64) -> Vec<&TaskRelation> {
        self.relations
            .iter()
            .filter(|r| r.post_task_code == task_code)
            .collect()
    }

    /// Edges leaving `task_code`.
    pub fn downstream_of(&self, task_code: i64) -> Vec<&TaskRelation> {
        self.relations
            .iter()
            .filter(|r| r.pre_task_code == task_code)
            .collect()
    }

    /// Pre task codes of `task_code`; `[0]` for a root-only task.
    pub fn upstream_codes(&self, task_code: i64) -> Vec<i64> {
        self.upstream_of(task_code)
            .into_iter()
            .map(|r| r.pre_task_code)
            .collect()
    }

    pub fn downstream_codes(&self, task_code: i64) -> Vec<i64> {
        self.downstream_of(task_code)
            .into_iter()
            .map(|r| r.post_task_code)
            .collect()
    }

    /// Distinct post task codes in first-seen order.
    pub fn task_codes(&self) -> Vec<i64> {
        let mut codes: Vec<i64> = Vec::new();
        for relation in &self.relations {
            if !codes.contains(&relation.post_task_code) {
                codes.push(relation.post_task_code);
            }
        }
        codes
    }

    pub fn check_root_invariant(&self) -> Result<(), EngineError> {
        check_root_invariant(&self.relations)
    }

    // ---- mutators ----

    /// Add the edge `pre -> post`; `pre == 0` asks for a root edge.
    ///
    /// A root edge on `post` is replaced by the real edge. When `pre` has no
    /// edge at all yet it gets a root edge of its own.
    ///
    /// # Errors
    /// - [`EngineError::RelationExists`] when `post` already has this
    ///   upstream, or has real upstreams and a root edge is requested.
    /// - [`EngineError::TaskDefinitionNotExists`] for an unknown code.
    pub fn add_edge(&mut self, pre: i64, post: i64) -> Result<(), EngineError> {
        if post == ROOT_TASK_CODE {
            return Err(EngineError::DataIsNotValid(
                "post task code must not be 0".into(),
            ));
        }
        if pre == post {
            return Err(EngineError::CycleDetected);
        }

        let post_version = self.version_of(post)?;
        let pre_version = if pre == ROOT_TASK_CODE {
            0
        } else {
            self.version_of(pre)?
        };

        let existing = self.upstream_codes(post);
        let has_root = existing.contains(&ROOT_TASK_CODE);
        if !existing.is_empty() && (existing.contains(&pre) || (pre == ROOT_TASK_CODE && !has_root)) {
            return Err(EngineError::RelationExists {
                pre_task_code: pre,
                post_task_code: post,
            });
        }

        if has_root {
            self.relations
                .retain(|r| !(r.is_root() && r.post_task_code == post));
        }
        if pre != ROOT_TASK_CODE && self.upstream_of(pre).is_empty() {
            let root = self.root_edge(pre, pre_version);
            self.relations.push(root);
        }

        self.relations.push(TaskRelation::new(
            self.project_code,
            self.workflow_code,
            (pre, pre_version),
            (post, post_version),
        ));
        debug!("added relation {pre} -> {post}");
        Ok(())
    }

    /// Remove every inbound edge of `task_code`, taking the task out of the
    /// workflow. Returns the removed edges.
    ///
    /// # Errors
    /// [`EngineError::TaskHasDownstream`] listing the blocking tasks while
    /// anything still depends on `task_code`.
    pub fn remove_edges_for_task(
        &mut self,
        task_code: i64,
    ) -> Result<Vec<TaskRelation>, EngineError> {
        if self.relations.is_empty() {
            return Err(EngineError::DataIsNull("taskRelationList".into()));
        }

        let downstream = self.downstream_codes(task_code);
        if !downstream.is_empty() {
            return Err(EngineError::TaskHasDownstream {
                task_code,
                downstream,
            });
        }
        if self.upstream_of(task_code).is_empty() {
            return Err(EngineError::DataIsNotValid(format!(
                "task {task_code} is not part of workflow {}",
                self.workflow_code
            )));
        }

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.relations)
            .into_iter()
            .partition(|r| r.post_task_code == task_code);
        self.relations = kept;
        Ok(removed)
    }

    /// Remove the edges `pre -> task_code` for each listed `pre`.
    ///
    /// Synthesizes a root edge when the task is left without upstream.
    pub fn remove_upstream(&mut self, task_code: i64, pre_codes: &[i64]) -> Result<(), EngineError> {
        if pre_codes.is_empty() || pre_codes.contains(&ROOT_TASK_CODE) {
            return Err(EngineError::DataIsNull("preTaskCodes".into()));
        }

        let current = self.upstream_of(task_code);
        let Some(post_version) = current.first().map(|r| r.post_task_version) else {
            return Err(EngineError::DataIsNull(format!("upstream of task {task_code}")));
        };
        if current.iter().any(|r| r.is_root()) {
            return Err(EngineError::DataIsNotValid(format!(
                "task {task_code} has no upstream task"
            )));
        }
        let missing: Vec<i64> = pre_codes
            .iter()
            .copied()
            .filter(|code| !current.iter().any(|r| r.pre_task_code == *code))
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::DataIsNotValid(format!(
                "tasks {missing:?} are not upstream of task {task_code}"
            )));
        }

        self.relations
            .retain(|r| !(r.post_task_code == task_code && pre_codes.contains(&r.pre_task_code)));
        self.ensure_root(task_code, post_version);
        Ok(())
    }

    /// Remove the edges `task_code -> post` for each listed `post`.
    ///
    /// Every post task left without upstream gets a root edge.
    pub fn remove_downstream(&mut self, task_code: i64, post_codes: &[i64]) -> Result<(), EngineError> {
        if post_codes.is_empty() || post_codes.contains(&ROOT_TASK_CODE) {
            return Err(EngineError::DataIsNull("postTaskCodes".into()));
        }

        let current = self.downstream_of(task_code);
        if current.is_empty() {
            return Err(EngineError::DataIsNotValid(format!(
                "task {task_code} has no downstream task"
            )));
        }
        let mut orphans: Vec<(i64, i32)> = Vec::with_capacity(post_codes.len());
        for code in post_codes {
            match current.iter().find(|r| r.post_task_code == *code) {
                Some(r) => orphans.push((r.post_task_code, r.post_task_version)),
                None => {
                    return Err(EngineError::DataIsNotValid(format!(
                        "task {code} is not downstream of task {task_code}"
                    )));
                }
            }
        }

        self.relations
            .retain(|r| !(r.pre_task_code == task_code && post_codes.contains(&r.post_task_code)));
        for (code, version) in orphans {
            self.ensure_root(code, version);
        }
        Ok(())
    }

    /// Remove the single edge `pre -> post`. Root edges cannot be removed
    /// this way.
    pub fn remove_edge(&mut self, pre: i64, post: i64) -> Result<(), EngineError> {
        if pre == ROOT_TASK_CODE {
            return Err(EngineError::DataIsNotValid(
                "the root edge of a task cannot be removed".into(),
            ));
        }
        if self.relations.is_empty() {
            return Err(EngineError::DataIsNull("taskRelationList".into()));
        }

        let Some(index) = self
            .relations
            .iter()
            .position(|r| r.pre_task_code == pre && r.post_task_code == post)
        else {
            return Err(EngineError::DataIsNotValid(format!(
                "relation {pre} -> {post} does not exist"
            )));
        };

        let removed = self.relations.remove(index);
        self.ensure_root(post, removed.post_task_version);
        Ok(())
    }

    /// Point every edge touching `task_code` at `version`.
    pub fn set_task_version(&mut self, task_code: i64, version: i32) {
        for relation in &mut self.relations {
            if relation.pre_task_code == task_code {
                relation.pre_task_version = version;
            }
            if relation.post_task_code == task_code {
                relation.post_task_version = version;
            }
        }
        self.task_versions.insert(task_code, version);
    }

    // ---- helpers ----

    fn version_of(&self, task_code: i64) -> Result<i32, EngineError> {
        self.task_versions
            .get(&task_code)
            .copied()
            .ok_or(EngineError::TaskDefinitionNotExists(task_code))
    }

    fn root_edge(&self, task_code: i64, version: i32) -> TaskRelation {
        TaskRelation::new(
            self.project_code,
            self.workflow_code,
            (ROOT_TASK_CODE, 0),
            (task_code, version),
        )
    }

    fn ensure_root(&mut self, task_code: i64, version: i32) {
        if self.upstream_of(task_code).is_empty() {
            let root = self.root_edge(task_code, version);
            self.relations.push(root);
        }
    }
}

/// Each post task has exactly one root edge or only real upstream edges.
///
/// # Errors
/// [`EngineError::DataIsNotValid`] naming the first offending task.
pub fn check_root_invariant(relations: &[TaskRelation]) -> Result<(), EngineError> {
    let mut counts: HashMap<i64, (usize, usize)> = HashMap::new();
    for relation in relations {
        let (roots, real) = counts.entry(relation.post_task_code).or_default();
        if relation.is_root() {
            *roots += 1;
        } else {
            *real += 1;
        }
    }

    for relation in relations {
        let (roots, real) = counts[&relation.post_task_code];
        if roots > 1 || (roots == 1 && real > 0) {
            return Err(EngineError::DataIsNotValid(format!(
                "task {} must have either one root edge or real upstream edges",
                relation.post_task_code
            )));
        }
    }
    Ok(())
}
