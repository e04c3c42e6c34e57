//! Workflow editor — the write-side entry point of the DAG core.
//!
//! `WorkflowEditor` turns user edits into committed versions:
//! 1. Loads the live definition and edges, refusing ONLINE workflows.
//! 2. Applies the edit to a [`TaskRelationSet`] or a fresh task list.
//! 3. Validates the resulting graph (root invariant, acyclic).
//! 4. Hands the result to [`VersionedDefinitionStore::commit`].
//!
//! Every validation runs before the first write, so a refused edit leaves
//! nothing behind.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use db::DefinitionStore;
use nodes::{Property, TaskParameters};

use crate::{
    EngineError,
    code::CodeGenerator,
    config::EngineConfig,
    dag::{build_dag, check_relation_list},
    graph::Graph,
    models::{
        ExecutionType, InstanceSummary, ReleaseState, TaskDefinition, TaskNode, TaskRelation,
        WorkflowDefinition,
    },
    relation::TaskRelationSet,
    version::{CommitOutcome, VersionedDefinitionStore, WorkflowEdit},
    view::{GanttView, TreeView, build_gantt_view, build_tree_view},
};

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

/// A whole workflow as submitted by a user: its descriptive fields, every
/// task definition and the full edge list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDraft {
    pub project_code: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub global_params: Vec<Property>,
    #[serde(default)]
    pub locations: String,
    #[serde(default)]
    pub timeout: i32,
    #[serde(default = "default_execution_type")]
    pub execution_type: ExecutionType,
    pub task_definitions: Vec<TaskDefinition>,
    pub relations: Vec<TaskRelation>,
}

fn default_execution_type() -> ExecutionType {
    ExecutionType::Parallel
}

// ---------------------------------------------------------------------------
// WorkflowEditor
// ---------------------------------------------------------------------------

pub struct WorkflowEditor {
    store: Arc<dyn DefinitionStore>,
    versions: VersionedDefinitionStore,
    codes: Arc<dyn CodeGenerator>,
    config: EngineConfig,
}

impl WorkflowEditor {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        codes: Arc<dyn CodeGenerator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            versions: VersionedDefinitionStore::new(Arc::clone(&store)),
            store,
            codes,
            config,
        }
    }

    /// History, switch and delete operations live on the version store.
    pub fn versions(&self) -> &VersionedDefinitionStore {
        &self.versions
    }

    /// Reserve `count` task codes.
    pub fn gen_task_codes(&self, count: usize) -> Result<Vec<i64>, EngineError> {
        if count == 0 {
            return Err(EngineError::DataIsNotValid("code count must be positive".into()));
        }
        self.codes.next_codes(count)
    }

    // ---- whole-workflow saves ----

    /// Save a new workflow at version 1, OFFLINE.
    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create_workflow(
        &self,
        draft: WorkflowDraft,
        operator: i32,
    ) -> Result<WorkflowDefinition, EngineError> {
        let code = self.codes.next_code()?;
        let (task_definitions, relations) = self
            .prepare_tasks(code, draft.project_code, draft.task_definitions, draft.relations)
            .await?;

        let desired = WorkflowDefinition {
            code,
            version: 0,
            project_code: draft.project_code,
            name: draft.name,
            description: draft.description,
            global_params: draft.global_params,
            locations: draft.locations,
            release_state: ReleaseState::Offline,
            timeout: draft.timeout,
            execution_type: draft.execution_type,
            update_time: Utc::now(),
        };

        self.versions
            .commit(WorkflowEdit {
                current: None,
                desired,
                relations,
                task_definitions,
                operator,
            })
            .await?;

        let (created, _) = self.versions.load_current(code).await?;
        info!("created workflow {code} '{}'", created.name);
        Ok(created)
    }

    /// Replace the content of an existing workflow.
    #[instrument(skip(self, draft))]
    pub async fn update_workflow(
        &self,
        code: i64,
        draft: WorkflowDraft,
        operator: i32,
    ) -> Result<CommitOutcome, EngineError> {
        let current = self.editable(code).await?;
        let (task_definitions, relations) = self
            .prepare_tasks(code, current.project_code, draft.task_definitions, draft.relations)
            .await?;

        let desired = WorkflowDefinition {
            name: draft.name,
            description: draft.description,
            global_params: draft.global_params,
            locations: draft.locations,
            timeout: draft.timeout,
            execution_type: draft.execution_type,
            ..current.clone()
        };

        self.versions
            .commit(WorkflowEdit {
                current: Some(current),
                desired,
                relations,
                task_definitions,
                operator,
            })
            .await
    }

    /// Move a workflow ONLINE or OFFLINE. Going ONLINE re-validates the
    /// live DAG first. No version is created.
    #[instrument(skip(self))]
    pub async fn release(&self, code: i64, state: ReleaseState) -> Result<(), EngineError> {
        if state == ReleaseState::Online {
            self.load_dag(code).await?;
        } else if self.store.load_workflow(code).await?.is_none() {
            return Err(EngineError::WorkflowNotFound(code));
        }
        self.versions.set_release_state(code, state).await
    }

    // ---- single-edge edits ----

    /// Add `pre -> post`; `pre == 0` asks for a root edge.
    #[instrument(skip(self))]
    pub async fn create_relation(
        &self,
        code: i64,
        pre_task_code: i64,
        post_task_code: i64,
        operator: i32,
    ) -> Result<CommitOutcome, EngineError> {
        self.edit_relations(code, operator, &[pre_task_code, post_task_code], |set| {
            set.add_edge(pre_task_code, post_task_code)
        })
        .await
    }

    /// Take a task out of the workflow.
    ///
    /// # Errors
    /// [`EngineError::TaskHasDownstream`] while other tasks depend on it.
    #[instrument(skip(self))]
    pub async fn delete_task_relation(
        &self,
        code: i64,
        task_code: i64,
        operator: i32,
    ) -> Result<CommitOutcome, EngineError> {
        self.edit_relations(code, operator, &[], |set| {
            set.remove_edges_for_task(task_code).map(|_| ())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete_upstream_relation(
        &self,
        code: i64,
        task_code: i64,
        pre_task_codes: Vec<i64>,
        operator: i32,
    ) -> Result<CommitOutcome, EngineError> {
        self.edit_relations(code, operator, &[], |set| {
            set.remove_upstream(task_code, &pre_task_codes)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete_downstream_relation(
        &self,
        code: i64,
        task_code: i64,
        post_task_codes: Vec<i64>,
        operator: i32,
    ) -> Result<CommitOutcome, EngineError> {
        self.edit_relations(code, operator, &[], |set| {
            set.remove_downstream(task_code, &post_task_codes)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete_edge(
        &self,
        code: i64,
        pre_task_code: i64,
        post_task_code: i64,
        operator: i32,
    ) -> Result<CommitOutcome, EngineError> {
        self.edit_relations(code, operator, &[], |set| {
            set.remove_edge(pre_task_code, post_task_code)
        })
        .await
    }

    /// Save a new version of one task and re-point the workflow's edges at it.
    #[instrument(skip(self, task), fields(task_code = task.code))]
    pub async fn update_task_definition(
        &self,
        code: i64,
        mut task: TaskDefinition,
        operator: i32,
    ) -> Result<CommitOutcome, EngineError> {
        let current = self.editable(code).await?;
        task.params.validate()?;

        let existing: TaskDefinition = self
            .store
            .load_task_definition(task.code, None)
            .await?
            .ok_or(EngineError::TaskDefinitionNotExists(task.code))?
            .try_into()?;
        task.project_code = existing.project_code;
        if existing.same_content(&task) {
            return Ok(CommitOutcome::Unchanged {
                version: current.version,
            });
        }

        let relations = self.live_relations(code).await?;
        if !relations.iter().any(|r| r.post_task_code == task.code) {
            return Err(EngineError::DataIsNotValid(format!(
                "task {} is not part of workflow {code}",
                task.code
            )));
        }

        task.version = self.store.max_task_version(task.code).await? + 1;
        task.update_time = Utc::now();

        let mut set = TaskRelationSet::new(current.project_code, code, relations, HashMap::new());
        set.set_task_version(task.code, task.version);

        info!("task {} moves to version {}", task.code, task.version);
        self.versions
            .commit(WorkflowEdit {
                current: Some(current.clone()),
                desired: current,
                relations: set.into_relations(),
                task_definitions: vec![task],
                operator,
            })
            .await
    }

    // ---- read side ----

    /// The live DAG, built from the task versions its edges point at.
    pub async fn load_dag(&self, code: i64) -> Result<Graph<i64, TaskNode>, EngineError> {
        if self.store.load_workflow(code).await?.is_none() {
            return Err(EngineError::WorkflowNotFound(code));
        }
        let relations = self.live_relations(code).await?;

        let mut definitions = Vec::new();
        let mut seen = HashSet::new();
        for relation in &relations {
            if !seen.insert(relation.post_task_code) {
                continue;
            }
            let definition: TaskDefinition = self
                .store
                .load_task_definition(relation.post_task_code, Some(relation.post_task_version))
                .await?
                .ok_or(EngineError::TaskDefinitionNotExists(relation.post_task_code))?
                .try_into()?;
            definitions.push(definition);
        }

        build_dag(&relations, &definitions)
    }

    pub async fn tree_view(&self, code: i64, limit: Option<usize>) -> Result<TreeView, EngineError> {
        let limit = self.config.clamp_limit(limit);
        let graph = self.load_dag(code).await?;
        let history = self.instance_history(code, limit).await?;
        Ok(build_tree_view(&graph, &history, limit))
    }

    pub async fn gantt_view(&self, code: i64, limit: Option<usize>) -> Result<GanttView, EngineError> {
        let limit = self.config.clamp_limit(limit);
        let graph = self.load_dag(code).await?;
        let history = self.instance_history(code, limit).await?;
        build_gantt_view(&graph, &history)
    }

    // ---- helpers ----

    /// The live definition, refusing ONLINE workflows.
    async fn editable(&self, code: i64) -> Result<WorkflowDefinition, EngineError> {
        let current: WorkflowDefinition = self
            .store
            .load_workflow(code)
            .await?
            .ok_or(EngineError::WorkflowNotFound(code))?
            .try_into()?;
        if current.is_online() {
            warn!("refusing to edit online workflow {code}");
            return Err(EngineError::WorkflowOnline(code));
        }
        Ok(current)
    }

    async fn live_relations(&self, code: i64) -> Result<Vec<TaskRelation>, EngineError> {
        self.store
            .load_relations(code)
            .await?
            .into_iter()
            .map(TaskRelation::try_from)
            .collect()
    }

    /// Load the live edges, apply `edit`, validate and commit.
    ///
    /// `extra_codes` are task codes the edit may attach that are not part of
    /// the workflow yet.
    ///
    /// New edges are stamped with each task's live version, even when older
    /// edges still pin an earlier one after a version switch.
    async fn edit_relations<F>(
        &self,
        code: i64,
        operator: i32,
        extra_codes: &[i64],
        edit: F,
    ) -> Result<CommitOutcome, EngineError>
    where
        F: FnOnce(&mut TaskRelationSet) -> Result<(), EngineError>,
    {
        let current = self.editable(code).await?;
        let relations = self.live_relations(code).await?;

        let mut codes: Vec<i64> = relations
            .iter()
            .flat_map(|r| [r.pre_task_code, r.post_task_code])
            .chain(extra_codes.iter().copied())
            .filter(|c| *c != 0)
            .collect();
        codes.sort_unstable();
        codes.dedup();

        let mut definitions = Vec::with_capacity(codes.len());
        for task_code in codes {
            let definition: TaskDefinition = self
                .store
                .load_task_definition(task_code, None)
                .await?
                .ok_or(EngineError::TaskDefinitionNotExists(task_code))?
                .try_into()?;
            definitions.push(definition);
        }
        let versions = definitions.iter().map(|d| (d.code, d.version)).collect();

        let mut set = TaskRelationSet::new(current.project_code, code, relations, versions);
        edit(&mut set)?;
        set.check_root_invariant()?;
        let relations = set.into_relations();
        if relations.is_empty() {
            return Err(EngineError::DataIsNotValid(format!(
                "workflow {code} would be left without tasks"
            )));
        }
        build_dag(&relations, &definitions)?;

        self.versions
            .commit(WorkflowEdit {
                current: Some(current.clone()),
                desired: current,
                relations,
                task_definitions: Vec::new(),
                operator,
            })
            .await
    }

    /// Validate a submitted task list and edge list, version the tasks whose
    /// content changed and pin every edge to the resulting task versions.
    async fn prepare_tasks(
        &self,
        workflow_code: i64,
        project_code: i64,
        tasks: Vec<TaskDefinition>,
        relations: Vec<TaskRelation>,
    ) -> Result<(Vec<TaskDefinition>, Vec<TaskRelation>), EngineError> {
        if tasks.is_empty() {
            return Err(EngineError::DataIsNull("taskDefinitionList".into()));
        }
        let mut seen = HashSet::new();
        for task in &tasks {
            if task.code <= 0 {
                return Err(EngineError::DataIsNotValid(format!(
                    "task '{}' has no generated code",
                    task.name
                )));
            }
            if !seen.insert(task.code) {
                return Err(EngineError::DataIsNotValid(format!(
                    "task code {} appears twice",
                    task.code
                )));
            }
        }
        check_relation_list(&relations, &tasks)?;

        let now = Utc::now();
        let mut versions: HashMap<i64, i32> = HashMap::new();
        let mut changed = Vec::new();
        for mut task in tasks {
            task.project_code = project_code;
            if let Some(row) = self.store.load_task_definition(task.code, None).await? {
                let existing = TaskDefinition::try_from(row)?;
                if existing.same_content(&task) {
                    versions.insert(task.code, existing.version);
                    continue;
                }
            }
            task.version = self.store.max_task_version(task.code).await? + 1;
            task.update_time = now;
            versions.insert(task.code, task.version);
            changed.push(task);
        }

        let relations = relations
            .into_iter()
            .map(|mut relation| {
                relation.project_code = project_code;
                relation.workflow_definition_code = workflow_code;
                relation.pre_task_version = if relation.is_root() {
                    0
                } else {
                    version_for(&versions, relation.pre_task_code)?
                };
                relation.post_task_version = version_for(&versions, relation.post_task_code)?;
                Ok(relation)
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        Ok((changed, relations))
    }

    async fn instance_history(
        &self,
        code: i64,
        limit: usize,
    ) -> Result<Vec<InstanceSummary>, EngineError> {
        let rows = self.store.load_instance_history(code, limit).await?;
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

        let mut runs: HashMap<i64, Vec<_>> = HashMap::new();
        for run in self.store.load_task_instances(&ids).await? {
            runs.entry(run.workflow_instance_id).or_default().push(run);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let tasks = runs.remove(&row.id).unwrap_or_default();
                InstanceSummary::from_rows(row, tasks)
            })
            .collect())
    }
}

fn version_for(versions: &HashMap<i64, i32>, task_code: i64) -> Result<i32, EngineError> {
    versions
        .get(&task_code)
        .copied()
        .ok_or(EngineError::TaskDefinitionNotExists(task_code))
}
