//! The persistence contract the DAG core is written against.
//!
//! The core never talks to a database directly. It reads through
//! [`DefinitionStore`] and hands every structural edit over as one
//! [`VersionSnapshot`], which the implementation must apply atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    DbError,
    models::{
        TaskDefinitionRow, TaskInstanceRow, TaskRelationRow, WorkflowDefinitionLogRow,
        WorkflowDefinitionRow, WorkflowInstanceRow,
    },
};

/// Everything one version bump writes.
///
/// Applying a snapshot means, all-or-nothing:
/// 1. upsert the live definition row (conditional on `expected_version`),
/// 2. append the definition log row,
/// 3. replace the live relation rows of the workflow,
/// 4. append the relation log rows at `definition.version`,
/// 5. upsert each task definition and append its log row.
#[derive(Debug, Clone)]
pub struct VersionSnapshot {
    /// Carries the new version.
    pub definition: WorkflowDefinitionRow,
    /// The live version the caller read; `None` when creating the workflow.
    pub expected_version: Option<i32>,
    /// Full relation set, every row tagged with `definition.version`.
    pub relations: Vec<TaskRelationRow>,
    /// Task definitions that received a new version in this edit.
    pub task_definitions: Vec<TaskDefinitionRow>,
    pub operator: i32,
    pub operate_time: DateTime<Utc>,
}

/// Persistence collaborator for workflow definitions, relations and history.
///
/// Implementations must be thread-safe. Concurrent edits of the same code are
/// detected through `expected_version` and surface as
/// [`DbError::VersionConflict`]; no implementation retries on its own.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// The live definition row, if the workflow exists.
    async fn load_workflow(&self, code: i64) -> Result<Option<WorkflowDefinitionRow>, DbError>;

    async fn load_workflow_log(
        &self,
        code: i64,
        version: i32,
    ) -> Result<Option<WorkflowDefinitionLogRow>, DbError>;

    /// Every logged version, oldest first.
    async fn list_workflow_logs(&self, code: i64) -> Result<Vec<WorkflowDefinitionLogRow>, DbError>;

    /// Highest logged version, 0 when the code was never saved.
    async fn max_workflow_version(&self, code: i64) -> Result<i32, DbError>;

    /// A task definition at `version`, or the live one when `version` is `None`.
    async fn load_task_definition(
        &self,
        code: i64,
        version: Option<i32>,
    ) -> Result<Option<TaskDefinitionRow>, DbError>;

    /// Highest logged version of a task, 0 when never saved.
    async fn max_task_version(&self, code: i64) -> Result<i32, DbError>;

    /// The live relation rows of a workflow.
    async fn load_relations(&self, workflow_code: i64) -> Result<Vec<TaskRelationRow>, DbError>;

    /// The relation rows logged for one workflow version.
    async fn load_relation_logs(
        &self,
        workflow_code: i64,
        version: i32,
    ) -> Result<Vec<TaskRelationRow>, DbError>;

    /// Apply a version bump atomically.
    async fn persist_new_version(&self, snapshot: VersionSnapshot) -> Result<(), DbError>;

    /// Flip the release flag of the live row. Does not create a version.
    async fn update_release_state(&self, code: i64, release_state: &str) -> Result<(), DbError>;

    /// Drop one historical version (definition log and relation log rows).
    async fn delete_workflow_log(&self, code: i64, version: i32) -> Result<(), DbError>;

    /// Most recent instances of a workflow first, at most `limit`.
    async fn load_instance_history(
        &self,
        workflow_code: i64,
        limit: usize,
    ) -> Result<Vec<WorkflowInstanceRow>, DbError>;

    async fn load_task_instances(
        &self,
        workflow_instance_ids: &[i64],
    ) -> Result<Vec<TaskInstanceRow>, DbError>;
}
