//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models; they carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// workflow_definition / workflow_definition_log
// ---------------------------------------------------------------------------

/// The live row of a workflow definition, always at its latest version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowDefinitionRow {
    pub code: i64,
    pub version: i32,
    pub project_code: i64,
    pub name: String,
    pub description: String,
    /// JSON array of `{prop, value}` objects.
    pub global_params: serde_json::Value,
    /// Opaque canvas layout owned by the UI.
    pub locations: String,
    /// `ONLINE` or `OFFLINE`.
    pub release_state: String,
    /// Minutes; 0 disables the timeout.
    pub timeout: i32,
    pub execution_type: String,
    pub update_time: DateTime<Utc>,
}

/// An immutable snapshot of one workflow definition version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowDefinitionLogRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub definition: WorkflowDefinitionRow,
    pub operator: i32,
    pub operate_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// task_definition / task_definition_log
// ---------------------------------------------------------------------------

/// A task definition at one version. The same struct serves the live table
/// and the log table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TaskDefinitionRow {
    pub code: i64,
    pub version: i32,
    pub project_code: i64,
    pub name: String,
    pub description: String,
    pub task_type: String,
    pub task_params: serde_json::Value,
    pub fail_retry_times: i32,
    /// Minutes; 0 disables the timeout.
    pub timeout: i32,
    pub update_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_task_relation / workflow_task_relation_log
// ---------------------------------------------------------------------------

/// One precedence edge. `pre_task_code == 0` marks a task without upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct TaskRelationRow {
    pub project_code: i64,
    pub workflow_definition_code: i64,
    pub workflow_definition_version: i32,
    pub pre_task_code: i64,
    pub pre_task_version: i32,
    pub post_task_code: i64,
    pub post_task_version: i32,
    pub condition_type: String,
    pub condition_params: String,
}

// ---------------------------------------------------------------------------
// workflow_instance / task_instance
// ---------------------------------------------------------------------------

/// A past run of a workflow, read for the tree and Gantt views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowInstanceRow {
    pub id: i64,
    pub workflow_definition_code: i64,
    pub workflow_definition_version: i32,
    pub name: String,
    pub state: String,
    pub host: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// A past run of one task inside a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TaskInstanceRow {
    pub id: i64,
    pub workflow_instance_id: i64,
    pub task_code: i64,
    pub name: String,
    pub task_type: String,
    pub state: String,
    pub host: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}
