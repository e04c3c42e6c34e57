//! Core domain models for the DAG core.
//!
//! These types are the source of truth for what a workflow definition looks
//! like in memory. They convert to and from the row structs of the `db`
//! crate; conversion from a row is fallible because rows carry enums and
//! task payloads as strings and JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use db::models::{
    TaskDefinitionRow, TaskInstanceRow, TaskRelationRow, WorkflowDefinitionLogRow,
    WorkflowDefinitionRow, WorkflowInstanceRow,
};
use nodes::{Property, TaskParams, TaskType};

use crate::EngineError;

/// `pre_task_code` of a synthetic root edge: "this task has no upstream".
pub const ROOT_TASK_CODE: i64 = 0;

// ---------------------------------------------------------------------------
// Enums stored as text
// ---------------------------------------------------------------------------

/// Lifecycle flag of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseState {
    /// Editable.
    Offline,
    /// Schedulable; every structural edit is refused.
    Online,
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "OFFLINE"),
            Self::Online  => write!(f, "ONLINE"),
        }
    }
}

impl std::str::FromStr for ReleaseState {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFFLINE" => Ok(Self::Offline),
            "ONLINE"  => Ok(Self::Online),
            other     => Err(EngineError::DataIsNotValid(format!("unknown release state: {other}"))),
        }
    }
}

/// How concurrent instances of one workflow are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    Parallel,
    SerialWait,
    SerialDiscard,
    SerialPriority,
}

impl std::fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parallel       => write!(f, "PARALLEL"),
            Self::SerialWait     => write!(f, "SERIAL_WAIT"),
            Self::SerialDiscard  => write!(f, "SERIAL_DISCARD"),
            Self::SerialPriority => write!(f, "SERIAL_PRIORITY"),
        }
    }
}

impl std::str::FromStr for ExecutionType {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PARALLEL"        => Ok(Self::Parallel),
            "SERIAL_WAIT"     => Ok(Self::SerialWait),
            "SERIAL_DISCARD"  => Ok(Self::SerialDiscard),
            "SERIAL_PRIORITY" => Ok(Self::SerialPriority),
            other             => Err(EngineError::DataIsNotValid(format!("unknown execution type: {other}"))),
        }
    }
}

/// Gate on an edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionType {
    #[default]
    None,
    Judge,
    Delay,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None  => write!(f, "NONE"),
            Self::Judge => write!(f, "JUDGE"),
            Self::Delay => write!(f, "DELAY"),
        }
    }
}

impl std::str::FromStr for ConditionType {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE"  => Ok(Self::None),
            "JUDGE" => Ok(Self::Judge),
            "DELAY" => Ok(Self::Delay),
            other   => Err(EngineError::DataIsNotValid(format!("unknown condition type: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskRelation
// ---------------------------------------------------------------------------

/// Directed precedence edge `(pre_task_code, pre_task_version) ->
/// (post_task_code, post_task_version)` inside one workflow version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRelation {
    pub project_code: i64,
    pub workflow_definition_code: i64,
    #[serde(default)]
    pub workflow_definition_version: i32,
    pub pre_task_code: i64,
    #[serde(default)]
    pub pre_task_version: i32,
    pub post_task_code: i64,
    #[serde(default)]
    pub post_task_version: i32,
    #[serde(default)]
    pub condition_type: ConditionType,
    #[serde(default = "empty_condition_params")]
    pub condition_params: String,
}

fn empty_condition_params() -> String {
    "{}".to_owned()
}

/// Value identity of an edge, ignoring the workflow version it was saved
/// under. Two saves of the same edge compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub project_code: i64,
    pub workflow_definition_code: i64,
    pub pre_task_code: i64,
    pub pre_task_version: i32,
    pub post_task_code: i64,
    pub post_task_version: i32,
    pub condition_type: ConditionType,
    pub condition_params: String,
}

impl TaskRelation {
    /// A plain edge with default condition.
    pub fn new(
        project_code: i64,
        workflow_definition_code: i64,
        (pre_task_code, pre_task_version): (i64, i32),
        (post_task_code, post_task_version): (i64, i32),
    ) -> Self {
        Self {
            project_code,
            workflow_definition_code,
            workflow_definition_version: 0,
            pre_task_code,
            pre_task_version,
            post_task_code,
            post_task_version,
            condition_type: ConditionType::None,
            condition_params: empty_condition_params(),
        }
    }

    /// Whether this is a synthetic "no upstream" edge.
    pub fn is_root(&self) -> bool {
        self.pre_task_code == ROOT_TASK_CODE
    }

    pub fn edge_key(&self) -> EdgeKey {
        EdgeKey {
            project_code: self.project_code,
            workflow_definition_code: self.workflow_definition_code,
            pre_task_code: self.pre_task_code,
            pre_task_version: self.pre_task_version,
            post_task_code: self.post_task_code,
            post_task_version: self.post_task_version,
            condition_type: self.condition_type,
            condition_params: self.condition_params.clone(),
        }
    }

    pub fn to_row(&self) -> TaskRelationRow {
        TaskRelationRow {
            project_code: self.project_code,
            workflow_definition_code: self.workflow_definition_code,
            workflow_definition_version: self.workflow_definition_version,
            pre_task_code: self.pre_task_code,
            pre_task_version: self.pre_task_version,
            post_task_code: self.post_task_code,
            post_task_version: self.post_task_version,
            condition_type: self.condition_type.to_string(),
            condition_params: self.condition_params.clone(),
        }
    }
}

impl TryFrom<TaskRelationRow> for TaskRelation {
    type Error = EngineError;

    fn try_from(row: TaskRelationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            project_code: row.project_code,
            workflow_definition_code: row.workflow_definition_code,
            workflow_definition_version: row.workflow_definition_version,
            pre_task_code: row.pre_task_code,
            pre_task_version: row.pre_task_version,
            post_task_code: row.post_task_code,
            post_task_version: row.post_task_version,
            condition_type: row.condition_type.parse()?,
            condition_params: row.condition_params,
        })
    }
}

// ---------------------------------------------------------------------------
// TaskDefinition
// ---------------------------------------------------------------------------

/// One task at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub code: i64,
    #[serde(default)]
    pub version: i32,
    pub project_code: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub params: TaskParams,
    #[serde(default)]
    pub fail_retry_times: i32,
    #[serde(default)]
    pub timeout: i32,
    #[serde(default = "Utc::now")]
    pub update_time: DateTime<Utc>,
}

impl TaskDefinition {
    pub fn task_type(&self) -> TaskType {
        self.params.task_type()
    }

    /// Equality on everything a user can edit; ignores version and timestamps.
    pub fn same_content(&self, other: &Self) -> bool {
        self.code == other.code
            && self.project_code == other.project_code
            && self.name == other.name
            && self.description == other.description
            && self.params == other.params
            && self.fail_retry_times == other.fail_retry_times
            && self.timeout == other.timeout
    }

    pub fn to_row(&self) -> Result<TaskDefinitionRow, EngineError> {
        let (task_type, task_params) = self.params.to_parts()?;
        Ok(TaskDefinitionRow {
            code: self.code,
            version: self.version,
            project_code: self.project_code,
            name: self.name.clone(),
            description: self.description.clone(),
            task_type,
            task_params,
            fail_retry_times: self.fail_retry_times,
            timeout: self.timeout,
            update_time: self.update_time,
        })
    }
}

impl TryFrom<TaskDefinitionRow> for TaskDefinition {
    type Error = EngineError;

    fn try_from(row: TaskDefinitionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            code: row.code,
            version: row.version,
            project_code: row.project_code,
            name: row.name,
            description: row.description,
            params: TaskParams::from_parts(&row.task_type, row.task_params)?,
            fail_retry_times: row.fail_retry_times,
            timeout: row.timeout,
            update_time: row.update_time,
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// The descriptive part of a workflow; its structure lives in the relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub code: i64,
    pub version: i32,
    pub project_code: i64,
    pub name: String,
    pub description: String,
    pub global_params: Vec<Property>,
    pub locations: String,
    pub release_state: ReleaseState,
    pub timeout: i32,
    pub execution_type: ExecutionType,
    pub update_time: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Equality on the fields whose change warrants a new version.
    pub fn same_content(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.global_params == other.global_params
            && self.locations == other.locations
            && self.timeout == other.timeout
            && self.execution_type == other.execution_type
    }

    pub fn is_online(&self) -> bool {
        self.release_state == ReleaseState::Online
    }

    pub fn to_row(&self) -> WorkflowDefinitionRow {
        let global_params = self
            .global_params
            .iter()
            .map(|p| serde_json::json!({ "prop": p.prop, "value": p.value }))
            .collect();

        WorkflowDefinitionRow {
            code: self.code,
            version: self.version,
            project_code: self.project_code,
            name: self.name.clone(),
            description: self.description.clone(),
            global_params: Value::Array(global_params),
            locations: self.locations.clone(),
            release_state: self.release_state.to_string(),
            timeout: self.timeout,
            execution_type: self.execution_type.to_string(),
            update_time: self.update_time,
        }
    }
}

impl TryFrom<WorkflowDefinitionRow> for WorkflowDefinition {
    type Error = EngineError;

    fn try_from(row: WorkflowDefinitionRow) -> Result<Self, Self::Error> {
        let global_params = serde_json::from_value(row.global_params).map_err(|e| {
            EngineError::DataIsNotValid(format!("globalParams of workflow {}: {e}", row.code))
        })?;

        Ok(Self {
            code: row.code,
            version: row.version,
            project_code: row.project_code,
            name: row.name,
            description: row.description,
            global_params,
            locations: row.locations,
            release_state: row.release_state.parse()?,
            timeout: row.timeout,
            execution_type: row.execution_type.parse()?,
            update_time: row.update_time,
        })
    }
}

/// One immutable entry of a workflow's version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinitionLog {
    pub definition: WorkflowDefinition,
    pub operator: i32,
    pub operate_time: DateTime<Utc>,
}

impl TryFrom<WorkflowDefinitionLogRow> for WorkflowDefinitionLog {
    type Error = EngineError;

    fn try_from(row: WorkflowDefinitionLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            definition: row.definition.try_into()?,
            operator: row.operator,
            operate_time: row.operate_time,
        })
    }
}

// ---------------------------------------------------------------------------
// TaskNode
// ---------------------------------------------------------------------------

/// Graph payload: a task plus the codes it declares as predecessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    pub code: i64,
    pub version: i32,
    pub name: String,
    pub params: TaskParams,
    #[serde(default)]
    pub pre_tasks: Vec<i64>,
}

impl TaskNode {
    pub fn task_type(&self) -> TaskType {
        self.params.task_type()
    }
}

// ---------------------------------------------------------------------------
// Run history
// ---------------------------------------------------------------------------

/// A past workflow run together with its task runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub id: i64,
    pub name: String,
    pub state: String,
    pub host: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskInstanceSummary>,
}

impl InstanceSummary {
    pub fn from_rows(row: WorkflowInstanceRow, tasks: Vec<TaskInstanceRow>) -> Self {
        Self {
            id: row.id,
            name: row.name,
            state: row.state,
            host: row.host,
            start_time: row.start_time,
            end_time: row.end_time,
            tasks: tasks.into_iter().map(TaskInstanceSummary::from).collect(),
        }
    }

    /// The run of `task_code` inside this instance, if it ran.
    pub fn task(&self, task_code: i64) -> Option<&TaskInstanceSummary> {
        self.tasks.iter().find(|t| t.task_code == task_code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInstanceSummary {
    pub id: i64,
    pub task_code: i64,
    pub name: String,
    pub task_type: String,
    pub state: String,
    pub host: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<TaskInstanceRow> for TaskInstanceSummary {
    fn from(row: TaskInstanceRow) -> Self {
        Self {
            id: row.id,
            task_code: row.task_code,
            name: row.name,
            task_type: row.task_type,
            state: row.state,
            host: row.host,
            start_time: row.start_time,
            end_time: row.end_time,
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_key_ignores_workflow_version() {
        let mut a = TaskRelation::new(1, 10, (0, 0), (100, 1));
        let mut b = a.clone();
        a.workflow_definition_version = 3;
        b.workflow_definition_version = 4;
        assert_ne!(a, b);
        assert_eq!(a.edge_key(), b.edge_key());
    }

    #[test]
    fn relation_row_round_trip_keeps_condition() {
        let mut relation = TaskRelation::new(1, 10, (100, 2), (200, 1));
        relation.condition_type = ConditionType::Judge;
        let back = TaskRelation::try_from(relation.to_row()).unwrap();
        assert_eq!(back, relation);
    }

    #[test]
    fn unknown_release_state_is_not_valid() {
        assert!(matches!(
            "PAUSED".parse::<ReleaseState>(),
            Err(EngineError::DataIsNotValid(_))
        ));
    }

    #[test]
    fn same_content_ignores_version_and_release_state() {
        let def = WorkflowDefinition {
            code: 1,
            version: 1,
            project_code: 1,
            name: "daily".into(),
            description: String::new(),
            global_params: vec![Property::new("dt", "today")],
            locations: String::new(),
            release_state: ReleaseState::Offline,
            timeout: 0,
            execution_type: ExecutionType::Parallel,
            update_time: Utc::now(),
        };
        let mut other = def.clone();
        other.version = 9;
        other.release_state = ReleaseState::Online;
        assert!(def.same_content(&other));

        other.global_params.push(Property::new("env", "prod"));
        assert!(!def.same_content(&other));
    }
}
