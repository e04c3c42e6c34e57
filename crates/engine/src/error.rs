//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the DAG core (validation + versioning).
///
/// Every validation variant is raised before any persistence call, so a
/// rejected edit never leaves partial state behind.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// The edge set is not a DAG, or an arc was declared twice.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// The requested edge is already present.
    #[error("relation {pre_task_code} -> {post_task_code} already exists")]
    RelationExists {
        pre_task_code: i64,
        post_task_code: i64,
    },

    /// The task still feeds the listed downstream tasks.
    #[error("task {task_code} has downstream tasks {downstream:?}")]
    TaskHasDownstream {
        task_code: i64,
        downstream: Vec<i64>,
    },

    #[error("data is not valid: {0}")]
    DataIsNotValid(String),

    #[error("required data is missing: {0}")]
    DataIsNull(String),

    #[error("task definition {0} does not exist")]
    TaskDefinitionNotExists(i64),

    #[error("workflow definition {0} does not exist")]
    WorkflowNotFound(i64),

    #[error("workflow definition {code} has no version {version}")]
    VersionNotFound { code: i64, version: i32 },

    /// ONLINE workflows are immutable until taken OFFLINE.
    #[error("workflow definition {0} is online and cannot be edited")]
    WorkflowOnline(i64),

    #[error("invalid task parameters: {0}")]
    InvalidTaskParams(#[from] nodes::TaskParamsError),

    // ------ Versioning errors ------

    /// Another edit committed first; re-read and retry.
    #[error("version conflict on workflow {code}: live version is no longer {expected:?}")]
    VersionConflict { code: i64, expected: Option<i32> },

    #[error("code generation failed: {0}")]
    CodeGeneration(String),

    /// Persistence failed; nothing of the edit was committed.
    #[error("definition save error: {0}")]
    Save(db::DbError),
}

impl EngineError {
    /// Whether re-reading and re-applying the edit may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<db::DbError> for EngineError {
    fn from(err: db::DbError) -> Self {
        match err {
            db::DbError::VersionConflict { code, expected } => {
                Self::VersionConflict { code, expected }
            }
            other => Self::Save(other),
        }
    }
}
