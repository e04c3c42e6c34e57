//! Task-parameter error type.

use thiserror::Error;

/// Errors raised while decoding or validating a task payload.
///
/// Every variant is a boundary failure: the payload is rejected before it
/// reaches the DAG core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskParamsError {
    /// The `taskType` string does not name a known task type.
    #[error("unknown task type: '{0}'")]
    UnknownTaskType(String),

    /// The JSON parameters do not decode into the variant's struct.
    #[error("malformed {task_type} parameters: {message}")]
    Malformed {
        task_type: String,
        message: String,
    },

    /// A required field is missing or blank.
    #[error("{task_type} parameter '{field}' must not be empty")]
    MissingField {
        task_type: &'static str,
        field: &'static str,
    },

    /// A field carries a value outside its legal range.
    #[error("{task_type} parameter '{field}' is invalid: {message}")]
    InvalidField {
        task_type: &'static str,
        field: &'static str,
        message: String,
    },
}
