//! The `TaskParameters` trait — the contract every parameter struct fulfils.

use crate::{Property, TaskParamsError};

/// Behaviour shared by every strongly-typed parameter struct.
///
/// The DAG core never looks inside a payload except through this trait.
pub trait TaskParameters {
    /// Reject the payload if a required field is blank or out of range.
    fn validate(&self) -> Result<(), TaskParamsError>;

    /// Parameters the task declares locally (shadowing workflow globals).
    fn local_params(&self) -> &[Property] {
        &[]
    }

    /// Task codes this payload refers to by value, e.g. the branches of a
    /// conditions task. These must exist in the same workflow.
    fn referenced_task_codes(&self) -> Vec<i64> {
        Vec::new()
    }
}
