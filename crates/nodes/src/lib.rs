//! `nodes` crate — strongly-typed task payloads.
//!
//! A task definition carries a [`TaskParams`] value: a tagged union keyed
//! by [`TaskType`], each variant holding its own parameter struct. Payloads
//! are decoded and validated here, at the boundary, so the DAG core only
//! ever sees well-formed tasks.

pub mod error;
pub mod params;
pub mod traits;

pub use error::TaskParamsError;
pub use params::{
    ConditionsParams, HttpMethod, HttpParams, Property, PythonParams, ShellParams, SqlParams,
    SubWorkflowParams, TaskParams, TaskType,
};
pub use traits::TaskParameters;
