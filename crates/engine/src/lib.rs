//! `engine` crate — the DAG core: domain models, graph validation, edge
//! editing, copy-on-write versioning and the read-side views.

pub mod code;
pub mod config;
pub mod dag;
pub mod diff;
pub mod editor;
pub mod error;
pub mod graph;
pub mod models;
pub mod relation;
pub mod version;
pub mod view;

pub use code::{CodeGenerator, SequenceCodeGenerator, SnowflakeCodeGenerator};
pub use config::EngineConfig;
pub use dag::{build_dag, check_relation_list, validate_acyclic};
pub use diff::{EdgeDiff, compute_edge_diff};
pub use editor::{WorkflowDraft, WorkflowEditor};
pub use error::EngineError;
pub use graph::Graph;
pub use models::{
    ConditionType, ExecutionType, ReleaseState, TaskDefinition, TaskNode, TaskRelation,
    WorkflowDefinition, WorkflowDefinitionLog,
};
pub use relation::TaskRelationSet;
pub use version::{CommitOutcome, VersionedDefinitionStore, WorkflowEdit};
pub use view::{GanttView, TreeView, build_gantt_view, build_tree_view};

#[cfg(test)]
mod editor_tests;
