//! Copy-on-write versioning of workflow definitions.
//!
//! `VersionedDefinitionStore` sits between the editor and the persistence
//! collaborator. Every structural edit of a workflow:
//! 1. Diffs the desired edges against the stored ones.
//! 2. Returns [`CommitOutcome::Unchanged`] for a no-op save.
//! 3. Otherwise allocates `max(version) + 1`, tags every edge with it and
//!    hands one [`VersionSnapshot`] to the store, which applies it
//!    atomically and conditionally on the live version read in step 1.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument};

use db::{DbError, DefinitionStore, VersionSnapshot};

use crate::{
    EngineError,
    diff::{EdgeDiff, compute_edge_diff},
    models::{ReleaseState, TaskDefinition, TaskRelation, WorkflowDefinition, WorkflowDefinitionLog},
};

// ---------------------------------------------------------------------------
// Edit / outcome
// ---------------------------------------------------------------------------

/// One edit to commit.
#[derive(Debug, Clone)]
pub struct WorkflowEdit {
    /// The live definition the edit was computed from; `None` on create.
    pub current: Option<WorkflowDefinition>,
    /// Desired descriptive fields. `version` is assigned on commit.
    pub desired: WorkflowDefinition,
    /// The complete desired edge set.
    pub relations: Vec<TaskRelation>,
    /// Task definitions that already carry their new version.
    pub task_definitions: Vec<TaskDefinition>,
    pub operator: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CommitOutcome {
    /// Nothing differed; no version was written.
    Unchanged { version: i32 },
    Committed { version: i32, diff: EdgeDiff },
}

impl CommitOutcome {
    /// The live version after the commit.
    pub fn version(&self) -> i32 {
        match self {
            Self::Unchanged { version } | Self::Committed { version, .. } => *version,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

// ---------------------------------------------------------------------------
// VersionedDefinitionStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct VersionedDefinitionStore {
    store: Arc<dyn DefinitionStore>,
}

impl VersionedDefinitionStore {
    pub fn new(store: Arc<dyn DefinitionStore>) -> Self {
        Self { store }
    }

    /// The live definition and its live edges.
    ///
    /// # Errors
    /// [`EngineError::WorkflowNotFound`] when the code was never saved.
    pub async fn load_current(
        &self,
        code: i64,
    ) -> Result<(WorkflowDefinition, Vec<TaskRelation>), EngineError> {
        let row = self
            .store
            .load_workflow(code)
            .await?
            .ok_or(EngineError::WorkflowNotFound(code))?;
        let relations = self
            .store
            .load_relations(code)
            .await?
            .into_iter()
            .map(TaskRelation::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((row.try_into()?, relations))
    }

    /// Commit an edit as a new version, or report it as a no-op.
    ///
    /// # Errors
    /// - [`EngineError::WorkflowOnline`] when `current` is ONLINE.
    /// - [`EngineError::VersionConflict`] when another edit committed since
    ///   `current` was read. Nothing was written; re-read and retry.
    /// - [`EngineError::Save`] for any other persistence failure. Nothing
    ///   was written.
    #[instrument(skip(self, edit), fields(code = edit.desired.code, operator = edit.operator))]
    pub async fn commit(&self, edit: WorkflowEdit) -> Result<CommitOutcome, EngineError> {
        let code = edit.desired.code;
        let old_relations = match &edit.current {
            Some(current) => {
                if current.is_online() {
                    return Err(EngineError::WorkflowOnline(code));
                }
                self.store
                    .load_relations(code)
                    .await?
                    .into_iter()
                    .map(TaskRelation::try_from)
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => Vec::new(),
        };

        let diff = compute_edge_diff(&old_relations, &edit.relations);
        if let Some(current) = &edit.current {
            if !diff.changed && edit.task_definitions.is_empty() && current.same_content(&edit.desired) {
                debug!("no-op save of workflow {code}, staying at version {}", current.version);
                return Ok(CommitOutcome::Unchanged {
                    version: current.version,
                });
            }
        }

        let version = self.store.max_workflow_version(code).await? + 1;
        let now = Utc::now();

        let mut definition = edit.desired;
        definition.version = version;
        definition.update_time = now;

        let relations = edit
            .relations
            .iter()
            .map(|relation| {
                let mut relation = relation.clone();
                relation.project_code = definition.project_code;
                relation.workflow_definition_code = code;
                relation.workflow_definition_version = version;
                relation.to_row()
            })
            .collect();
        let task_definitions = edit
            .task_definitions
            .iter()
            .map(TaskDefinition::to_row)
            .collect::<Result<Vec<_>, _>>()?;

        let snapshot = VersionSnapshot {
            definition: definition.to_row(),
            expected_version: edit.current.as_ref().map(|c| c.version),
            relations,
            task_definitions,
            operator: edit.operator,
            operate_time: now,
        };
        self.store.persist_new_version(snapshot).await?;

        info!(
            "workflow {code} committed at version {version} (+{} / -{} edges, {} task versions)",
            diff.to_insert.len(),
            diff.to_delete.len(),
            edit.task_definitions.len()
        );
        Ok(CommitOutcome::Committed { version, diff })
    }

    /// Make the content of `version` live again, as a new version.
    ///
    /// The relations keep the task versions they were saved with. Switching
    /// to a version whose content equals the live one is a no-op.
    #[instrument(skip(self))]
    pub async fn switch_version(
        &self,
        code: i64,
        version: i32,
        operator: i32,
    ) -> Result<CommitOutcome, EngineError> {
        let (current, _) = self.load_current(code).await?;
        if current.is_online() {
            return Err(EngineError::WorkflowOnline(code));
        }

        let log = self
            .store
            .load_workflow_log(code, version)
            .await?
            .ok_or(EngineError::VersionNotFound { code, version })?;
        let mut desired = WorkflowDefinition::try_from(log.definition)?;
        desired.release_state = current.release_state;
        let relations = self.relations_at(code, version).await?;

        info!("switching workflow {code} from version {} to the content of {version}", current.version);
        self.commit(WorkflowEdit {
            current: Some(current),
            desired,
            relations,
            task_definitions: Vec::new(),
            operator,
        })
        .await
    }

    /// Every logged version, oldest first.
    pub async fn history(&self, code: i64) -> Result<Vec<WorkflowDefinitionLog>, EngineError> {
        self.store
            .list_workflow_logs(code)
            .await?
            .into_iter()
            .map(WorkflowDefinitionLog::try_from)
            .collect()
    }

    /// The edge set exactly as it was saved at `version`.
    pub async fn relations_at(
        &self,
        code: i64,
        version: i32,
    ) -> Result<Vec<TaskRelation>, EngineError> {
        if self.store.load_workflow_log(code, version).await?.is_none() {
            return Err(EngineError::VersionNotFound { code, version });
        }
        self.store
            .load_relation_logs(code, version)
            .await?
            .into_iter()
            .map(TaskRelation::try_from)
            .collect()
    }

    /// Drop a historical version. The live version cannot be deleted.
    #[instrument(skip(self))]
    pub async fn delete_version(&self, code: i64, version: i32) -> Result<(), EngineError> {
        let (current, _) = self.load_current(code).await?;
        if current.version == version {
            return Err(EngineError::DataIsNotValid(format!(
                "version {version} of workflow {code} is in use"
            )));
        }

        match self.store.delete_workflow_log(code, version).await {
            Ok(()) => {
                info!("deleted version {version} of workflow {code}");
                Ok(())
            }
            Err(DbError::NotFound) => Err(EngineError::VersionNotFound { code, version }),
            Err(e) => Err(e.into()),
        }
    }

    /// Flip the release flag. Does not create a version.
    #[instrument(skip(self))]
    pub async fn set_release_state(&self, code: i64, state: ReleaseState) -> Result<(), EngineError> {
        match self.store.update_release_state(code, &state.to_string()).await {
            Ok(()) => {
                info!("workflow {code} is now {state}");
                Ok(())
            }
            Err(DbError::NotFound) => Err(EngineError::WorkflowNotFound(code)),
            Err(e) => Err(e.into()),
        }
    }
}
