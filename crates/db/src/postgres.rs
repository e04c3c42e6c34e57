//! Postgres-backed [`DefinitionStore`].

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::{
    DbError, DbPool,
    models::{
        TaskDefinitionRow, TaskInstanceRow, TaskRelationRow, WorkflowDefinitionLogRow,
        WorkflowDefinitionRow, WorkflowInstanceRow,
    },
    repository::{
        instances,
        relations::{self, RelationTable},
        tasks, workflows,
    },
    store::{DefinitionStore, VersionSnapshot},
};

/// A [`DefinitionStore`] over a shared Postgres pool.
#[derive(Debug, Clone)]
pub struct PgDefinitionStore {
    pool: DbPool,
}

impl PgDefinitionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DefinitionStore for PgDefinitionStore {
    async fn load_workflow(&self, code: i64) -> Result<Option<WorkflowDefinitionRow>, DbError> {
        workflows::get_workflow(&self.pool, code).await
    }

    async fn load_workflow_log(
        &self,
        code: i64,
        version: i32,
    ) -> Result<Option<WorkflowDefinitionLogRow>, DbError> {
        workflows::get_workflow_log(&self.pool, code, version).await
    }

    async fn list_workflow_logs(&self, code: i64) -> Result<Vec<WorkflowDefinitionLogRow>, DbError> {
        workflows::list_workflow_logs(&self.pool, code).await
    }

    async fn max_workflow_version(&self, code: i64) -> Result<i32, DbError> {
        workflows::max_workflow_version(&self.pool, code).await
    }

    async fn load_task_definition(
        &self,
        code: i64,
        version: Option<i32>,
    ) -> Result<Option<TaskDefinitionRow>, DbError> {
        match version {
            Some(v) => tasks::get_task_log(&self.pool, code, v).await,
            None => tasks::get_task(&self.pool, code).await,
        }
    }

    async fn max_task_version(&self, code: i64) -> Result<i32, DbError> {
        tasks::max_task_version(&self.pool, code).await
    }

    async fn load_relations(&self, workflow_code: i64) -> Result<Vec<TaskRelationRow>, DbError> {
        relations::list_relations(&self.pool, workflow_code).await
    }

    async fn load_relation_logs(
        &self,
        workflow_code: i64,
        version: i32,
    ) -> Result<Vec<TaskRelationRow>, DbError> {
        relations::list_relation_logs(&self.pool, workflow_code, version).await
    }

    /// One transaction: any failing statement rolls back the whole bump
    /// when `tx` is dropped without commit.
    #[instrument(skip(self, snapshot), fields(code = snapshot.definition.code, version = snapshot.definition.version))]
    async fn persist_new_version(&self, snapshot: VersionSnapshot) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        let code = snapshot.definition.code;

        match snapshot.expected_version {
            Some(expected) => {
                workflows::update_workflow(&mut *tx, &snapshot.definition, expected).await?
            }
            None => workflows::insert_workflow(&mut *tx, &snapshot.definition).await?,
        }

        let log = WorkflowDefinitionLogRow {
            definition: snapshot.definition.clone(),
            operator: snapshot.operator,
            operate_time: snapshot.operate_time,
        };
        workflows::insert_workflow_log(&mut *tx, &log, snapshot.expected_version).await?;

        let removed = relations::delete_relations(&mut *tx, code).await?;
        for row in &snapshot.relations {
            relations::insert_relation(&mut *tx, RelationTable::Live, row).await?;
            relations::insert_relation(&mut *tx, RelationTable::Log, row).await?;
        }

        for task in &snapshot.task_definitions {
            tasks::insert_task_log(&mut *tx, task).await?;
            tasks::upsert_task(&mut *tx, task).await?;
        }

        tx.commit().await?;
        debug!(
            "replaced {} relation rows with {}",
            removed,
            snapshot.relations.len()
        );
        Ok(())
    }

    async fn update_release_state(&self, code: i64, release_state: &str) -> Result<(), DbError> {
        workflows::update_release_state(&self.pool, code, release_state).await
    }

    async fn delete_workflow_log(&self, code: i64, version: i32) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        workflows::delete_workflow_log(&mut *tx, code, version).await?;
        relations::delete_relation_logs(&mut *tx, code, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load_instance_history(
        &self,
        workflow_code: i64,
        limit: usize,
    ) -> Result<Vec<WorkflowInstanceRow>, DbError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        instances::recent_workflow_instances(&self.pool, workflow_code, limit).await
    }

    async fn load_task_instances(
        &self,
        workflow_instance_ids: &[i64],
    ) -> Result<Vec<TaskInstanceRow>, DbError> {
        instances::task_instances_of(&self.pool, workflow_instance_ids).await
    }
}
