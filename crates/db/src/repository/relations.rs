//! Workflow task relation operations, live and logged.

use sqlx::PgExecutor;

use crate::{DbError, models::TaskRelationRow};

const RELATION_COLUMNS: &str = "project_code, workflow_definition_code, \
     workflow_definition_version, pre_task_code, pre_task_version, post_task_code, \
     post_task_version, condition_type, condition_params";

/// The live relation rows of a workflow.
pub async fn list_relations<'e, E: PgExecutor<'e>>(
    executor: E,
    workflow_code: i64,
) -> Result<Vec<TaskRelationRow>, DbError> {
    let sql = format!(
        "SELECT {RELATION_COLUMNS} FROM workflow_task_relation \
         WHERE workflow_definition_code = $1 ORDER BY post_task_code, pre_task_code"
    );
    let rows = sqlx::query_as::<_, TaskRelationRow>(&sql)
        .bind(workflow_code)
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

/// The relation rows logged for one workflow version.
pub async fn list_relation_logs<'e, E: PgExecutor<'e>>(
    executor: E,
    workflow_code: i64,
    version: i32,
) -> Result<Vec<TaskRelationRow>, DbError> {
    let sql = format!(
        "SELECT {RELATION_COLUMNS} FROM workflow_task_relation_log \
         WHERE workflow_definition_code = $1 AND workflow_definition_version = $2 \
         ORDER BY post_task_code, pre_task_code"
    );
    let rows = sqlx::query_as::<_, TaskRelationRow>(&sql)
        .bind(workflow_code)
        .bind(version)
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

/// Remove every live relation row of a workflow.
pub async fn delete_relations<'e, E: PgExecutor<'e>>(
    executor: E,
    workflow_code: i64,
) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM workflow_task_relation WHERE workflow_definition_code = $1")
        .bind(workflow_code)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_relation_logs<'e, E: PgExecutor<'e>>(
    executor: E,
    workflow_code: i64,
    version: i32,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "DELETE FROM workflow_task_relation_log \
         WHERE workflow_definition_code = $1 AND workflow_definition_version = $2",
    )
    .bind(workflow_code)
    .bind(version)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Insert one relation row into `table` (`workflow_task_relation` or
/// `workflow_task_relation_log`).
pub async fn insert_relation<'e, E: PgExecutor<'e>>(
    executor: E,
    table: RelationTable,
    row: &TaskRelationRow,
) -> Result<(), DbError> {
    let sql = format!(
        "INSERT INTO {} ({RELATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        table.name()
    );
    sqlx::query(&sql)
        .bind(row.project_code)
        .bind(row.workflow_definition_code)
        .bind(row.workflow_definition_version)
        .bind(row.pre_task_code)
        .bind(row.pre_task_version)
        .bind(row.post_task_code)
        .bind(row.post_task_version)
        .bind(&row.condition_type)
        .bind(&row.condition_params)
        .execute(executor)
        .await?;
    Ok(())
}

/// Which of the two relation tables a row goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationTable {
    Live,
    Log,
}

impl RelationTable {
    fn name(self) -> &'static str {
        match self {
            Self::Live => "workflow_task_relation",
            Self::Log => "workflow_task_relation_log",
        }
    }
}
