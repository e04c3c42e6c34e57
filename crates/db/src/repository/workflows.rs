//! Workflow definition and definition-log operations.

use sqlx::PgExecutor;

use crate::{
    DbError,
    models::{WorkflowDefinitionLogRow, WorkflowDefinitionRow},
};

const DEFINITION_COLUMNS: &str = "code, version, project_code, name, description, global_params, \
     locations, release_state, timeout, execution_type, update_time";

/// Fetch the live definition row of a workflow.
pub async fn get_workflow<'e, E: PgExecutor<'e>>(
    executor: E,
    code: i64,
) -> Result<Option<WorkflowDefinitionRow>, DbError> {
    let sql = format!("SELECT {DEFINITION_COLUMNS} FROM workflow_definition WHERE code = $1");
    let row = sqlx::query_as::<_, WorkflowDefinitionRow>(&sql)
        .bind(code)
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

/// Insert the live row of a brand-new workflow.
///
/// A concurrent creator of the same code hits the primary key and gets
/// [`DbError::VersionConflict`].
pub async fn insert_workflow<'e, E: PgExecutor<'e>>(
    executor: E,
    row: &WorkflowDefinitionRow,
) -> Result<(), DbError> {
    let sql = format!(
        "INSERT INTO workflow_definition ({DEFINITION_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
    );
    bind_definition(sqlx::query(&sql), row)
        .execute(executor)
        .await
        .map_err(|e| super::conflict_on_unique(e, row.code, None))?;
    Ok(())
}

/// Overwrite the live row, but only if it still carries `expected_version`.
///
/// Returns `DbError::VersionConflict` when another writer got there first.
pub async fn update_workflow<'e, E: PgExecutor<'e>>(
    executor: E,
    row: &WorkflowDefinitionRow,
    expected_version: i32,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_definition
        SET version = $2, project_code = $3, name = $4, description = $5,
            global_params = $6, locations = $7, release_state = $8,
            timeout = $9, execution_type = $10, update_time = $11
        WHERE code = $1 AND version = $12
        "#,
    )
    .bind(row.code)
    .bind(row.version)
    .bind(row.project_code)
    .bind(&row.name)
    .bind(&row.description)
    .bind(&row.global_params)
    .bind(&row.locations)
    .bind(&row.release_state)
    .bind(row.timeout)
    .bind(&row.execution_type)
    .bind(row.update_time)
    .bind(expected_version)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::VersionConflict {
            code: row.code,
            expected: Some(expected_version),
        });
    }

    Ok(())
}

pub async fn update_release_state<'e, E: PgExecutor<'e>>(
    executor: E,
    code: i64,
    release_state: &str,
) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE workflow_definition SET release_state = $1 WHERE code = $2")
        .bind(release_state)
        .bind(code)
        .execute(executor)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// Append an immutable version row. `(code, version)` is unique.
pub async fn insert_workflow_log<'e, E: PgExecutor<'e>>(
    executor: E,
    row: &WorkflowDefinitionLogRow,
    expected_version: Option<i32>,
) -> Result<(), DbError> {
    let sql = format!(
        "INSERT INTO workflow_definition_log ({DEFINITION_COLUMNS}, operator, operate_time) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
    );
    bind_definition(sqlx::query(&sql), &row.definition)
        .bind(row.operator)
        .bind(row.operate_time)
        .execute(executor)
        .await
        .map_err(|e| super::conflict_on_unique(e, row.definition.code, expected_version))?;
    Ok(())
}

pub async fn get_workflow_log<'e, E: PgExecutor<'e>>(
    executor: E,
    code: i64,
    version: i32,
) -> Result<Option<WorkflowDefinitionLogRow>, DbError> {
    let sql = format!(
        "SELECT {DEFINITION_COLUMNS}, operator, operate_time FROM workflow_definition_log \
         WHERE code = $1 AND version = $2"
    );
    let row = sqlx::query_as::<_, WorkflowDefinitionLogRow>(&sql)
        .bind(code)
        .bind(version)
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

/// Every logged version of a workflow, oldest first.
pub async fn list_workflow_logs<'e, E: PgExecutor<'e>>(
    executor: E,
    code: i64,
) -> Result<Vec<WorkflowDefinitionLogRow>, DbError> {
    let sql = format!(
        "SELECT {DEFINITION_COLUMNS}, operator, operate_time FROM workflow_definition_log \
         WHERE code = $1 ORDER BY version ASC"
    );
    let rows = sqlx::query_as::<_, WorkflowDefinitionLogRow>(&sql)
        .bind(code)
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

pub async fn max_workflow_version<'e, E: PgExecutor<'e>>(
    executor: E,
    code: i64,
) -> Result<i32, DbError> {
    let max: Option<i32> =
        sqlx::query_scalar("SELECT MAX(version) FROM workflow_definition_log WHERE code = $1")
            .bind(code)
            .fetch_one(executor)
            .await?;
    Ok(max.unwrap_or(0))
}

/// Delete one logged version. Returns `DbError::NotFound` if nothing matched.
pub async fn delete_workflow_log<'e, E: PgExecutor<'e>>(
    executor: E,
    code: i64,
    version: i32,
) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflow_definition_log WHERE code = $1 AND version = $2")
        .bind(code)
        .bind(version)
        .execute(executor)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

fn bind_definition<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    row: &'q WorkflowDefinitionRow,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(row.code)
        .bind(row.version)
        .bind(row.project_code)
        .bind(&row.name)
        .bind(&row.description)
        .bind(&row.global_params)
        .bind(&row.locations)
        .bind(&row.release_state)
        .bind(row.timeout)
        .bind(&row.execution_type)
        .bind(row.update_time)
}
