//! Task definition and task-definition-log operations.

use sqlx::PgExecutor;

use crate::{DbError, models::TaskDefinitionRow};

const TASK_COLUMNS: &str = "code, version, project_code, name, description, task_type, \
     task_params, fail_retry_times, timeout, update_time";

/// Fetch the live row of a task definition.
pub async fn get_task<'e, E: PgExecutor<'e>>(
    executor: E,
    code: i64,
) -> Result<Option<TaskDefinitionRow>, DbError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM task_definition WHERE code = $1");
    let row = sqlx::query_as::<_, TaskDefinitionRow>(&sql)
        .bind(code)
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

/// Fetch one logged version of a task definition.
pub async fn get_task_log<'e, E: PgExecutor<'e>>(
    executor: E,
    code: i64,
    version: i32,
) -> Result<Option<TaskDefinitionRow>, DbError> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM task_definition_log WHERE code = $1 AND version = $2"
    );
    let row = sqlx::query_as::<_, TaskDefinitionRow>(&sql)
        .bind(code)
        .bind(version)
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

pub async fn max_task_version<'e, E: PgExecutor<'e>>(
    executor: E,
    code: i64,
) -> Result<i32, DbError> {
    let max: Option<i32> =
        sqlx::query_scalar("SELECT MAX(version) FROM task_definition_log WHERE code = $1")
            .bind(code)
            .fetch_one(executor)
            .await?;
    Ok(max.unwrap_or(0))
}

/// Insert or overwrite the live row of a task definition.
pub async fn upsert_task<'e, E: PgExecutor<'e>>(
    executor: E,
    row: &TaskDefinitionRow,
) -> Result<(), DbError> {
    let sql = format!(
        "INSERT INTO task_definition ({TASK_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         ON CONFLICT (code) DO UPDATE SET \
             version = EXCLUDED.version, project_code = EXCLUDED.project_code, \
             name = EXCLUDED.name, description = EXCLUDED.description, \
             task_type = EXCLUDED.task_type, task_params = EXCLUDED.task_params, \
             fail_retry_times = EXCLUDED.fail_retry_times, timeout = EXCLUDED.timeout, \
             update_time = EXCLUDED.update_time"
    );
    bind_task(sqlx::query(&sql), row).execute(executor).await?;
    Ok(())
}

/// Append an immutable task version. `(code, version)` is unique.
pub async fn insert_task_log<'e, E: PgExecutor<'e>>(
    executor: E,
    row: &TaskDefinitionRow,
) -> Result<(), DbError> {
    let sql = format!(
        "INSERT INTO task_definition_log ({TASK_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
    );
    bind_task(sqlx::query(&sql), row)
        .execute(executor)
        .await
        .map_err(|e| super::conflict_on_unique(e, row.code, Some(row.version - 1)))?;
    Ok(())
}

fn bind_task<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    row: &'q TaskDefinitionRow,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(row.code)
        .bind(row.version)
        .bind(row.project_code)
        .bind(&row.name)
        .bind(&row.description)
        .bind(&row.task_type)
        .bind(&row.task_params)
        .bind(row.fail_retry_times)
        .bind(row.timeout)
        .bind(row.update_time)
}
