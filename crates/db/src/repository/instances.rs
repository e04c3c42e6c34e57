//! Read-only access to past workflow and task instances.

use sqlx::PgExecutor;

use crate::{
    DbError,
    models::{TaskInstanceRow, WorkflowInstanceRow},
};

/// The most recent `limit` instances of a workflow, newest first.
pub async fn recent_workflow_instances<'e, E: PgExecutor<'e>>(
    executor: E,
    workflow_code: i64,
    limit: i64,
) -> Result<Vec<WorkflowInstanceRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowInstanceRow>(
        r#"
        SELECT id, workflow_definition_code, workflow_definition_version, name, state, host,
               start_time, end_time
        FROM workflow_instance
        WHERE workflow_definition_code = $1
        ORDER BY start_time DESC
        LIMIT $2
        "#,
    )
    .bind(workflow_code)
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// All task instances belonging to any of the given workflow instances.
pub async fn task_instances_of<'e, E: PgExecutor<'e>>(
    executor: E,
    workflow_instance_ids: &[i64],
) -> Result<Vec<TaskInstanceRow>, DbError> {
    let rows = sqlx::query_as::<_, TaskInstanceRow>(
        r#"
        SELECT id, workflow_instance_id, task_code, name, task_type, state, host,
               start_time, end_time
        FROM task_instance
        WHERE workflow_instance_id = ANY($1)
        ORDER BY start_time ASC NULLS LAST
        "#,
    )
    .bind(workflow_instance_ids)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}
