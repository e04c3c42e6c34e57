//! In-memory [`DefinitionStore`] for tests and offline tooling.
//!
//! All tables live behind one async mutex, so a snapshot is either applied
//! in full or not at all, the same guarantee the Postgres store gets from a
//! transaction.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    DbError,
    models::{
        TaskDefinitionRow, TaskInstanceRow, TaskRelationRow, WorkflowDefinitionLogRow,
        WorkflowDefinitionRow, WorkflowInstanceRow,
    },
    store::{DefinitionStore, VersionSnapshot},
};

#[derive(Debug, Default)]
struct Tables {
    workflows: HashMap<i64, WorkflowDefinitionRow>,
    workflow_logs: BTreeMap<(i64, i32), WorkflowDefinitionLogRow>,
    tasks: HashMap<i64, TaskDefinitionRow>,
    task_logs: BTreeMap<(i64, i32), TaskDefinitionRow>,
    relations: HashMap<i64, Vec<TaskRelationRow>>,
    relation_logs: BTreeMap<(i64, i32), Vec<TaskRelationRow>>,
    workflow_instances: Vec<WorkflowInstanceRow>,
    task_instances: Vec<TaskInstanceRow>,
    fail_next_persist: bool,
}

/// A [`DefinitionStore`] backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryDefinitionStore {
    tables: Mutex<Tables>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a task definition directly into the live and log tables.
    pub async fn insert_task_definition(&self, row: TaskDefinitionRow) {
        let mut tables = self.tables.lock().await;
        tables.task_logs.insert((row.code, row.version), row.clone());
        tables.tasks.insert(row.code, row);
    }

    pub async fn insert_workflow_instance(&self, row: WorkflowInstanceRow) {
        self.tables.lock().await.workflow_instances.push(row);
    }

    pub async fn insert_task_instance(&self, row: TaskInstanceRow) {
        self.tables.lock().await.task_instances.push(row);
    }

    /// Make the next [`DefinitionStore::persist_new_version`] call fail
    /// after validation, leaving every table untouched.
    pub async fn fail_next_persist(&self) {
        self.tables.lock().await.fail_next_persist = true;
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn load_workflow(&self, code: i64) -> Result<Option<WorkflowDefinitionRow>, DbError> {
        Ok(self.tables.lock().await.workflows.get(&code).cloned())
    }

    async fn load_workflow_log(
        &self,
        code: i64,
        version: i32,
    ) -> Result<Option<WorkflowDefinitionLogRow>, DbError> {
        Ok(self.tables.lock().await.workflow_logs.get(&(code, version)).cloned())
    }

    async fn list_workflow_logs(&self, code: i64) -> Result<Vec<WorkflowDefinitionLogRow>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .workflow_logs
            .range((code, i32::MIN)..=(code, i32::MAX))
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn max_workflow_version(&self, code: i64) -> Result<i32, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .workflow_logs
            .range((code, i32::MIN)..=(code, i32::MAX))
            .next_back()
            .map_or(0, |((_, version), _)| *version))
    }

    async fn load_task_definition(
        &self,
        code: i64,
        version: Option<i32>,
    ) -> Result<Option<TaskDefinitionRow>, DbError> {
        let tables = self.tables.lock().await;
        Ok(match version {
            Some(v) => tables.task_logs.get(&(code, v)).cloned(),
            None => tables.tasks.get(&code).cloned(),
        })
    }

    async fn max_task_version(&self, code: i64) -> Result<i32, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .task_logs
            .range((code, i32::MIN)..=(code, i32::MAX))
            .next_back()
            .map_or(0, |((_, version), _)| *version))
    }

    async fn load_relations(&self, workflow_code: i64) -> Result<Vec<TaskRelationRow>, DbError> {
        Ok(self
            .tables
            .lock()
            .await
            .relations
            .get(&workflow_code)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_relation_logs(
        &self,
        workflow_code: i64,
        version: i32,
    ) -> Result<Vec<TaskRelationRow>, DbError> {
        Ok(self
            .tables
            .lock()
            .await
            .relation_logs
            .get(&(workflow_code, version))
            .cloned()
            .unwrap_or_default())
    }

    async fn persist_new_version(&self, snapshot: VersionSnapshot) -> Result<(), DbError> {
        let mut tables = self.tables.lock().await;
        let code = snapshot.definition.code;
        let version = snapshot.definition.version;
        let conflict = || DbError::VersionConflict {
            code,
            expected: snapshot.expected_version,
        };

        // Validate everything before touching a single table.
        let live_version = tables.workflows.get(&code).map(|row| row.version);
        if live_version != snapshot.expected_version {
            return Err(conflict());
        }
        if tables.workflow_logs.contains_key(&(code, version)) {
            return Err(conflict());
        }
        if snapshot
            .task_definitions
            .iter()
            .any(|task| tables.task_logs.contains_key(&(task.code, task.version)))
        {
            return Err(conflict());
        }
        if std::mem::take(&mut tables.fail_next_persist) {
            return Err(DbError::Unavailable("injected persist failure".into()));
        }

        tables.workflow_logs.insert(
            (code, version),
            WorkflowDefinitionLogRow {
                definition: snapshot.definition.clone(),
                operator: snapshot.operator,
                operate_time: snapshot.operate_time,
            },
        );
        tables.workflows.insert(code, snapshot.definition);
        tables
            .relation_logs
            .insert((code, version), snapshot.relations.clone());
        tables.relations.insert(code, snapshot.relations);
        for task in snapshot.task_definitions {
            tables.task_logs.insert((task.code, task.version), task.clone());
            tables.tasks.insert(task.code, task);
        }

        debug!("persisted workflow {} at version {}", code, version);
        Ok(())
    }

    async fn update_release_state(&self, code: i64, release_state: &str) -> Result<(), DbError> {
        let mut tables = self.tables.lock().await;
        let row = tables.workflows.get_mut(&code).ok_or(DbError::NotFound)?;
        row.release_state = release_state.to_owned();
        Ok(())
    }

    async fn delete_workflow_log(&self, code: i64, version: i32) -> Result<(), DbError> {
        let mut tables = self.tables.lock().await;
        tables
            .workflow_logs
            .remove(&(code, version))
            .ok_or(DbError::NotFound)?;
        tables.relation_logs.remove(&(code, version));
        Ok(())
    }

    async fn load_instance_history(
        &self,
        workflow_code: i64,
        limit: usize,
    ) -> Result<Vec<WorkflowInstanceRow>, DbError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<WorkflowInstanceRow> = tables
            .workflow_instances
            .iter()
            .filter(|row| row.workflow_definition_code == workflow_code)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn load_task_instances(
        &self,
        workflow_instance_ids: &[i64],
    ) -> Result<Vec<TaskInstanceRow>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .task_instances
            .iter()
            .filter(|row| workflow_instance_ids.contains(&row.workflow_instance_id))
            .cloned()
            .collect())
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn definition(code: i64, version: i32) -> WorkflowDefinitionRow {
        WorkflowDefinitionRow {
            code,
            version,
            project_code: 1,
            name: "wf".into(),
            description: String::new(),
            global_params: json!([]),
            locations: String::new(),
            release_state: "OFFLINE".into(),
            timeout: 0,
            execution_type: "PARALLEL".into(),
            update_time: Utc::now(),
        }
    }

    fn snapshot(code: i64, version: i32, expected: Option<i32>) -> VersionSnapshot {
        VersionSnapshot {
            definition: definition(code, version),
            expected_version: expected,
            relations: vec![TaskRelationRow {
                project_code: 1,
                workflow_definition_code: code,
                workflow_definition_version: version,
                pre_task_code: 0,
                pre_task_version: 0,
                post_task_code: 100,
                post_task_version: 1,
                condition_type: "NONE".into(),
                condition_params: "{}".into(),
            }],
            task_definitions: Vec::new(),
            operator: 7,
            operate_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn persisted_version_is_readable_live_and_logged() {
        let store = MemoryDefinitionStore::new();
        store.persist_new_version(snapshot(1, 1, None)).await.unwrap();

        assert_eq!(store.load_workflow(1).await.unwrap().unwrap().version, 1);
        assert_eq!(store.max_workflow_version(1).await.unwrap(), 1);
        assert_eq!(store.load_relations(1).await.unwrap().len(), 1);
        assert_eq!(store.load_relation_logs(1, 1).await.unwrap().len(), 1);
        assert_eq!(store.load_workflow_log(1, 1).await.unwrap().unwrap().operator, 7);
    }

    #[tokio::test]
    async fn stale_expected_version_is_a_conflict() {
        let store = MemoryDefinitionStore::new();
        store.persist_new_version(snapshot(1, 1, None)).await.unwrap();
        store.persist_new_version(snapshot(1, 2, Some(1))).await.unwrap();

        // A writer that read version 1 computes 2 as well.
        let err = store.persist_new_version(snapshot(1, 2, Some(1))).await.unwrap_err();
        assert!(matches!(err, DbError::VersionConflict { code: 1, expected: Some(1) }));
        assert_eq!(store.max_workflow_version(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn injected_failure_leaves_tables_untouched() {
        let store = MemoryDefinitionStore::new();
        store.persist_new_version(snapshot(1, 1, None)).await.unwrap();
        store.fail_next_persist().await;

        assert!(store.persist_new_version(snapshot(1, 2, Some(1))).await.is_err());
        assert_eq!(store.load_workflow(1).await.unwrap().unwrap().version, 1);
        assert!(store.load_relation_logs(1, 2).await.unwrap().is_empty());

        // The failure is one-shot.
        store.persist_new_version(snapshot(1, 2, Some(1))).await.unwrap();
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let store = MemoryDefinitionStore::new();
        let base = Utc::now();
        for id in 0..5 {
            store
                .insert_workflow_instance(WorkflowInstanceRow {
                    id,
                    workflow_definition_code: 1,
                    workflow_definition_version: 1,
                    name: format!("run-{id}"),
                    state: "SUCCESS".into(),
                    host: "worker-1".into(),
                    start_time: base + chrono::Duration::minutes(id),
                    end_time: None,
                })
                .await;
        }

        let ids: Vec<i64> = store
            .load_instance_history(1, 3)
            .await
            .unwrap()
            .iter()
            .map(|row| row.id)
            .collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }
}
