//! End-to-end tests of the editor and the version store.
//!
//! Everything runs against `MemoryDefinitionStore`, so no Postgres
//! connection is required.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use db::{
    DefinitionStore, MemoryDefinitionStore,
    models::{TaskInstanceRow, WorkflowInstanceRow},
};
use nodes::{ShellParams, TaskParams};

use crate::{
    CommitOutcome, EngineConfig, EngineError, ReleaseState, SequenceCodeGenerator, TaskDefinition,
    TaskRelation, WorkflowDraft, WorkflowEdit, WorkflowEditor,
};

const A: i64 = 1001;
const B: i64 = 1002;
const C: i64 = 1003;
const D: i64 = 1004;
const OPERATOR: i32 = 7;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn shell(code: i64, script: &str) -> TaskDefinition {
    TaskDefinition {
        code,
        version: 0,
        project_code: 1,
        name: format!("task-{code}"),
        description: String::new(),
        params: TaskParams::Shell(ShellParams {
            raw_script: script.into(),
            local_params: Vec::new(),
        }),
        fail_retry_times: 0,
        timeout: 0,
        update_time: Utc::now(),
    }
}

fn edge(pre: i64, post: i64) -> TaskRelation {
    TaskRelation::new(1, 0, (pre, 0), (post, 0))
}

/// `0 -> A -> B -> C`
fn chain_draft() -> WorkflowDraft {
    WorkflowDraft {
        project_code: 1,
        name: "nightly".into(),
        description: "nightly load".into(),
        global_params: Vec::new(),
        locations: String::new(),
        timeout: 0,
        execution_type: crate::ExecutionType::Parallel,
        task_definitions: vec![shell(A, "extract"), shell(B, "transform"), shell(C, "load")],
        relations: vec![edge(0, A), edge(A, B), edge(B, C)],
    }
}

fn editor(store: &Arc<MemoryDefinitionStore>) -> WorkflowEditor {
    WorkflowEditor::new(
        store.clone(),
        Arc::new(SequenceCodeGenerator::starting_at(1)),
        EngineConfig::default(),
    )
}

async fn chain_workflow() -> (Arc<MemoryDefinitionStore>, WorkflowEditor, i64) {
    let store = Arc::new(MemoryDefinitionStore::new());
    let editor = editor(&store);
    let created = editor
        .create_workflow(chain_draft(), OPERATOR)
        .await
        .expect("chain workflow is valid");
    (store, editor, created.code)
}

fn pairs(relations: &[TaskRelation]) -> Vec<(i64, i64)> {
    let mut pairs: Vec<(i64, i64)> = relations
        .iter()
        .map(|r| (r.pre_task_code, r.post_task_code))
        .collect();
    pairs.sort();
    pairs
}

async fn live_pairs(editor: &WorkflowEditor, code: i64) -> Vec<(i64, i64)> {
    let (_, relations) = editor.versions().load_current(code).await.unwrap();
    pairs(&relations)
}

// ============================================================
// Create / no-op save
// ============================================================

#[tokio::test]
async fn created_workflow_starts_offline_at_version_one() {
    let (store, editor, code) = chain_workflow().await;

    let (current, relations) = editor.versions().load_current(code).await.unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(current.release_state, ReleaseState::Offline);
    assert!(relations.iter().all(|r| r.workflow_definition_version == 1));
    assert!(relations.iter().all(|r| r.post_task_version == 1));

    let history = editor.versions().history(code).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operator, OPERATOR);

    let task = store.load_task_definition(B, Some(1)).await.unwrap();
    assert!(task.is_some());
}

#[tokio::test]
async fn identical_update_is_a_no_op() {
    let (_, editor, code) = chain_workflow().await;

    let outcome = editor.update_workflow(code, chain_draft(), OPERATOR).await.unwrap();
    assert_eq!(outcome, CommitOutcome::Unchanged { version: 1 });
    assert_eq!(editor.versions().history(code).await.unwrap().len(), 1);
}

#[tokio::test]
async fn description_change_bumps_version_without_new_task_versions() {
    let (store, editor, code) = chain_workflow().await;

    let mut draft = chain_draft();
    draft.description = "nightly load, v2".into();
    let outcome = editor.update_workflow(code, draft, OPERATOR).await.unwrap();

    assert_eq!(outcome.version(), 2);
    assert_eq!(store.max_task_version(A).await.unwrap(), 1);
}

#[tokio::test]
async fn cyclic_draft_is_refused_before_any_write() {
    let store = Arc::new(MemoryDefinitionStore::new());
    let editor = editor(&store);

    let mut draft = chain_draft();
    draft.relations = vec![edge(C, A), edge(A, B), edge(B, C)];
    let err = editor.create_workflow(draft, OPERATOR).await.unwrap_err();

    assert!(matches!(err, EngineError::CycleDetected));
    assert!(store.load_workflow(1).await.unwrap().is_none());
    assert!(store.load_task_definition(A, None).await.unwrap().is_none());
}

// ============================================================
// Version history
// ============================================================

#[tokio::test]
async fn versions_are_monotonic_and_each_snapshot_is_retrievable() {
    let (_, editor, code) = chain_workflow().await;
    let original = editor.versions().relations_at(code, 1).await.unwrap();

    assert_eq!(editor.delete_edge(code, B, C, OPERATOR).await.unwrap().version(), 2);
    assert_eq!(editor.create_relation(code, B, C, OPERATOR).await.unwrap().version(), 3);

    let versions: Vec<i32> = editor
        .versions()
        .history(code)
        .await
        .unwrap()
        .iter()
        .map(|log| log.definition.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);

    let v2 = editor.versions().relations_at(code, 2).await.unwrap();
    assert_eq!(pairs(&v2), vec![(0, A), (0, C), (A, B)]);
    assert!(v2.iter().all(|r| r.workflow_definition_version == 2));

    let v3 = editor.versions().relations_at(code, 3).await.unwrap();
    assert_eq!(pairs(&v3), pairs(&original));
}

#[tokio::test]
async fn missing_version_is_reported() {
    let (_, editor, code) = chain_workflow().await;
    assert!(matches!(
        editor.versions().relations_at(code, 9).await,
        Err(EngineError::VersionNotFound { version: 9, .. })
    ));
}

#[tokio::test]
async fn switch_version_commits_old_content_as_new_version() {
    let (_, editor, code) = chain_workflow().await;
    editor.delete_edge(code, B, C, OPERATOR).await.unwrap();

    let outcome = editor.versions().switch_version(code, 1, OPERATOR).await.unwrap();
    assert!(outcome.is_committed());
    assert_eq!(outcome.version(), 3);
    assert_eq!(live_pairs(&editor, code).await, vec![(0, A), (A, B), (B, C)]);

    // Switching to content that is already live changes nothing.
    let again = editor.versions().switch_version(code, 3, OPERATOR).await.unwrap();
    assert_eq!(again, CommitOutcome::Unchanged { version: 3 });
}

#[tokio::test]
async fn live_version_cannot_be_deleted() {
    let (_, editor, code) = chain_workflow().await;
    editor.delete_edge(code, B, C, OPERATOR).await.unwrap();

    assert!(matches!(
        editor.versions().delete_version(code, 2).await,
        Err(EngineError::DataIsNotValid(_))
    ));

    editor.versions().delete_version(code, 1).await.unwrap();
    assert_eq!(editor.versions().history(code).await.unwrap().len(), 1);
    assert!(matches!(
        editor.versions().delete_version(code, 1).await,
        Err(EngineError::VersionNotFound { .. })
    ));
}

// ============================================================
// Edge edits
// ============================================================

#[tokio::test]
async fn deleting_task_with_downstream_is_blocked() {
    let (_, editor, code) = chain_workflow().await;
    let before = live_pairs(&editor, code).await;

    match editor.delete_task_relation(code, B, OPERATOR).await {
        Err(EngineError::TaskHasDownstream { task_code, downstream }) => {
            assert_eq!(task_code, B);
            assert_eq!(downstream, vec![C]);
        }
        other => panic!("expected TaskHasDownstream, got {other:?}"),
    }

    assert_eq!(live_pairs(&editor, code).await, before);
    assert_eq!(editor.versions().history(code).await.unwrap().len(), 1);
}

#[tokio::test]
async fn deleting_leaf_task_removes_it_from_the_dag() {
    let (_, editor, code) = chain_workflow().await;
    editor.delete_task_relation(code, C, OPERATOR).await.unwrap();

    let graph = editor.load_dag(code).await.unwrap();
    assert!(!graph.contains_node(&C));
    assert_eq!(graph.end_nodes(), vec![B]);
}

#[tokio::test]
async fn root_invariant_holds_across_edit_sequence() {
    let (store, editor, code) = chain_workflow().await;
    let mut report = shell(D, "report");
    report.version = 1;
    store.insert_task_definition(report.to_row().unwrap()).await;

    editor.create_relation(code, A, D, OPERATOR).await.unwrap();
    editor.create_relation(code, C, D, OPERATOR).await.unwrap();
    editor.delete_upstream_relation(code, D, vec![A, C], OPERATOR).await.unwrap();
    editor.delete_downstream_relation(code, A, vec![B], OPERATOR).await.unwrap();

    let (_, relations) = editor.versions().load_current(code).await.unwrap();
    crate::relation::check_root_invariant(&relations).unwrap();
    assert_eq!(pairs(&relations), vec![(0, A), (0, B), (0, D), (B, C)]);
}

#[tokio::test]
async fn edge_closing_a_cycle_is_refused() {
    let (_, editor, code) = chain_workflow().await;
    assert!(matches!(
        editor.create_relation(code, C, A, OPERATOR).await,
        Err(EngineError::CycleDetected)
    ));
    assert_eq!(editor.versions().history(code).await.unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_edge_is_refused() {
    let (_, editor, code) = chain_workflow().await;
    assert!(matches!(
        editor.create_relation(code, A, B, OPERATOR).await,
        Err(EngineError::RelationExists { pre_task_code: A, post_task_code: B })
    ));
}

// ============================================================
// Failure semantics
// ============================================================

#[tokio::test]
async fn failed_persist_leaves_everything_as_it_was() {
    let (store, editor, code) = chain_workflow().await;
    let before = live_pairs(&editor, code).await;

    store.fail_next_persist().await;
    assert!(matches!(
        editor.delete_edge(code, B, C, OPERATOR).await,
        Err(EngineError::Save(_))
    ));

    let (current, _) = editor.versions().load_current(code).await.unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(live_pairs(&editor, code).await, before);
    assert_eq!(store.max_workflow_version(code).await.unwrap(), 1);

    // A retry after the fault goes through.
    assert_eq!(editor.delete_edge(code, B, C, OPERATOR).await.unwrap().version(), 2);
}

#[tokio::test]
async fn stale_edit_is_a_version_conflict() {
    let (_, editor, code) = chain_workflow().await;
    let (stale, relations) = editor.versions().load_current(code).await.unwrap();

    editor.delete_edge(code, B, C, OPERATOR).await.unwrap();

    let mut desired = stale.clone();
    desired.description = "edited from an old read".into();
    let err = editor
        .versions()
        .commit(WorkflowEdit {
            current: Some(stale),
            desired,
            relations,
            task_definitions: Vec::new(),
            operator: OPERATOR,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::VersionConflict { expected: Some(1), .. }));
    assert!(err.is_retryable());
    assert_eq!(editor.versions().history(code).await.unwrap().len(), 2);
}

#[tokio::test]
async fn online_workflow_refuses_edits_until_offline() {
    let (_, editor, code) = chain_workflow().await;
    editor.release(code, ReleaseState::Online).await.unwrap();

    assert!(matches!(
        editor.delete_edge(code, B, C, OPERATOR).await,
        Err(EngineError::WorkflowOnline(_))
    ));
    assert!(matches!(
        editor.versions().switch_version(code, 1, OPERATOR).await,
        Err(EngineError::WorkflowOnline(_))
    ));

    editor.release(code, ReleaseState::Offline).await.unwrap();
    assert!(editor.delete_edge(code, B, C, OPERATOR).await.is_ok());
}

#[tokio::test]
async fn release_does_not_create_a_version() {
    let (_, editor, code) = chain_workflow().await;
    editor.release(code, ReleaseState::Online).await.unwrap();
    let (current, _) = editor.versions().load_current(code).await.unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(current.release_state, ReleaseState::Online);
}

// ============================================================
// Task definitions
// ============================================================

#[tokio::test]
async fn task_update_pins_edges_to_new_task_version() {
    let (store, editor, code) = chain_workflow().await;

    let outcome = editor
        .update_task_definition(code, shell(B, "transform --fast"), OPERATOR)
        .await
        .unwrap();
    assert_eq!(outcome.version(), 2);

    let (_, relations) = editor.versions().load_current(code).await.unwrap();
    for relation in &relations {
        if relation.post_task_code == B {
            assert_eq!(relation.post_task_version, 2);
        }
        if relation.pre_task_code == B {
            assert_eq!(relation.pre_task_version, 2);
        }
    }

    // Version 1 of the task stays readable.
    let old = store.load_task_definition(B, Some(1)).await.unwrap().unwrap();
    let old = TaskDefinition::try_from(old).unwrap();
    assert_eq!(old.params, shell(B, "transform").params);

    let again = editor
        .update_task_definition(code, shell(B, "transform --fast"), OPERATOR)
        .await
        .unwrap();
    assert_eq!(again, CommitOutcome::Unchanged { version: 2 });
}

#[tokio::test]
async fn draft_update_versions_only_changed_tasks() {
    let (store, editor, code) = chain_workflow().await;

    let mut draft = chain_draft();
    draft.task_definitions[1] = shell(B, "transform --dedupe");
    let outcome = editor.update_workflow(code, draft, OPERATOR).await.unwrap();
    assert_eq!(outcome.version(), 2);

    assert_eq!(store.max_task_version(B).await.unwrap(), 2);
    let logged = store.load_task_definition(B, Some(2)).await.unwrap().unwrap();
    let logged = TaskDefinition::try_from(logged).unwrap();
    assert_eq!(logged.params, shell(B, "transform --dedupe").params);
    assert_eq!(store.max_task_version(A).await.unwrap(), 1);
    assert_eq!(store.max_task_version(C).await.unwrap(), 1);

    let (_, relations) = editor.versions().load_current(code).await.unwrap();
    for relation in &relations {
        let expected = |task: i64| if task == B { 2 } else { 1 };
        if !relation.is_root() {
            assert_eq!(relation.pre_task_version, expected(relation.pre_task_code));
        }
        assert_eq!(relation.post_task_version, expected(relation.post_task_code));
    }

    let first = editor.versions().relations_at(code, 1).await.unwrap();
    assert!(first
        .iter()
        .filter(|r| r.pre_task_code == B || r.post_task_code == B)
        .all(|r| (r.pre_task_code != B || r.pre_task_version == 1)
            && (r.post_task_code != B || r.post_task_version == 1)));
}

#[tokio::test]
async fn new_edge_after_switch_uses_live_task_version() {
    let (_, editor, code) = chain_workflow().await;
    editor
        .update_task_definition(code, shell(B, "transform --fast"), OPERATOR)
        .await
        .unwrap();
    editor.versions().switch_version(code, 1, OPERATOR).await.unwrap();
    editor.delete_edge(code, B, C, OPERATOR).await.unwrap();
    editor.create_relation(code, B, C, OPERATOR).await.unwrap();

    let (_, relations) = editor.versions().load_current(code).await.unwrap();
    let version_of = |pre: i64, post: i64| {
        relations
            .iter()
            .find(|r| r.pre_task_code == pre && r.post_task_code == post)
            .map(|r| (r.pre_task_version, r.post_task_version))
    };
    // A -> B still pins B as switched back; the fresh B -> C takes B's live version.
    assert_eq!(version_of(A, B), Some((1, 1)));
    assert_eq!(version_of(B, C), Some((2, 1)));
}

#[tokio::test]
async fn generated_codes_are_distinct() {
    let store = Arc::new(MemoryDefinitionStore::new());
    let codes = editor(&store).gen_task_codes(3).unwrap();
    assert_eq!(codes, vec![1, 2, 3]);
}

// ============================================================
// Views
// ============================================================

#[tokio::test]
async fn views_join_dag_with_run_history() {
    let (store, editor, code) = chain_workflow().await;
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();

    for (id, offset) in [(1_i64, 0_i64), (2, 60)] {
        store
            .insert_workflow_instance(WorkflowInstanceRow {
                id,
                workflow_definition_code: code,
                workflow_definition_version: 1,
                name: format!("nightly-{id}"),
                state: "SUCCESS".into(),
                host: "master-1".into(),
                start_time: start + Duration::minutes(offset),
                end_time: Some(start + Duration::minutes(offset + 5)),
            })
            .await;
    }
    store
        .insert_task_instance(TaskInstanceRow {
            id: 10,
            workflow_instance_id: 2,
            task_code: A,
            name: "task-1001".into(),
            task_type: "SHELL".into(),
            state: "SUCCESS".into(),
            host: "worker-1".into(),
            start_time: Some(start + Duration::minutes(60)),
            end_time: Some(start + Duration::minutes(61)),
        })
        .await;

    let tree = editor.tree_view(code, Some(5)).await.unwrap();
    assert_eq!(tree.nodes.len(), 4);
    let (_, a) = tree.node_for(A).unwrap();
    assert_eq!(a.instances.len(), 2);
    assert_eq!(a.instances[0].instance_id, Some(10));
    assert_eq!(a.instances[1].state, crate::view::NOT_RUNNING);

    let gantt = editor.gantt_view(code, None).await.unwrap();
    assert_eq!(gantt.task_codes, vec![A, B, C]);
    assert_eq!(gantt.tasks[0].timeline.len(), 1);
}
