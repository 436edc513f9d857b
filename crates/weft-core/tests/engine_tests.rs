//! End-to-end engine tests over the in-memory store.
//!
//! These exercise the full submit → plan → launch → persist lifecycle:
//! linear chains, parallel entries, error routing, join barriers,
//! cancellation, buffer overflow, and the rerun family.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use weft_core::{
    CancelOutcome, EngineConfig, EngineError, ExecutionService, ExecutorRegistry,
    MemoryExecutionStore,
};
use weft_workflow::{
    Edge, ExecutionHints, ExecutionRecord, ExecutionStatus, GraphError, NodeDefinition,
    NodeRunStatus, WorkflowDefinition,
};

// ============================================================================
// Helpers
// ============================================================================

fn service() -> (Arc<ExecutionService>, Arc<MemoryExecutionStore>) {
    service_with_config(EngineConfig::default())
}

fn service_with_config(
    config: EngineConfig,
) -> (Arc<ExecutionService>, Arc<MemoryExecutionStore>) {
    let store = Arc::new(MemoryExecutionStore::new());
    let service = Arc::new(ExecutionService::new(
        Arc::new(ExecutorRegistry::new()),
        store.clone(),
        config,
    ));
    (service, store)
}

fn workflow(
    name: &str,
    nodes: Vec<NodeDefinition>,
    edges: Vec<Edge>,
) -> WorkflowDefinition {
    WorkflowDefinition {
        id: Some(format!("wf_{name}")),
        name: name.to_string(),
        nodes,
        edges,
        execution_hints: None,
    }
}

/// Poll until the execution row reaches a terminal status.
async fn wait_for_terminal(
    store: &MemoryExecutionStore,
    execution_id: &str,
) -> ExecutionRecord {
    use weft_core::ExecutionStore;
    for _ in 0..500 {
        let row = store
            .get_execution(execution_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("no row for {execution_id}"));
        if row.status.is_terminal() {
            return row;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {execution_id} never reached a terminal status");
}

async fn node_rows(
    store: &MemoryExecutionStore,
    execution_id: &str,
) -> Vec<weft_workflow::NodeExecutionRecord> {
    use weft_core::ExecutionStore;
    store.list_node_executions(execution_id).await.unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

/// 1. Linear: Start -> Filter -> End over control edges. Three nodes, all
///    succeed, counters aggregate on completion.
#[tokio::test]
async fn linear_start_filter_end() {
    let (service, store) = service();

    let def = workflow(
        "linear",
        vec![
            NodeDefinition::new("start", "start"),
            NodeDefinition::new("filter", "filter").with_config("condition", json!("true")),
            NodeDefinition::new("end", "end"),
        ],
        vec![
            Edge::control("start", "filter"),
            Edge::control("filter", "end"),
        ],
    );

    let receipt = service.submit(&def, "sequential").await.unwrap();
    assert_eq!(receipt.status, ExecutionStatus::Running);
    assert_eq!(receipt.total_nodes, 3);
    assert!(receipt.execution_id.starts_with("exec_"));

    let row = wait_for_terminal(&store, &receipt.execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Success);
    assert_eq!(row.total_nodes, 3);
    assert_eq!(row.completed_nodes, 3);
    assert_eq!(row.successful_nodes, 3);
    assert_eq!(row.failed_nodes, 0);
    assert!(row.end_time.is_some());
}

/// 2. Parallel: one start fanning out to two sources; the node rows for
///    both sources exist and everything succeeds.
#[tokio::test]
async fn parallel_fan_out_from_start() {
    let (service, store) = service();

    let def = workflow(
        "parallel",
        vec![
            NodeDefinition::new("start", "start").with_hints(ExecutionHints::parallel()),
            NodeDefinition::new("src_a", "generator").with_config("count", json!(2)),
            NodeDefinition::new("src_b", "generator").with_config("count", json!(2)),
        ],
        vec![Edge::data("start", "src_a"), Edge::data("start", "src_b")],
    );

    let receipt = service.submit(&def, "parallel").await.unwrap();
    assert_eq!(receipt.total_nodes, 3);

    let row = wait_for_terminal(&store, &receipt.execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Success);
    assert_eq!(row.successful_nodes, 3);
    assert_eq!(row.execution_mode, "parallel");

    let rows = node_rows(&store, &receipt.execution_id).await;
    assert!(rows.iter().any(|r| r.node_id == "src_a"));
    assert!(rows.iter().any(|r| r.node_id == "src_b"));
}

/// 3. Error routing: the failing step routes to its error chain, the job
///    finishes green, and the per-node statuses tell the story.
#[tokio::test]
async fn error_route_rescues_the_job() {
    let (service, store) = service();

    let def = workflow(
        "error_route",
        vec![
            NodeDefinition::new("src", "generator").with_config("count", json!(1)),
            NodeDefinition::new("flaky", "error").with_config("message", json!("bad record")),
            NodeDefinition::new("reject", "noop"),
            NodeDefinition::new("error_sink", "collect"),
        ],
        vec![
            Edge::data("src", "flaky"),
            Edge::data("flaky", "reject").from_handle("error"),
            Edge::data("reject", "error_sink"),
        ],
    );

    let receipt = service.submit(&def, "sequential").await.unwrap();
    let row = wait_for_terminal(&store, &receipt.execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Success);

    let rows = node_rows(&store, &receipt.execution_id).await;
    let status_of = |id: &str| rows.iter().find(|r| r.node_id == id).unwrap().status;
    assert_eq!(status_of("flaky"), NodeRunStatus::Failed);
    assert_eq!(status_of("reject"), NodeRunStatus::Success);
    assert_eq!(status_of("error_sink"), NodeRunStatus::Success);
    assert_eq!(row.failed_nodes, 1);
}

/// 4. Multi-entry: two sources feed one JOIN; the join runs once, after
///    both, and sees every record.
#[tokio::test]
async fn multi_entry_join_waits_for_both_sources() {
    let (service, store) = service();

    let def = workflow(
        "multi_entry",
        vec![
            NodeDefinition::new("src_a", "generator").with_config("count", json!(3)),
            NodeDefinition::new("src_b", "generator").with_config("count", json!(4)),
            NodeDefinition::new("merge", "join"),
            NodeDefinition::new("out", "collect"),
        ],
        vec![
            Edge::data("src_a", "merge"),
            Edge::data("src_b", "merge"),
            Edge::data("merge", "out"),
        ],
    );

    let receipt = service.submit(&def, "parallel").await.unwrap();
    assert_eq!(receipt.total_nodes, 4);

    let row = wait_for_terminal(&store, &receipt.execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Success);
    assert_eq!(row.successful_nodes, 4);

    let rows = node_rows(&store, &receipt.execution_id).await;
    assert_eq!(rows.iter().filter(|r| r.node_id == "merge").count(), 1);
    let out = rows.iter().find(|r| r.node_id == "out").unwrap();
    assert_eq!(out.records_processed, 7);
}

/// 5. Cancel: the response is immediate, the job winds down, and the row
///    ends `cancelled` with an end time. A second cancel is idempotent.
#[tokio::test]
async fn cancel_is_cooperative_and_idempotent() {
    let (service, store) = service();

    let def = workflow(
        "cancellable",
        vec![
            NodeDefinition::new("slow", "wait").with_config("durationMs", json!(30_000)),
            NodeDefinition::new("after", "collect"),
        ],
        vec![Edge::data("slow", "after")],
    );

    let receipt = service.submit(&def, "sequential").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = service.cancel(&receipt.execution_id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Requested);

    let row = wait_for_terminal(&store, &receipt.execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Cancelled);
    assert!(row.end_time.is_some());

    // Idempotent on a terminal row.
    let again = service.cancel(&receipt.execution_id).await.unwrap();
    assert_eq!(again, CancelOutcome::AlreadyCompleted);

    // Unknown id.
    let missing = service.cancel("exec_missing").await.unwrap();
    assert_eq!(missing, CancelOutcome::NotFound);
}

/// 5b. Cancel while two parallel branches run: both terminate, final
///     status is cancelled.
#[tokio::test]
async fn cancel_stops_parallel_branches() {
    let (service, store) = service();

    let def = workflow(
        "parallel_cancel",
        vec![
            NodeDefinition::new("left", "wait").with_config("durationMs", json!(30_000)),
            NodeDefinition::new("right", "wait").with_config("durationMs", json!(30_000)),
        ],
        vec![],
    );

    let receipt = service.submit(&def, "parallel").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    service.cancel(&receipt.execution_id).await.unwrap();

    let row = wait_for_terminal(&store, &receipt.execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Cancelled);
}

/// 6. Overflow: a producer exceeding the buffered-record cap fails with
///    the overflow error and the job stops.
#[tokio::test]
async fn buffer_overflow_fails_the_producer() {
    let (service, store) = service_with_config(EngineConfig {
        max_buffered_records: 100,
        ..EngineConfig::default()
    });

    let def = workflow(
        "overflow",
        vec![
            NodeDefinition::new("firehose", "generator").with_config("count", json!(101)),
            NodeDefinition::new("out", "collect"),
        ],
        vec![Edge::data("firehose", "out")],
    );

    let receipt = service.submit(&def, "sequential").await.unwrap();
    let row = wait_for_terminal(&store, &receipt.execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Failed);
    assert!(row.error.unwrap().contains("overflow"));

    let rows = node_rows(&store, &receipt.execution_id).await;
    let producer = rows.iter().find(|r| r.node_id == "firehose").unwrap();
    assert_eq!(producer.status, NodeRunStatus::Failed);
}

// ============================================================================
// Idempotence and boundaries
// ============================================================================

/// Submitting the same payload twice yields two executions with distinct
/// ids and equal node counts.
#[tokio::test]
async fn double_submit_is_two_executions() {
    let (service, store) = service();

    let def = workflow(
        "twice",
        vec![
            NodeDefinition::new("src", "generator").with_config("count", json!(1)),
            NodeDefinition::new("out", "collect"),
        ],
        vec![Edge::data("src", "out")],
    );

    let first = service.submit(&def, "sequential").await.unwrap();
    let second = service.submit(&def, "sequential").await.unwrap();
    assert_ne!(first.execution_id, second.execution_id);
    assert_eq!(first.total_nodes, second.total_nodes);

    let row_a = wait_for_terminal(&store, &first.execution_id).await;
    let row_b = wait_for_terminal(&store, &second.execution_id).await;
    assert_eq!(row_a.status, ExecutionStatus::Success);
    assert_eq!(row_b.status, ExecutionStatus::Success);
}

/// A single-node plan submits and completes with total_nodes == 1.
#[tokio::test]
async fn single_node_plan_completes() {
    let (service, store) = service();

    let def = workflow("tiny", vec![NodeDefinition::new("only", "start")], vec![]);
    let receipt = service.submit(&def, "sequential").await.unwrap();
    assert_eq!(receipt.total_nodes, 1);

    let row = wait_for_terminal(&store, &receipt.execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Success);
    assert_eq!(row.completed_nodes, 1);
}

/// Rerun(full) mints a new execution with the same node count.
#[tokio::test]
async fn rerun_full_matches_node_count() {
    let (service, store) = service();

    let def = workflow(
        "rerunnable",
        vec![
            NodeDefinition::new("src", "generator").with_config("count", json!(2)),
            NodeDefinition::new("out", "collect"),
        ],
        vec![Edge::data("src", "out")],
    );

    let original = service.submit(&def, "sequential").await.unwrap();
    wait_for_terminal(&store, &original.execution_id).await;

    let rerun = service.rerun(&original.execution_id).await.unwrap();
    assert_eq!(rerun.original_execution_id, original.execution_id);
    assert_ne!(rerun.new_execution_id, original.execution_id);
    assert_eq!(rerun.total_nodes, original.total_nodes);

    let row = wait_for_terminal(&store, &rerun.new_execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Success);
}

/// Rerun from a node inside an unjoined fork is refused synchronously.
#[tokio::test]
async fn rerun_inside_fork_is_refused() {
    let (service, store) = service();

    let def = workflow(
        "forked",
        vec![
            NodeDefinition::new("fan", "fork").with_hints(ExecutionHints::parallel_until("merge")),
            NodeDefinition::new("left", "generator").with_config("count", json!(1)),
            NodeDefinition::new("right", "generator").with_config("count", json!(1)),
            NodeDefinition::new("merge", "join"),
        ],
        vec![
            Edge::data("fan", "left"),
            Edge::data("fan", "right"),
            Edge::data("left", "merge"),
            Edge::data("right", "merge"),
        ],
    );

    let original = service.submit(&def, "parallel").await.unwrap();
    wait_for_terminal(&store, &original.execution_id).await;

    let err = service
        .rerun_from_node(&original.execution_id, "left")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Graph(GraphError::Unrestartable { .. })
    ));

    // Restarting at the join itself is fine: the barrier detaches.
    let receipt = service
        .rerun_from_node(&original.execution_id, "merge")
        .await
        .unwrap();
    assert_eq!(receipt.from_node_id.as_deref(), Some("merge"));
    let row = wait_for_terminal(&store, &receipt.new_execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Success);
    assert_eq!(row.total_nodes, 1);
}

/// Rerun-from-failed reruns the failed step's reachable descendants.
#[tokio::test]
async fn rerun_from_failed_targets_the_failed_set() {
    let (service, store) = service();

    let def = workflow(
        "half_broken",
        vec![
            NodeDefinition::new("src", "generator").with_config("count", json!(1)),
            NodeDefinition::new("boom", "error"),
            NodeDefinition::new("tail", "collect"),
        ],
        vec![Edge::data("src", "boom"), Edge::data("boom", "tail")],
    );

    let original = service.submit(&def, "sequential").await.unwrap();
    let row = wait_for_terminal(&store, &original.execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Failed);

    let rerun = service.rerun_from_failed(&original.execution_id).await.unwrap();
    // boom plus its descendant tail.
    assert_eq!(rerun.total_nodes, 2);

    let row = wait_for_terminal(&store, &rerun.new_execution_id).await;
    // The failing node still fails; the rerun records that faithfully.
    assert_eq!(row.status, ExecutionStatus::Failed);
}

// ============================================================================
// Submit-time rejections
// ============================================================================

/// A cyclic workflow is rejected synchronously and no row is written.
#[tokio::test]
async fn cycle_rejected_without_a_row() {
    use weft_core::ExecutionStore;
    let (service, store) = service();

    let def = workflow(
        "cyclic",
        vec![
            NodeDefinition::new("head", "start"),
            NodeDefinition::new("a", "noop"),
            NodeDefinition::new("b", "noop"),
        ],
        vec![
            Edge::data("head", "a"),
            Edge::data("a", "b"),
            Edge::data("b", "a"),
        ],
    );

    let err = service.submit(&def, "sequential").await.unwrap_err();
    assert!(matches!(err, EngineError::Graph(GraphError::Cycle(_))));
    assert!(store.list_executions(None).await.unwrap().is_empty());
}

/// An unknown node type is rejected before any row is written.
#[tokio::test]
async fn unknown_node_type_rejected() {
    use weft_core::ExecutionStore;
    let (service, store) = service();

    let def = workflow(
        "unknown_type",
        vec![NodeDefinition::new("x", "teleporter")],
        vec![],
    );

    let err = service.submit(&def, "sequential").await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownExecutor(t) if t == "teleporter"));
    assert!(store.list_executions(None).await.unwrap().is_empty());
}

/// An implicit join (two data edges converging on a non-join) fails
/// strict validation.
#[tokio::test]
async fn implicit_join_rejected_in_strict_mode() {
    let (service, _) = service();

    let def = workflow(
        "implicit",
        vec![
            NodeDefinition::new("a", "generator"),
            NodeDefinition::new("b", "generator"),
            NodeDefinition::new("c", "collect"),
        ],
        vec![Edge::data("a", "c"), Edge::data("b", "c")],
    );

    let err = service.submit(&def, "sequential").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Graph(GraphError::ImplicitJoin(node)) if node == "c"
    ));
}

/// The same workflow passes when strict validation is off.
#[tokio::test]
async fn implicit_join_allowed_in_lenient_mode() {
    let (service, store) = service_with_config(EngineConfig {
        strict_validation: false,
        ..EngineConfig::default()
    });

    let def = workflow(
        "implicit_ok",
        vec![
            NodeDefinition::new("a", "generator").with_config("count", json!(1)),
            NodeDefinition::new("b", "generator").with_config("count", json!(1)),
            NodeDefinition::new("c", "collect"),
        ],
        vec![Edge::data("a", "c"), Edge::data("b", "c")],
    );

    let receipt = service.submit(&def, "sequential").await.unwrap();
    let row = wait_for_terminal(&store, &receipt.execution_id).await;
    assert_eq!(row.status, ExecutionStatus::Success);
}
