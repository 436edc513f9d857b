//! Dynamic job builder and runner.
//!
//! A [`Job`] is built per submission from an execution plan; nothing is
//! statically configured. The runner walks the plan: sequential chains
//! follow `next_steps`, multi-entry plans and forks dispatch parallel
//! branches onto the worker pool, failed steps route to their error
//! chains, decisions pick exactly one successor, and joins materialize
//! once after every upstream branch has arrived. Every build mints a
//! fresh job id; relaunching an existing one is refused at the service
//! layer.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;
use weft_workflow::{ExecutionPlan, ExecutionStatus, StepKind, StepNode};

use crate::buffer::EdgeBufferStore;
use crate::condition::{self, DecisionSnapshot};
use crate::config::EngineConfig;
use crate::correlation::CorrelationContext;
use crate::error::{EngineError, EngineResult};
use crate::registry::ExecutorRegistry;
use crate::step::{failure_routes, StepExitStatus, StepOutcome, StepRuntime};
use crate::store::ExecutionStore;

/// Final result of a job run.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: ExecutionStatus,
    pub error: Option<String>,
}

/// Builds runnable jobs from plans.
pub struct JobBuilder {
    registry: Arc<ExecutorRegistry>,
    buffers: Arc<EdgeBufferStore>,
    store: Arc<dyn ExecutionStore>,
    config: EngineConfig,
}

impl JobBuilder {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        buffers: Arc<EdgeBufferStore>,
        store: Arc<dyn ExecutionStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            buffers,
            store,
            config,
        }
    }

    /// Build a job for one execution. The job id is fresh on every build.
    pub fn build(&self, execution_id: &str, plan: Arc<ExecutionPlan>) -> Job {
        let job_id = format!("job_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let runtime = StepRuntime::new(
            self.registry.clone(),
            self.buffers.clone(),
            self.store.clone(),
            self.config.clone(),
        );
        Job {
            state: Arc::new(JobState {
                job_id,
                execution_id: execution_id.to_string(),
                plan,
                runtime,
                cancel: CancellationToken::new(),
                workers: Arc::new(Semaphore::new(self.config.worker_pool_size)),
                correlation: CorrelationContext::for_execution(execution_id),
                dispatched: Mutex::new(HashSet::new()),
                join_arrivals: Mutex::new(HashMap::new()),
                first_error: Mutex::new(None),
                stop: AtomicBool::new(false),
            }),
        }
    }
}

/// A runnable job. Cheap to clone; clones share one run state.
#[derive(Clone)]
pub struct Job {
    state: Arc<JobState>,
}

impl Job {
    pub fn job_id(&self) -> &str {
        &self.state.job_id
    }

    pub fn execution_id(&self) -> &str {
        &self.state.execution_id
    }

    /// Cooperative cancellation flag; cancel flips it and step loops
    /// observe it between chunks and retries.
    pub fn cancel_token(&self) -> CancellationToken {
        self.state.cancel.clone()
    }

    /// Run to completion. Entry chains launch in parallel when the plan
    /// has several entries.
    pub async fn run(&self) -> JobOutcome {
        let state = self.state.clone();
        info!(
            job_id = %state.job_id,
            execution_id = %state.execution_id,
            total_nodes = state.plan.len(),
            "job launched"
        );

        let entries = state.plan.entry_step_ids.clone();
        let result = if entries.len() == 1 {
            state
                .clone()
                .run_chain(entries[0].clone(), None)
                .await
        } else {
            let mut branches = JoinSet::new();
            for entry in entries {
                let branch_state = state.clone();
                let span = state.correlation.span();
                branches.spawn(
                    async move { branch_state.run_chain(entry, None).await }.instrument(span),
                );
            }
            let mut result = Ok(());
            while let Some(joined) = branches.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => result = Err(err),
                    Err(join_err) => {
                        result = Err(EngineError::Internal(format!(
                            "branch task failed: {join_err}"
                        )))
                    }
                }
            }
            result
        };

        if let Err(err) = result {
            state.record_failure(err.to_string());
        }

        let outcome = state.outcome();
        info!(
            job_id = %state.job_id,
            execution_id = %state.execution_id,
            status = outcome.status.as_str(),
            "job finished"
        );
        outcome
    }
}

struct JobState {
    job_id: String,
    execution_id: String,
    plan: Arc<ExecutionPlan>,
    runtime: StepRuntime,
    cancel: CancellationToken,
    workers: Arc<Semaphore>,
    correlation: CorrelationContext,
    /// At-most-once dispatch guard.
    dispatched: Mutex<HashSet<String>>,
    /// Join id → upstream steps that have arrived successfully.
    join_arrivals: Mutex<HashMap<String, HashSet<String>>>,
    first_error: Mutex<Option<String>>,
    /// Unrouted failure: stop dispatching further steps.
    stop: AtomicBool,
}

impl JobState {
    fn record_failure(&self, message: String) {
        let mut first_error = self.first_error.lock();
        if first_error.is_none() {
            *first_error = Some(message);
        }
        self.stop.store(true, Ordering::SeqCst);
    }

    fn outcome(&self) -> JobOutcome {
        if self.cancel.is_cancelled() {
            return JobOutcome {
                status: ExecutionStatus::Cancelled,
                error: None,
            };
        }
        let error = self.first_error.lock().clone();
        if self.stop.load(Ordering::SeqCst) || error.is_some() {
            return JobOutcome {
                status: ExecutionStatus::Failed,
                error,
            };
        }
        JobOutcome {
            status: ExecutionStatus::Success,
            error: None,
        }
    }

    /// Walk the chain rooted at `current`. `arrived_from` is the step
    /// whose completion led here; joins use it to count arrivals.
    fn run_chain(
        self: Arc<Self>,
        current: String,
        arrived_from: Option<String>,
    ) -> BoxFuture<'static, EngineResult<()>> {
        Box::pin(async move {
            let mut current = current;
            let mut prev = arrived_from;

            loop {
                if self.cancel.is_cancelled() || self.stop.load(Ordering::SeqCst) {
                    return Ok(());
                }

                let step = self
                    .plan
                    .step(&current)
                    .cloned()
                    .ok_or_else(|| {
                        EngineError::Internal(format!("plan lost step '{current}' mid-run"))
                    })?;

                // Join barrier: only the branch completing the arrival set
                // falls through and materializes the join.
                if step.kind == StepKind::Join && !self.join_ready(&step, prev.as_deref()) {
                    debug!(join = %step.node_id, "branch parked at join barrier");
                    return Ok(());
                }

                // Each step runs at most once per job.
                if !self.dispatched.lock().insert(current.clone()) {
                    return Ok(());
                }

                let outcome = self.execute_step(&step).await?;

                match outcome.status {
                    StepExitStatus::Cancelled => return Ok(()),
                    StepExitStatus::Failed => {
                        return self.handle_failure(&step, outcome).await;
                    }
                    StepExitStatus::Success => {}
                }

                if step.kind == StepKind::Decision {
                    let target = self.select_branch(&step, &outcome)?;
                    debug!(decision = %step.node_id, branch = %target, "decision taken");
                    prev = Some(current);
                    current = target;
                    continue;
                }

                match step.next_steps.len() {
                    0 => return Ok(()),
                    1 => {
                        prev = Some(current);
                        current = step.next_steps[0].clone();
                    }
                    _ => {
                        return self.fan_out(&step).await;
                    }
                }
            }
        })
    }

    /// Run one step on a worker-pool permit, inside the correlation span.
    async fn execute_step(&self, step: &StepNode) -> EngineResult<StepOutcome> {
        let permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| EngineError::Internal("worker pool closed".to_string()))?;

        let span = self.correlation.for_step(&step.node_id).span();
        let outcome = self
            .runtime
            .run_step(
                &self.execution_id,
                &self.plan,
                step,
                &self.correlation,
                &self.cancel,
            )
            .instrument(span)
            .await?;

        drop(permit);
        Ok(outcome)
    }

    /// A failed step either routes into its error chains or fails the job.
    async fn handle_failure(
        self: Arc<Self>,
        step: &StepNode,
        outcome: StepOutcome,
    ) -> EngineResult<()> {
        let message = outcome
            .error
            .unwrap_or_else(|| format!("step '{}' failed", step.node_id));

        if failure_routes(step) && !step.error_steps.is_empty() {
            warn!(
                node = %step.node_id,
                error = %message,
                "step failed; routing to error steps"
            );
            for error_step in &step.error_steps {
                self.clone()
                    .run_chain(error_step.clone(), Some(step.node_id.clone()))
                    .await?;
            }
            return Ok(());
        }

        warn!(node = %step.node_id, error = %message, "step failed; job stops");
        self.record_failure(message);
        Ok(())
    }

    /// Multi-successor dispatch: a parallel split for forks, an ordered
    /// fan-out otherwise (successors run sequentially over the already
    /// routed buffers).
    async fn fan_out(self: Arc<Self>, step: &StepNode) -> EngineResult<()> {
        let parallel = step.kind == StepKind::Fork
            || step.hints_parallel()
            || step.distinct_source_handles().len() > 1;

        if parallel {
            let mut branches = JoinSet::new();
            for successor in step.next_steps.clone() {
                let branch_state = self.clone();
                let from = step.node_id.clone();
                let span = self.correlation.span();
                branches.spawn(
                    async move { branch_state.run_chain(successor, Some(from)).await }
                        .instrument(span),
                );
            }
            let mut result = Ok(());
            while let Some(joined) = branches.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => result = Err(err),
                    Err(join_err) => {
                        result = Err(EngineError::Internal(format!(
                            "branch task failed: {join_err}"
                        )))
                    }
                }
            }
            result
        } else {
            for successor in step.next_steps.clone() {
                self.clone()
                    .run_chain(successor, Some(step.node_id.clone()))
                    .await?;
            }
            Ok(())
        }
    }

    /// Record an arrival and report whether every upstream is in.
    fn join_ready(&self, join: &StepNode, arrived_from: Option<&str>) -> bool {
        let mut arrivals = self.join_arrivals.lock();
        let arrived = arrivals.entry(join.node_id.clone()).or_default();
        if let Some(from) = arrived_from {
            arrived.insert(from.to_string());
        }
        join.upstream_steps
            .iter()
            .all(|upstream| arrived.contains(upstream))
    }

    /// Evaluate decision branches in declaration order against the step's
    /// context snapshot; the default branch catches everything else.
    fn select_branch(&self, step: &StepNode, outcome: &StepOutcome) -> EngineResult<String> {
        let snapshot = DecisionSnapshot {
            read_count: outcome.records_read,
            write_count: outcome.records_processed,
            record_count: outcome.records_read,
            first_record: outcome.first_record.clone(),
        };

        if let Some(branches) = step.config.get("branches").and_then(serde_json::Value::as_array)
        {
            for branch in branches {
                let (Some(cond), Some(target)) = (
                    branch.get("condition").and_then(serde_json::Value::as_str),
                    branch.get("target").and_then(serde_json::Value::as_str),
                ) else {
                    continue;
                };
                if condition::evaluate(cond, &snapshot)? {
                    return Ok(target.to_string());
                }
            }
        }

        step.config
            .get("defaultBranch")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!(
                    "decision '{}' has no defaultBranch",
                    step.node_id
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::GraphPlanner;
    use crate::store::{ExecutionStore, MemoryExecutionStore};
    use serde_json::json;
    use weft_workflow::{
        Edge, ExecutionHints, ExecutionRecord, NodeDefinition, NodeRunStatus, WorkflowDefinition,
    };

    struct Harness {
        builder: JobBuilder,
        store: Arc<MemoryExecutionStore>,
        buffers: Arc<EdgeBufferStore>,
    }

    fn harness() -> Harness {
        let buffers = Arc::new(EdgeBufferStore::new(50_000));
        let store = Arc::new(MemoryExecutionStore::new());
        let builder = JobBuilder::new(
            Arc::new(ExecutorRegistry::new()),
            buffers.clone(),
            store.clone(),
            EngineConfig::default(),
        );
        Harness {
            builder,
            store,
            buffers,
        }
    }

    fn definition(nodes: Vec<NodeDefinition>, edges: Vec<Edge>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Some("w1".into()),
            name: "test".into(),
            nodes,
            edges,
            execution_hints: None,
        }
    }

    async fn launch(harness: &Harness, definition: &WorkflowDefinition) -> (Job, JobOutcome) {
        let plan = Arc::new(GraphPlanner::default().plan(definition).unwrap());
        harness
            .store
            .insert_execution(&ExecutionRecord::launch(
                "e1",
                "w1",
                "test",
                "sequential",
                plan.len() as i64,
                None,
            ))
            .await
            .unwrap();
        let job = harness.builder.build("e1", plan);
        let outcome = job.run().await;
        (job, outcome)
    }

    #[tokio::test]
    async fn linear_chain_runs_every_step() {
        let h = harness();
        let def = definition(
            vec![
                NodeDefinition::new("gen", "generator").with_config("count", json!(3)),
                NodeDefinition::new("keep", "filter").with_config("condition", json!("true")),
                NodeDefinition::new("out", "collect"),
            ],
            vec![Edge::data("gen", "keep"), Edge::data("keep", "out")],
        );

        let (_, outcome) = launch(&h, &def).await;
        assert_eq!(outcome.status, ExecutionStatus::Success);

        let rows = h.store.list_node_executions("e1").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.status == NodeRunStatus::Success));
        let out_row = rows.iter().find(|r| r.node_id == "out").unwrap();
        assert_eq!(out_row.records_processed, 3);
    }

    #[tokio::test]
    async fn fresh_job_ids_per_build() {
        let h = harness();
        let def = definition(vec![NodeDefinition::new("gen", "generator")], vec![]);
        let plan = Arc::new(GraphPlanner::default().plan(&def).unwrap());
        let a = h.builder.build("e1", plan.clone());
        let b = h.builder.build("e1", plan);
        assert_ne!(a.job_id(), b.job_id());
    }

    #[tokio::test]
    async fn parallel_branches_converge_on_join_once() {
        let h = harness();
        let def = definition(
            vec![
                NodeDefinition::new("fan", "fork")
                    .with_hints(ExecutionHints::parallel_until("merge")),
                NodeDefinition::new("left", "generator").with_config("count", json!(2)),
                NodeDefinition::new("right", "generator").with_config("count", json!(3)),
                NodeDefinition::new("merge", "join"),
                NodeDefinition::new("out", "collect"),
            ],
            vec![
                Edge::data("fan", "left"),
                Edge::data("fan", "right"),
                Edge::data("left", "merge"),
                Edge::data("right", "merge"),
                Edge::data("merge", "out"),
            ],
        );

        let (_, outcome) = launch(&h, &def).await;
        assert_eq!(outcome.status, ExecutionStatus::Success);

        let rows = h.store.list_node_executions("e1").await.unwrap();
        // One row per step, the join exactly once.
        assert_eq!(rows.iter().filter(|r| r.node_id == "merge").count(), 1);
        let out_row = rows.iter().find(|r| r.node_id == "out").unwrap();
        assert_eq!(out_row.records_processed, 5);
    }

    #[tokio::test]
    async fn error_route_keeps_the_job_green() {
        let h = harness();
        let def = definition(
            vec![
                NodeDefinition::new("src", "generator").with_config("count", json!(1)),
                NodeDefinition::new("boom", "error").with_config("message", json!("nope")),
                NodeDefinition::new("reject", "noop"),
                NodeDefinition::new("sink", "collect"),
            ],
            vec![
                Edge::data("src", "boom"),
                Edge::data("boom", "reject").from_handle("error"),
                Edge::data("reject", "sink"),
            ],
        );

        let (_, outcome) = launch(&h, &def).await;
        assert_eq!(outcome.status, ExecutionStatus::Success);

        let rows = h.store.list_node_executions("e1").await.unwrap();
        let boom = rows.iter().find(|r| r.node_id == "boom").unwrap();
        assert_eq!(boom.status, NodeRunStatus::Failed);
        let reject = rows.iter().find(|r| r.node_id == "reject").unwrap();
        assert_eq!(reject.status, NodeRunStatus::Success);
        assert!(rows.iter().any(|r| r.node_id == "sink"));
    }

    #[tokio::test]
    async fn unrouted_failure_fails_the_job() {
        let h = harness();
        let def = definition(
            vec![
                NodeDefinition::new("boom", "error").with_config("message", json!("fatal")),
                NodeDefinition::new("never", "collect"),
            ],
            vec![Edge::data("boom", "never")],
        );

        let (_, outcome) = launch(&h, &def).await;
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.error.unwrap().contains("fatal"));

        // The downstream step was never dispatched.
        let rows = h.store.list_node_executions("e1").await.unwrap();
        assert!(rows.iter().all(|r| r.node_id != "never"));
    }

    #[tokio::test]
    async fn decision_selects_exactly_one_branch() {
        let h = harness();
        let def = definition(
            vec![
                NodeDefinition::new("src", "generator").with_config("count", json!(4)),
                NodeDefinition::new("choose", "decision")
                    .with_config("defaultBranch", json!("few"))
                    .with_config(
                        "branches",
                        json!([{ "condition": "#readCount >= 3", "target": "many" }]),
                    ),
                NodeDefinition::new("many", "collect"),
                NodeDefinition::new("few", "collect"),
            ],
            vec![
                Edge::data("src", "choose"),
                Edge::data("choose", "many"),
                Edge::data("choose", "few"),
            ],
        );

        let (_, outcome) = launch(&h, &def).await;
        assert_eq!(outcome.status, ExecutionStatus::Success);

        let rows = h.store.list_node_executions("e1").await.unwrap();
        assert!(rows.iter().any(|r| r.node_id == "many"));
        assert!(rows.iter().all(|r| r.node_id != "few"));
    }

    #[tokio::test]
    async fn cancel_mid_run_ends_cancelled() {
        let h = harness();
        let def = definition(
            vec![
                NodeDefinition::new("slow", "wait").with_config("durationMs", json!(30_000)),
                NodeDefinition::new("after", "collect"),
            ],
            vec![Edge::data("slow", "after")],
        );
        let plan = Arc::new(GraphPlanner::default().plan(&def).unwrap());
        h.store
            .insert_execution(&ExecutionRecord::launch(
                "e1",
                "w1",
                "test",
                "sequential",
                plan.len() as i64,
                None,
            ))
            .await
            .unwrap();

        let job = h.builder.build("e1", plan);
        let runner = {
            let job = job.clone();
            tokio::spawn(async move { job.run().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        job.cancel_token().cancel();

        let outcome = runner.await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Cancelled);

        let rows = h.store.list_node_executions("e1").await.unwrap();
        assert!(rows.iter().all(|r| r.node_id != "after"));
    }

    #[tokio::test]
    async fn overflow_fails_the_producer() {
        let buffers = Arc::new(EdgeBufferStore::new(10));
        let store = Arc::new(MemoryExecutionStore::new());
        let builder = JobBuilder::new(
            Arc::new(ExecutorRegistry::new()),
            buffers,
            store.clone(),
            EngineConfig::default(),
        );

        let def = definition(
            vec![
                NodeDefinition::new("gen", "generator").with_config("count", json!(11)),
                NodeDefinition::new("out", "collect"),
            ],
            vec![Edge::data("gen", "out")],
        );
        let plan = Arc::new(GraphPlanner::default().plan(&def).unwrap());
        store
            .insert_execution(&ExecutionRecord::launch(
                "e1",
                "w1",
                "test",
                "sequential",
                plan.len() as i64,
                None,
            ))
            .await
            .unwrap();

        let outcome = builder.build("e1", plan).run().await;
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.error.unwrap().contains("overflow"));

        let rows = store.list_node_executions("e1").await.unwrap();
        let gen = rows.iter().find(|r| r.node_id == "gen").unwrap();
        assert_eq!(gen.status, NodeRunStatus::Failed);
    }

    #[tokio::test]
    async fn ordered_fan_out_runs_both_successors() {
        let h = harness();
        // Single handle, no parallel hint: ordered fan-out.
        let def = definition(
            vec![
                NodeDefinition::new("src", "generator").with_config("count", json!(2)),
                NodeDefinition::new("a", "collect"),
                NodeDefinition::new("b", "collect"),
            ],
            vec![Edge::data("src", "a"), Edge::data("src", "b")],
        );

        let (_, outcome) = launch(&h, &def).await;
        assert_eq!(outcome.status, ExecutionStatus::Success);
        let rows = h.store.list_node_executions("e1").await.unwrap();
        assert!(rows.iter().any(|r| r.node_id == "a"));
        assert!(rows.iter().any(|r| r.node_id == "b"));
        // Buffers drained by their consumers.
        assert!(!h.buffers.has_records("e1", "a", "in"));
        assert!(!h.buffers.has_records("e1", "b", "in"));
    }
}
