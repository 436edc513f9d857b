//! Step runtime.
//!
//! One step execution drives its executor through a chunked
//! reader → processor → writer loop. Each chunk commits as a unit: the
//! writer only sees fully processed chunks, and the processed-record count
//! advances per committed chunk. Failure handling follows the node's
//! failure policy; cancellation is checked between chunks and between
//! retry attempts.

use std::sync::Arc;

use serde_json::Map;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use weft_workflow::{
    ExecutionPlan, FailureAction, FailurePolicy, NodeExecutionRecord, NodeRunStatus, Record,
    StepNode,
};

use crate::buffer::EdgeBufferStore;
use crate::config::EngineConfig;
use crate::context::NodeExecutionContext;
use crate::correlation::CorrelationContext;
use crate::error::{EngineError, EngineResult};
use crate::registry::ExecutorRegistry;
use crate::store::ExecutionStore;

/// How a step ended, as seen by the transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepExitStatus {
    Success,
    Failed,
    Cancelled,
}

/// Result of one step execution, consumed by the job runner.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: StepExitStatus,
    pub records_read: i64,
    pub records_processed: i64,
    pub skipped: i64,
    pub retries: i64,
    pub error: Option<String>,
    /// First record the step read; decision conditions evaluate against it.
    pub first_record: Option<Record>,
}

impl StepOutcome {
    fn cancelled() -> Self {
        Self {
            status: StepExitStatus::Cancelled,
            records_read: 0,
            records_processed: 0,
            skipped: 0,
            retries: 0,
            error: None,
            first_record: None,
        }
    }
}

/// Executes single steps against the buffer store and persistence hooks.
pub struct StepRuntime {
    registry: Arc<ExecutorRegistry>,
    buffers: Arc<EdgeBufferStore>,
    store: Arc<dyn ExecutionStore>,
    config: EngineConfig,
}

impl StepRuntime {
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

    /// Run one step: before-step row insert, the chunk loop with the
    /// node's failure policy, after-step row update.
    pub async fn run_step(
        &self,
        execution_id: &str,
        plan: &ExecutionPlan,
        step: &StepNode,
        correlation: &CorrelationContext,
        cancel: &CancellationToken,
    ) -> EngineResult<StepOutcome> {
        if cancel.is_cancelled() {
            return Ok(StepOutcome::cancelled());
        }

        let row_id = format!("nrun_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let mut row = NodeExecutionRecord::started(
            &row_id,
            execution_id,
            &step.node_id,
            step.label.as_deref().unwrap_or(&step.node_id),
            &step.node_type,
        );
        self.store.insert_node_execution(&row).await?;

        let started = std::time::Instant::now();
        let result = match step.max_duration_ms() {
            Some(ms) => {
                match tokio::time::timeout(
                    std::time::Duration::from_millis(ms),
                    self.execute_body(execution_id, plan, step, correlation, cancel, &row_id),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(node = %step.node_id, ms, "step timed out");
                        Ok(StepOutcome::cancelled())
                    }
                }
            }
            None => {
                self.execute_body(execution_id, plan, step, correlation, cancel, &row_id)
                    .await
            }
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => StepOutcome {
                status: StepExitStatus::Failed,
                records_read: 0,
                records_processed: 0,
                skipped: 0,
                retries: 0,
                error: Some(err.to_string()),
                first_record: None,
            },
        };

        row.status = match outcome.status {
            StepExitStatus::Success => NodeRunStatus::Success,
            StepExitStatus::Failed => NodeRunStatus::Failed,
            // Interrupted before completing; it neither succeeded nor failed.
            StepExitStatus::Cancelled => NodeRunStatus::Skipped,
        };
        row.end_time = Some(chrono::Utc::now().timestamp_millis());
        row.execution_time_ms = started.elapsed().as_millis() as i64;
        row.records_processed = outcome.records_processed;
        row.retry_count = outcome.retries;
        row.error_message = outcome.error.clone();
        row.records_per_second = row.throughput();
        self.store.update_node_execution(&row).await?;

        Ok(outcome)
    }

    /// The reader → processor → writer loop, without persistence wrapping.
    async fn execute_body(
        &self,
        execution_id: &str,
        plan: &ExecutionPlan,
        step: &StepNode,
        correlation: &CorrelationContext,
        cancel: &CancellationToken,
        row_id: &str,
    ) -> EngineResult<StepOutcome> {
        let executor = self.registry.get(&step.node_type)?;

        // Inputs: drain every incoming (node, port) buffer, port
        // declaration order, production order within each buffer.
        let mut inputs: Vec<Record> = Vec::new();
        for port in plan.incoming_target_ports(&step.node_id) {
            inputs.extend(self.buffers.drain(execution_id, &step.node_id, &port));
        }

        let ctx = NodeExecutionContext {
            execution_id: execution_id.to_string(),
            step: Arc::new(step.clone()),
            inputs,
            variables: Map::new(),
            routing: crate::routing::RoutingContext::new(
                execution_id,
                &step.node_id,
                step.output_ports.clone(),
                self.buffers.clone(),
            ),
            correlation: correlation.for_step(&step.node_id),
            cancel: cancel.clone(),
        };

        let records = match executor.create_reader(&ctx).await {
            Ok(Some(own)) => own,
            Ok(None) => ctx.inputs.clone(),
            Err(EngineError::Cancelled) => return Ok(StepOutcome::cancelled()),
            Err(err) => {
                // Reader failures happen before any chunk exists, so the
                // chunk retry budget does not apply.
                return Ok(StepOutcome {
                    status: StepExitStatus::Failed,
                    records_read: 0,
                    records_processed: 0,
                    skipped: 0,
                    retries: 0,
                    error: Some(err.to_string()),
                    first_record: None,
                });
            }
        };

        let policy = step.failure_policy.clone().unwrap_or_default();
        let chunk_size = step.chunk_size().unwrap_or(self.config.default_chunk_size).max(1);
        let backoff = std::time::Duration::from_millis(
            policy.backoff_ms.unwrap_or(self.config.retry_backoff_ms),
        );
        // Every action honors the retry budget; RETRY is just the action
        // that exists purely for it.
        let retry_limit = policy.retry_limit;

        let records_read = records.len() as i64;
        let first_record = records.first().cloned();
        let mut records_processed: i64 = 0;
        let mut skipped: i64 = 0;
        let mut retries: i64 = 0;

        for chunk in records.chunks(chunk_size) {
            if cancel.is_cancelled() {
                return Ok(StepOutcome::cancelled());
            }

            let mut attempt: u32 = 0;
            loop {
                match self
                    .run_chunk(&executor, &ctx, chunk, &policy, &mut skipped)
                    .await
                {
                    Ok(committed) => {
                        records_processed += committed;
                        break;
                    }
                    Err(EngineError::Cancelled) => return Ok(StepOutcome::cancelled()),
                    Err(err) if attempt < retry_limit => {
                        attempt += 1;
                        retries += 1;
                        debug!(
                            node = %step.node_id,
                            attempt,
                            error = %err,
                            "chunk failed, retrying"
                        );
                        self.store
                            .set_node_status(row_id, NodeRunStatus::Retrying, retries)
                            .await?;
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = cancel.cancelled() => return Ok(StepOutcome::cancelled()),
                        }
                    }
                    Err(err) => {
                        return Ok(StepOutcome {
                            status: StepExitStatus::Failed,
                            records_read,
                            records_processed,
                            skipped,
                            retries,
                            error: Some(err.to_string()),
                            first_record,
                        });
                    }
                }
            }
        }

        Ok(StepOutcome {
            status: StepExitStatus::Success,
            records_read,
            records_processed,
            skipped,
            retries,
            error: None,
            first_record,
        })
    }

    /// Process and write one chunk. Returns the committed record count.
    /// A process failure under SKIP records the record as skipped and
    /// keeps going until `skip_limit`; any other failure rolls the chunk
    /// back by erroring before the write.
    async fn run_chunk(
        &self,
        executor: &Arc<dyn crate::registry::NodeExecutor>,
        ctx: &NodeExecutionContext,
        chunk: &[Record],
        policy: &FailurePolicy,
        skipped: &mut i64,
    ) -> EngineResult<i64> {
        let mut out_batch: Vec<Record> = Vec::with_capacity(chunk.len());
        for record in chunk {
            match executor.process(ctx, record.clone()).await {
                Ok(Some(out)) => out_batch.push(out),
                Ok(None) => {}
                Err(err) => {
                    if policy.action == FailureAction::Skip {
                        let limit = policy.skip_limit.unwrap_or(u64::MAX);
                        if (*skipped as u64) < limit {
                            *skipped += 1;
                            debug!(
                                node = %ctx.step.node_id,
                                skipped = *skipped,
                                error = %err,
                                "record skipped"
                            );
                            continue;
                        }
                        return Err(EngineError::executor(
                            &ctx.step.node_id,
                            format!("skip limit {limit} exhausted: {err}"),
                        ));
                    }
                    return Err(err);
                }
            }
        }

        let committed = out_batch.len() as i64;
        executor.write(ctx, out_batch).await?;
        Ok(committed)
    }

}

/// Whether a failed step routes to its error steps instead of failing the
/// job: ROUTE always routes; STOP routes when error steps are declared.
pub fn failure_routes(step: &StepNode) -> bool {
    let action = step
        .failure_policy
        .as_ref()
        .map(|p| p.action)
        .unwrap_or_default();
    action == FailureAction::Route || !step.error_steps.is_empty()
}
