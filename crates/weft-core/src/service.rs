//! Execution service.
//!
//! Orchestrates the submit lifecycle: plan the workflow, insert the
//! execution row, launch the job asynchronously, and return immediately.
//! Also owns cancel (non-blocking, cooperative) and the rerun family
//! (full, from a chosen node, from the failed set). One live job per
//! execution id; a second launch of the same id is refused.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;
use weft_workflow::{
    ExecutionPlan, ExecutionRecord, ExecutionStatus, NodeRunStatus, WorkflowDefinition,
};

use crate::buffer::EdgeBufferStore;
use crate::config::EngineConfig;
use crate::correlation::CorrelationContext;
use crate::error::{EngineError, EngineResult};
use crate::job::JobBuilder;
use crate::planner::GraphPlanner;
use crate::registry::ExecutorRegistry;
use crate::restart;
use crate::store::{CancelOutcome, ExecutionStore};
use crate::subgraph::SubgraphLibrary;

/// What submit returns, before the job has done any work.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub total_nodes: i64,
}

/// What the rerun family returns.
#[derive(Debug, Clone)]
pub struct RerunReceipt {
    pub original_execution_id: String,
    pub new_execution_id: String,
    pub total_nodes: i64,
    pub from_node_id: Option<String>,
}

struct RunningJob {
    job_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The engine's front door.
pub struct ExecutionService {
    registry: Arc<ExecutorRegistry>,
    buffers: Arc<EdgeBufferStore>,
    store: Arc<dyn ExecutionStore>,
    config: EngineConfig,
    builder: JobBuilder,
    subgraphs: SubgraphLibrary,
    running: Mutex<HashMap<String, RunningJob>>,
}

impl ExecutionService {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        store: Arc<dyn ExecutionStore>,
        config: EngineConfig,
    ) -> Self {
        Self::with_subgraphs(registry, store, config, SubgraphLibrary::new())
    }

    pub fn with_subgraphs(
        registry: Arc<ExecutorRegistry>,
        store: Arc<dyn ExecutionStore>,
        config: EngineConfig,
        subgraphs: SubgraphLibrary,
    ) -> Self {
        let buffers = Arc::new(EdgeBufferStore::new(config.max_buffered_records));
        let builder = JobBuilder::new(
            registry.clone(),
            buffers.clone(),
            store.clone(),
            config.clone(),
        );
        Self {
            registry,
            buffers,
            store,
            config,
            builder,
            subgraphs,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn ExecutionStore> {
        self.store.clone()
    }

    fn planner(&self) -> GraphPlanner {
        GraphPlanner::new(self.config.strict_validation)
            .with_subgraphs(self.subgraphs.clone())
    }

    /// Submit a workflow: plan, persist the row, launch, return.
    pub async fn submit(
        &self,
        workflow: &WorkflowDefinition,
        execution_mode: &str,
    ) -> EngineResult<SubmitReceipt> {
        let plan = Arc::new(self.planner().plan(workflow)?);
        self.check_executors(&plan)?;

        let execution_id = mint_execution_id();
        // Stamp the (possibly minted) workflow id into the stored payload
        // so reruns keep the same workflow identity.
        let mut stored = workflow.clone();
        stored.id = plan.workflow_id.clone();
        let payload = serde_json::to_string(&stored)
            .map_err(|e| EngineError::Internal(format!("workflow serialization failed: {e}")))?;

        self.launch(
            execution_id.clone(),
            plan,
            workflow.name.clone(),
            execution_mode,
            Some(payload),
        )
        .await
    }

    /// Request cancellation. Never blocks on the job; the after-job hook
    /// writes the final `cancelled` status once the job actually stops.
    pub async fn cancel(&self, execution_id: &str) -> EngineResult<CancelOutcome> {
        let outcome = self.store.request_cancel(execution_id).await?;
        if outcome == CancelOutcome::Requested {
            if let Some(job) = self.running.lock().get(execution_id) {
                info!(execution_id, job_id = %job.job_id, "cancel requested");
                job.cancel.cancel();
            } else {
                // Row says running but no live job (e.g. process restart);
                // the row flip alone is the best we can do.
                warn!(execution_id, "cancel requested for execution with no live job");
            }
        }
        Ok(outcome)
    }

    /// Rerun the stored workflow payload as a brand-new execution.
    pub async fn rerun(&self, execution_id: &str) -> EngineResult<RerunReceipt> {
        let (workflow, original) = self.load_payload(execution_id).await?;
        let plan = Arc::new(self.planner().plan(&workflow)?);
        self.check_executors(&plan)?;

        let receipt = self
            .launch(
                mint_execution_id(),
                plan,
                workflow.name.clone(),
                &original.execution_mode,
                original.workflow_payload.clone(),
            )
            .await?;

        Ok(RerunReceipt {
            original_execution_id: execution_id.to_string(),
            new_execution_id: receipt.execution_id,
            total_nodes: receipt.total_nodes,
            from_node_id: None,
        })
    }

    /// Rerun the sub-plan rooted at `from_node_id`.
    pub async fn rerun_from_node(
        &self,
        execution_id: &str,
        from_node_id: &str,
    ) -> EngineResult<RerunReceipt> {
        let (workflow, original) = self.load_payload(execution_id).await?;
        let full = self.planner().plan(&workflow)?;
        let partial = Arc::new(restart::partial_plan(
            &full,
            from_node_id,
            self.config.strict_validation,
        )?);
        self.check_executors(&partial)?;

        let receipt = self
            .launch(
                mint_execution_id(),
                partial,
                workflow.name.clone(),
                &original.execution_mode,
                original.workflow_payload.clone(),
            )
            .await?;

        Ok(RerunReceipt {
            original_execution_id: execution_id.to_string(),
            new_execution_id: receipt.execution_id,
            total_nodes: receipt.total_nodes,
            from_node_id: Some(from_node_id.to_string()),
        })
    }

    /// Rerun the union of sub-plans rooted at the original's failed nodes.
    pub async fn rerun_from_failed(&self, execution_id: &str) -> EngineResult<RerunReceipt> {
        let (workflow, original) = self.load_payload(execution_id).await?;

        let mut failed: Vec<String> = self
            .store
            .list_node_executions(execution_id)
            .await?
            .into_iter()
            .filter(|r| r.status == NodeRunStatus::Failed)
            .map(|r| r.node_id)
            .collect();
        failed.dedup();
        if failed.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "execution '{execution_id}' has no failed nodes"
            )));
        }

        let full = self.planner().plan(&workflow)?;
        let partial = Arc::new(restart::partial_plan_from(
            &full,
            &failed,
            self.config.strict_validation,
        )?);
        self.check_executors(&partial)?;

        let receipt = self
            .launch(
                mint_execution_id(),
                partial,
                workflow.name.clone(),
                &original.execution_mode,
                original.workflow_payload.clone(),
            )
            .await?;

        Ok(RerunReceipt {
            original_execution_id: execution_id.to_string(),
            new_execution_id: receipt.execution_id,
            total_nodes: receipt.total_nodes,
            from_node_id: None,
        })
    }

    /// Number of currently live jobs.
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Signal every live job to stop, then wait for them to drain.
    /// Used by graceful shutdown.
    pub async fn cancel_all(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut running = self.running.lock();
            running
                .drain()
                .map(|(id, job)| {
                    job.cancel.cancel();
                    (id, job.handle)
                })
                .collect()
        };
        for (execution_id, handle) in handles {
            if let Err(err) = handle.await {
                error!(execution_id = %execution_id, error = %err, "job task did not shut down cleanly");
            }
        }
    }

    /// Startup self-check: WARN about node types used by recent stored
    /// workflows that no executor serves.
    pub async fn startup_check(&self, recent: usize) -> EngineResult<Vec<String>> {
        let executions = self.store.list_executions(None).await?;
        let mut node_types: Vec<String> = Vec::new();
        for record in executions.iter().take(recent) {
            let Some(payload) = &record.workflow_payload else {
                continue;
            };
            let Ok(workflow) = serde_json::from_str::<WorkflowDefinition>(payload) else {
                continue;
            };
            for node in workflow.nodes {
                if !node_types.contains(&node.node_type) {
                    node_types.push(node.node_type);
                }
            }
        }
        Ok(self
            .registry
            .verify_node_types(node_types.iter().map(String::as_str)))
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    /// Every step's type must resolve and its config must validate before
    /// any row is written.
    fn check_executors(&self, plan: &ExecutionPlan) -> EngineResult<()> {
        for step in plan.steps.values() {
            let executor = self.registry.get(&step.node_type)?;
            executor.validate(step)?;
        }
        Ok(())
    }

    /// Insert the execution row and launch the job task. The row insert
    /// happens first; if it fails, nothing runs.
    async fn launch(
        &self,
        execution_id: String,
        plan: Arc<ExecutionPlan>,
        workflow_name: String,
        execution_mode: &str,
        payload: Option<String>,
    ) -> EngineResult<SubmitReceipt> {
        let total_nodes = plan.len() as i64;
        let workflow_id = plan.workflow_id.clone().unwrap_or_default();

        let record = ExecutionRecord::launch(
            &execution_id,
            workflow_id,
            workflow_name,
            execution_mode,
            total_nodes,
            payload,
        );
        self.store.insert_execution(&record).await?;

        {
            let mut running = self.running.lock();
            if running.contains_key(&execution_id) {
                return Err(EngineError::JobAlreadyRunning(execution_id));
            }
            let job = self.builder.build(&execution_id, plan);
            let job_id = job.job_id().to_string();
            let cancel = job.cancel_token();

            let store = self.store.clone();
            let buffers = self.buffers.clone();
            let task_execution_id = execution_id.clone();
            let span = CorrelationContext::for_execution(&execution_id).span();
            let handle = tokio::spawn(
                async move {
                    let outcome = job.run().await;
                    if let Err(err) = store
                        .finalize_execution(
                            &task_execution_id,
                            outcome.status,
                            outcome.error.clone(),
                        )
                        .await
                    {
                        error!(
                            execution_id = %task_execution_id,
                            error = %err,
                            "failed to finalize execution row"
                        );
                    }
                    buffers.clear_execution(&task_execution_id);
                }
                .instrument(span),
            );

            running.insert(
                execution_id.clone(),
                RunningJob {
                    job_id,
                    cancel,
                    handle,
                },
            );
        }

        // The live-job table would grow forever without reaping; each
        // launch sweeps entries whose task already finished.
        self.running.lock().retain(|_, job| !job.handle.is_finished());

        Ok(SubmitReceipt {
            execution_id,
            status: ExecutionStatus::Running,
            total_nodes,
        })
    }

    async fn load_payload(
        &self,
        execution_id: &str,
    ) -> EngineResult<(WorkflowDefinition, ExecutionRecord)> {
        let record = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;
        let payload = record.workflow_payload.clone().ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "execution '{execution_id}' has no stored workflow payload"
            ))
        })?;
        let workflow: WorkflowDefinition = serde_json::from_str(&payload)
            .map_err(|e| EngineError::Internal(format!("stored payload is unreadable: {e}")))?;
        Ok((workflow, record))
    }
}

/// Mint an execution id: `exec_` plus a short uuid.
pub fn mint_execution_id() -> String {
    format!("exec_{}", &Uuid::new_v4().simple().to_string()[..8])
}
