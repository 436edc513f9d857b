//! Execution persistence trait and the in-memory backend.
//!
//! The engine only talks to [`ExecutionStore`]; the Postgres backend lives
//! in `weft-db`, and [`MemoryExecutionStore`] serves tests and runs
//! without a database. Hooks map onto job lifecycle boundaries: the
//! service inserts the workflow row at submit, the step runtime inserts
//! and updates node rows around each step, and `finalize_execution`
//! aggregates on job completion. All writes are idempotent so re-delivery
//! of a hook is harmless.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use weft_workflow::{ExecutionRecord, ExecutionStatus, NodeExecutionRecord, NodeRunStatus};

use crate::error::{EngineError, EngineResult};

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Row flipped to `cancel_requested`.
    Requested,
    /// Row was already terminal; nothing changed.
    AlreadyCompleted,
    /// No such execution.
    NotFound,
}

/// One day's execution counts for the trends endpoint.
#[derive(Debug, Clone)]
pub struct DailyTrend {
    /// Start of day, UTC.
    pub date: DateTime<Utc>,
    pub total_executions: i64,
    pub successful: i64,
    pub failed: i64,
    /// successful / total, in [0, 1]. Zero when the bucket is empty.
    pub success_rate: f64,
}

/// Persistence operations the engine and API depend on.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert the workflow execution row at submit. Fails when the id
    /// already exists or when nothing was inserted; the caller must not
    /// launch in that case.
    async fn insert_execution(&self, record: &ExecutionRecord) -> EngineResult<()>;

    async fn get_execution(&self, execution_id: &str) -> EngineResult<Option<ExecutionRecord>>;

    /// Executions, newest first, optionally restricted to one workflow.
    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
    ) -> EngineResult<Vec<ExecutionRecord>>;

    /// Flip a non-terminal row to `cancel_requested`.
    async fn request_cancel(&self, execution_id: &str) -> EngineResult<CancelOutcome>;

    /// Before-step hook: insert a node row (`running`, `retry_count = 0`).
    /// The parent workflow row must already exist.
    async fn insert_node_execution(&self, record: &NodeExecutionRecord) -> EngineResult<()>;

    /// After-step hook: write the row's final fields.
    async fn update_node_execution(&self, record: &NodeExecutionRecord) -> EngineResult<()>;

    /// Mid-step status flip used between retry attempts.
    async fn set_node_status(
        &self,
        row_id: &str,
        status: NodeRunStatus,
        retry_count: i64,
    ) -> EngineResult<()>;

    /// Node rows of an execution, ordered by start time ascending.
    async fn list_node_executions(
        &self,
        execution_id: &str,
    ) -> EngineResult<Vec<NodeExecutionRecord>>;

    /// After-job hook: aggregate node rows into the workflow row and set
    /// the final status and end time. `total_nodes` is never touched.
    async fn finalize_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> EngineResult<()>;

    /// Daily execution counts for the last `days` days, oldest first.
    async fn daily_trends(&self, days: i64) -> EngineResult<Vec<DailyTrend>>;
}

/// Aggregates per §after-job: completed = successful + failed; records and
/// durations summed over all node rows.
pub fn aggregate_node_rows(rows: &[NodeExecutionRecord]) -> NodeAggregates {
    let successful = rows
        .iter()
        .filter(|r| r.status == NodeRunStatus::Success)
        .count() as i64;
    let failed = rows
        .iter()
        .filter(|r| r.status == NodeRunStatus::Failed)
        .count() as i64;
    NodeAggregates {
        successful_nodes: successful,
        failed_nodes: failed,
        completed_nodes: successful + failed,
        total_records_processed: rows.iter().map(|r| r.records_processed).sum(),
        total_execution_time_ms: rows.iter().map(|r| r.execution_time_ms).sum(),
    }
}

/// What the after-job hook writes back to the workflow row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAggregates {
    pub completed_nodes: i64,
    pub successful_nodes: i64,
    pub failed_nodes: i64,
    pub total_records_processed: i64,
    pub total_execution_time_ms: i64,
}

/// In-memory store for tests and database-less runs.
#[derive(Default)]
pub struct MemoryExecutionStore {
    executions: RwLock<HashMap<String, ExecutionRecord>>,
    node_rows: RwLock<HashMap<String, NodeExecutionRecord>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn insert_execution(&self, record: &ExecutionRecord) -> EngineResult<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&record.execution_id) {
            return Err(EngineError::Persistence(format!(
                "execution '{}' already exists",
                record.execution_id
            )));
        }
        executions.insert(record.execution_id.clone(), record.clone());
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> EngineResult<Option<ExecutionRecord>> {
        Ok(self.executions.read().await.get(execution_id).cloned())
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
    ) -> EngineResult<Vec<ExecutionRecord>> {
        let executions = self.executions.read().await;
        let mut rows: Vec<ExecutionRecord> = executions
            .values()
            .filter(|r| workflow_id.map_or(true, |id| r.workflow_id == id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(rows)
    }

    async fn request_cancel(&self, execution_id: &str) -> EngineResult<CancelOutcome> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(execution_id) {
            None => Ok(CancelOutcome::NotFound),
            Some(row) if row.status.is_terminal() => Ok(CancelOutcome::AlreadyCompleted),
            Some(row) => {
                row.status = ExecutionStatus::CancelRequested;
                Ok(CancelOutcome::Requested)
            }
        }
    }

    async fn insert_node_execution(&self, record: &NodeExecutionRecord) -> EngineResult<()> {
        // FK discipline: the parent workflow row must exist.
        if !self
            .executions
            .read()
            .await
            .contains_key(&record.execution_id)
        {
            return Err(EngineError::Persistence(format!(
                "no workflow execution row for '{}'",
                record.execution_id
            )));
        }
        self.node_rows
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_node_execution(&self, record: &NodeExecutionRecord) -> EngineResult<()> {
        self.node_rows
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn set_node_status(
        &self,
        row_id: &str,
        status: NodeRunStatus,
        retry_count: i64,
    ) -> EngineResult<()> {
        if let Some(row) = self.node_rows.write().await.get_mut(row_id) {
            row.status = status;
            row.retry_count = retry_count;
        }
        Ok(())
    }

    async fn list_node_executions(
        &self,
        execution_id: &str,
    ) -> EngineResult<Vec<NodeExecutionRecord>> {
        let rows = self.node_rows.read().await;
        let mut matching: Vec<NodeExecutionRecord> = rows
            .values()
            .filter(|r| r.execution_id == execution_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn finalize_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> EngineResult<()> {
        let aggregates = aggregate_node_rows(&self.list_node_executions(execution_id).await?);
        let mut executions = self.executions.write().await;
        let row = executions
            .get_mut(execution_id)
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;

        row.status = status;
        row.end_time = Some(Utc::now().timestamp_millis());
        row.completed_nodes = aggregates.completed_nodes;
        row.successful_nodes = aggregates.successful_nodes;
        row.failed_nodes = aggregates.failed_nodes;
        row.total_records_processed = aggregates.total_records_processed;
        row.total_execution_time_ms = aggregates.total_execution_time_ms;
        if error.is_some() {
            row.error = error;
        }
        Ok(())
    }

    async fn daily_trends(&self, days: i64) -> EngineResult<Vec<DailyTrend>> {
        use chrono::{Duration, TimeZone};

        let horizon = Utc::now() - Duration::days(days.max(0));
        let executions = self.executions.read().await;

        let mut buckets: HashMap<i64, (i64, i64, i64)> = HashMap::new();
        for row in executions.values() {
            let Some(start) = Utc.timestamp_millis_opt(row.start_time).single() else {
                continue;
            };
            if start < horizon {
                continue;
            }
            let day = start.date_naive().and_hms_opt(0, 0, 0).map(|d| d.and_utc());
            let Some(day) = day else { continue };
            let bucket = buckets.entry(day.timestamp_millis()).or_insert((0, 0, 0));
            bucket.0 += 1;
            match row.status {
                ExecutionStatus::Success => bucket.1 += 1,
                ExecutionStatus::Failed => bucket.2 += 1,
                _ => {}
            }
        }

        let mut trends: Vec<DailyTrend> = buckets
            .into_iter()
            .filter_map(|(millis, (total, successful, failed))| {
                let date = Utc.timestamp_millis_opt(millis).single()?;
                Some(DailyTrend {
                    date,
                    total_executions: total,
                    successful,
                    failed,
                    success_rate: if total > 0 {
                        successful as f64 / total as f64
                    } else {
                        0.0
                    },
                })
            })
            .collect();
        trends.sort_by_key(|t| t.date);
        Ok(trends)
    }
}
