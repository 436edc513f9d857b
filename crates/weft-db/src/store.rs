//! Postgres-backed [`ExecutionStore`].

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use weft_core::{CancelOutcome, DailyTrend, EngineResult, ExecutionStore};
use weft_workflow::{ExecutionRecord, ExecutionStatus, NodeExecutionRecord, NodeRunStatus};

use crate::entities::{NodeExecutionEntity, WorkflowExecutionEntity};
use crate::repositories::{ExecutionRepository, NodeExecutionRepository};

/// Persistence hooks backed by the two core tables.
#[derive(Clone)]
pub struct PgExecutionStore {
    executions: ExecutionRepository,
    nodes: NodeExecutionRepository,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            executions: ExecutionRepository::new(pool.clone()),
            nodes: NodeExecutionRepository::new(pool),
        }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn insert_execution(&self, record: &ExecutionRecord) -> EngineResult<()> {
        let entity = WorkflowExecutionEntity::from(record);
        self.executions.insert(&entity).await?;
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> EngineResult<Option<ExecutionRecord>> {
        let entity = self.executions.find_by_id(execution_id).await?;
        Ok(entity.map(Into::into))
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
    ) -> EngineResult<Vec<ExecutionRecord>> {
        let entities = self.executions.find_all(workflow_id).await?;
        Ok(entities.into_iter().map(Into::into).collect())
    }

    async fn request_cancel(&self, execution_id: &str) -> EngineResult<CancelOutcome> {
        if self.executions.request_cancel(execution_id).await? {
            return Ok(CancelOutcome::Requested);
        }
        // Nothing changed: either the row is terminal or it never existed.
        match self.executions.find_by_id(execution_id).await? {
            Some(_) => Ok(CancelOutcome::AlreadyCompleted),
            None => Ok(CancelOutcome::NotFound),
        }
    }

    async fn insert_node_execution(&self, record: &NodeExecutionRecord) -> EngineResult<()> {
        let entity = NodeExecutionEntity::from(record);
        self.nodes.insert(&entity).await?;
        Ok(())
    }

    async fn update_node_execution(&self, record: &NodeExecutionRecord) -> EngineResult<()> {
        let entity = NodeExecutionEntity::from(record);
        self.nodes.update(&entity).await?;
        Ok(())
    }

    async fn set_node_status(
        &self,
        row_id: &str,
        status: NodeRunStatus,
        retry_count: i64,
    ) -> EngineResult<()> {
        self.nodes
            .set_status(row_id, status.as_str(), retry_count)
            .await?;
        Ok(())
    }

    async fn list_node_executions(
        &self,
        execution_id: &str,
    ) -> EngineResult<Vec<NodeExecutionRecord>> {
        let entities = self.nodes.find_by_execution(execution_id).await?;
        Ok(entities.into_iter().map(Into::into).collect())
    }

    async fn finalize_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> EngineResult<()> {
        self.executions
            .finalize(
                execution_id,
                status,
                Utc::now().timestamp_millis(),
                error.as_deref(),
            )
            .await?;
        Ok(())
    }

    async fn daily_trends(&self, days: i64) -> EngineResult<Vec<DailyTrend>> {
        let since_ms = (Utc::now() - chrono::Duration::days(days.max(0))).timestamp_millis();
        let rows = self.executions.daily_trends(since_ms).await?;
        Ok(rows
            .into_iter()
            .map(|(date, total, successful, failed)| DailyTrend {
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
            .collect())
    }
}
