//! Workflow execution repository.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use weft_workflow::ExecutionStatus;

use crate::entities::WorkflowExecutionEntity;
use crate::error::{DbError, DbResult};

const EXECUTION_COLUMNS: &str = "execution_id, workflow_id, workflow_name, status, start_time, \
     end_time, total_nodes, completed_nodes, successful_nodes, failed_nodes, \
     total_records_processed, total_execution_time_ms, execution_mode, planning_start_time, \
     max_parallel_nodes, peak_workers, input_records, output_records, input_bytes, \
     output_bytes, error, workflow_payload";

/// Repository for `workflow_executions`.
#[derive(Clone)]
pub struct ExecutionRepository {
    pool: PgPool,
}

impl ExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the submit-time row. Errors when nothing was inserted; the
    /// caller must not launch in that case.
    pub async fn insert(&self, entity: &WorkflowExecutionEntity) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (execution_id, workflow_id, workflow_name, status, start_time, end_time,
                 total_nodes, completed_nodes, successful_nodes, failed_nodes,
                 total_records_processed, total_execution_time_ms, execution_mode,
                 planning_start_time, max_parallel_nodes, peak_workers, input_records,
                 output_records, input_bytes, output_bytes, error, workflow_payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22)
            ON CONFLICT (execution_id) DO NOTHING
            "#,
        )
        .bind(&entity.execution_id)
        .bind(&entity.workflow_id)
        .bind(&entity.workflow_name)
        .bind(&entity.status)
        .bind(entity.start_time)
        .bind(entity.end_time)
        .bind(entity.total_nodes)
        .bind(entity.completed_nodes)
        .bind(entity.successful_nodes)
        .bind(entity.failed_nodes)
        .bind(entity.total_records_processed)
        .bind(entity.total_execution_time_ms)
        .bind(&entity.execution_mode)
        .bind(entity.planning_start_time)
        .bind(entity.max_parallel_nodes)
        .bind(entity.peak_workers)
        .bind(entity.input_records)
        .bind(entity.output_records)
        .bind(entity.input_bytes)
        .bind(entity.output_bytes)
        .bind(&entity.error)
        .bind(&entity.workflow_payload)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::DuplicateKey(entity.execution_id.clone()));
        }
        Ok(())
    }

    /// Get an execution by id.
    pub async fn find_by_id(&self, execution_id: &str) -> DbResult<Option<WorkflowExecutionEntity>> {
        let entity = sqlx::query_as::<_, WorkflowExecutionEntity>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE execution_id = $1"
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entity)
    }

    /// List executions, newest first, optionally restricted to a workflow.
    pub async fn find_all(
        &self,
        workflow_id: Option<&str>,
    ) -> DbResult<Vec<WorkflowExecutionEntity>> {
        let entities = match workflow_id {
            Some(workflow_id) => {
                sqlx::query_as::<_, WorkflowExecutionEntity>(&format!(
                    r#"
                    SELECT {EXECUTION_COLUMNS} FROM workflow_executions
                    WHERE workflow_id = $1
                    ORDER BY start_time DESC
                    "#
                ))
                .bind(workflow_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, WorkflowExecutionEntity>(&format!(
                    r#"
                    SELECT {EXECUTION_COLUMNS} FROM workflow_executions
                    ORDER BY start_time DESC
                    "#
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(entities)
    }

    /// Flip a non-terminal row to `cancel_requested`. Returns whether a
    /// row changed; the caller resolves not-found vs already-terminal.
    pub async fn request_cancel(&self, execution_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = 'cancel_requested'
            WHERE execution_id = $1 AND status IN ('pending', 'running', 'cancel_requested')
            "#,
        )
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// After-job update: final status, end time, and the aggregates
    /// computed from the execution's node rows. `total_nodes` stays as
    /// written at submit.
    pub async fn finalize(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        end_time: i64,
        error: Option<&str>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions AS w
            SET status = $2,
                end_time = $3,
                error = COALESCE($4, w.error),
                completed_nodes = agg.completed,
                successful_nodes = agg.successful,
                failed_nodes = agg.failed,
                total_records_processed = agg.records,
                total_execution_time_ms = agg.total_ms
            FROM (
                SELECT
                    COUNT(*) FILTER (WHERE status = 'success') AS successful,
                    COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                    COUNT(*) FILTER (WHERE status IN ('success', 'failed')) AS completed,
                    COALESCE(SUM(records_processed), 0) AS records,
                    COALESCE(SUM(execution_time_ms), 0) AS total_ms
                FROM node_executions
                WHERE execution_id = $1
            ) AS agg
            WHERE w.execution_id = $1
            "#,
        )
        .bind(execution_id)
        .bind(status.as_str())
        .bind(end_time)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Daily execution counts for the trends endpoint, oldest day first.
    pub async fn daily_trends(
        &self,
        since_ms: i64,
    ) -> DbResult<Vec<(DateTime<Utc>, i64, i64, i64)>> {
        let rows = sqlx::query_as::<_, (DateTime<Utc>, i64, i64, i64)>(
            r#"
            SELECT date_trunc('day', to_timestamp(start_time / 1000.0)) AS day,
                   COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'success') AS successful,
                   COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM workflow_executions
            WHERE start_time >= $1
            GROUP BY day
            ORDER BY day ASC
            "#,
        )
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
