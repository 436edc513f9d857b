//! Node execution repository.

use sqlx::PgPool;

use crate::entities::NodeExecutionEntity;
use crate::error::{DbError, DbResult};

const NODE_COLUMNS: &str = "id, execution_id, node_id, node_label, node_type, status, \
     start_time, end_time, execution_time_ms, records_processed, retry_count, error_message, \
     records_per_second, bytes_processed";

/// Repository for `node_executions`.
#[derive(Clone)]
pub struct NodeExecutionRepository {
    pool: PgPool,
}

impl NodeExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Before-step insert. The FK to `workflow_executions` makes a missing
    /// parent row a hard error, which is the contract.
    pub async fn insert(&self, entity: &NodeExecutionEntity) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO node_executions
                (id, execution_id, node_id, node_label, node_type, status, start_time,
                 end_time, execution_time_ms, records_processed, retry_count, error_message,
                 records_per_second, bytes_processed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.execution_id)
        .bind(&entity.node_id)
        .bind(&entity.node_label)
        .bind(&entity.node_type)
        .bind(&entity.status)
        .bind(entity.start_time)
        .bind(entity.end_time)
        .bind(entity.execution_time_ms)
        .bind(entity.records_processed)
        .bind(entity.retry_count)
        .bind(&entity.error_message)
        .bind(entity.records_per_second)
        .bind(entity.bytes_processed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::DuplicateKey(entity.id.clone()));
        }
        Ok(())
    }

    /// After-step update with the row's final fields. Idempotent.
    pub async fn update(&self, entity: &NodeExecutionEntity) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE node_executions
            SET status = $2,
                end_time = $3,
                execution_time_ms = $4,
                records_processed = $5,
                retry_count = $6,
                error_message = $7,
                records_per_second = $8,
                bytes_processed = $9
            WHERE id = $1
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.status)
        .bind(entity.end_time)
        .bind(entity.execution_time_ms)
        .bind(entity.records_processed)
        .bind(entity.retry_count)
        .bind(&entity.error_message)
        .bind(entity.records_per_second)
        .bind(entity.bytes_processed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Status flip between retry attempts.
    pub async fn set_status(&self, id: &str, status: &str, retry_count: i64) -> DbResult<()> {
        sqlx::query(
            "UPDATE node_executions SET status = $2, retry_count = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(retry_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Node rows of one execution, ordered by start time ascending.
    pub async fn find_by_execution(
        &self,
        execution_id: &str,
    ) -> DbResult<Vec<NodeExecutionEntity>> {
        let rows = sqlx::query_as::<_, NodeExecutionEntity>(&format!(
            r#"
            SELECT {NODE_COLUMNS} FROM node_executions
            WHERE execution_id = $1
            ORDER BY start_time ASC, id ASC
            "#
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
