//! Node execution row.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use weft_workflow::{NodeExecutionRecord, NodeRunStatus};

/// One row of `node_executions`. INSERTed on step start, UPDATEd on step
/// finish; `execution_id` is a foreign key into `workflow_executions`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeExecutionEntity {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub node_label: String,
    pub node_type: String,
    pub status: String,
    /// Epoch milliseconds.
    pub start_time: i64,
    #[sqlx(default)]
    pub end_time: Option<i64>,
    pub execution_time_ms: i64,
    pub records_processed: i64,
    pub retry_count: i64,
    #[sqlx(default)]
    pub error_message: Option<String>,
    #[sqlx(default)]
    pub records_per_second: Option<f64>,
    #[sqlx(default)]
    pub bytes_processed: Option<i64>,
}

impl NodeExecutionEntity {
    /// Parsed status; unrecognized strings read as `failed`.
    pub fn parsed_status(&self) -> NodeRunStatus {
        NodeRunStatus::parse(&self.status).unwrap_or(NodeRunStatus::Failed)
    }
}

impl From<&NodeExecutionRecord> for NodeExecutionEntity {
    fn from(record: &NodeExecutionRecord) -> Self {
        Self {
            id: record.id.clone(),
            execution_id: record.execution_id.clone(),
            node_id: record.node_id.clone(),
            node_label: record.node_label.clone(),
            node_type: record.node_type.clone(),
            status: record.status.as_str().to_string(),
            start_time: record.start_time,
            end_time: record.end_time,
            execution_time_ms: record.execution_time_ms,
            records_processed: record.records_processed,
            retry_count: record.retry_count,
            error_message: record.error_message.clone(),
            records_per_second: record.records_per_second,
            bytes_processed: record.bytes_processed,
        }
    }
}

impl From<NodeExecutionEntity> for NodeExecutionRecord {
    fn from(entity: NodeExecutionEntity) -> Self {
        let status = entity.parsed_status();
        Self {
            id: entity.id,
            execution_id: entity.execution_id,
            node_id: entity.node_id,
            node_label: entity.node_label,
            node_type: entity.node_type,
            status,
            start_time: entity.start_time,
            end_time: entity.end_time,
            execution_time_ms: entity.execution_time_ms,
            records_processed: entity.records_processed,
            retry_count: entity.retry_count,
            error_message: entity.error_message,
            records_per_second: entity.records_per_second,
            bytes_processed: entity.bytes_processed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_through_entity() {
        let mut record = NodeExecutionRecord::started("nrun_1", "exec_1", "filter", "Filter", "filter");
        record.status = NodeRunStatus::Retrying;
        record.retry_count = 2;

        let entity = NodeExecutionEntity::from(&record);
        assert_eq!(entity.status, "retrying");

        let back: NodeExecutionRecord = entity.into();
        assert_eq!(back.status, NodeRunStatus::Retrying);
        assert_eq!(back.retry_count, 2);
    }
}
