//! Workflow execution row.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use weft_workflow::{ExecutionRecord, ExecutionStatus};

/// One row of `workflow_executions`.
///
/// `total_nodes` is written once at submit from the plan size; the
/// aggregate columns are written by the after-job update and nothing
/// else touches them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowExecutionEntity {
    pub execution_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: String,
    /// Epoch milliseconds.
    pub start_time: i64,
    #[sqlx(default)]
    pub end_time: Option<i64>,
    pub total_nodes: i64,
    pub completed_nodes: i64,
    pub successful_nodes: i64,
    pub failed_nodes: i64,
    pub total_records_processed: i64,
    pub total_execution_time_ms: i64,
    pub execution_mode: String,
    #[sqlx(default)]
    pub planning_start_time: Option<i64>,
    #[sqlx(default)]
    pub max_parallel_nodes: Option<i64>,
    #[sqlx(default)]
    pub peak_workers: Option<i64>,
    #[sqlx(default)]
    pub input_records: Option<i64>,
    #[sqlx(default)]
    pub output_records: Option<i64>,
    #[sqlx(default)]
    pub input_bytes: Option<i64>,
    #[sqlx(default)]
    pub output_bytes: Option<i64>,
    #[sqlx(default)]
    pub error: Option<String>,
    #[sqlx(default)]
    pub workflow_payload: Option<String>,
}

impl WorkflowExecutionEntity {
    /// Parsed status; unrecognized strings read as `failed`.
    pub fn parsed_status(&self) -> ExecutionStatus {
        ExecutionStatus::parse(&self.status).unwrap_or(ExecutionStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.parsed_status().is_terminal()
    }
}

impl From<&ExecutionRecord> for WorkflowExecutionEntity {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            execution_id: record.execution_id.clone(),
            workflow_id: record.workflow_id.clone(),
            workflow_name: record.workflow_name.clone(),
            status: record.status.as_str().to_string(),
            start_time: record.start_time,
            end_time: record.end_time,
            total_nodes: record.total_nodes,
            completed_nodes: record.completed_nodes,
            successful_nodes: record.successful_nodes,
            failed_nodes: record.failed_nodes,
            total_records_processed: record.total_records_processed,
            total_execution_time_ms: record.total_execution_time_ms,
            execution_mode: record.execution_mode.clone(),
            planning_start_time: record.planning_start_time,
            max_parallel_nodes: record.max_parallel_nodes,
            peak_workers: record.peak_workers,
            input_records: record.input_records,
            output_records: record.output_records,
            input_bytes: record.input_bytes,
            output_bytes: record.output_bytes,
            error: record.error.clone(),
            workflow_payload: record.workflow_payload.clone(),
        }
    }
}

impl From<WorkflowExecutionEntity> for ExecutionRecord {
    fn from(entity: WorkflowExecutionEntity) -> Self {
        let status = entity.parsed_status();
        Self {
            execution_id: entity.execution_id,
            workflow_id: entity.workflow_id,
            workflow_name: entity.workflow_name,
            status,
            start_time: entity.start_time,
            end_time: entity.end_time,
            total_nodes: entity.total_nodes,
            completed_nodes: entity.completed_nodes,
            successful_nodes: entity.successful_nodes,
            failed_nodes: entity.failed_nodes,
            total_records_processed: entity.total_records_processed,
            total_execution_time_ms: entity.total_execution_time_ms,
            execution_mode: entity.execution_mode,
            planning_start_time: entity.planning_start_time,
            max_parallel_nodes: entity.max_parallel_nodes,
            peak_workers: entity.peak_workers,
            input_records: entity.input_records,
            output_records: entity.output_records,
            input_bytes: entity.input_bytes,
            output_bytes: entity.output_bytes,
            error: entity.error,
            workflow_payload: entity.workflow_payload,
        }
    }
}
