//! Execution status enums and the persisted record shapes.

use serde::{Deserialize, Serialize};

/// Status of a workflow execution row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    #[default]
    Running,
    CancelRequested,
    Cancelled,
    Success,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::CancelRequested => "cancel_requested",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "cancel_requested" => Some(ExecutionStatus::CancelRequested),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            "success" => Some(ExecutionStatus::Success),
            "failed" => Some(ExecutionStatus::Failed),
            "skipped" => Some(ExecutionStatus::Skipped),
            _ => None,
        }
    }

    /// Terminal states: no further transitions, cancel becomes a no-op.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Cancelled
                | ExecutionStatus::Success
                | ExecutionStatus::Failed
                | ExecutionStatus::Skipped
        )
    }
}

/// Status of a node execution row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Retrying,
}

impl NodeRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRunStatus::Pending => "pending",
            NodeRunStatus::Running => "running",
            NodeRunStatus::Success => "success",
            NodeRunStatus::Failed => "failed",
            NodeRunStatus::Skipped => "skipped",
            NodeRunStatus::Retrying => "retrying",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NodeRunStatus::Pending),
            "running" => Some(NodeRunStatus::Running),
            "success" => Some(NodeRunStatus::Success),
            "failed" => Some(NodeRunStatus::Failed),
            "skipped" => Some(NodeRunStatus::Skipped),
            "retrying" => Some(NodeRunStatus::Retrying),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeRunStatus::Success | NodeRunStatus::Failed | NodeRunStatus::Skipped
        )
    }
}

/// A workflow execution row as the engine and API see it.
///
/// `total_nodes` is set once at launch from the plan size and never
/// overwritten; the aggregate columns are written by the after-job hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    /// Epoch milliseconds.
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    pub total_nodes: i64,
    pub completed_nodes: i64,
    pub successful_nodes: i64,
    pub failed_nodes: i64,
    pub total_records_processed: i64,
    pub total_execution_time_ms: i64,
    /// Lowercase execution mode string.
    pub execution_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planning_start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel_nodes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_workers: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_records: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_records: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Serialized workflow definition, what rerun deserializes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_payload: Option<String>,
}

impl ExecutionRecord {
    /// Fresh row at submit time.
    pub fn launch(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        execution_mode: impl Into<String>,
        total_nodes: i64,
        workflow_payload: Option<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            status: ExecutionStatus::Running,
            start_time: chrono::Utc::now().timestamp_millis(),
            end_time: None,
            total_nodes,
            completed_nodes: 0,
            successful_nodes: 0,
            failed_nodes: 0,
            total_records_processed: 0,
            total_execution_time_ms: 0,
            execution_mode: execution_mode.into().to_lowercase(),
            planning_start_time: None,
            max_parallel_nodes: None,
            peak_workers: None,
            input_records: None,
            output_records: None,
            input_bytes: None,
            output_bytes: None,
            error: None,
            workflow_payload,
        }
    }
}

/// A node execution row. INSERTed on step start, UPDATEd on step finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionRecord {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub node_label: String,
    pub node_type: String,
    pub status: NodeRunStatus,
    /// Epoch milliseconds.
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    pub execution_time_ms: i64,
    pub records_processed: i64,
    pub retry_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_processed: Option<i64>,
}

impl NodeExecutionRecord {
    /// Fresh row at step start.
    pub fn started(
        id: impl Into<String>,
        execution_id: impl Into<String>,
        node_id: impl Into<String>,
        node_label: impl Into<String>,
        node_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            execution_id: execution_id.into(),
            node_id: node_id.into(),
            node_label: node_label.into(),
            node_type: node_type.into(),
            status: NodeRunStatus::Running,
            start_time: chrono::Utc::now().timestamp_millis(),
            end_time: None,
            execution_time_ms: 0,
            records_processed: 0,
            retry_count: 0,
            error_message: None,
            records_per_second: None,
            bytes_processed: None,
        }
    }

    /// Derived throughput, present only when the duration is positive.
    pub fn throughput(&self) -> Option<f64> {
        if self.execution_time_ms > 0 {
            Some(self.records_processed as f64 * 1000.0 / self.execution_time_ms as f64)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::CancelRequested,
            ExecutionStatus::Cancelled,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Skipped,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("bogus"), None);
    }

    #[test]
    fn cancel_requested_is_not_terminal() {
        assert!(!ExecutionStatus::CancelRequested.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!NodeRunStatus::Retrying.is_terminal());
    }

    #[test]
    fn throughput_requires_positive_duration() {
        let mut row = NodeExecutionRecord::started("n1", "e1", "a", "a", "noop");
        assert_eq!(row.throughput(), None);
        row.execution_time_ms = 2000;
        row.records_processed = 500;
        assert_eq!(row.throughput(), Some(250.0));
    }

    #[test]
    fn execution_mode_is_lowercased() {
        let row = ExecutionRecord::launch("e1", "w1", "wf", "PARALLEL", 3, None);
        assert_eq!(row.execution_mode, "parallel");
    }
}
