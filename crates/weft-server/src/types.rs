//! API request/response types.
//!
//! All response fields are snake_case; timestamps are ISO-8601 strings
//! with a trailing `+00:00`; absent optional fields are omitted rather
//! than serialized as null. Error bodies are exactly
//! `{"detail": "<message>"}`.

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use weft_core::DailyTrend;
use weft_workflow::{ExecutionRecord, NodeExecutionRecord, WorkflowDefinition};

/// Epoch milliseconds → ISO-8601 with `+00:00`.
pub fn iso_timestamp(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(ts) => ts.to_rfc3339_opts(SecondsFormat::Millis, false),
        None => "1970-01-01T00:00:00.000+00:00".to_string(),
    }
}

/// Body of `POST /api/execute`.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub workflow: WorkflowDefinition,
}

/// Query of `POST /api/execute`.
#[derive(Debug, Deserialize, Default)]
pub struct ExecuteQuery {
    pub execution_mode: Option<String>,
}

/// 202 body of `POST /api/execute`.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub execution_id: String,
    pub status: String,
    pub total_nodes: i64,
    pub message: String,
}

/// Query of `GET /api/executions`.
#[derive(Debug, Deserialize, Default)]
pub struct ListExecutionsQuery {
    pub workflow_id: Option<String>,
}

/// Execution summary, shared by the list and single-execution endpoints.
#[derive(Debug, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub total_nodes: i64,
    pub completed_nodes: i64,
    pub successful_nodes: i64,
    pub failed_nodes: i64,
    pub total_records_processed: i64,
    pub total_execution_time_ms: i64,
    pub execution_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planning_start_time: Option<String>,
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
}

impl From<ExecutionRecord> for ExecutionSummary {
    fn from(record: ExecutionRecord) -> Self {
        Self {
            execution_id: record.execution_id,
            workflow_id: record.workflow_id,
            workflow_name: record.workflow_name,
            status: record.status.as_str().to_string(),
            start_time: iso_timestamp(record.start_time),
            end_time: record.end_time.map(iso_timestamp),
            total_nodes: record.total_nodes,
            completed_nodes: record.completed_nodes,
            successful_nodes: record.successful_nodes,
            failed_nodes: record.failed_nodes,
            total_records_processed: record.total_records_processed,
            total_execution_time_ms: record.total_execution_time_ms,
            execution_mode: record.execution_mode,
            planning_start_time: record.planning_start_time.map(iso_timestamp),
            max_parallel_nodes: record.max_parallel_nodes,
            peak_workers: record.peak_workers,
            input_records: record.input_records,
            output_records: record.output_records,
            input_bytes: record.input_bytes,
            output_bytes: record.output_bytes,
            error: record.error,
        }
    }
}

/// Node execution row for `GET /api/executions/{id}/nodes`.
#[derive(Debug, Serialize)]
pub struct NodeExecutionSummary {
    pub id: String,
    pub node_id: String,
    pub node_label: String,
    pub node_type: String,
    pub status: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
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

impl From<NodeExecutionRecord> for NodeExecutionSummary {
    fn from(record: NodeExecutionRecord) -> Self {
        // Derive throughput when the stored row carries none.
        let records_per_second = record.records_per_second.or_else(|| record.throughput());
        Self {
            id: record.id,
            node_id: record.node_id,
            node_label: record.node_label,
            node_type: record.node_type,
            status: record.status.as_str().to_string(),
            start_time: iso_timestamp(record.start_time),
            end_time: record.end_time.map(iso_timestamp),
            execution_time_ms: record.execution_time_ms,
            records_processed: record.records_processed,
            retry_count: record.retry_count,
            error_message: record.error_message,
            records_per_second,
            bytes_processed: record.bytes_processed,
        }
    }
}

/// `GET /api/executions/{id}/timeline`.
#[derive(Debug, Serialize)]
pub struct TimelineResponse {
    pub execution_id: String,
    pub workflow_status: String,
    pub workflow_start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_end_time: Option<String>,
    pub nodes: Vec<TimelineNode>,
}

#[derive(Debug, Serialize)]
pub struct TimelineNode {
    pub node_id: String,
    pub node_label: String,
    pub node_type: String,
    pub status: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub execution_time_ms: i64,
}

impl From<NodeExecutionRecord> for TimelineNode {
    fn from(record: NodeExecutionRecord) -> Self {
        Self {
            node_id: record.node_id,
            node_label: record.node_label,
            node_type: record.node_type,
            status: record.status.as_str().to_string(),
            start_time: iso_timestamp(record.start_time),
            end_time: record.end_time.map(iso_timestamp),
            execution_time_ms: record.execution_time_ms,
        }
    }
}

/// `GET /api/executions/{id}/metrics`.
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub workflow_metrics: WorkflowMetrics,
    pub node_metrics: Vec<NodeMetrics>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowMetrics {
    pub execution_id: String,
    pub status: String,
    pub total_nodes: i64,
    pub completed_nodes: i64,
    pub successful_nodes: i64,
    pub failed_nodes: i64,
    pub total_records_processed: i64,
    pub total_execution_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_per_second: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct NodeMetrics {
    pub node_id: String,
    pub node_type: String,
    pub status: String,
    pub records_processed: i64,
    pub execution_time_ms: i64,
    pub retry_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_per_second: Option<f64>,
}

/// Query of `GET /api/executions/{id}/bottlenecks`.
#[derive(Debug, Deserialize, Default)]
pub struct BottlenecksQuery {
    pub top_n: Option<usize>,
}

/// One bottleneck entry, slowest first.
#[derive(Debug, Serialize)]
pub struct BottleneckEntry {
    pub node_id: String,
    pub node_label: String,
    pub node_type: String,
    pub status: String,
    pub execution_time_ms: i64,
    pub records_processed: i64,
}

/// `POST /api/executions/{id}/cancel`.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub status: String,
    pub execution_id: String,
}

/// Query of `POST /api/executions/{id}/rerun`.
#[derive(Debug, Deserialize, Default)]
pub struct RerunQuery {
    pub from_node_id: Option<String>,
    #[serde(default)]
    pub from_failed: bool,
}

/// 202 body of `POST /api/executions/{id}/rerun`.
#[derive(Debug, Serialize)]
pub struct RerunResponse {
    pub status: String,
    pub original_execution_id: String,
    pub new_execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_node_id: Option<String>,
}

/// Query of `GET /api/analytics/trends`.
#[derive(Debug, Deserialize, Default)]
pub struct TrendsQuery {
    pub days: Option<i64>,
}

/// `GET /api/analytics/trends`.
#[derive(Debug, Serialize)]
pub struct TrendsResponse {
    pub period_days: i64,
    pub trends: Vec<TrendBucket>,
}

#[derive(Debug, Serialize)]
pub struct TrendBucket {
    /// ISO-8601 start of day.
    pub date: String,
    pub total_executions: i64,
    pub successful: i64,
    pub failed: i64,
    /// Decimal in [0, 1].
    pub success_rate: f64,
}

impl From<DailyTrend> for TrendBucket {
    fn from(trend: DailyTrend) -> Self {
        Self {
            date: trend.date.to_rfc3339_opts(SecondsFormat::Millis, false),
            total_executions: trend.total_executions,
            successful: trend.successful,
            failed: trend.failed,
            success_rate: trend.success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_workflow::{ExecutionStatus, NodeRunStatus};

    #[test]
    fn iso_timestamps_carry_explicit_offset() {
        let iso = iso_timestamp(1_700_000_000_000);
        assert!(iso.ends_with("+00:00"), "got {iso}");
        assert!(iso.starts_with("2023-11-14T"));
    }

    #[test]
    fn absent_fields_are_omitted_not_null() {
        let record = ExecutionRecord::launch("exec_1", "w1", "demo", "sequential", 2, None);
        let summary = ExecutionSummary::from(record);
        let json = serde_json::to_value(&summary).unwrap();

        assert!(json.get("end_time").is_none());
        assert!(json.get("peak_workers").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["status"], "running");
        assert_eq!(json["total_nodes"], 2);
    }

    #[test]
    fn node_summary_derives_throughput() {
        let mut record = NodeExecutionRecord::started("n1", "e1", "filter", "Filter", "filter");
        record.status = NodeRunStatus::Success;
        record.execution_time_ms = 500;
        record.records_processed = 100;

        let summary = NodeExecutionSummary::from(record);
        assert_eq!(summary.records_per_second, Some(200.0));

        // Zero duration: the field is omitted, not zero or infinite.
        let zero = NodeExecutionRecord::started("n2", "e1", "x", "x", "noop");
        let summary = NodeExecutionSummary::from(zero);
        assert_eq!(summary.records_per_second, None);
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("records_per_second").is_none());
    }

    #[test]
    fn statuses_serialize_snake_case() {
        let mut record = ExecutionRecord::launch("exec_1", "w1", "demo", "sequential", 1, None);
        record.status = ExecutionStatus::CancelRequested;
        let summary = ExecutionSummary::from(record);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"], "cancel_requested");
    }
}
