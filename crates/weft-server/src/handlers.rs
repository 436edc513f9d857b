//! HTTP request handlers.
//!
//! Endpoints:
//! - POST /api/execute
//! - GET  /api/executions, GET /api/execution/{id}
//! - GET  /api/executions/{id}/nodes | timeline | metrics | bottlenecks
//! - POST /api/executions/{id}/cancel, POST /api/executions/{id}/rerun
//! - GET  /api/analytics/trends

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use weft_core::{CancelOutcome, EngineError, ExecutionService, ExecutionStore};

use crate::types::*;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ExecutionService>,
    pub store: Arc<dyn ExecutionStore>,
}

/// API error rendered as `{"detail": "<message>"}`.
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = if err.is_user_error() {
            StatusCode::BAD_REQUEST
        } else if matches!(err, EngineError::ExecutionNotFound(_)) {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// POST /api/execute?execution_mode=<mode>
pub async fn execute(
    State(state): State<AppState>,
    Query(query): Query<ExecuteQuery>,
    Json(body): Json<ExecuteRequest>,
) -> ApiResult<impl IntoResponse> {
    let mode = query.execution_mode.as_deref().unwrap_or("sequential");
    let receipt = state.service.submit(&body.workflow, mode).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteResponse {
            execution_id: receipt.execution_id,
            status: receipt.status.as_str().to_string(),
            total_nodes: receipt.total_nodes,
            message: "workflow execution started".to_string(),
        }),
    ))
}

/// GET /api/executions?workflow_id=<id>
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> ApiResult<Json<Vec<ExecutionSummary>>> {
    let records = state
        .store
        .list_executions(query.workflow_id.as_deref())
        .await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

/// GET /api/execution/{id}
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Json<ExecutionSummary>> {
    let record = state
        .store
        .get_execution(&execution_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("execution not found: {execution_id}")))?;
    Ok(Json(record.into()))
}

/// GET /api/executions/{id}/nodes
pub async fn list_nodes(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Json<Vec<NodeExecutionSummary>>> {
    require_execution(&state, &execution_id).await?;
    let rows = state.store.list_node_executions(&execution_id).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// GET /api/executions/{id}/timeline
pub async fn timeline(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Json<TimelineResponse>> {
    let record = require_execution(&state, &execution_id).await?;
    let rows = state.store.list_node_executions(&execution_id).await?;

    Ok(Json(TimelineResponse {
        execution_id: record.execution_id,
        workflow_status: record.status.as_str().to_string(),
        workflow_start_time: iso_timestamp(record.start_time),
        workflow_end_time: record.end_time.map(iso_timestamp),
        nodes: rows.into_iter().map(Into::into).collect(),
    }))
}

/// GET /api/executions/{id}/metrics
pub async fn metrics(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Json<MetricsResponse>> {
    let record = require_execution(&state, &execution_id).await?;
    let rows = state.store.list_node_executions(&execution_id).await?;

    let records_per_second = if record.total_execution_time_ms > 0 {
        Some(
            record.total_records_processed as f64 * 1000.0
                / record.total_execution_time_ms as f64,
        )
    } else {
        None
    };

    let node_metrics = rows
        .into_iter()
        .map(|row| {
            let records_per_second = row.throughput();
            NodeMetrics {
                node_id: row.node_id,
                node_type: row.node_type,
                status: row.status.as_str().to_string(),
                records_processed: row.records_processed,
                execution_time_ms: row.execution_time_ms,
                retry_count: row.retry_count,
                records_per_second,
            }
        })
        .collect();

    Ok(Json(MetricsResponse {
        workflow_metrics: WorkflowMetrics {
            execution_id: record.execution_id,
            status: record.status.as_str().to_string(),
            total_nodes: record.total_nodes,
            completed_nodes: record.completed_nodes,
            successful_nodes: record.successful_nodes,
            failed_nodes: record.failed_nodes,
            total_records_processed: record.total_records_processed,
            total_execution_time_ms: record.total_execution_time_ms,
            records_per_second,
        },
        node_metrics,
    }))
}

/// GET /api/executions/{id}/bottlenecks?top_n=<n>
pub async fn bottlenecks(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Query(query): Query<BottlenecksQuery>,
) -> ApiResult<Json<Vec<BottleneckEntry>>> {
    require_execution(&state, &execution_id).await?;
    let mut rows = state.store.list_node_executions(&execution_id).await?;
    rows.sort_by(|a, b| b.execution_time_ms.cmp(&a.execution_time_ms));

    let top_n = query.top_n.unwrap_or(5);
    let entries = rows
        .into_iter()
        .take(top_n)
        .map(|row| BottleneckEntry {
            node_id: row.node_id,
            node_label: row.node_label,
            node_type: row.node_type,
            status: row.status.as_str().to_string(),
            execution_time_ms: row.execution_time_ms,
            records_processed: row.records_processed,
        })
        .collect();

    Ok(Json(entries))
}

/// POST /api/executions/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Response> {
    let outcome = state.service.cancel(&execution_id).await?;
    let (http_status, status) = match outcome {
        CancelOutcome::Requested => (StatusCode::OK, "cancel_requested"),
        CancelOutcome::AlreadyCompleted => (StatusCode::OK, "already_completed"),
        CancelOutcome::NotFound => (StatusCode::NOT_FOUND, "error"),
    };
    Ok((
        http_status,
        Json(CancelResponse {
            status: status.to_string(),
            execution_id,
        }),
    )
        .into_response())
}

/// POST /api/executions/{id}/rerun?from_node_id=<id>
pub async fn rerun(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Query(query): Query<RerunQuery>,
) -> ApiResult<impl IntoResponse> {
    let receipt = if let Some(from_node_id) = query.from_node_id.as_deref() {
        state
            .service
            .rerun_from_node(&execution_id, from_node_id)
            .await?
    } else if query.from_failed {
        state.service.rerun_from_failed(&execution_id).await?
    } else {
        state.service.rerun(&execution_id).await?
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(RerunResponse {
            status: "queued".to_string(),
            original_execution_id: receipt.original_execution_id,
            new_execution_id: receipt.new_execution_id,
            from_node_id: receipt.from_node_id,
        }),
    ))
}

/// GET /api/analytics/trends?days=<n>
pub async fn trends(
    State(state): State<AppState>,
    Query(query): Query<TrendsQuery>,
) -> ApiResult<Json<TrendsResponse>> {
    let days = query.days.unwrap_or(7).max(1);
    let trends = state.store.daily_trends(days).await?;
    Ok(Json(TrendsResponse {
        period_days: days,
        trends: trends.into_iter().map(Into::into).collect(),
    }))
}

async fn require_execution(
    state: &AppState,
    execution_id: &str,
) -> ApiResult<weft_workflow::ExecutionRecord> {
    state
        .store
        .get_execution(execution_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("execution not found: {execution_id}")))
}
