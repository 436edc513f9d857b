//! Correlation context propagation.
//!
//! Every unit of work carries the execution id (and, once known, the node
//! id) so that log lines from concurrently running executions can be told
//! apart. The context is an explicit value: it is snapshotted where work is
//! dispatched and installed on the worker task as a tracing span, which is
//! the async equivalent of copying a thread-local diagnostic context on
//! submit and installing it on run.

use tracing::Span;

/// Correlation identifiers attached to all work of an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    pub execution_id: String,
    pub node_id: Option<String>,
}

impl CorrelationContext {
    /// Context for a whole execution.
    pub fn for_execution(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            node_id: None,
        }
    }

    /// Narrow the context to one step. Used at step dispatch.
    pub fn for_step(&self, node_id: impl Into<String>) -> Self {
        Self {
            execution_id: self.execution_id.clone(),
            node_id: Some(node_id.into()),
        }
    }

    /// The span a worker task runs inside. Entering it stamps
    /// `execution_id` (and `node_id` where set) on every log line.
    pub fn span(&self) -> Span {
        match &self.node_id {
            Some(node_id) => tracing::info_span!(
                "step",
                execution_id = %self.execution_id,
                node_id = %node_id,
            ),
            None => tracing::info_span!("execution", execution_id = %self.execution_id),
        }
    }
}
