//! Error types for the execution engine.

use thiserror::Error;
use weft_workflow::GraphError;

/// Errors that can occur while building or running a job.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("no executor registered for node type: {0}")]
    UnknownExecutor(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("edge buffer overflow for execution '{execution_id}' (limit {limit})")]
    BufferOverflow { execution_id: String, limit: i64 },

    #[error("executor error in node '{node}': {message}")]
    Executor { node: String, message: String },

    #[error("execution was cancelled")]
    Cancelled,

    #[error("node '{node}' timed out after {ms} ms")]
    Timeout { node: String, ms: u64 },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("job '{0}' is already running; restarts must mint a new job id")]
    JobAlreadyRunning(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Shorthand for executor-scoped failures.
    pub fn executor(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Executor {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Whether the error should surface as a 400 to API clients.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EngineError::Graph(_) | EngineError::UnknownExecutor(_) | EngineError::InvalidArgument(_)
        )
    }
}

/// Result alias used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;
