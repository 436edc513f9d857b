//! Error types for workflow definitions and plans.

use thiserror::Error;

/// Errors raised while parsing, lowering, or validating a workflow graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("workflow has no nodes")]
    EmptyWorkflow,

    #[error("plan has no entry steps")]
    NoEntrySteps,

    #[error("invalid node configuration: {0}")]
    Config(String),

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("edge references unknown {side} node: {node_id}")]
    UnknownEdgeEndpoint { node_id: String, side: &'static str },

    #[error("self-loop on node: {0}")]
    SelfLoop(String),

    #[error("step '{step}' references unknown step '{referenced}' via {field}")]
    DanglingReference {
        step: String,
        referenced: String,
        field: &'static str,
    },

    #[error("cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("node '{0}' has multiple data predecessors but is not a JOIN")]
    ImplicitJoin(String),

    #[error("fork '{fork}' and join '{join}' are mispaired: {message}")]
    ForkJoinMismatch {
        fork: String,
        join: String,
        message: String,
    },

    #[error("decision '{step}' is invalid: {message}")]
    InvalidDecision { step: String, message: String },

    #[error("circular subgraph reference: {}", .0.join(" -> "))]
    CircularSubgraph(Vec<String>),

    #[error("unknown subgraph: {0}")]
    UnknownSubgraph(String),

    #[error("cannot restart at '{step}': {message}")]
    Unrestartable { step: String, message: String },
}

impl GraphError {
    /// Whether this error is a client input problem (HTTP 400 territory).
    pub fn is_user_error(&self) -> bool {
        // Every variant of this enum describes an invalid submission.
        true
    }
}
