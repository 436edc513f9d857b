//! Workflow definition types.
//!
//! This is the user-facing model: an ordered list of nodes plus the edges
//! wiring them, exactly as submitted over the HTTP API. The planner lowers
//! a [`WorkflowDefinition`] into an execution plan; nothing in this module
//! executes anything.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::GraphError;

/// Default source handle when an edge does not name one.
pub const DEFAULT_SOURCE_HANDLE: &str = "out";
/// Default target handle when an edge does not name one.
pub const DEFAULT_TARGET_HANDLE: &str = "in";

fn default_source_handle() -> String {
    DEFAULT_SOURCE_HANDLE.to_string()
}

fn default_target_handle() -> String {
    DEFAULT_TARGET_HANDLE.to_string()
}

/// A workflow definition as submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Workflow identifier. A synthetic id is minted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Workflow nodes, in submission order.
    pub nodes: Vec<NodeDefinition>,

    /// Edges between nodes.
    #[serde(default)]
    pub edges: Vec<Edge>,

    /// Workflow-level execution hints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_hints: Option<ExecutionHints>,
}

impl WorkflowDefinition {
    /// Create an empty workflow with a freshly minted id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Some(mint_workflow_id()),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            execution_hints: None,
        }
    }

    /// Add a node.
    pub fn add_node(&mut self, node: NodeDefinition) {
        self.nodes.push(node);
    }

    /// Get a node by id.
    pub fn get_node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Connect two nodes with a data edge on the default handles.
    pub fn connect(&mut self, source: &str, target: &str) -> Result<(), GraphError> {
        self.connect_edge(Edge::data(source, target))
    }

    /// Connect two nodes with a control edge (sequencing only, no records).
    pub fn connect_control(&mut self, source: &str, target: &str) -> Result<(), GraphError> {
        self.connect_edge(Edge::control(source, target))
    }

    /// Add an edge, checking both endpoints exist and forbidding self-loops.
    pub fn connect_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        if self.get_node(&edge.source).is_none() {
            return Err(GraphError::UnknownEdgeEndpoint {
                node_id: edge.source,
                side: "source",
            });
        }
        if self.get_node(&edge.target).is_none() {
            return Err(GraphError::UnknownEdgeEndpoint {
                node_id: edge.target,
                side: "target",
            });
        }
        if edge.source == edge.target {
            return Err(GraphError::SelfLoop(edge.source));
        }
        self.edges.push(edge);
        Ok(())
    }

    /// All node ids, in submission order.
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Definition-level validation: unique non-empty node ids and edge
    /// endpoints that resolve. The plan validator enforces the rest.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::EmptyWorkflow);
        }

        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            let id = node.id.trim();
            if id.is_empty() {
                return Err(GraphError::Config("node id is empty".to_string()));
            }
            if !seen.insert(id) {
                return Err(GraphError::DuplicateNodeId(id.to_string()));
            }
        }

        for edge in &self.edges {
            if self.get_node(&edge.source).is_none() {
                return Err(GraphError::UnknownEdgeEndpoint {
                    node_id: edge.source.clone(),
                    side: "source",
                });
            }
            if self.get_node(&edge.target).is_none() {
                return Err(GraphError::UnknownEdgeEndpoint {
                    node_id: edge.target.clone(),
                    side: "target",
                });
            }
            if edge.source == edge.target {
                return Err(GraphError::SelfLoop(edge.source.clone()));
            }
        }

        Ok(())
    }
}

/// Mint a synthetic workflow id.
pub fn mint_workflow_id() -> String {
    format!("wf_{}", &Uuid::new_v4().simple().to_string()[..8])
}

/// A single node of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    /// Unique identifier within the workflow.
    pub id: String,

    /// Node type, resolved against the executor registry.
    #[serde(rename = "type")]
    pub node_type: String,

    /// Display label. Falls back to the id when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Opaque per-node configuration, interpreted by the executor.
    #[serde(default)]
    pub config: Map<String, Value>,

    /// How step failures are handled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,

    /// Per-node metrics collection settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_config: Option<MetricsConfig>,

    /// Per-node execution hints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_hints: Option<ExecutionHints>,
}

impl NodeDefinition {
    /// Create a node with an empty config.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            label: None,
            config: Map::new(),
            failure_policy: None,
            metrics_config: None,
            execution_hints: None,
        }
    }

    /// Set a config value.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Set the failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    /// Set execution hints.
    pub fn with_hints(mut self, hints: ExecutionHints) -> Self {
        self.execution_hints = Some(hints);
        self
    }

    /// Display label, defaulting to the node id.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Source node id.
    pub source: String,

    /// Target node id.
    pub target: String,

    /// Output handle on the source node.
    #[serde(default = "default_source_handle")]
    pub source_handle: String,

    /// Input handle on the target node.
    #[serde(default = "default_target_handle")]
    pub target_handle: String,

    /// Control edges establish sequencing only; no records flow.
    #[serde(default)]
    pub is_control: bool,
}

impl Edge {
    /// Data edge on the default handles.
    pub fn data(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: default_source_handle(),
            target_handle: default_target_handle(),
            is_control: false,
        }
    }

    /// Control edge on the default handles.
    pub fn control(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            is_control: true,
            ..Self::data(source, target)
        }
    }

    /// Set the source handle.
    pub fn from_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = handle.into();
        self
    }

    /// Set the target handle.
    pub fn to_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = handle.into();
        self
    }
}

/// What a step does when a chunk fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum FailureAction {
    /// Fail the step; the job follows the transition graph.
    #[default]
    Stop,
    /// Record the failing record as skipped and continue.
    Skip,
    /// Retry within the step, then stop on exhaustion.
    Retry,
    /// Force the FAILED transition without surfacing the error.
    Route,
}

/// Failure handling policy for a node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FailurePolicy {
    /// Action taken when processing fails.
    #[serde(default)]
    pub action: FailureAction,

    /// Maximum retry attempts for RETRY (and the retry phase of STOP).
    #[serde(default)]
    pub retry_limit: u32,

    /// Delay between retry attempts in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,

    /// Cap on total skipped records for SKIP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_limit: Option<u64>,
}

impl FailurePolicy {
    pub fn retry(limit: u32) -> Self {
        Self {
            action: FailureAction::Retry,
            retry_limit: limit,
            ..Default::default()
        }
    }

    pub fn skip(limit: u64) -> Self {
        Self {
            action: FailureAction::Skip,
            skip_limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn route() -> Self {
        Self {
            action: FailureAction::Route,
            ..Default::default()
        }
    }
}

/// Per-node metrics collection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// Whether throughput/size metrics are collected for this node.
    #[serde(default)]
    pub enabled: bool,

    /// Sampling interval for in-flight metrics, milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_interval_ms: Option<u64>,
}

/// Hints influencing planning and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionHints {
    /// Fan successors out as parallel branches.
    #[serde(default)]
    pub parallel: bool,

    /// The join this fork's branches converge on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_node_id: Option<String>,

    /// Node-scoped timeout; expiry cancels the step like a user cancel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
}

impl ExecutionHints {
    pub fn parallel() -> Self {
        Self {
            parallel: true,
            ..Default::default()
        }
    }

    pub fn parallel_until(join_node_id: impl Into<String>) -> Self {
        Self {
            parallel: true,
            join_node_id: Some(join_node_id.into()),
            ..Default::default()
        }
    }
}
