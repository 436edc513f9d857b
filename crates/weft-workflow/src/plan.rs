//! Execution plan types.
//!
//! The planner lowers a [`crate::WorkflowDefinition`] into an
//! [`ExecutionPlan`]: a map of immutable [`StepNode`]s plus the ordered
//! entry ids. Plans are data; the job builder in the engine crate turns
//! them into runnable structures.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::definition::{ExecutionHints, FailurePolicy, MetricsConfig};

/// Coarse role of a step in the data flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepClassification {
    /// No inbound data edges.
    Source,
    /// Both inbound and outbound data edges.
    Transform,
    /// No outbound data edges.
    Sink,
    /// Structural node (start, end, fork, join, decision, wait).
    Control,
}

/// Structural kind of a step, driving how the job builder wires it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepKind {
    #[default]
    Normal,
    /// Fans successors out as parallel branches.
    Fork,
    /// Synchronization barrier over its upstream steps.
    Join,
    /// Selects exactly one successor at runtime.
    Decision,
    /// Placeholder inlined by the subgraph expander before validation.
    Subgraph,
}

/// One outgoing port of a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputPort {
    /// Node the port feeds.
    pub target_node_id: String,

    /// Handle on the producing side.
    pub source_port: String,

    /// Handle (buffer key) on the consuming side.
    pub target_port: String,

    /// Control ports sequence without carrying records.
    #[serde(default)]
    pub is_control: bool,
}

impl OutputPort {
    pub fn new(
        target_node_id: impl Into<String>,
        source_port: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            target_node_id: target_node_id.into(),
            source_port: source_port.into(),
            target_port: target_port.into(),
            is_control: false,
        }
    }
}

/// A single lowered plan node. Immutable once the plan is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepNode {
    /// Plan-unique step id (the node id, possibly subgraph-prefixed).
    pub node_id: String,

    /// Executor type name.
    pub node_type: String,

    /// Display label carried into node-execution rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Opaque executor configuration.
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Successor step ids in port-declaration order.
    #[serde(default)]
    pub next_steps: Vec<String>,

    /// Steps the FAILED transition routes to.
    #[serde(default)]
    pub error_steps: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_config: Option<MetricsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_hints: Option<ExecutionHints>,

    pub classification: StepClassification,

    #[serde(default)]
    pub kind: StepKind,

    /// Steps a JOIN waits on. Empty for every other kind.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstream_steps: Vec<String>,

    /// Outgoing ports in edge-declaration order.
    #[serde(default)]
    pub output_ports: Vec<OutputPort>,
}

impl StepNode {
    /// Data ports only, in declaration order.
    pub fn data_ports(&self) -> impl Iterator<Item = &OutputPort> {
        self.output_ports.iter().filter(|p| !p.is_control)
    }

    /// Distinct source handles carrying data, in declaration order.
    pub fn distinct_source_handles(&self) -> Vec<&str> {
        let mut handles: Vec<&str> = Vec::new();
        for port in self.data_ports() {
            if !handles.contains(&port.source_port.as_str()) {
                handles.push(&port.source_port);
            }
        }
        handles
    }

    /// Whether the hints ask for parallel fan-out.
    pub fn hints_parallel(&self) -> bool {
        self.execution_hints.as_ref().is_some_and(|h| h.parallel)
    }

    /// The join named by this step's hints, if any.
    pub fn hinted_join(&self) -> Option<&str> {
        self.execution_hints
            .as_ref()
            .and_then(|h| h.join_node_id.as_deref())
    }

    /// Node-scoped timeout, if any.
    pub fn max_duration_ms(&self) -> Option<u64> {
        self.execution_hints.as_ref().and_then(|h| h.max_duration_ms)
    }

    /// Read `config.chunkSize` when present.
    pub fn chunk_size(&self) -> Option<usize> {
        self.config
            .get("chunkSize")
            .and_then(serde_json::Value::as_u64)
            .map(|v| v as usize)
    }
}

/// The lowered, validated shape of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    /// Entry step ids, stable by definition order.
    pub entry_step_ids: Vec<String>,

    /// All steps, keyed by step id.
    pub steps: HashMap<String, StepNode>,

    /// The workflow this plan was lowered from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

impl ExecutionPlan {
    /// Look up a step.
    pub fn step(&self, id: &str) -> Option<&StepNode> {
        self.steps.get(id)
    }

    /// Whether the plan contains a step.
    pub fn contains(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    /// Number of steps; this is what `total_nodes` is set from at submit.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Incoming data ports of a step: `(source_id, target_port)` pairs in a
    /// stable order (source steps sorted, ports in declaration order).
    /// The step runtime drains these buffers to assemble reader input.
    pub fn incoming_data_ports(&self, step_id: &str) -> Vec<(String, String)> {
        let mut sources: Vec<&StepNode> = self
            .steps
            .values()
            .filter(|s| s.data_ports().any(|p| p.target_node_id == step_id))
            .collect();
        sources.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let mut ports = Vec::new();
        for source in sources {
            for port in source.data_ports() {
                if port.target_node_id == step_id {
                    ports.push((source.node_id.clone(), port.target_port.clone()));
                }
            }
        }
        ports
    }

    /// Distinct target ports feeding a step, deduplicated in stable order.
    pub fn incoming_target_ports(&self, step_id: &str) -> Vec<String> {
        let mut ports: Vec<String> = Vec::new();
        for (_, port) in self.incoming_data_ports(step_id) {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        ports
    }

    /// Step ids with data edges into `step_id` (the implicit-join check and
    /// JOIN upstream inference both build on this).
    pub fn data_predecessors(&self, step_id: &str) -> Vec<String> {
        let mut preds: Vec<String> = self
            .steps
            .values()
            .filter(|s| s.data_ports().any(|p| p.target_node_id == step_id))
            .map(|s| s.node_id.clone())
            .collect();
        preds.sort();
        preds.dedup();
        preds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str) -> StepNode {
        StepNode {
            node_id: id.to_string(),
            node_type: "noop".to_string(),
            label: None,
            config: Map::new(),
            next_steps: Vec::new(),
            error_steps: Vec::new(),
            failure_policy: None,
            metrics_config: None,
            execution_hints: None,
            classification: StepClassification::Transform,
            kind: StepKind::Normal,
            upstream_steps: Vec::new(),
            output_ports: Vec::new(),
        }
    }

    #[test]
    fn incoming_ports_follow_declaration_order() {
        let mut a = step("a");
        a.output_ports.push(OutputPort::new("c", "out", "left"));
        a.output_ports.push(OutputPort::new("c", "out", "right"));
        let mut b = step("b");
        b.output_ports.push(OutputPort::new("c", "out", "in"));

        let mut plan = ExecutionPlan::default();
        plan.steps.insert("a".into(), a);
        plan.steps.insert("b".into(), b);
        plan.steps.insert("c".into(), step("c"));

        let ports = plan.incoming_data_ports("c");
        assert_eq!(
            ports,
            vec![
                ("a".to_string(), "left".to_string()),
                ("a".to_string(), "right".to_string()),
                ("b".to_string(), "in".to_string()),
            ]
        );
        assert_eq!(plan.data_predecessors("c"), vec!["a", "b"]);
    }

    #[test]
    fn control_ports_do_not_count_as_data() {
        let mut a = step("a");
        a.output_ports.push(OutputPort {
            target_node_id: "b".into(),
            source_port: "out".into(),
            target_port: "in".into(),
            is_control: true,
        });

        let mut plan = ExecutionPlan::default();
        plan.steps.insert("a".into(), a);
        plan.steps.insert("b".into(), step("b"));

        assert!(plan.incoming_data_ports("b").is_empty());
        assert!(plan.data_predecessors("b").is_empty());
    }

    #[test]
    fn distinct_source_handles_deduplicate() {
        let mut a = step("a");
        a.output_ports.push(OutputPort::new("b", "out", "in"));
        a.output_ports.push(OutputPort::new("c", "out", "in"));
        a.output_ports.push(OutputPort::new("d", "side", "in"));
        assert_eq!(a.distinct_source_handles(), vec!["out", "side"]);
    }
}
