//! Graph planner: lowers a workflow definition into an execution plan.
//!
//! The pipeline is: normalize → classify → interpret edges into ports →
//! infer step kinds → compute entries → expand subgraphs → validate.
//! The output plan is immutable data; the job builder consumes it.

use std::collections::{HashMap, HashSet};

use weft_workflow::{
    mint_workflow_id, Edge, ExecutionPlan, GraphError, NodeDefinition, OutputPort,
    StepClassification, StepKind, StepNode, WorkflowDefinition,
};

use crate::subgraph::{SubgraphExpander, SubgraphLibrary};
use crate::validator::PlanValidator;

/// Source handles that wire a node's FAILED exit instead of a data port.
const ERROR_HANDLES: [&str; 2] = ["error", "failed"];

/// Node types that are structural rather than data-bearing.
const CONTROL_TYPES: [&str; 7] = ["start", "end", "wait", "decision", "fork", "join", "subgraph"];

/// Lowers workflow definitions into validated execution plans.
pub struct GraphPlanner {
    strict: bool,
    subgraphs: SubgraphLibrary,
}

impl GraphPlanner {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            subgraphs: SubgraphLibrary::new(),
        }
    }

    /// Attach the library SUBGRAPH steps are resolved against.
    pub fn with_subgraphs(mut self, subgraphs: SubgraphLibrary) -> Self {
        self.subgraphs = subgraphs;
        self
    }

    /// Build a validated plan from a definition.
    pub fn plan(&self, definition: &WorkflowDefinition) -> Result<ExecutionPlan, GraphError> {
        definition.validate()?;

        let workflow_id = definition
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(mint_workflow_id);

        let (entry_step_ids, steps) = lower(&definition.nodes, &definition.edges)?;

        let mut plan = ExecutionPlan {
            entry_step_ids,
            steps,
            workflow_id: Some(workflow_id),
        };

        plan = SubgraphExpander::new(&self.subgraphs).expand(plan)?;
        PlanValidator::new(self.strict).validate(&plan)?;
        Ok(plan)
    }
}

impl Default for GraphPlanner {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Lower nodes + edges into entry ids and a step map, without expansion or
/// validation. The subgraph expander reuses this for subgraph bodies.
pub(crate) fn lower(
    nodes: &[NodeDefinition],
    edges: &[Edge],
) -> Result<(Vec<String>, HashMap<String, StepNode>), GraphError> {
    // Normalize: trimmed ids, stable submission order.
    let mut order: Vec<String> = Vec::with_capacity(nodes.len());
    let mut defs: HashMap<String, &NodeDefinition> = HashMap::new();
    for node in nodes {
        let id = node.id.trim().to_string();
        if id.is_empty() {
            return Err(GraphError::Config("node id is empty".to_string()));
        }
        if defs.insert(id.clone(), node).is_some() {
            return Err(GraphError::DuplicateNodeId(id));
        }
        order.push(id);
    }

    // Edge interpretation: group by source, split error handles out,
    // keep declaration order everywhere.
    let mut ports: HashMap<String, Vec<OutputPort>> = HashMap::new();
    let mut next: HashMap<String, Vec<String>> = HashMap::new();
    let mut error_routes: HashMap<String, Vec<String>> = HashMap::new();
    let mut has_incoming: HashSet<String> = HashSet::new();
    let mut data_preds: HashMap<String, Vec<String>> = HashMap::new();

    for edge in edges {
        let source = edge.source.trim().to_string();
        let target = edge.target.trim().to_string();
        if !defs.contains_key(&source) {
            return Err(GraphError::UnknownEdgeEndpoint {
                node_id: source,
                side: "source",
            });
        }
        if !defs.contains_key(&target) {
            return Err(GraphError::UnknownEdgeEndpoint {
                node_id: target,
                side: "target",
            });
        }
        if source == target {
            return Err(GraphError::SelfLoop(source));
        }

        has_incoming.insert(target.clone());

        if ERROR_HANDLES.contains(&edge.source_handle.as_str()) {
            let routes = error_routes.entry(source).or_default();
            if !routes.contains(&target) {
                routes.push(target);
            }
            continue;
        }

        ports.entry(source.clone()).or_default().push(OutputPort {
            target_node_id: target.clone(),
            source_port: edge.source_handle.clone(),
            target_port: edge.target_handle.clone(),
            is_control: edge.is_control,
        });

        let successors = next.entry(source.clone()).or_default();
        if !successors.contains(&target) {
            successors.push(target.clone());
        }

        if !edge.is_control {
            let preds = data_preds.entry(target).or_default();
            if !preds.contains(&source) {
                preds.push(source);
            }
        }
    }

    // Duplicate ports on the same (sourcePort, target, targetPort) triple
    // collapse to one.
    for port_list in ports.values_mut() {
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        port_list.retain(|p| {
            seen.insert((
                p.source_port.clone(),
                p.target_node_id.clone(),
                p.target_port.clone(),
            ))
        });
    }

    // Classification + kind inference per node.
    let mut steps: HashMap<String, StepNode> = HashMap::with_capacity(order.len());
    for id in &order {
        let def = defs[id];
        let node_type = def.node_type.trim().to_string();
        let node_ports = ports.get(id).cloned().unwrap_or_default();
        let next_steps = next.get(id).cloned().unwrap_or_default();
        let error_steps = error_routes.get(id).cloned().unwrap_or_default();

        let has_inbound_data = data_preds.contains_key(id);
        let has_outbound_data = node_ports.iter().any(|p| !p.is_control);

        let classification = if CONTROL_TYPES.contains(&node_type.as_str()) {
            StepClassification::Control
        } else if !has_inbound_data {
            StepClassification::Source
        } else if !has_outbound_data {
            StepClassification::Sink
        } else {
            StepClassification::Transform
        };

        let mut step = StepNode {
            node_id: id.clone(),
            node_type,
            label: def.label.clone(),
            config: def.config.clone(),
            next_steps,
            error_steps,
            failure_policy: def.failure_policy.clone(),
            metrics_config: def.metrics_config.clone(),
            execution_hints: def.execution_hints.clone(),
            classification,
            kind: StepKind::Normal,
            upstream_steps: Vec::new(),
            output_ports: node_ports,
        };

        step.kind = infer_kind(&step);
        steps.insert(id.clone(), step);
    }

    // JOIN upstreams: the set of nodes whose data edges converge on it.
    let join_ids: Vec<String> = steps
        .iter()
        .filter(|(_, s)| s.kind == StepKind::Join)
        .map(|(id, _)| id.clone())
        .collect();
    for join_id in join_ids {
        let upstream = data_preds.get(&join_id).cloned().unwrap_or_default();
        if let Some(join) = steps.get_mut(&join_id) {
            join.upstream_steps = upstream;
        }
    }

    // Entries: no incoming control or data edges, stable by input order.
    let entry_step_ids: Vec<String> = order
        .iter()
        .filter(|id| !has_incoming.contains(*id))
        .cloned()
        .collect();

    Ok((entry_step_ids, steps))
}

/// §kind inference: explicit kinds come from the node type; FORK is also
/// inferred for multi-port fan-out declared parallel or spread across
/// distinct source handles.
fn infer_kind(step: &StepNode) -> StepKind {
    match step.node_type.as_str() {
        "join" => return StepKind::Join,
        "decision" => return StepKind::Decision,
        "subgraph" => return StepKind::Subgraph,
        "fork" => return StepKind::Fork,
        _ => {}
    }

    let data_targets = step.data_ports().count();
    if data_targets > 1 && (step.hints_parallel() || step.distinct_source_handles().len() > 1) {
        return StepKind::Fork;
    }

    StepKind::Normal
}
