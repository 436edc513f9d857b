//! Subgraph expansion.
//!
//! A step with `kind == SUBGRAPH` names a reusable sub-plan in the
//! [`SubgraphLibrary`]. Expansion inlines the body into the parent plan
//! with `<step-id>_` prefixed ids, rewires the step's inbound edges to
//! the body entries and its outbound edges to the body exit, and removes
//! the placeholder. An expansion stack catches circular references.

use std::collections::HashMap;

use serde_json::Value;
use weft_workflow::{Edge, ExecutionPlan, GraphError, NodeDefinition, StepKind, StepNode};

use crate::planner::lower;

/// A reusable sub-plan: a node/edge body with a single exit.
#[derive(Debug, Clone)]
pub struct SubgraphDefinition {
    pub name: String,
    pub nodes: Vec<NodeDefinition>,
    pub edges: Vec<Edge>,
    /// The body node whose completion represents the subgraph's completion;
    /// the parent's outgoing edges re-attach here.
    pub exit_id: String,
}

/// Named subgraph definitions available to the planner.
#[derive(Debug, Clone, Default)]
pub struct SubgraphLibrary {
    definitions: HashMap<String, SubgraphDefinition>,
}

impl SubgraphLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, definition: SubgraphDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&SubgraphDefinition> {
        self.definitions.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Inlines SUBGRAPH steps into a plan.
pub struct SubgraphExpander<'a> {
    library: &'a SubgraphLibrary,
}

impl<'a> SubgraphExpander<'a> {
    pub fn new(library: &'a SubgraphLibrary) -> Self {
        Self { library }
    }

    /// Expand every subgraph step, recursively.
    pub fn expand(&self, mut plan: ExecutionPlan) -> Result<ExecutionPlan, GraphError> {
        let mut stack = Vec::new();
        self.inline_all(&mut plan.steps, &mut plan.entry_step_ids, &mut stack)?;
        Ok(plan)
    }

    fn inline_all(
        &self,
        steps: &mut HashMap<String, StepNode>,
        entry_ids: &mut Vec<String>,
        stack: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        loop {
            let Some(sub_id) = next_subgraph_step(steps) else {
                return Ok(());
            };
            let sub_step = steps
                .remove(&sub_id)
                .ok_or_else(|| GraphError::Config(format!("subgraph step '{sub_id}' vanished")))?;

            let name = sub_step
                .config
                .get("subgraph")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    GraphError::Config(format!(
                        "subgraph step '{sub_id}' has no 'subgraph' config entry"
                    ))
                })?
                .to_string();

            if stack.iter().any(|s| s == &name) {
                let mut chain = stack.clone();
                chain.push(name);
                return Err(GraphError::CircularSubgraph(chain));
            }

            let definition = self
                .library
                .get(&name)
                .ok_or_else(|| GraphError::UnknownSubgraph(name.clone()))?
                .clone();

            // Lower the body and expand its own subgraph steps first, with
            // this name on the stack so self-reference is caught.
            stack.push(name);
            let (mut body_entries, mut body_steps) =
                lower(&definition.nodes, &definition.edges)?;
            self.inline_all(&mut body_steps, &mut body_entries, stack)?;
            stack.pop();

            let prefix = format!("{sub_id}_");
            let exit_id = format!("{prefix}{}", definition.exit_id);

            // Prefix every body id and internal reference.
            let mut renamed: HashMap<String, StepNode> = HashMap::with_capacity(body_steps.len());
            for (id, mut step) in body_steps {
                step.node_id = format!("{prefix}{id}");
                prefix_refs(&mut step.next_steps, &prefix);
                prefix_refs(&mut step.error_steps, &prefix);
                prefix_refs(&mut step.upstream_steps, &prefix);
                for port in &mut step.output_ports {
                    port.target_node_id = format!("{prefix}{}", port.target_node_id);
                }
                renamed.insert(step.node_id.clone(), step);
            }
            let prefixed_entries: Vec<String> = body_entries
                .iter()
                .map(|e| format!("{prefix}{e}"))
                .collect();

            if !renamed.contains_key(&exit_id) {
                return Err(GraphError::Config(format!(
                    "subgraph '{}' names unknown exit '{}'",
                    sub_step.node_id, definition.exit_id
                )));
            }
            if prefixed_entries.is_empty() {
                return Err(GraphError::Config(format!(
                    "subgraph '{}' has no entry nodes",
                    sub_step.node_id
                )));
            }

            // Rewire parent references to the placeholder.
            for step in steps.values_mut() {
                splice_refs(&mut step.next_steps, &sub_id, &prefixed_entries);
                splice_refs(&mut step.error_steps, &sub_id, &prefixed_entries);
                // Whatever waited on the placeholder now waits on the exit.
                splice_refs(
                    &mut step.upstream_steps,
                    &sub_id,
                    std::slice::from_ref(&exit_id),
                );
                let mut rewired_ports = Vec::with_capacity(step.output_ports.len());
                for port in step.output_ports.drain(..) {
                    if port.target_node_id == sub_id {
                        for entry in &prefixed_entries {
                            let mut copy = port.clone();
                            copy.target_node_id = entry.clone();
                            rewired_ports.push(copy);
                        }
                    } else {
                        rewired_ports.push(port);
                    }
                }
                step.output_ports = rewired_ports;
            }

            // The exit inherits the placeholder's outgoing wiring.
            if let Some(exit) = renamed.get_mut(&exit_id) {
                for succ in &sub_step.next_steps {
                    if !exit.next_steps.contains(succ) {
                        exit.next_steps.push(succ.clone());
                    }
                }
                for succ in &sub_step.error_steps {
                    if !exit.error_steps.contains(succ) {
                        exit.error_steps.push(succ.clone());
                    }
                }
                exit.output_ports.extend(sub_step.output_ports.iter().cloned());
            }

            // A placeholder that was an entry is replaced by the body
            // entries at the same position.
            splice_refs(entry_ids, &sub_id, &prefixed_entries);

            steps.extend(renamed);
        }
    }
}

fn next_subgraph_step(steps: &HashMap<String, StepNode>) -> Option<String> {
    let mut candidates: Vec<&String> = steps
        .iter()
        .filter(|(_, s)| s.kind == StepKind::Subgraph)
        .map(|(id, _)| id)
        .collect();
    candidates.sort();
    candidates.first().map(|id| (*id).clone())
}

fn prefix_refs(refs: &mut [String], prefix: &str) {
    for r in refs {
        *r = format!("{prefix}{r}");
    }
}

/// Replace `needle` in `refs` with `replacements` at its position,
/// skipping values already present.
fn splice_refs(refs: &mut Vec<String>, needle: &str, replacements: &[String]) {
    let Some(pos) = refs.iter().position(|r| r == needle) else {
        return;
    };
    refs.remove(pos);
    let mut insert_at = pos;
    for replacement in replacements {
        if !refs.contains(replacement) {
            refs.insert(insert_at, replacement.clone());
            insert_at += 1;
        }
    }
}
