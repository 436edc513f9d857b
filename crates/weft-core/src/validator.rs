//! Plan validation.
//!
//! Six invariant categories: non-emptiness, reference integrity,
//! acyclicity, no implicit joins (strict), fork/join pairing (strict),
//! and decision branch declarations. `validate` fails on the first
//! violated category; `validate_with_result` collects everything.

use std::collections::{HashMap, HashSet};

use weft_workflow::{ExecutionPlan, GraphError, StepKind, StepNode};

/// Outcome of a collecting validation pass.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<GraphError>,
}

/// Validates execution plans.
pub struct PlanValidator {
    strict: bool,
}

impl PlanValidator {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Fail on the first violated category.
    pub fn validate(&self, plan: &ExecutionPlan) -> Result<(), GraphError> {
        let result = self.validate_with_result(plan);
        match result.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Collect every violation.
    pub fn validate_with_result(&self, plan: &ExecutionPlan) -> ValidationResult {
        let mut errors = Vec::new();

        self.check_non_empty(plan, &mut errors);
        if !errors.is_empty() {
            // Nothing else is meaningful on an empty plan.
            return ValidationResult {
                valid: false,
                errors,
            };
        }

        self.check_references(plan, &mut errors);
        self.check_acyclic(plan, &mut errors);
        if self.strict {
            self.check_implicit_joins(plan, &mut errors);
            self.check_fork_join_pairing(plan, &mut errors);
        }
        self.check_decisions(plan, &mut errors);

        ValidationResult {
            valid: errors.is_empty(),
            errors,
        }
    }

    fn check_non_empty(&self, plan: &ExecutionPlan, errors: &mut Vec<GraphError>) {
        if plan.steps.is_empty() {
            errors.push(GraphError::EmptyWorkflow);
        } else if plan.entry_step_ids.is_empty() {
            errors.push(GraphError::NoEntrySteps);
        }
    }

    fn check_references(&self, plan: &ExecutionPlan, errors: &mut Vec<GraphError>) {
        for entry in &plan.entry_step_ids {
            if !plan.contains(entry) {
                errors.push(GraphError::DanglingReference {
                    step: "<entry>".to_string(),
                    referenced: entry.clone(),
                    field: "entryStepIds",
                });
            }
        }

        for step in plan.steps.values() {
            for (field, refs) in [
                ("nextSteps", &step.next_steps),
                ("errorSteps", &step.error_steps),
                ("upstreamSteps", &step.upstream_steps),
            ] {
                for referenced in refs {
                    if !plan.contains(referenced) {
                        errors.push(GraphError::DanglingReference {
                            step: step.node_id.clone(),
                            referenced: referenced.clone(),
                            field,
                        });
                    }
                }
            }
        }
    }

    /// Tri-color DFS from each entry. White = unseen, gray = on the
    /// current path, black = finished. A gray revisit is a cycle; the
    /// reported path is the cycle's node sequence.
    fn check_acyclic(&self, plan: &ExecutionPlan, errors: &mut Vec<GraphError>) {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: HashMap<&str, Color> =
            plan.steps.keys().map(|id| (id.as_str(), Color::White)).collect();

        fn visit<'a>(
            plan: &'a ExecutionPlan,
            id: &'a str,
            colors: &mut HashMap<&'a str, Color>,
            path: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            colors.insert(id, Color::Gray);
            path.push(id.to_string());

            if let Some(step) = plan.step(id) {
                for succ in step.next_steps.iter().chain(step.error_steps.iter()) {
                    match colors.get(succ.as_str()).copied() {
                        Some(Color::Gray) => {
                            // Close the loop for the report.
                            let start = path.iter().position(|p| p == succ).unwrap_or(0);
                            let mut cycle: Vec<String> = path[start..].to_vec();
                            cycle.push(succ.clone());
                            return Some(cycle);
                        }
                        Some(Color::White) => {
                            if let Some(step_ref) = plan.steps.get_key_value(succ.as_str()) {
                                if let Some(cycle) =
                                    visit(plan, step_ref.0.as_str(), colors, path)
                                {
                                    return Some(cycle);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }

            colors.insert(id, Color::Black);
            path.pop();
            None
        }

        // Start from entries, then sweep any step not reachable from one so
        // a detached cycle is still caught.
        let mut roots: Vec<&str> = plan
            .entry_step_ids
            .iter()
            .filter_map(|id| plan.steps.get_key_value(id.as_str()).map(|(k, _)| k.as_str()))
            .collect();
        let mut rest: Vec<&str> = plan.steps.keys().map(String::as_str).collect();
        rest.sort();
        roots.extend(rest);

        for root in roots {
            if colors.get(root) == Some(&Color::White) {
                let mut path = Vec::new();
                if let Some(cycle) = visit(plan, root, &mut colors, &mut path) {
                    errors.push(GraphError::Cycle(cycle));
                    return;
                }
            }
        }
    }

    fn check_implicit_joins(&self, plan: &ExecutionPlan, errors: &mut Vec<GraphError>) {
        let mut ids: Vec<&String> = plan.steps.keys().collect();
        ids.sort();
        for id in ids {
            let step = &plan.steps[id];
            if step.kind == StepKind::Join {
                continue;
            }
            if plan.data_predecessors(id).len() > 1 {
                errors.push(GraphError::ImplicitJoin(id.clone()));
            }
        }
    }

    fn check_fork_join_pairing(&self, plan: &ExecutionPlan, errors: &mut Vec<GraphError>) {
        let mut ids: Vec<&String> = plan.steps.keys().collect();
        ids.sort();
        for id in ids {
            let fork = &plan.steps[id];
            if fork.kind != StepKind::Fork {
                continue;
            }
            let Some(join_id) = fork.hinted_join() else {
                continue;
            };
            let Some(join) = plan.step(join_id) else {
                // Reported by the reference check via the hint target.
                errors.push(GraphError::DanglingReference {
                    step: fork.node_id.clone(),
                    referenced: join_id.to_string(),
                    field: "joinNodeId",
                });
                continue;
            };

            // Every branch must reach the join.
            let mut branch_terminals: HashSet<String> = HashSet::new();
            for branch in &fork.next_steps {
                let reached = reachable_until(plan, branch, join_id);
                if !reached.contains(join_id) {
                    errors.push(GraphError::ForkJoinMismatch {
                        fork: fork.node_id.clone(),
                        join: join_id.to_string(),
                        message: format!("branch '{branch}' never reaches the join"),
                    });
                    continue;
                }
                for node in &reached {
                    if let Some(step) = plan.step(node) {
                        if step.next_steps.iter().any(|n| n == join_id) {
                            branch_terminals.insert(node.clone());
                        }
                    }
                }
            }

            let declared: HashSet<String> = join.upstream_steps.iter().cloned().collect();
            if !branch_terminals.is_empty() && declared != branch_terminals {
                errors.push(GraphError::ForkJoinMismatch {
                    fork: fork.node_id.clone(),
                    join: join_id.to_string(),
                    message: "join upstreams do not match the fork's branch terminals".to_string(),
                });
            }
        }
    }

    fn check_decisions(&self, plan: &ExecutionPlan, errors: &mut Vec<GraphError>) {
        let mut ids: Vec<&String> = plan.steps.keys().collect();
        ids.sort();
        for id in ids {
            let step = &plan.steps[id];
            if step.kind != StepKind::Decision {
                continue;
            }
            if let Err(err) = check_decision_config(step) {
                errors.push(err);
            }
        }
    }
}

/// Decision config contract: every branch target must be a declared
/// successor, and a default branch is mandatory.
pub(crate) fn check_decision_config(step: &StepNode) -> Result<(), GraphError> {
    let default_branch = step
        .config
        .get("defaultBranch")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| GraphError::InvalidDecision {
            step: step.node_id.clone(),
            message: "defaultBranch is mandatory".to_string(),
        })?;

    if !step.next_steps.iter().any(|n| n == default_branch) {
        return Err(GraphError::InvalidDecision {
            step: step.node_id.clone(),
            message: format!("defaultBranch '{default_branch}' is not a declared successor"),
        });
    }

    if let Some(branches) = step.config.get("branches").and_then(serde_json::Value::as_array) {
        for branch in branches {
            let target = branch
                .get("target")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| GraphError::InvalidDecision {
                    step: step.node_id.clone(),
                    message: "branch entry is missing 'target'".to_string(),
                })?;
            if !step.next_steps.iter().any(|n| n == target) {
                return Err(GraphError::InvalidDecision {
                    step: step.node_id.clone(),
                    message: format!("branch target '{target}' is not a declared successor"),
                });
            }
            if branch.get("condition").and_then(serde_json::Value::as_str).is_none() {
                return Err(GraphError::InvalidDecision {
                    step: step.node_id.clone(),
                    message: format!("branch to '{target}' is missing 'condition'"),
                });
            }
        }
    }

    Ok(())
}

/// Nodes reachable from `start` following `next_steps`, stopping at
/// `boundary` (the boundary itself is included when reached).
fn reachable_until(plan: &ExecutionPlan, start: &str, boundary: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut stack = vec![start.to_string()];
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if id == boundary {
            continue;
        }
        if let Some(step) = plan.step(&id) {
            for succ in &step.next_steps {
                stack.push(succ.clone());
            }
        }
    }
    seen
}
