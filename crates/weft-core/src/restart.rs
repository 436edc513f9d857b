//! Partial restart.
//!
//! A partial restart materializes the sub-plan reachable from a chosen
//! entry node. The new entry sheds its upstream synchronization (a JOIN
//! entry downgrades to a normal step), and the restart is refused when
//! the reachable set contains a join whose upstream branches are outside
//! it, because that barrier could never release.

use std::collections::{HashMap, HashSet, VecDeque};

use weft_workflow::{ExecutionPlan, GraphError, StepKind};

use crate::validator::PlanValidator;

/// Sub-plan rooted at a single node.
pub fn partial_plan(
    plan: &ExecutionPlan,
    entry: &str,
    strict: bool,
) -> Result<ExecutionPlan, GraphError> {
    partial_plan_from(plan, std::slice::from_ref(&entry.to_string()), strict)
}

/// Sub-plan rooted at several nodes (rerun-from-failed uses the failed
/// set). The reachable set is the union over all entries.
pub fn partial_plan_from(
    plan: &ExecutionPlan,
    entries: &[String],
    strict: bool,
) -> Result<ExecutionPlan, GraphError> {
    if entries.is_empty() {
        return Err(GraphError::NoEntrySteps);
    }
    for entry in entries {
        if !plan.contains(entry) {
            return Err(GraphError::Unrestartable {
                step: entry.clone(),
                message: "node is not part of the plan".to_string(),
            });
        }
    }

    // Reachability over next steps and error routes, so error handling
    // keeps working in the restarted plan.
    let mut reachable: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = entries.iter().cloned().collect();
    while let Some(id) = queue.pop_front() {
        if !reachable.insert(id.clone()) {
            continue;
        }
        if let Some(step) = plan.step(&id) {
            for succ in step.next_steps.iter().chain(step.error_steps.iter()) {
                if !reachable.contains(succ) {
                    queue.push_back(succ.clone());
                }
            }
        }
    }

    let entry_set: HashSet<&String> = entries.iter().collect();

    // A join inside the restart scope whose upstream branches fall outside
    // it would wait forever; the entry itself is exempt because its
    // barrier is detached below.
    for id in &reachable {
        let step = &plan.steps[id];
        if step.kind == StepKind::Join && !entry_set.contains(id) {
            if let Some(missing) = step
                .upstream_steps
                .iter()
                .find(|u| !reachable.contains(*u))
            {
                return Err(GraphError::Unrestartable {
                    step: entries[0].clone(),
                    message: format!(
                        "join '{id}' waits on '{missing}', which is outside the restart scope"
                    ),
                });
            }
        }
    }

    // Restrict to the reachable set, pruning references that left it.
    let mut steps = HashMap::with_capacity(reachable.len());
    for id in &reachable {
        let mut step = plan.steps[id].clone();
        step.next_steps.retain(|s| reachable.contains(s));
        step.error_steps.retain(|s| reachable.contains(s));
        step.upstream_steps.retain(|s| reachable.contains(s));
        step.output_ports
            .retain(|p| reachable.contains(&p.target_node_id));

        if entry_set.contains(id) {
            // The barrier no longer applies at a restart entry.
            step.upstream_steps.clear();
            if step.kind == StepKind::Join {
                step.kind = StepKind::Normal;
            }
        }
        steps.insert(id.clone(), step);
    }

    let partial = ExecutionPlan {
        entry_step_ids: entries.to_vec(),
        steps,
        workflow_id: plan.workflow_id.clone(),
    };

    PlanValidator::new(strict).validate(&partial)?;
    Ok(partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::GraphPlanner;
    use serde_json::json;
    use weft_workflow::{Edge, ExecutionHints, NodeDefinition, WorkflowDefinition};

    fn forked_plan() -> ExecutionPlan {
        let def = WorkflowDefinition {
            id: Some("w1".into()),
            name: "forked".into(),
            nodes: vec![
                NodeDefinition::new("src", "generator").with_config("count", json!(2)),
                NodeDefinition::new("fan", "fork")
                    .with_hints(ExecutionHints::parallel_until("merge")),
                NodeDefinition::new("left", "map"),
                NodeDefinition::new("right", "map"),
                NodeDefinition::new("merge", "join"),
                NodeDefinition::new("out", "collect"),
            ],
            edges: vec![
                Edge::data("src", "fan"),
                Edge::data("fan", "left"),
                Edge::data("fan", "right"),
                Edge::data("left", "merge"),
                Edge::data("right", "merge"),
                Edge::data("merge", "out"),
            ],
            execution_hints: None,
        };
        GraphPlanner::default().plan(&def).unwrap()
    }

    #[test]
    fn restart_at_linear_node_keeps_descendants_only() {
        let plan = forked_plan();
        let partial = partial_plan(&plan, "merge", true).unwrap();

        assert_eq!(partial.entry_step_ids, vec!["merge"]);
        assert!(partial.contains("merge"));
        assert!(partial.contains("out"));
        assert!(!partial.contains("src"));
        assert!(!partial.contains("left"));
        assert_eq!(partial.len(), 2);
    }

    #[test]
    fn restart_at_join_downgrades_the_barrier() {
        let plan = forked_plan();
        let partial = partial_plan(&plan, "merge", true).unwrap();

        let entry = partial.step("merge").unwrap();
        assert_eq!(entry.kind, StepKind::Normal);
        assert!(entry.upstream_steps.is_empty());
    }

    #[test]
    fn restart_inside_unjoined_fork_is_refused() {
        let plan = forked_plan();
        let err = partial_plan(&plan, "left", true).unwrap_err();
        match err {
            GraphError::Unrestartable { step, message } => {
                assert_eq!(step, "left");
                assert!(message.contains("merge"));
            }
            other => panic!("expected Unrestartable, got {other}"),
        }
    }

    #[test]
    fn restart_from_all_branch_terminals_is_allowed() {
        let plan = forked_plan();
        let partial =
            partial_plan_from(&plan, &["left".to_string(), "right".to_string()], true).unwrap();

        // Both terminals are in scope, so the join's barrier is satisfiable.
        assert!(partial.contains("merge"));
        assert_eq!(partial.step("merge").unwrap().kind, StepKind::Join);
        let mut upstream = partial.step("merge").unwrap().upstream_steps.clone();
        upstream.sort();
        assert_eq!(upstream, vec!["left", "right"]);
    }

    #[test]
    fn unknown_entry_is_refused() {
        let plan = forked_plan();
        assert!(matches!(
            partial_plan(&plan, "ghost", true),
            Err(GraphError::Unrestartable { .. })
        ));
    }

    #[test]
    fn restart_at_head_reproduces_the_full_plan() {
        let plan = forked_plan();
        let partial = partial_plan(&plan, "src", true).unwrap();
        assert_eq!(partial.len(), plan.len());
        // The join keeps its barrier; it is not the entry.
        assert_eq!(partial.step("merge").unwrap().kind, StepKind::Join);
    }
}
