//! Per-step execution context.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use weft_workflow::{Record, StepNode};

use crate::correlation::CorrelationContext;
use crate::routing::RoutingContext;

/// Scratchpad handed to an executor for one step execution.
///
/// Lives exactly as long as the step: inputs are the records drained from
/// the step's incoming edge buffers, the routing context deposits produced
/// records downstream, and the cancel token is the job-wide cooperative
/// cancellation flag.
pub struct NodeExecutionContext {
    pub execution_id: String,
    pub step: Arc<StepNode>,
    pub inputs: Vec<Record>,
    pub variables: Map<String, Value>,
    pub routing: RoutingContext,
    pub correlation: CorrelationContext,
    pub cancel: CancellationToken,
}

impl NodeExecutionContext {
    /// Read a string config value.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.step.config.get(key).and_then(Value::as_str)
    }

    /// Read an integer config value.
    pub fn config_i64(&self, key: &str) -> Option<i64> {
        self.step.config.get(key).and_then(Value::as_i64)
    }

    /// Read a boolean config value.
    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.step.config.get(key).and_then(Value::as_bool)
    }

    /// Read an object config value.
    pub fn config_object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.step.config.get(key).and_then(Value::as_object)
    }

    /// Whether cancellation was requested for the job.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::EdgeBufferStore;
    use serde_json::json;
    use weft_workflow::{StepClassification, StepKind};

    fn step_with_config(config: Map<String, Value>) -> StepNode {
        StepNode {
            node_id: "n".into(),
            node_type: "noop".into(),
            label: None,
            config,
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
    fn config_accessors() {
        let mut config = Map::new();
        config.insert("name".into(), json!("weft"));
        config.insert("count".into(), json!(5));
        config.insert("flag".into(), json!(true));

        let ctx = NodeExecutionContext {
            execution_id: "e1".into(),
            step: Arc::new(step_with_config(config)),
            inputs: Vec::new(),
            variables: Map::new(),
            routing: RoutingContext::new("e1", "n", Vec::new(), Arc::new(EdgeBufferStore::new(10))),
            correlation: CorrelationContext::for_execution("e1"),
            cancel: CancellationToken::new(),
        };

        assert_eq!(ctx.config_str("name"), Some("weft"));
        assert_eq!(ctx.config_i64("count"), Some(5));
        assert_eq!(ctx.config_bool("flag"), Some(true));
        assert_eq!(ctx.config_str("missing"), None);
        assert!(!ctx.is_cancelled());
    }
}
