//! Node executor capability and registry.
//!
//! Executors are registered explicitly at process init; there is no
//! scanning. Each node type maps to one executor value implementing
//! [`NodeExecutor`], and the step runtime drives it through the
//! reader → processor → writer loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;
use weft_workflow::{Record, StepNode};

use crate::context::NodeExecutionContext;
use crate::error::{EngineError, EngineResult};

/// Capability contract for one node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The node type this executor handles.
    fn node_type(&self) -> &str;

    /// Produce the step's own records, or `None` to pass the drained
    /// input buffers through as the reader output. The sequence must be
    /// finite; plans are finite DAGs.
    async fn create_reader(
        &self,
        _ctx: &NodeExecutionContext,
    ) -> EngineResult<Option<Vec<Record>>> {
        Ok(None)
    }

    /// Transform one record. `None` drops it.
    async fn process(
        &self,
        _ctx: &NodeExecutionContext,
        record: Record,
    ) -> EngineResult<Option<Record>> {
        Ok(Some(record))
    }

    /// Write one chunk. The default routes every record out of the
    /// step's default port; sinks override to absorb records instead.
    async fn write(&self, ctx: &NodeExecutionContext, batch: Vec<Record>) -> EngineResult<()> {
        for record in batch {
            ctx.routing.route_record(record, None)?;
        }
        Ok(())
    }

    /// Submit-time configuration check. Failures surface as 400s and no
    /// execution row is created.
    fn validate(&self, _step: &StepNode) -> EngineResult<()> {
        Ok(())
    }

    fn supports_metrics(&self) -> bool {
        true
    }

    fn supports_failure_handling(&self) -> bool {
        true
    }
}

/// Process-wide registry of node executors.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// Empty registry.
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in executors.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(StartExecutor));
        registry.register(Arc::new(EndExecutor));
        registry.register(Arc::new(GeneratorExecutor));
        registry.register(Arc::new(FilterExecutor));
        registry.register(Arc::new(MapExecutor));
        registry.register(Arc::new(DecisionExecutor));
        registry.register(Arc::new(ForkExecutor));
        registry.register(Arc::new(JoinExecutor));
        registry.register(Arc::new(WaitExecutor));
        registry.register(Arc::new(CollectExecutor));
        registry.register(Arc::new(NoOpExecutor));
        registry.register(Arc::new(FailingExecutor));
        registry
    }

    /// Register an executor. First registration of a type wins; later
    /// duplicates are rejected with a WARN so startup order is the only
    /// thing that decides which executor serves a type.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let node_type = executor.node_type().trim().to_string();
        if self.executors.contains_key(&node_type) {
            warn!(node_type = %node_type, "duplicate executor registration ignored");
            return;
        }
        self.executors.insert(node_type, executor);
    }

    /// Resolve a node type.
    pub fn get(&self, node_type: &str) -> EngineResult<Arc<dyn NodeExecutor>> {
        let trimmed = node_type.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidArgument(
                "node type is blank".to_string(),
            ));
        }
        self.executors
            .get(trimmed)
            .cloned()
            .ok_or_else(|| EngineError::UnknownExecutor(trimmed.to_string()))
    }

    pub fn has(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type.trim())
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Startup self-check: WARN for every node type in `used_types` that
    /// has no registered executor, and return the missing set.
    pub fn verify_node_types<'a>(
        &self,
        used_types: impl IntoIterator<Item = &'a str>,
    ) -> Vec<String> {
        let mut missing = Vec::new();
        for node_type in used_types {
            if !self.has(node_type) && !missing.iter().any(|m| m == node_type) {
                warn!(node_type = %node_type, "workflow references unregistered node type");
                missing.push(node_type.to_string());
            }
        }
        missing
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Built-in executors
// ============================================================================

/// Start node: entry control point, emits nothing of its own.
pub struct StartExecutor;

#[async_trait]
impl NodeExecutor for StartExecutor {
    fn node_type(&self) -> &str {
        "start"
    }

    async fn create_reader(
        &self,
        _ctx: &NodeExecutionContext,
    ) -> EngineResult<Option<Vec<Record>>> {
        Ok(Some(Vec::new()))
    }

    fn supports_metrics(&self) -> bool {
        false
    }
}

/// End node: terminal control point, absorbs whatever reaches it.
pub struct EndExecutor;

#[async_trait]
impl NodeExecutor for EndExecutor {
    fn node_type(&self) -> &str {
        "end"
    }

    async fn write(&self, _ctx: &NodeExecutionContext, _batch: Vec<Record>) -> EngineResult<()> {
        Ok(())
    }

    fn supports_metrics(&self) -> bool {
        false
    }
}

/// Generator source: emits `count` synthetic records, each carrying its
/// index plus the optional `fields` object from config.
pub struct GeneratorExecutor;

#[async_trait]
impl NodeExecutor for GeneratorExecutor {
    fn node_type(&self) -> &str {
        "generator"
    }

    async fn create_reader(
        &self,
        ctx: &NodeExecutionContext,
    ) -> EngineResult<Option<Vec<Record>>> {
        let count = ctx.config_i64("count").unwrap_or(1).max(0);
        let fields = ctx.config_object("fields").cloned().unwrap_or_default();

        let mut records = Vec::with_capacity(count as usize);
        for index in 0..count {
            let mut record = Record::from_pairs(fields.clone());
            record.set("index", json!(index));
            records.push(record);
        }
        Ok(Some(records))
    }

    fn validate(&self, step: &StepNode) -> EngineResult<()> {
        match step.config.get("count") {
            None => Ok(()),
            Some(v) if v.as_i64().is_some_and(|c| c >= 0) => Ok(()),
            Some(_) => Err(EngineError::executor(
                &step.node_id,
                "generator 'count' must be a non-negative integer",
            )),
        }
    }
}

/// Filter: drops records whose `condition` evaluates false.
pub struct FilterExecutor;

#[async_trait]
impl NodeExecutor for FilterExecutor {
    fn node_type(&self) -> &str {
        "filter"
    }

    async fn process(
        &self,
        ctx: &NodeExecutionContext,
        record: Record,
    ) -> EngineResult<Option<Record>> {
        let condition = ctx.config_str("condition").unwrap_or("true");
        let snapshot = crate::condition::DecisionSnapshot {
            read_count: ctx.inputs.len() as i64,
            write_count: 0,
            record_count: 1,
            first_record: Some(record.clone()),
        };
        if crate::condition::evaluate(condition, &snapshot)? {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    fn validate(&self, step: &StepNode) -> EngineResult<()> {
        let condition = step
            .config
            .get("condition")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("true");
        // Probe the expression against an empty snapshot; a parse failure
        // here would otherwise only show up mid-run.
        crate::condition::evaluate(condition, &Default::default()).map(|_| ())
    }
}

/// Map: sets the fields from the `set` object on every record.
pub struct MapExecutor;

#[async_trait]
impl NodeExecutor for MapExecutor {
    fn node_type(&self) -> &str {
        "map"
    }

    async fn process(
        &self,
        ctx: &NodeExecutionContext,
        mut record: Record,
    ) -> EngineResult<Option<Record>> {
        if let Some(set) = ctx.config_object("set") {
            for (key, value) in set {
                record.set(key.clone(), value.clone());
            }
        }
        Ok(Some(record))
    }
}

/// Decision control node: records pass through; branch selection is the
/// job builder's concern.
pub struct DecisionExecutor;

#[async_trait]
impl NodeExecutor for DecisionExecutor {
    fn node_type(&self) -> &str {
        "decision"
    }

    fn supports_metrics(&self) -> bool {
        false
    }
}

/// Fork control node: pass-through; the parallel split is structural.
pub struct ForkExecutor;

#[async_trait]
impl NodeExecutor for ForkExecutor {
    fn node_type(&self) -> &str {
        "fork"
    }

    async fn write(&self, ctx: &NodeExecutionContext, batch: Vec<Record>) -> EngineResult<()> {
        for record in batch {
            ctx.routing.route_to_all_ports(record)?;
        }
        Ok(())
    }

    fn supports_metrics(&self) -> bool {
        false
    }
}

/// Join barrier: merges the records of all upstream branches.
pub struct JoinExecutor;

#[async_trait]
impl NodeExecutor for JoinExecutor {
    fn node_type(&self) -> &str {
        "join"
    }

    fn supports_metrics(&self) -> bool {
        false
    }
}

/// Wait node: sleeps `durationMs`, waking early on cancellation.
pub struct WaitExecutor;

#[async_trait]
impl NodeExecutor for WaitExecutor {
    fn node_type(&self) -> &str {
        "wait"
    }

    async fn create_reader(
        &self,
        ctx: &NodeExecutionContext,
    ) -> EngineResult<Option<Vec<Record>>> {
        let duration_ms = ctx.config_i64("durationMs").unwrap_or(0).max(0) as u64;
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(duration_ms)) => {}
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
        }
        Ok(None)
    }
}

/// Collect sink: absorbs its input. Its record count is what the node
/// execution row reports.
pub struct CollectExecutor;

#[async_trait]
impl NodeExecutor for CollectExecutor {
    fn node_type(&self) -> &str {
        "collect"
    }

    async fn write(&self, _ctx: &NodeExecutionContext, _batch: Vec<Record>) -> EngineResult<()> {
        Ok(())
    }
}

/// Pass-through.
pub struct NoOpExecutor;

#[async_trait]
impl NodeExecutor for NoOpExecutor {
    fn node_type(&self) -> &str {
        "noop"
    }
}

/// Always fails. Exists so error routing can be exercised end to end.
pub struct FailingExecutor;

#[async_trait]
impl NodeExecutor for FailingExecutor {
    fn node_type(&self) -> &str {
        "error"
    }

    async fn create_reader(
        &self,
        ctx: &NodeExecutionContext,
    ) -> EngineResult<Option<Vec<Record>>> {
        let message = ctx
            .config_str("message")
            .unwrap_or("node failed")
            .to_string();
        Err(EngineError::executor(&ctx.step.node_id, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ExecutorRegistry::new();
        for node_type in [
            "start", "end", "generator", "filter", "map", "decision", "fork", "join", "wait",
            "collect", "noop", "error",
        ] {
            assert!(registry.has(node_type), "missing builtin: {node_type}");
        }
    }

    #[test]
    fn get_rejects_blank_and_unknown_types() {
        let registry = ExecutorRegistry::new();
        assert!(matches!(
            registry.get(""),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.get("   "),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.get("no-such-type"),
            Err(EngineError::UnknownExecutor(_))
        ));
    }

    #[test]
    fn get_trims_the_requested_type() {
        let registry = ExecutorRegistry::new();
        assert!(registry.get("  noop  ").is_ok());
    }

    #[test]
    fn first_registration_wins() {
        struct Impostor;
        #[async_trait]
        impl NodeExecutor for Impostor {
            fn node_type(&self) -> &str {
                "noop"
            }
            fn supports_metrics(&self) -> bool {
                false
            }
        }

        let mut registry = ExecutorRegistry::new();
        let before = registry.len();
        registry.register(Arc::new(Impostor));
        assert_eq!(registry.len(), before);
        // The original noop executor still serves the type.
        assert!(registry.get("noop").unwrap().supports_metrics());
    }

    #[test]
    fn verify_node_types_reports_missing() {
        let registry = ExecutorRegistry::new();
        let missing =
            registry.verify_node_types(["noop", "teleport", "filter", "teleport"]);
        assert_eq!(missing, vec!["teleport"]);
    }
}
