//! # weft-core
//!
//! Workflow execution engine for weft.
//!
//! The engine lowers a submitted workflow into an execution plan
//! (planner, validator, subgraph expander), builds a runnable job from
//! the plan (dynamic job builder), and drives each plan node through a
//! chunked reader → processor → writer loop (step runtime). Records move
//! between steps through bounded per-execution edge buffers; every step
//! and job boundary is persisted through the [`store::ExecutionStore`]
//! trait, and the execution id is carried into all spawned work as a
//! tracing span.

pub mod buffer;
pub mod condition;
pub mod config;
pub mod context;
pub mod correlation;
pub mod datasource;
pub mod error;
pub mod job;
pub mod planner;
pub mod registry;
pub mod restart;
pub mod routing;
pub mod service;
pub mod step;
pub mod store;
pub mod subgraph;
pub mod validator;

pub use buffer::{BufferKey, EdgeBufferStore};
pub use condition::{evaluate as evaluate_condition, DecisionSnapshot};
pub use config::EngineConfig;
pub use context::NodeExecutionContext;
pub use correlation::CorrelationContext;
pub use datasource::{DatasourceCache, DatasourceFactory};
pub use error::{EngineError, EngineResult};
pub use job::{Job, JobBuilder, JobOutcome};
pub use planner::GraphPlanner;
pub use registry::{ExecutorRegistry, NodeExecutor};
pub use restart::{partial_plan, partial_plan_from};
pub use routing::{RouteOutcome, RoutingContext};
pub use service::{mint_execution_id, ExecutionService, RerunReceipt, SubmitReceipt};
pub use step::{StepExitStatus, StepOutcome, StepRuntime};
pub use store::{
    aggregate_node_rows, CancelOutcome, DailyTrend, ExecutionStore, MemoryExecutionStore,
    NodeAggregates,
};
pub use subgraph::{SubgraphDefinition, SubgraphExpander, SubgraphLibrary};
pub use validator::{PlanValidator, ValidationResult};
