//! Database repositories.

pub mod execution;
pub mod node_execution;

pub use execution::ExecutionRepository;
pub use node_execution::NodeExecutionRepository;
