//! Database entities.

pub mod execution;
pub mod node_execution;

pub use execution::*;
pub use node_execution::*;
