//! # weft-workflow
//!
//! Workflow definition and execution-plan model for weft.
//! This crate provides the data structures shared between the planner,
//! the execution engine, and the persistence layer: the user-facing
//! workflow definition, the lowered execution plan, the record type that
//! flows along edges, and the status/error taxonomy.

pub mod definition;
pub mod error;
pub mod plan;
pub mod record;
pub mod status;

pub use definition::*;
pub use error::*;
pub use plan::*;
pub use record::*;
pub use status::*;
