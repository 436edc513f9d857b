//! # weft-db
//!
//! PostgreSQL persistence layer for weft: the two core tables
//! (`workflow_executions` and `node_executions`), the repositories over
//! them, and the [`PgExecutionStore`] implementation of the engine's
//! storage trait. Schema migrations are not managed here; the columns
//! the repositories read and write are assumed to exist.

pub mod datasource;
pub mod entities;
pub mod error;
pub mod repositories;
pub mod store;

pub use datasource::{DsnResolver, PgDatasourceFactory};
pub use entities::{NodeExecutionEntity, WorkflowExecutionEntity};
pub use error::{DbError, DbResult};
pub use repositories::{ExecutionRepository, NodeExecutionRepository};
pub use store::PgExecutionStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect a pool with sane defaults for the engine's short transactions.
pub async fn connect(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}
