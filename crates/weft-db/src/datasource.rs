//! Postgres datasource factory for the connection-pool cache.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use weft_core::{DatasourceFactory, EngineError, EngineResult};

/// Resolves a connection id to its DSN. Connection CRUD lives outside the
/// core; this indirection is the seam it plugs into.
pub type DsnResolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Builds pooled Postgres handles for the datasource cache.
pub struct PgDatasourceFactory {
    resolver: DsnResolver,
    max_connections: u32,
}

impl PgDatasourceFactory {
    pub fn new(resolver: DsnResolver) -> Self {
        Self {
            resolver,
            max_connections: 5,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}

#[async_trait]
impl DatasourceFactory for PgDatasourceFactory {
    type Handle = PgPool;

    async fn build(&self, connection_id: &str) -> EngineResult<PgPool> {
        let dsn = (self.resolver)(connection_id).ok_or_else(|| {
            EngineError::InvalidArgument(format!("unknown connection: {connection_id}"))
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&dsn)
            .await
            .map_err(|e| EngineError::Persistence(format!("pool build failed: {e}")))?;

        info!(connection_id, "datasource pool created");
        Ok(pool)
    }

    async fn close(&self, handle: PgPool) {
        handle.close().await;
    }
}
