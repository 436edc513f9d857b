//! Server configuration from the environment.

use weft_core::EngineConfig;

/// Process configuration. Engine tunables come from [`EngineConfig`];
/// these are the server-only knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address, `WEFT_HTTP_ADDR`.
    pub http_addr: String,
    /// Postgres DSN, `DATABASE_URL`. The in-memory store serves when unset.
    pub database_url: Option<String>,
    /// Engine tunables (buffer cap, worker pool, chunk size, backoff).
    pub engine: EngineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            http_addr: std::env::var("WEFT_HTTP_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            engine: EngineConfig::from_env(),
        }
    }
}
