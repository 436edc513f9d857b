//! weft-server binary: wires configuration, storage, the execution
//! service, and the HTTP router, then serves until ctrl-c.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use weft_core::{ExecutionService, ExecutorRegistry, MemoryExecutionStore};
use weft_server::{handlers::AppState, router, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info")),
        )
        .init();

    let config = ServerConfig::from_env();

    let store: Arc<dyn weft_core::ExecutionStore> = match &config.database_url {
        Some(url) => {
            let pool = weft_db::connect(url)
                .await
                .context("connecting to DATABASE_URL")?;
            info!("using postgres execution store");
            Arc::new(weft_db::PgExecutionStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; executions persist in memory only");
            Arc::new(MemoryExecutionStore::new())
        }
    };

    let registry = Arc::new(ExecutorRegistry::new());
    info!(executors = registry.len(), "executor registry initialized");

    let service = Arc::new(ExecutionService::new(
        registry,
        store.clone(),
        config.engine.clone(),
    ));

    // Surface node types recent workflows use that nothing serves.
    match service.startup_check(50).await {
        Ok(missing) if !missing.is_empty() => {
            warn!(?missing, "recent workflows reference unregistered node types")
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "startup node-type check failed"),
    }

    let state = AppState {
        service: service.clone(),
        store,
    };

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("binding {}", config.http_addr))?;
    info!(addr = %config.http_addr, "weft server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(service))
        .await
        .context("serving http")?;

    Ok(())
}

async fn shutdown_signal(service: Arc<ExecutionService>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!(
        running = service.running_count(),
        "shutdown requested; cancelling live jobs"
    );
    service.cancel_all().await;
}
