mod handlers;
mod routes;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crucible_common::{Config, JobStore, LanguageRegistry};

pub struct AppState {
    pub store: JobStore,
    pub registry: LanguageRegistry,
    pub config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Crucible API booting...");

    let config = Config::from_env();

    let store = JobStore::connect(&config.database_url).await?;
    store.migrate().await?;
    info!("Connected to PostgreSQL");

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        store,
        registry: LanguageRegistry::builtin(),
        config,
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("HTTP server listening on {}", bind_addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await?;
    Ok(())
}
