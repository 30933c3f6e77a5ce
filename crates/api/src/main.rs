//! Courier API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use courier_common::config::AppConfig;
use courier_common::db::{create_pool, run_migrations};
use courier_common::types::Channel;
use courier_engine::store::{MemoryStore, PgStore};
use courier_notifier::ProviderRegistry;

use courier_api::routes::create_router;
use courier_api::state::AppState;

const DEFAULT_LOG_FILTER: &str =
    "courier_api=debug,courier_engine=debug,courier_notifier=info,tower_http=debug";

/// Attachments arrive base64-encoded inside the JSON body.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting Courier API server...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let addr: SocketAddr = config.bind_addr.parse()?;

    // Register providers
    let registry = ProviderRegistry::from_config(&config)?;
    for channel in Channel::ALL {
        tracing::info!(
            %channel,
            default = registry.default_name(channel),
            providers = ?registry.list_providers(channel),
            "Providers registered"
        );
    }

    // Build application state over the configured store
    let state = match config.database_url.clone() {
        Some(url) => {
            let pool = create_pool(&url, config.db_max_connections).await?;
            run_migrations(&pool).await?;
            AppState::new(Arc::new(PgStore::new(pool)), registry, config)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, notifications are kept in memory only");
            AppState::new(Arc::new(MemoryStore::new()), registry, config)
        }
    };

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
