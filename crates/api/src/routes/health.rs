//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health: Service info plus a health check of every registered provider.
///
/// Reports `degraded` when the default provider of any channel fails its health check.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers = state.registry.check_health().await;
    let degraded = providers
        .values()
        .any(|c| !c.providers.get(&c.active).copied().unwrap_or(false));

    Json(json!({
        "status": if degraded { "degraded" } else { "ok" },
        "service": "courier-api",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": providers,
    }))
}
