//! Per-user channel consent and delivery preference routes.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use courier_common::error::AppError;
use courier_common::types::{Category, Channel, Preference};
use courier_engine::preferences::{OptAction, PreferencesPatch};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/preferences/{user_id}",
            get(get_preferences).put(update_preferences),
        )
        .route("/api/preferences/{user_id}/opt", post(opt_in_out))
        .route("/api/preferences/{user_id}/verify", post(verify_channel))
        .route(
            "/api/preferences/{user_id}/preferred-channel",
            get(preferred_channel),
        )
        .route("/api/preferences/{user_id}/can-receive", get(can_receive))
}

#[derive(Debug, Deserialize)]
struct OptBody {
    channel: Channel,
    action: OptAction,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyBody {
    channel: Channel,
}

#[derive(Debug, Default, Deserialize)]
struct CanReceiveQuery {
    #[serde(default)]
    category: Category,
}

/// GET /api/preferences/:user_id: Created with defaults on first access.
async fn get_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Preference>, AppError> {
    Ok(Json(state.preferences.get_or_create(&user_id).await?))
}

/// PUT /api/preferences/:user_id: Shallow merge of channels and delivery settings.
async fn update_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(patch): Json<PreferencesPatch>,
) -> Result<Json<Preference>, AppError> {
    Ok(Json(
        state.preferences.update_preferences(&user_id, patch).await?,
    ))
}

/// POST /api/preferences/:user_id/opt
async fn opt_in_out(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<OptBody>,
) -> Result<Json<Preference>, AppError> {
    let preference = state
        .preferences
        .opt_in_out(&user_id, body.channel, body.action, body.value)
        .await?;
    Ok(Json(preference))
}

/// POST /api/preferences/:user_id/verify
async fn verify_channel(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<VerifyBody>,
) -> Result<Json<Preference>, AppError> {
    Ok(Json(
        state.preferences.verify_channel(&user_id, body.channel).await?,
    ))
}

async fn preferred_channel(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let channel = state.preferences.preferred_channel(&user_id).await?;
    Ok(Json(json!({ "userId": user_id, "channel": channel })))
}

async fn can_receive(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<CanReceiveQuery>,
) -> Json<serde_json::Value> {
    let allowed = state.preferences.can_receive(&user_id, query.category).await;
    Json(json!({
        "userId": user_id,
        "category": query.category,
        "canReceive": allowed,
    }))
}
