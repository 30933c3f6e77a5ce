//! Notification send, query and lifecycle routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Channel, Notification, NotificationStatus, Page, PageRequest};
use courier_engine::dispatch::{SendReceipt, SendRequest, StatusUpdate};
use courier_engine::store::NotificationFilter;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/notifications",
            post(send_notification).get(list_notifications),
        )
        .route(
            "/api/notifications/{id}",
            get(get_notification).delete(cancel_notification),
        )
        .route(
            "/api/notifications/{id}/status",
            get(get_status).post(update_status),
        )
        .route("/api/notifications/{id}/trigger", post(trigger_notification))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    status: Option<NotificationStatus>,
    channel: Option<Channel>,
    recipient: Option<String>,
    #[serde(alias = "startDate")]
    from: Option<DateTime<Utc>>,
    #[serde(alias = "endDate")]
    to: Option<DateTime<Utc>>,
    page: Option<u64>,
    limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusQuery {
    /// Also ask the provider for its current view of the message
    #[serde(default)]
    refresh: bool,
}

/// POST /api/notifications: Send (or schedule) a notification.
async fn send_notification(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> Result<(StatusCode, Json<SendReceipt>), AppError> {
    let receipt = state.engine.send(request).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// GET /api/notifications: Filtered, paginated list, newest first.
async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Notification>>, AppError> {
    let filter = NotificationFilter {
        status: query.status,
        channel: query.channel,
        recipient: query.recipient,
        from: query.from,
        to: query.to,
    };
    let page = PageRequest {
        page: query.page,
        limit: query.limit,
    };
    Ok(Json(state.engine.list(&filter, page).await?))
}

/// GET /api/notifications/:id
async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(state.engine.get_by_id(id).await?))
}

/// DELETE /api/notifications/:id: Cancel a scheduled notification.
async fn cancel_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let notification = state.engine.cancel(id).await?;
    Ok(Json(json!({
        "success": true,
        "notificationId": notification.id,
        "status": notification.status(),
    })))
}

/// GET /api/notifications/:id/status: Stored status and history.
async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let notification = state.engine.get_by_id(id).await?;
    let mut body = json!({
        "notificationId": notification.id,
        "channel": notification.channel,
        "provider": notification.provider,
        "status": notification.status(),
        "statusHistory": notification.status_history(),
        "providerResponse": notification.provider_response,
    });
    if query.refresh {
        body["providerStatus"] = json!(state.engine.provider_status(id).await?);
    }
    Ok(Json(body))
}

/// POST /api/notifications/:id/status: External delivery/read receipts.
async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(state.engine.update_status(id, update).await?))
}

/// POST /api/notifications/:id/trigger: Dispatch a scheduled notification now.
async fn trigger_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SendReceipt>, AppError> {
    Ok(Json(state.engine.trigger_scheduled(id).await?))
}
