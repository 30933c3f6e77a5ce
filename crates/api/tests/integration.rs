//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server.
//! State is built over the in-memory store with stub providers, so no
//! database or network access is needed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;

use courier_api::routes::create_router;
use courier_api::state::AppState;
use courier_common::config::AppConfig;
use courier_common::types::Channel;
use courier_engine::store::MemoryStore;
use courier_notifier::{
    OutboundMessage, Provider, ProviderError, ProviderRegistry, SendOptions, SendOutcome,
    StatusReport,
};

// ============================================================
// Helpers
// ============================================================

/// Always-successful provider for one channel.
struct StubProvider {
    name: String,
    channel: Channel,
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        to: &str,
        _message: &OutboundMessage,
        _options: &SendOptions,
    ) -> Result<SendOutcome, ProviderError> {
        Ok(SendOutcome {
            success: true,
            provider: self.name.clone(),
            message_id: format!("{}-msg", self.name),
            timestamp: Utc::now(),
            status: "sent".to_string(),
            to: to.to_string(),
            raw_response: json!({}),
        })
    }

    async fn get_status(&self, message_id: &str) -> Result<StatusReport, ProviderError> {
        Ok(StatusReport::unknown(message_id, "stub"))
    }

    async fn check_health(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

fn build_test_state() -> AppState {
    let defaults = Channel::ALL
        .iter()
        .map(|c| (*c, format!("stub-{c}")))
        .collect::<HashMap<_, _>>();
    let mut registry = ProviderRegistry::new(defaults, Duration::from_secs(1));
    for channel in Channel::ALL {
        registry.register(Arc::new(StubProvider {
            name: format!("stub-{channel}"),
            channel,
        }));
    }
    AppState::new(Arc::new(MemoryStore::new()), registry, AppConfig::default())
}

/// Send one request through the router and decode the JSON response.
async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn sms_body() -> Value {
    json!({
        "recipient": { "type": "phone", "value": "11 98765-4321" },
        "channel": "sms",
        "content": { "text": "Your code is 1234" }
    })
}

// ============================================================
// Health
// ============================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_router(build_test_state());
    let (status, json) = call(app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "courier-api");
    assert_eq!(json["providers"]["sms"]["active"], "stub-sms");
    assert_eq!(json["providers"]["whatsapp"]["providers"]["stub-whatsapp"], true);
}

// ============================================================
// Notifications
// ============================================================

#[tokio::test]
async fn test_send_and_fetch_notification() {
    let state = build_test_state();

    let (status, receipt) = call(
        create_router(state.clone()),
        "POST",
        "/api/notifications",
        Some(sms_body()),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(receipt["success"], true);
    assert_eq!(receipt["status"], "sent");
    assert_eq!(receipt["recipient"], "+5511987654321");
    assert_eq!(receipt["messageId"], "stub-sms-msg");

    let status_url = receipt["tracking"]["statusUrl"].as_str().unwrap().to_string();
    let id = receipt["notificationId"].as_str().unwrap().to_string();

    let (status, stored) = call(
        create_router(state.clone()),
        "GET",
        &format!("/api/notifications/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["channel"], "sms");
    assert_eq!(stored["provider"], "stub-sms");

    let (status, tracked) = call(create_router(state.clone()), "GET", &status_url, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tracked["statusHistory"].as_array().unwrap().len(), 3);
    assert!(tracked.get("providerStatus").is_none());

    let (status, refreshed) = call(
        create_router(state),
        "GET",
        &format!("{status_url}?refresh=true"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["providerStatus"]["status"], "unknown");
}

#[tokio::test]
async fn test_invalid_channel_returns_400() {
    let mut body = sms_body();
    body["channel"] = json!("fax");

    let (status, json) = call(
        create_router(build_test_state()),
        "POST",
        "/api/notifications",
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("fax"));
}

#[tokio::test]
async fn test_unresolvable_provider_is_config_error() {
    let mut body = sms_body();
    body["provider"] = json!("nope");

    let (status, json) = call(
        create_router(build_test_state()),
        "POST",
        "/api/notifications",
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error = json["error"].as_str().unwrap();
    assert!(error.starts_with("Provider nope not found"));
}

#[tokio::test]
async fn test_unknown_notification_returns_404() {
    let (status, _) = call(
        create_router(build_test_state()),
        "GET",
        &format!("/api/notifications/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_pagination_and_filters() {
    let state = build_test_state();
    for _ in 0..3 {
        call(
            create_router(state.clone()),
            "POST",
            "/api/notifications",
            Some(sms_body()),
        )
        .await;
    }

    let (status, page) = call(
        create_router(state.clone()),
        "GET",
        "/api/notifications?channel=sms&page=2&limit=2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"].as_array().unwrap().len(), 1);
    assert_eq!(page["pagination"]["total"], 3);
    assert_eq!(page["pagination"]["pages"], 2);

    let (status, empty) = call(
        create_router(state.clone()),
        "GET",
        "/api/notifications?status=failed",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(empty["pagination"]["total"], 0);

    let (status, _) = call(
        create_router(state.clone()),
        "GET",
        "/api/notifications?page=0",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = call(
        create_router(state.clone()),
        "GET",
        "/api/notifications?page=18446744073709551615",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    let (status, _) = call(
        create_router(state),
        "GET",
        "/api/templates?page=2&limit=18446744073709551615",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_accepts_start_and_end_date_filters() {
    let state = build_test_state();
    for _ in 0..2 {
        call(
            create_router(state.clone()),
            "POST",
            "/api/notifications",
            Some(sms_body()),
        )
        .await;
    }

    let (status, page) = call(
        create_router(state.clone()),
        "GET",
        "/api/notifications?startDate=2000-01-01T00:00:00Z&endDate=2999-01-01T00:00:00Z",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["pagination"]["total"], 2);

    let (status, page) = call(
        create_router(state.clone()),
        "GET",
        "/api/notifications?startDate=2999-01-01T00:00:00Z",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["pagination"]["total"], 0);

    let (status, page) = call(
        create_router(state),
        "GET",
        "/api/notifications?from=2000-01-01T00:00:00Z&to=2000-01-02T00:00:00Z",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_schedule_cancel_and_trigger() {
    let state = build_test_state();
    let at = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();

    let mut body = sms_body();
    body["options"] = json!({ "scheduledFor": at });
    let (status, first) = call(
        create_router(state.clone()),
        "POST",
        "/api/notifications",
        Some(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(first["status"], "scheduled");
    let first_id = first["notificationId"].as_str().unwrap().to_string();

    let (status, cancelled) = call(
        create_router(state.clone()),
        "DELETE",
        &format!("/api/notifications/{first_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, _) = call(
        create_router(state.clone()),
        "DELETE",
        &format!("/api/notifications/{first_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, second) = call(
        create_router(state.clone()),
        "POST",
        "/api/notifications",
        Some(body),
    )
    .await;
    let second_id = second["notificationId"].as_str().unwrap().to_string();
    let (status, triggered) = call(
        create_router(state),
        "POST",
        &format!("/api/notifications/{second_id}/trigger"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(triggered["status"], "sent");
}

#[tokio::test]
async fn test_external_status_update() {
    let state = build_test_state();
    let (_, receipt) = call(
        create_router(state.clone()),
        "POST",
        "/api/notifications",
        Some(sms_body()),
    )
    .await;
    let status_url = receipt["tracking"]["statusUrl"].as_str().unwrap().to_string();

    let (status, delivered) = call(
        create_router(state.clone()),
        "POST",
        &status_url,
        Some(json!({ "status": "delivered", "providerResponse": { "carrier": "vivo" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delivered["status"], "delivered");
    assert_eq!(delivered["providerResponse"]["rawResponse"]["carrier"], "vivo");

    let (status, _) = call(
        create_router(state),
        "POST",
        &status_url,
        Some(json!({ "status": "queued" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================
// Templates
// ============================================================

#[tokio::test]
async fn test_template_crud_and_render() {
    let state = build_test_state();
    let template = json!({
        "name": "welcome",
        "displayName": "Welcome",
        "category": "transactional",
        "versions": [{
            "channel": "email",
            "subject": "Hi {{name}}",
            "content": "Welcome aboard, {{ name }}!",
            "parameters": ["name"],
            "active": true
        }]
    });

    let (status, created) = call(
        create_router(state.clone()),
        "POST",
        "/api/templates",
        Some(template.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert!(!created["versions"][0]["versionId"].as_str().unwrap().is_empty());

    let (status, _) = call(
        create_router(state.clone()),
        "POST",
        "/api/templates",
        Some(template),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, rendered) = call(
        create_router(state.clone()),
        "POST",
        "/api/templates/welcome/render",
        Some(json!({ "channel": "email", "parameters": { "name": "Ana" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rendered["subject"], "Hi Ana");
    assert_eq!(rendered["text"], "Welcome aboard, Ana!");
    assert_eq!(rendered["html"], "Welcome aboard, Ana!");

    let (status, missing) = call(
        create_router(state.clone()),
        "POST",
        &format!("/api/templates/{id}/render"),
        Some(json!({ "channel": "email", "parameters": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(missing["error"], "Missing template parameters: name");

    let (status, updated) = call(
        create_router(state.clone()),
        "PUT",
        &format!("/api/templates/{id}"),
        Some(json!({ "displayName": "Welcome!" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["displayName"], "Welcome!");

    let (status, listed) = call(
        create_router(state.clone()),
        "GET",
        "/api/templates?channel=email&search=WELC",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["pagination"]["total"], 1);

    let (status, _) = call(
        create_router(state.clone()),
        "DELETE",
        &format!("/api/templates/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        create_router(state),
        "GET",
        "/api/templates/welcome",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================
// Preferences
// ============================================================

#[tokio::test]
async fn test_preferences_flow() {
    let state = build_test_state();

    let (status, defaults) = call(
        create_router(state.clone()),
        "GET",
        "/api/preferences/u1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(defaults["userId"], "u1");
    assert_eq!(defaults["preferences"]["timezone"], "America/Sao_Paulo");

    let (status, _) = call(
        create_router(state.clone()),
        "POST",
        "/api/preferences/u1/verify",
        Some(json!({ "channel": "email" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, opted) = call(
        create_router(state.clone()),
        "POST",
        "/api/preferences/u1/opt",
        Some(json!({ "channel": "email", "action": "opt-in", "value": "ana@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(opted["channels"]["email"]["verified"], false);

    let (status, verified) = call(
        create_router(state.clone()),
        "POST",
        "/api/preferences/u1/verify",
        Some(json!({ "channel": "email" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["channels"]["email"]["verified"], true);

    let (_, preferred) = call(
        create_router(state.clone()),
        "GET",
        "/api/preferences/u1/preferred-channel",
        None,
    )
    .await;
    assert_eq!(preferred["channel"], "email");

    let (status, marketing) = call(
        create_router(state.clone()),
        "GET",
        "/api/preferences/u1/can-receive?category=marketing",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marketing["canReceive"], false);

    let (status, _) = call(
        create_router(state),
        "PUT",
        "/api/preferences/u1",
        Some(json!({ "preferences": { "allowedTimeStart": "25:00" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
