//! Uniform delivery contract implemented by every vendor adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_common::types::{Attachment, Channel, Parameters, Priority};

use crate::error::ProviderError;

/// Channel-specific message shape handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// SMS and WhatsApp body
    Text { body: String },
    Email(EmailMessage),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub subject: String,
    pub text: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

/// Per-send options. WhatsApp providers honour the template fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendOptions {
    pub priority: Priority,
    pub template_name: Option<String>,
    pub template_params: Parameters,
}

/// Normalized result of a successful send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub success: bool,
    pub provider: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    /// Vendor status string at send time (e.g. `queued`, `sent`)
    pub status: String,
    pub to: String,
    pub raw_response: serde_json::Value,
}

/// Provider-side view of a previously sent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub message_id: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl StatusReport {
    /// Report for vendors that only publish status through webhooks.
    pub fn unknown(message_id: &str, note: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            status: "unknown".to_string(),
            updated_at: Utc::now(),
            details: serde_json::json!({ "note": note }),
        }
    }
}

/// Capability contract for a vendor on one channel.
///
/// Implementations are registered once at startup in a
/// [`ProviderRegistry`](crate::registry::ProviderRegistry) and shared across requests.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry key, e.g. `twilio`, `meta-api`.
    fn name(&self) -> &str;

    /// Channel this provider delivers on.
    fn channel(&self) -> Channel;

    /// Deliver `message` to `to`.
    async fn send(
        &self,
        to: &str,
        message: &OutboundMessage,
        options: &SendOptions,
    ) -> Result<SendOutcome, ProviderError>;

    async fn get_status(&self, message_id: &str) -> Result<StatusReport, ProviderError>;

    /// Lightweight reachability check.
    async fn check_health(&self) -> Result<bool, ProviderError>;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .field("channel", &self.channel())
            .finish()
    }
}
