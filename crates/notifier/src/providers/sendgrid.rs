//! SendGrid v3 mail API.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;

use courier_common::config::SendGridConfig;
use courier_common::types::Channel;

use crate::error::{ProviderError, reject};
use crate::provider::{
    EmailMessage, OutboundMessage, Provider, SendOptions, SendOutcome, StatusReport,
};

const NAME: &str = "sendgrid";
const DEFAULT_BASE_URL: &str = "https://api.sendgrid.com/v3";

pub struct SendGridProvider {
    client: Client,
    config: SendGridConfig,
    base_url: String,
}

impl SendGridProvider {
    pub fn new(client: Client, config: SendGridConfig) -> Self {
        Self {
            client,
            config,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn ensure_configured(&self) -> Result<(), ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                NAME,
                "SENDGRID_API_KEY is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Request body for `POST /mail/send`. Attachment contents are base64-encoded.
    pub(crate) fn payload(&self, to: &str, email: &EmailMessage) -> serde_json::Value {
        let mut payload = json!({
            "personalizations": [{
                "to": [{ "email": to }],
                "subject": email.subject,
            }],
            "from": {
                "email": self.config.from_email,
                "name": self.config.from_name,
            },
            "content": [
                { "type": "text/plain", "value": email.text },
                { "type": "text/html", "value": email.html },
            ],
        });

        if !email.attachments.is_empty() {
            let attachments: Vec<serde_json::Value> = email
                .attachments
                .iter()
                .map(|a| {
                    json!({
                        "content": BASE64.encode(a.content.as_bytes()),
                        "filename": a.filename,
                        "type": a.content_type.as_deref().unwrap_or("application/octet-stream"),
                        "disposition": "attachment",
                    })
                })
                .collect();
            payload["attachments"] = serde_json::Value::Array(attachments);
        }

        payload
    }
}

#[async_trait]
impl Provider for SendGridProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        to: &str,
        message: &OutboundMessage,
        _options: &SendOptions,
    ) -> Result<SendOutcome, ProviderError> {
        self.ensure_configured()?;
        let OutboundMessage::Email(email) = message else {
            return Err(ProviderError::Unsupported(
                NAME,
                "expected an email message".to_string(),
            ));
        };

        let response = self
            .client
            .post(format!("{}/mail/send", self.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&self.payload(to, email))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(reject(NAME, response).await);
        }

        let now = Utc::now();
        let status_code = response.status().as_u16();
        // The mail endpoint returns an empty body; the id only travels in a header.
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| format!("sendgrid-{}", now.timestamp_millis()));

        tracing::debug!(provider = NAME, message_id = %message_id, "Email accepted");

        Ok(SendOutcome {
            success: true,
            provider: NAME.to_string(),
            message_id,
            timestamp: now,
            status: "sent".to_string(),
            to: to.to_string(),
            raw_response: json!({ "statusCode": status_code, "subject": email.subject }),
        })
    }

    async fn get_status(&self, message_id: &str) -> Result<StatusReport, ProviderError> {
        Ok(StatusReport::unknown(
            message_id,
            "SendGrid reports delivery through event webhooks",
        ))
    }

    async fn check_health(&self) -> Result<bool, ProviderError> {
        self.ensure_configured()?;
        let response = self
            .client
            .get(format!("{}/scopes", self.base_url))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}
