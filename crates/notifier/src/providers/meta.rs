//! WhatsApp Cloud API (Meta Graph).

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;

use courier_common::config::MetaConfig;
use courier_common::types::Channel;

use crate::error::{ProviderError, reject};
use crate::provider::{OutboundMessage, Provider, SendOptions, SendOutcome, StatusReport};

const NAME: &str = "meta-api";
const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com";

pub struct MetaWhatsappProvider {
    client: Client,
    config: MetaConfig,
    graph_url: String,
}

impl MetaWhatsappProvider {
    pub fn new(client: Client, config: MetaConfig) -> Self {
        Self {
            client,
            config,
            graph_url: DEFAULT_GRAPH_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, graph_url: impl Into<String>) -> Self {
        self.graph_url = graph_url.into().trim_end_matches('/').to_string();
        self
    }

    fn base_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.graph_url, self.config.api_version, self.config.phone_number_id
        )
    }

    fn ensure_configured(&self) -> Result<(), ProviderError> {
        if self.config.access_token.is_empty() || self.config.phone_number_id.is_empty() {
            return Err(ProviderError::NotConfigured(
                NAME,
                "META_WHATSAPP_ACCESS_TOKEN and META_WHATSAPP_PHONE_NUMBER_ID are required"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Message body for `POST /{phone_number_id}/messages`.
    ///
    /// A template name switches to a template message; its parameters become
    /// body components in key order.
    pub(crate) fn payload(&self, to: &str, body: &str, options: &SendOptions) -> serde_json::Value {
        let to = to.trim_start_matches('+');

        let Some(template_name) = options.template_name.as_deref() else {
            return json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "text",
                "text": { "preview_url": false, "body": body },
            });
        };

        let mut components = Vec::new();
        if !options.template_params.is_empty() {
            let parameters: Vec<serde_json::Value> = options
                .template_params
                .values()
                .map(|value| {
                    let text = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    json!({ "type": "text", "text": text })
                })
                .collect();
            components.push(json!({ "type": "body", "parameters": parameters }));
        }

        json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "template",
            "template": {
                "name": template_name,
                "language": { "code": self.config.template_language },
                "components": components,
            },
        })
    }
}

#[async_trait]
impl Provider for MetaWhatsappProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    async fn send(
        &self,
        to: &str,
        message: &OutboundMessage,
        options: &SendOptions,
    ) -> Result<SendOutcome, ProviderError> {
        self.ensure_configured()?;
        let OutboundMessage::Text { body } = message else {
            return Err(ProviderError::Unsupported(
                NAME,
                "expected a text message".to_string(),
            ));
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url()))
            .bearer_auth(&self.config.access_token)
            .json(&self.payload(to, body, options))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(reject(NAME, response).await);
        }

        let raw: serde_json::Value = response.json().await?;
        let message_id = raw["messages"][0]["id"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidResponse(NAME, "missing messages[0].id".to_string()))?
            .to_string();

        tracing::debug!(provider = NAME, message_id = %message_id, "WhatsApp message accepted");

        Ok(SendOutcome {
            success: true,
            provider: NAME.to_string(),
            message_id,
            timestamp: Utc::now(),
            status: "sent".to_string(),
            to: to.to_string(),
            raw_response: raw,
        })
    }

    async fn get_status(&self, message_id: &str) -> Result<StatusReport, ProviderError> {
        Ok(StatusReport::unknown(
            message_id,
            "WhatsApp Cloud API reports delivery through webhooks",
        ))
    }

    async fn check_health(&self) -> Result<bool, ProviderError> {
        self.ensure_configured()?;
        let response = self
            .client
            .get(self.base_url())
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}
