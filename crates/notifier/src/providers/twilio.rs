//! Twilio Programmable Messaging, used for both SMS and WhatsApp.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use courier_common::config::TwilioConfig;
use courier_common::types::Channel;

use crate::error::{ProviderError, reject};
use crate::provider::{OutboundMessage, Provider, SendOptions, SendOutcome, StatusReport};

const DEFAULT_BASE_URL: &str = "https://api.twilio.com/2010-04-01";
const WHATSAPP_PREFIX: &str = "whatsapp:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Sms,
    Whatsapp,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
    status: String,
}

/// Twilio adapter. One instance per channel: `twilio` (SMS) or `twilio-whatsapp`.
pub struct TwilioProvider {
    client: Client,
    config: TwilioConfig,
    base_url: String,
    mode: Mode,
}

impl TwilioProvider {
    pub fn sms(client: Client, config: TwilioConfig) -> Self {
        Self::with_mode(client, config, Mode::Sms)
    }

    pub fn whatsapp(client: Client, config: TwilioConfig) -> Self {
        Self::with_mode(client, config, Mode::Whatsapp)
    }

    fn with_mode(client: Client, config: TwilioConfig, mode: Mode) -> Self {
        Self {
            client,
            config,
            base_url: DEFAULT_BASE_URL.to_string(),
            mode,
        }
    }

    /// Point the adapter at a different API root (used by tests and sandboxes).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn provider_name(&self) -> &'static str {
        match self.mode {
            Mode::Sms => "twilio",
            Mode::Whatsapp => "twilio-whatsapp",
        }
    }

    fn address(&self, number: &str) -> String {
        match self.mode {
            Mode::Sms => number.to_string(),
            Mode::Whatsapp if number.starts_with(WHATSAPP_PREFIX) => number.to_string(),
            Mode::Whatsapp => format!("{WHATSAPP_PREFIX}{number}"),
        }
    }

    fn sender(&self) -> &str {
        match self.mode {
            Mode::Sms => &self.config.phone_number,
            Mode::Whatsapp => &self.config.whatsapp_number,
        }
    }

    fn ensure_configured(&self) -> Result<(), ProviderError> {
        if self.config.account_sid.is_empty() || self.config.auth_token.is_empty() {
            return Err(ProviderError::NotConfigured(
                self.provider_name(),
                "TWILIO_ACCOUNT_SID and TWILIO_AUTH_TOKEN are required".to_string(),
            ));
        }
        Ok(())
    }

    /// Form fields for the Messages resource.
    pub(crate) fn form_fields(&self, to: &str, body: &str) -> Vec<(&'static str, String)> {
        vec![
            ("To", self.address(to)),
            ("From", self.address(self.sender())),
            ("Body", body.to_string()),
        ]
    }
}

#[async_trait]
impl Provider for TwilioProvider {
    fn name(&self) -> &str {
        self.provider_name()
    }

    fn channel(&self) -> Channel {
        match self.mode {
            Mode::Sms => Channel::Sms,
            Mode::Whatsapp => Channel::Whatsapp,
        }
    }

    async fn send(
        &self,
        to: &str,
        message: &OutboundMessage,
        _options: &SendOptions,
    ) -> Result<SendOutcome, ProviderError> {
        self.ensure_configured()?;
        let OutboundMessage::Text { body } = message else {
            return Err(ProviderError::Unsupported(
                self.provider_name(),
                "expected a text message".to_string(),
            ));
        };

        let url = format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url, self.config.account_sid
        );
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&self.form_fields(to, body))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(reject(self.provider_name(), response).await);
        }

        let raw: serde_json::Value = response.json().await?;
        let resource: MessageResource = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::InvalidResponse(self.provider_name(), e.to_string()))?;

        tracing::debug!(provider = self.provider_name(), sid = %resource.sid, "Message accepted");

        Ok(SendOutcome {
            success: true,
            provider: self.provider_name().to_string(),
            message_id: resource.sid,
            timestamp: Utc::now(),
            status: resource.status,
            to: to.to_string(),
            raw_response: raw,
        })
    }

    async fn get_status(&self, message_id: &str) -> Result<StatusReport, ProviderError> {
        self.ensure_configured()?;
        let url = format!(
            "{}/Accounts/{}/Messages/{}.json",
            self.base_url, self.config.account_sid, message_id
        );
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(reject(self.provider_name(), response).await);
        }

        let raw: serde_json::Value = response.json().await?;
        let resource: MessageResource = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::InvalidResponse(self.provider_name(), e.to_string()))?;

        Ok(StatusReport {
            message_id: resource.sid,
            status: resource.status,
            updated_at: Utc::now(),
            details: raw,
        })
    }

    async fn check_health(&self) -> Result<bool, ProviderError> {
        self.ensure_configured()?;
        let url = format!("{}/Accounts/{}.json", self.base_url, self.config.account_sid);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}
