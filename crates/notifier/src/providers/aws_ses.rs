//! Amazon SES v2 email.
//!
//! Plain messages go through the `Simple` content type. Messages with
//! attachments are assembled as multipart MIME and sent as `Raw` content.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sesv2::Client;
use aws_sdk_sesv2::config::Credentials;
use aws_sdk_sesv2::error::DisplayErrorContext;
use aws_sdk_sesv2::primitives::Blob;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message, RawMessage};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde_json::json;

use courier_common::config::AwsSesConfig;
use courier_common::types::Channel;

use crate::error::ProviderError;
use crate::provider::{
    EmailMessage, OutboundMessage, Provider, SendOptions, SendOutcome, StatusReport,
};

const NAME: &str = "aws-ses";
const CHARSET: &str = "UTF-8";

pub struct AwsSesProvider {
    client: Client,
    config: AwsSesConfig,
}

impl AwsSesProvider {
    /// Build the SES client from static credentials. No network I/O happens here.
    pub fn new(config: AwsSesConfig) -> Self {
        let sdk_config = aws_sdk_sesv2::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(Credentials::new(
                config.access_key_id.clone(),
                config.secret_access_key.clone(),
                None,
                None,
                "courier-config",
            ))
            .build();
        Self {
            client: Client::from_conf(sdk_config),
            config,
        }
    }

    fn ensure_configured(&self) -> Result<(), ProviderError> {
        if self.config.access_key_id.is_empty() || self.config.secret_access_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                NAME,
                "AWS_SES_ACCESS_KEY_ID and AWS_SES_SECRET_ACCESS_KEY are required".to_string(),
            ));
        }
        if self.config.from_email.is_empty() {
            return Err(ProviderError::NotConfigured(
                NAME,
                "AWS_SES_FROM_EMAIL is required".to_string(),
            ));
        }
        Ok(())
    }

    fn content(&self, to: &str, email: &EmailMessage) -> Result<EmailContent, ProviderError> {
        if !email.attachments.is_empty() {
            let boundary = format!("----=courier-{}", Utc::now().timestamp_micros());
            let raw = RawMessage::builder()
                .data(Blob::new(raw_message(
                    &self.config.from_email,
                    to,
                    email,
                    &boundary,
                )))
                .build()
                .map_err(sdk_error)?;
            return Ok(EmailContent::builder().raw(raw).build());
        }

        let body = Body::builder()
            .text(utf8(&email.text)?)
            .html(utf8(&email.html)?)
            .build();
        let message = Message::builder()
            .subject(utf8(&email.subject)?)
            .body(body)
            .build();
        Ok(EmailContent::builder().simple(message).build())
    }
}

fn utf8(data: &str) -> Result<Content, ProviderError> {
    Content::builder()
        .data(data)
        .charset(CHARSET)
        .build()
        .map_err(sdk_error)
}

fn sdk_error(err: impl std::error::Error) -> ProviderError {
    ProviderError::Sdk(NAME, DisplayErrorContext(err).to_string())
}

/// Multipart/mixed MIME document with text and HTML parts followed by
/// base64-encoded attachments.
pub(crate) fn raw_message(from: &str, to: &str, email: &EmailMessage, boundary: &str) -> String {
    let mut raw = format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {}\r\nMIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n",
        email.subject
    );

    raw.push_str(&format!(
        "--{boundary}\r\nContent-Type: text/plain; charset={CHARSET}\r\n\r\n{}\r\n\r\n",
        email.text
    ));
    raw.push_str(&format!(
        "--{boundary}\r\nContent-Type: text/html; charset={CHARSET}\r\n\r\n{}\r\n\r\n",
        email.html
    ));

    for attachment in &email.attachments {
        let content_type = attachment
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        raw.push_str(&format!(
            "--{boundary}\r\n\
             Content-Type: {content_type}; name=\"{name}\"\r\n\
             Content-Transfer-Encoding: base64\r\n\
             Content-Disposition: attachment; filename=\"{name}\"\r\n\r\n\
             {data}\r\n\r\n",
            name = attachment.filename,
            data = BASE64.encode(attachment.content.as_bytes()),
        ));
    }

    raw.push_str(&format!("--{boundary}--\r\n"));
    raw
}

#[async_trait]
impl Provider for AwsSesProvider {
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

        let output = self
            .client
            .send_email()
            .from_email_address(&self.config.from_email)
            .destination(Destination::builder().to_addresses(to).build())
            .content(self.content(to, email)?)
            .send()
            .await
            .map_err(sdk_error)?;

        let now = Utc::now();
        let message_id = output
            .message_id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("aws-ses-{}", now.timestamp_millis()));

        tracing::debug!(provider = NAME, message_id = %message_id, "Email accepted");

        Ok(SendOutcome {
            success: true,
            provider: NAME.to_string(),
            message_id: message_id.clone(),
            timestamp: now,
            status: "sent".to_string(),
            to: to.to_string(),
            raw_response: json!({ "messageId": message_id, "subject": email.subject }),
        })
    }

    async fn get_status(&self, message_id: &str) -> Result<StatusReport, ProviderError> {
        Ok(StatusReport::unknown(
            message_id,
            "AWS SES requires delivery notifications setup for detailed status tracking",
        ))
    }

    /// Healthy when the account reports a non-zero 24h sending quota.
    async fn check_health(&self) -> Result<bool, ProviderError> {
        self.ensure_configured()?;
        let account = self.client.get_account().send().await.map_err(sdk_error)?;
        Ok(account
            .send_quota()
            .is_some_and(|quota| quota.max24_hour_send() > 0.0))
    }
}
