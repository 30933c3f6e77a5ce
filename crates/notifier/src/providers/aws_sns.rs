//! Amazon SNS direct-to-phone SMS.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sns::Client;
use aws_sdk_sns::config::Credentials;
use aws_sdk_sns::error::DisplayErrorContext;
use aws_sdk_sns::types::MessageAttributeValue;
use chrono::Utc;
use serde_json::json;

use courier_common::config::AwsSnsConfig;
use courier_common::types::{Channel, Priority};

use crate::error::ProviderError;
use crate::provider::{OutboundMessage, Provider, SendOptions, SendOutcome, StatusReport};

const NAME: &str = "aws-sns";

pub struct AwsSnsProvider {
    client: Client,
    config: AwsSnsConfig,
}

impl AwsSnsProvider {
    /// Build the SNS client from static credentials. No network I/O happens here.
    pub fn new(config: AwsSnsConfig) -> Self {
        let sdk_config = aws_sdk_sns::Config::builder()
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
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY are required".to_string(),
            ));
        }
        Ok(())
    }

    /// `(attribute, value)` pairs attached to every publish.
    pub(crate) fn message_attributes(&self, priority: Priority) -> [(&'static str, String); 2] {
        [
            ("AWS.SNS.SMS.SenderID", self.config.sender_id.clone()),
            ("AWS.SNS.SMS.SMSType", sms_type(priority).to_string()),
        ]
    }
}

/// High priority goes out as transactional, everything else as promotional.
fn sms_type(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "Transactional",
        Priority::Normal | Priority::Low => "Promotional",
    }
}

fn sdk_error(err: impl std::error::Error) -> ProviderError {
    ProviderError::Sdk(NAME, DisplayErrorContext(err).to_string())
}

#[async_trait]
impl Provider for AwsSnsProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn channel(&self) -> Channel {
        Channel::Sms
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

        let mut request = self.client.publish().phone_number(to).message(body);
        for (key, value) in self.message_attributes(options.priority) {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(sdk_error)?;
            request = request.message_attributes(key, attribute);
        }
        let output = request.send().await.map_err(sdk_error)?;

        let now = Utc::now();
        let message_id = output
            .message_id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("aws-sns-{}", now.timestamp_millis()));

        tracing::debug!(provider = NAME, message_id = %message_id, "SMS published");

        Ok(SendOutcome {
            success: true,
            provider: NAME.to_string(),
            message_id: message_id.clone(),
            timestamp: now,
            // SNS only confirms the publish; carrier delivery is not reported back here.
            status: "sent".to_string(),
            to: to.to_string(),
            raw_response: json!({
                "messageId": message_id,
                "sequenceNumber": output.sequence_number(),
            }),
        })
    }

    async fn get_status(&self, message_id: &str) -> Result<StatusReport, ProviderError> {
        Ok(StatusReport::unknown(
            message_id,
            "AWS SNS does not provide direct status checking",
        ))
    }

    async fn check_health(&self) -> Result<bool, ProviderError> {
        self.ensure_configured()?;
        self.client.list_topics().send().await.map_err(sdk_error)?;
        Ok(true)
    }
}
