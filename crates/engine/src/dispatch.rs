//! Dispatch engine: validates send requests, persists notifications and drives
//! them through the delivery state machine.
//!
//! ```text
//! queued ──► processing ──► sent ──► delivered ──► read
//!    ▲            │                      (external updates)
//!    │            ▼
//!    │         failed ──► next fallback channel (new notification, queued)
//!    │
//! scheduled ──► (trigger) ──► processing
//!    └──────► cancelled
//! ```
//!
//! A failed attempt never retries its own channel. Each fallback is a new
//! notification linked to the failed one through metadata, and the chain is
//! walked in a loop until a send succeeds or the list is exhausted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_common::config::AppConfig;
use courier_common::error::AppError;
use courier_common::formatter::{format_email, format_phone_number};
use courier_common::types::{
    Category, Channel, FALLBACK_NOTIFICATION_ID, MessageContent, Metadata, Notification,
    NotificationContent, NotificationOptions, NotificationStatus, Page, PageRequest, Pagination,
    Priority, ProviderResponse, Recipient, RecipientType, TemplateRef,
};
use courier_notifier::{
    EmailMessage, OutboundMessage, ProviderError, ProviderRegistry, SendOptions, SendOutcome,
    StatusReport,
};

use crate::preferences::PreferenceService;
use crate::store::{NotificationFilter, NotificationStore};
use crate::templates::TemplateService;

/// Engine settings derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub default_country_code: String,
    /// Upper bound on each provider call
    pub provider_timeout: Duration,
    pub default_max_retries: u32,
}

impl DispatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_country_code: config.default_country_code.clone(),
            provider_timeout: config.provider_timeout(),
            default_max_retries: config.default_max_retries,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// A request to send one notification.
///
/// `channel` and `fallbackChannels` are plain strings so that an unknown channel
/// surfaces as a validation error rather than a decode failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub recipient: Recipient,
    pub channel: String,
    #[serde(default)]
    pub provider: Option<String>,
    pub content: NotificationContent,
    #[serde(default)]
    pub options: RequestOptions,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    pub scheduled_for: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fallback_channels: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    pub max_retries: Option<u32>,
    /// Gate delivery on this user's preferences.
    pub user_id: Option<String>,
    pub category: Option<Category>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tracking {
    pub status_url: String,
}

/// Result of `send` / `trigger_scheduled`. After a fallback it describes the
/// notification that was finally delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub success: bool,
    pub notification_id: Uuid,
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub status: NotificationStatus,
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub tracking: Tracking,
}

/// External status update (delivery receipts, read receipts, late failures).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: NotificationStatus,
    pub details: Option<String>,
    pub provider_response: Option<serde_json::Value>,
}

enum Attempt {
    Sent(SendOutcome),
    /// The error the caller sees if no fallback channel remains.
    Failed(AppError),
}

pub struct DispatchEngine {
    store: Arc<dyn NotificationStore>,
    registry: Arc<ProviderRegistry>,
    templates: TemplateService,
    preferences: PreferenceService,
    settings: DispatchSettings,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        registry: Arc<ProviderRegistry>,
        templates: TemplateService,
        preferences: PreferenceService,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            registry,
            templates,
            preferences,
            settings,
        }
    }

    /// Validate, persist and (unless scheduled) deliver a notification.
    pub async fn send(&self, request: SendRequest) -> Result<SendReceipt, AppError> {
        let channel: Channel = request.channel.parse()?;
        let fallback_channels = request
            .options
            .fallback_channels
            .iter()
            .map(|c| c.parse::<Channel>())
            .collect::<Result<Vec<_>, _>>()?;

        let recipient = self.normalize_recipient(request.recipient)?;

        let (content, template) = match request.content {
            NotificationContent::Template(template) => {
                let rendered = self
                    .templates
                    .render(&template.template_id, channel, &template.parameters)
                    .await?;
                (rendered, Some(template))
            }
            NotificationContent::Literal(content) => {
                validate_literal(&content, channel)?;
                (content, None)
            }
        };

        let options = NotificationOptions {
            scheduled_for: request.options.scheduled_for,
            expires_at: request.options.expires_at,
            fallback_channels,
            priority: request.options.priority,
            retry_count: 0,
            max_retries: request
                .options
                .max_retries
                .unwrap_or(self.settings.default_max_retries),
            user_id: request.options.user_id,
            category: request.options.category,
        };

        if options.scheduled_for.is_none() {
            if let Some(expires_at) = options.expires_at
                && expires_at <= Utc::now()
            {
                return Err(AppError::Validation(format!(
                    "Notification expired at {}",
                    expires_at.to_rfc3339()
                )));
            }
            self.check_consent(&options).await?;
        }

        let notification = Notification::new(
            recipient,
            channel,
            request.provider,
            content,
            template,
            options,
            request.metadata,
        );
        self.store.insert_notification(&notification).await?;

        if let Some(at) = notification.options.scheduled_for {
            tracing::info!(
                notification_id = %notification.id,
                %channel,
                scheduled_for = %at,
                "Notification scheduled"
            );
            return Ok(receipt(&notification, None));
        }

        tracing::info!(notification_id = %notification.id, %channel, "Notification queued");
        self.process_notification(notification).await
    }

    /// Deliver a queued notification, walking its fallback chain on failure.
    ///
    /// Returns the receipt of the first successful attempt. When every channel
    /// fails, the last attempt's error is returned with its kind intact, so an
    /// unknown provider stays a `Config` error.
    pub async fn process_notification(
        &self,
        notification: Notification,
    ) -> Result<SendReceipt, AppError> {
        let mut current = notification;

        loop {
            let error = match self.attempt(&mut current).await? {
                Attempt::Sent(outcome) => return Ok(receipt(&current, Some(&outcome))),
                Attempt::Failed(error) => error,
            };

            let mut remaining = current.options.fallback_channels.clone();
            if remaining.is_empty() {
                return Err(error);
            }

            let next_channel = remaining.remove(0);
            let fallback = current.fallback(next_channel, remaining);
            self.store.insert_notification(&fallback).await?;

            current.metadata.insert(
                FALLBACK_NOTIFICATION_ID.to_string(),
                serde_json::Value::String(fallback.id.to_string()),
            );
            current.updated_at = Utc::now();
            self.store.update_notification(&current).await?;

            tracing::info!(
                notification_id = %current.id,
                fallback_id = %fallback.id,
                from = %current.channel,
                to = %next_channel,
                "Falling back to next channel"
            );
            current = fallback;
        }
    }

    /// One delivery attempt on the notification's own channel.
    ///
    /// Store errors propagate; provider resolution and delivery failures are
    /// recorded on the notification and reported as `Attempt::Failed`.
    async fn attempt(&self, notification: &mut Notification) -> Result<Attempt, AppError> {
        let provider = match self
            .registry
            .get_provider(notification.channel, notification.provider.as_deref())
        {
            Ok(provider) => provider,
            Err(e) => {
                return self.record_failure(notification, e.to_string(), e).await;
            }
        };

        notification.provider = Some(provider.name().to_string());
        notification.transition(
            NotificationStatus::Processing,
            format!("Processing with provider: {}", provider.name()),
        );
        self.store.update_notification(notification).await?;

        let message = outbound_message(notification);
        let options = send_options(notification);
        let timeout = self.settings.provider_timeout;

        let result = match tokio::time::timeout(
            timeout,
            provider.send(&notification.recipient.value, &message, &options),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::timeout(provider.name(), timeout)),
        };

        match result {
            Ok(outcome) => {
                notification.transition(
                    NotificationStatus::Sent,
                    format!("Sent via {}", provider.name()),
                );
                notification.provider_response = Some(ProviderResponse {
                    message_id: outcome.message_id.clone(),
                    provider_timestamp: outcome.timestamp.to_rfc3339(),
                    raw_response: outcome.raw_response.clone(),
                });
                self.store.update_notification(notification).await?;

                tracing::info!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    provider = provider.name(),
                    message_id = %outcome.message_id,
                    "Notification sent"
                );
                Ok(Attempt::Sent(outcome))
            }
            Err(e) => {
                let details = e.to_string();
                let error = AppError::Provider(format!(
                    "{} notification {} failed: {details}",
                    notification.channel, notification.id
                ));
                self.record_failure(notification, details, error).await
            }
        }
    }

    async fn record_failure(
        &self,
        notification: &mut Notification,
        details: String,
        error: AppError,
    ) -> Result<Attempt, AppError> {
        notification.transition(NotificationStatus::Failed, format!("Failed: {details}"));
        self.store.update_notification(notification).await?;

        tracing::warn!(
            notification_id = %notification.id,
            channel = %notification.channel,
            provider = notification.provider.as_deref().unwrap_or("-"),
            error = %details,
            "Notification failed"
        );
        Ok(Attempt::Failed(error))
    }

    /// Dispatch a `scheduled` notification now.
    pub async fn trigger_scheduled(&self, id: Uuid) -> Result<SendReceipt, AppError> {
        let mut notification = self.get_by_id(id).await?;
        if notification.status() != NotificationStatus::Scheduled {
            return Err(AppError::Validation(format!(
                "Only scheduled notifications can be triggered (current status: {})",
                notification.status()
            )));
        }

        if let Some(expires_at) = notification.options.expires_at
            && expires_at <= Utc::now()
        {
            notification.transition(
                NotificationStatus::Failed,
                format!("Expired at {}", expires_at.to_rfc3339()),
            );
            self.store.update_notification(&notification).await?;
            tracing::warn!(notification_id = %id, "Scheduled notification expired");
            return Err(AppError::Validation(format!("Notification {id} has expired")));
        }

        self.check_consent(&notification.options).await?;

        tracing::info!(notification_id = %id, "Scheduled notification triggered");
        self.process_notification(notification).await
    }

    /// Cancel a scheduled notification. Any other status is rejected unchanged.
    pub async fn cancel(&self, id: Uuid) -> Result<Notification, AppError> {
        let mut notification = self.get_by_id(id).await?;
        if notification.status() != NotificationStatus::Scheduled {
            return Err(AppError::Validation(format!(
                "Cannot cancel notification in status {}",
                notification.status()
            )));
        }

        notification.transition(NotificationStatus::Cancelled, "Cancelled by request");
        self.store.update_notification(&notification).await?;

        tracing::info!(notification_id = %id, "Notification cancelled");
        Ok(notification)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Notification, AppError> {
        self.store
            .get_notification(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {id} not found")))
    }

    pub async fn list(
        &self,
        filter: &NotificationFilter,
        page: PageRequest,
    ) -> Result<Page<Notification>, AppError> {
        let (page, limit) = page.resolve()?;
        let (data, total) = self
            .store
            .list_notifications(filter, Pagination::skip(page, limit), limit)
            .await?;
        Ok(Page {
            data,
            pagination: Pagination::new(total, page, limit),
        })
    }

    /// Apply an externally reported status (`delivered`, `read` or `failed`)
    /// to a notification that was already sent.
    pub async fn update_status(
        &self,
        id: Uuid,
        update: StatusUpdate,
    ) -> Result<Notification, AppError> {
        let mut notification = self.get_by_id(id).await?;

        if !matches!(
            update.status,
            NotificationStatus::Delivered | NotificationStatus::Read | NotificationStatus::Failed
        ) {
            return Err(AppError::Validation(format!(
                "Status {} cannot be set externally",
                update.status
            )));
        }
        if !matches!(
            notification.status(),
            NotificationStatus::Sent | NotificationStatus::Delivered
        ) {
            return Err(AppError::Validation(format!(
                "Cannot move notification from {} to {}",
                notification.status(),
                update.status
            )));
        }

        if let Some(reported) = update.provider_response {
            merge_provider_response(&mut notification, reported);
        }
        let details = update
            .details
            .unwrap_or_else(|| format!("Status updated to {}", update.status));
        notification.transition(update.status, details);
        self.store.update_notification(&notification).await?;

        tracing::info!(notification_id = %id, status = %update.status, "Notification status updated");
        Ok(notification)
    }

    /// Ask the notification's provider for the current delivery status.
    pub async fn provider_status(&self, id: Uuid) -> Result<StatusReport, AppError> {
        let notification = self.get_by_id(id).await?;
        let message_id = notification
            .provider_response
            .as_ref()
            .map(|r| r.message_id.as_str())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| {
                AppError::NotFound(format!("Notification {id} has no provider message id"))
            })?;

        let provider = self
            .registry
            .get_provider(notification.channel, notification.provider.as_deref())?;
        let timeout = self.settings.provider_timeout;

        match tokio::time::timeout(timeout, provider.get_status(message_id)).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(AppError::Provider(e.to_string())),
            Err(_) => Err(AppError::Provider(
                ProviderError::timeout(provider.name(), timeout).to_string(),
            )),
        }
    }

    fn normalize_recipient(&self, recipient: Recipient) -> Result<Recipient, AppError> {
        if recipient.value.trim().is_empty() {
            return Err(AppError::validation("Recipient value is required"));
        }
        let value = match recipient.kind {
            RecipientType::Phone => {
                format_phone_number(&recipient.value, &self.settings.default_country_code)
            }
            RecipientType::Email => format_email(&recipient.value),
        };
        Ok(Recipient {
            kind: recipient.kind,
            value,
        })
    }

    /// Reject delivery when the user's preferences do not accept it right now.
    async fn check_consent(&self, options: &NotificationOptions) -> Result<(), AppError> {
        let Some(user_id) = options.user_id.as_deref() else {
            return Ok(());
        };
        let category = options.category.unwrap_or_default();
        if self.preferences.can_receive(user_id, category).await {
            return Ok(());
        }

        tracing::info!(user_id, %category, "Delivery blocked by user preferences");
        Err(AppError::Validation(format!(
            "User {user_id} does not accept {category} notifications at this time"
        )))
    }
}

fn validate_literal(content: &MessageContent, channel: Channel) -> Result<(), AppError> {
    let has_body = content.text.as_deref().is_some_and(|t| !t.is_empty())
        || content.html.as_deref().is_some_and(|h| !h.is_empty());
    if !has_body {
        return Err(AppError::Validation(format!(
            "Content for {channel} must include text"
        )));
    }
    Ok(())
}

/// Map stored content onto the provider's message shape for the channel.
fn outbound_message(notification: &Notification) -> OutboundMessage {
    let content = &notification.content;
    match notification.channel {
        Channel::Email => {
            let text = content.text.clone().unwrap_or_default();
            OutboundMessage::Email(EmailMessage {
                subject: content.subject.clone().unwrap_or_default(),
                html: content.html.clone().unwrap_or_else(|| text.clone()),
                text,
                attachments: content.attachments.clone(),
            })
        }
        Channel::Sms | Channel::Whatsapp => OutboundMessage::Text {
            body: content
                .text
                .clone()
                .or_else(|| content.html.clone())
                .unwrap_or_default(),
        },
    }
}

fn send_options(notification: &Notification) -> SendOptions {
    let template = match notification.channel {
        Channel::Whatsapp => notification.template.as_ref(),
        Channel::Sms | Channel::Email => None,
    };
    SendOptions {
        priority: notification.options.priority,
        template_name: template.map(|t: &TemplateRef| t.template_id.clone()),
        template_params: template.map(|t| t.parameters.clone()).unwrap_or_default(),
    }
}

fn merge_provider_response(notification: &mut Notification, reported: serde_json::Value) {
    match notification.provider_response.as_mut() {
        Some(existing) => match (&mut existing.raw_response, reported) {
            (serde_json::Value::Object(stored), serde_json::Value::Object(update)) => {
                stored.extend(update);
            }
            (stored, update) => *stored = update,
        },
        None => {
            let message_id = reported
                .get("messageId")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string();
            notification.provider_response = Some(ProviderResponse {
                message_id,
                provider_timestamp: Utc::now().to_rfc3339(),
                raw_response: reported,
            });
        }
    }
}

fn receipt(notification: &Notification, outcome: Option<&SendOutcome>) -> SendReceipt {
    SendReceipt {
        success: true,
        notification_id: notification.id,
        channel: notification.channel,
        provider: notification.provider.clone(),
        status: notification.status(),
        recipient: notification.recipient.value.clone(),
        timestamp: outcome.map(|o| o.timestamp).unwrap_or(notification.updated_at),
        message_id: outcome.map(|o| o.message_id.clone()),
        scheduled_for: notification.options.scheduled_for,
        details: outcome.map(|o| o.raw_response.clone()),
        tracking: Tracking {
            status_url: format!("/api/notifications/{}/status", notification.id),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn notification(channel: Channel, content: MessageContent) -> Notification {
        Notification::new(
            Recipient {
                kind: RecipientType::Email,
                value: "ana@example.com".to_string(),
            },
            channel,
            None,
            content,
            Some(TemplateRef {
                template_id: "welcome".to_string(),
                parameters: json!({"name": "Ana"}).as_object().cloned().unwrap_or_default(),
            }),
            NotificationOptions {
                scheduled_for: None,
                expires_at: None,
                fallback_channels: vec![],
                priority: Priority::High,
                retry_count: 0,
                max_retries: 5,
                user_id: None,
                category: None,
            },
            Metadata::new(),
        )
    }

    #[test]
    fn test_email_message_falls_back_to_text_for_html() {
        let n = notification(
            Channel::Email,
            MessageContent {
                text: Some("hello".to_string()),
                subject: Some("Hi".to_string()),
                ..Default::default()
            },
        );
        let OutboundMessage::Email(email) = outbound_message(&n) else {
            panic!("expected email message");
        };
        assert_eq!(email.subject, "Hi");
        assert_eq!(email.html, "hello");
    }

    #[test]
    fn test_only_whatsapp_forwards_template() {
        let content = MessageContent {
            text: Some("hello".to_string()),
            ..Default::default()
        };
        let whatsapp = send_options(&notification(Channel::Whatsapp, content.clone()));
        assert_eq!(whatsapp.template_name.as_deref(), Some("welcome"));
        assert_eq!(whatsapp.template_params["name"], "Ana");
        assert_eq!(whatsapp.priority, Priority::High);

        let sms = send_options(&notification(Channel::Sms, content));
        assert_eq!(sms.template_name, None);
        assert!(sms.template_params.is_empty());
    }

    #[test]
    fn test_merge_provider_response() {
        let mut n = notification(Channel::Sms, MessageContent::default());
        merge_provider_response(&mut n, json!({"messageId": "m1", "a": 1}));
        assert_eq!(n.provider_response.as_ref().map(|r| r.message_id.as_str()), Some("m1"));

        merge_provider_response(&mut n, json!({"b": 2}));
        let raw = &n.provider_response.as_ref().unwrap().raw_response;
        assert_eq!(raw["a"], 1);
        assert_eq!(raw["b"], 2);
    }

    #[test]
    fn test_literal_content_needs_a_body() {
        assert!(validate_literal(&MessageContent::default(), Channel::Sms).is_err());
        let html_only = MessageContent {
            html: Some("<p>x</p>".to_string()),
            ..Default::default()
        };
        assert!(validate_literal(&html_only, Channel::Email).is_ok());
    }

    #[test]
    fn test_receipt_tracking_url() {
        let n = notification(Channel::Sms, MessageContent::default());
        let r = receipt(&n, None);
        assert_eq!(r.tracking.status_url, format!("/api/notifications/{}/status", n.id));
        assert_eq!(r.status, NotificationStatus::Queued);
        assert_eq!(r.message_id, None);
    }
}
