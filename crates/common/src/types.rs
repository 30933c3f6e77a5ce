use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Free-form string-keyed metadata attached to notifications.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Template parameters supplied by callers.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Metadata key set on a fallback notification, pointing at the failed one.
pub const ORIGINAL_NOTIFICATION_ID: &str = "originalNotificationId";
/// Metadata key set on a failed notification, pointing at its fallback.
pub const FALLBACK_NOTIFICATION_ID: &str = "fallbackNotificationId";
pub const IS_FALLBACK: &str = "isFallback";

// ============================================================
// Enumerations
// ============================================================

/// Delivery medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
    Whatsapp,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Sms, Channel::Email, Channel::Whatsapp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::Whatsapp => "whatsapp",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Channel::Sms),
            "email" => Ok(Channel::Email),
            "whatsapp" => Ok(Channel::Whatsapp),
            other => Err(AppError::Validation(format!("Invalid channel: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    Phone,
    Email,
}

/// Notification lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Queued,
    Scheduled,
    Processing,
    Sent,
    Delivered,
    Failed,
    Cancelled,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Queued => "queued",
            NotificationStatus::Scheduled => "scheduled",
            NotificationStatus::Processing => "processing",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
            NotificationStatus::Read => "read",
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(NotificationStatus::Queued),
            "scheduled" => Ok(NotificationStatus::Scheduled),
            "processing" => Ok(NotificationStatus::Processing),
            "sent" => Ok(NotificationStatus::Sent),
            "delivered" => Ok(NotificationStatus::Delivered),
            "failed" => Ok(NotificationStatus::Failed),
            "cancelled" => Ok(NotificationStatus::Cancelled),
            "read" => Ok(NotificationStatus::Read),
            other => Err(AppError::Validation(format!("Invalid status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Consent category checked by the preference gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Marketing,
    #[default]
    Transactional,
    Alerts,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Marketing => write!(f, "marketing"),
            Category::Transactional => write!(f, "transactional"),
            Category::Alerts => write!(f, "alerts"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateCategory {
    #[default]
    Transactional,
    Marketing,
    Alerts,
    System,
}

impl std::fmt::Display for TemplateCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateCategory::Transactional => write!(f, "transactional"),
            TemplateCategory::Marketing => write!(f, "marketing"),
            TemplateCategory::Alerts => write!(f, "alerts"),
            TemplateCategory::System => write!(f, "system"),
        }
    }
}

// ============================================================
// Notification
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(rename = "type")]
    pub kind: RecipientType,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Concrete message body as delivered to a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Reference to the template a message was rendered from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRef {
    pub template_id: String,
    #[serde(default)]
    pub parameters: Parameters,
}

/// Content as submitted by a caller: either a template reference or literal content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationContent {
    Template(TemplateRef),
    Literal(MessageContent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: NotificationStatus,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fallback_channels: Vec<Channel>,
    #[serde(default)]
    pub priority: Priority,
    /// Stored for diagnostics only; the engine never retries the same channel.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    /// User whose preferences gate delivery, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub message_id: String,
    pub provider_timestamp: String,
    #[serde(default)]
    pub raw_response: serde_json::Value,
}

/// A persisted notification and its append-only status history.
///
/// `status` and `status_history` are only mutated through [`Notification::transition`],
/// which keeps the last history entry equal to the current status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient: Recipient,
    pub channel: Channel,
    pub provider: Option<String>,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateRef>,
    status: NotificationStatus,
    status_history: Vec<StatusHistoryEntry>,
    pub options: NotificationOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_response: Option<ProviderResponse>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Build a new record in `scheduled` (when `options.scheduled_for` is set) or `queued`.
    pub fn new(
        recipient: Recipient,
        channel: Channel,
        provider: Option<String>,
        content: MessageContent,
        template: Option<TemplateRef>,
        options: NotificationOptions,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        let (status, details) = match options.scheduled_for {
            Some(at) => (
                NotificationStatus::Scheduled,
                format!("Scheduled for {}", at.to_rfc3339()),
            ),
            None => (
                NotificationStatus::Queued,
                "Queued for processing".to_string(),
            ),
        };

        Self {
            id: Uuid::new_v4(),
            recipient,
            channel,
            provider,
            content,
            template,
            status,
            status_history: vec![StatusHistoryEntry {
                status,
                timestamp: now,
                details,
            }],
            options,
            provider_response: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the queued notification that retries this (failed) one on `channel`.
    ///
    /// Recipient, content and template are carried over; the provider is left for
    /// the default of the new channel. The caller links the original via metadata.
    pub fn fallback(&self, channel: Channel, remaining: Vec<Channel>) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.remove(FALLBACK_NOTIFICATION_ID);
        metadata.insert(
            ORIGINAL_NOTIFICATION_ID.to_string(),
            serde_json::Value::String(self.id.to_string()),
        );
        metadata.insert(IS_FALLBACK.to_string(), serde_json::Value::Bool(true));

        let options = NotificationOptions {
            fallback_channels: remaining,
            scheduled_for: None,
            ..self.options.clone()
        };

        let mut fallback = Self::new(
            self.recipient.clone(),
            channel,
            None,
            self.content.clone(),
            self.template.clone(),
            options,
            metadata,
        );
        // Informational only; a fallback always starts `queued`.
        fallback.options.scheduled_for = self.options.scheduled_for;
        if let Some(entry) = fallback.status_history.last_mut() {
            entry.details = format!("Fallback from {} notification {}", self.channel, self.id);
        }
        fallback
    }

    pub fn status(&self) -> NotificationStatus {
        self.status
    }

    pub fn status_history(&self) -> &[StatusHistoryEntry] {
        &self.status_history
    }

    /// Move to `status`, appending a history entry.
    pub fn transition(&mut self, status: NotificationStatus, details: impl Into<String>) {
        let now = Utc::now();
        self.status = status;
        self.status_history.push(StatusHistoryEntry {
            status,
            timestamp: now,
            details: details.into(),
        });
        self.updated_at = now;
    }

    pub fn is_fallback(&self) -> bool {
        self.metadata.contains_key(ORIGINAL_NOTIFICATION_ID)
    }
}

// ============================================================
// Preferences
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPreference {
    pub enabled: bool,
    #[serde(default)]
    pub value: Option<String>,
    pub verified: bool,
    /// Lower number = more preferred.
    pub priority: i32,
}

impl ChannelPreference {
    /// Disabled, unverified entry with the channel's default priority
    /// (whatsapp 0, email 1, sms 2).
    pub fn default_for(channel: Channel) -> Self {
        let priority = match channel {
            Channel::Whatsapp => 0,
            Channel::Email => 1,
            Channel::Sms => 2,
        };
        Self {
            enabled: false,
            value: None,
            verified: false,
            priority,
        }
    }

    pub fn is_deliverable(&self) -> bool {
        self.enabled && self.verified && self.value.as_deref().is_some_and(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFlags {
    pub marketing: bool,
    pub transactional: bool,
    pub alerts: bool,
}

impl CategoryFlags {
    pub fn allows(&self, category: Category) -> bool {
        match category {
            Category::Marketing => self.marketing,
            Category::Transactional => self.transactional,
            Category::Alerts => self.alerts,
        }
    }
}

impl Default for CategoryFlags {
    fn default() -> Self {
        Self {
            marketing: false,
            transactional: true,
            alerts: true,
        }
    }
}

/// Stored frequency caps. Not enforced by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyCaps {
    pub max_per_day: u32,
    pub max_per_week: u32,
}

impl Default for FrequencyCaps {
    fn default() -> Self {
        Self {
            max_per_day: 5,
            max_per_week: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPreferences {
    /// `HH:MM`, local to `timezone`
    pub allowed_time_start: String,
    /// `HH:MM`, local to `timezone`
    pub allowed_time_end: String,
    /// IANA zone name
    pub timezone: String,
    pub categories: CategoryFlags,
    pub frequency: FrequencyCaps,
}

impl Default for DeliveryPreferences {
    fn default() -> Self {
        Self {
            allowed_time_start: "08:00".to_string(),
            allowed_time_end: "22:00".to_string(),
            timezone: "America/Sao_Paulo".to_string(),
            categories: CategoryFlags::default(),
            frequency: FrequencyCaps::default(),
        }
    }
}

/// Per-user channel consent and delivery window. One record per user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preference {
    pub user_id: String,
    pub channels: BTreeMap<Channel, ChannelPreference>,
    pub preferences: DeliveryPreferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Preference {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            channels: Channel::ALL
                .iter()
                .map(|c| (*c, ChannelPreference::default_for(*c)))
                .collect(),
            preferences: DeliveryPreferences::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Mutable entry for `channel`, initialised with defaults when missing.
    pub fn channel_mut(&mut self, channel: Channel) -> &mut ChannelPreference {
        self.channels
            .entry(channel)
            .or_insert_with(|| ChannelPreference::default_for(channel))
    }
}

// ============================================================
// Templates
// ============================================================

/// A channel-specific, parameterized content definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateVersion {
    #[serde(default)]
    pub version_id: String,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub content: String,
    /// Required parameter names
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub versions: Vec<TemplateVersion>,
    #[serde(default)]
    pub category: TemplateCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// First active version for `channel`, in stored order.
    pub fn active_version(&self, channel: Channel) -> Option<&TemplateVersion> {
        self.versions
            .iter()
            .find(|v| v.channel == channel && v.active)
    }
}

// ============================================================
// Pagination
// ============================================================

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 20;

/// 1-based page request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PageRequest {
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
        }
    }

    /// Resolve defaults and reject a zero page or limit.
    ///
    /// The window `skip + limit` must fit in an `i64`, the widest offset the
    /// stores can bind.
    pub fn resolve(&self) -> Result<(u64, u64), AppError> {
        let page = self.page.unwrap_or(DEFAULT_PAGE);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if page == 0 {
            return Err(AppError::Validation("page must be >= 1".to_string()));
        }
        if limit == 0 {
            return Err(AppError::Validation("limit must be >= 1".to_string()));
        }
        let end = (page - 1)
            .checked_mul(limit)
            .and_then(|skip| skip.checked_add(limit));
        if end.is_none_or(|end| end > i64::MAX as u64) {
            return Err(AppError::Validation(format!(
                "page {page} with limit {limit} is out of range"
            )));
        }
        Ok((page, limit))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn new(total: u64, page: u64, limit: u64) -> Self {
        Self {
            total,
            page,
            limit,
            pages: total.div_ceil(limit),
        }
    }

    pub fn skip(page: u64, limit: u64) -> u64 {
        page.saturating_sub(1).saturating_mul(limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}
