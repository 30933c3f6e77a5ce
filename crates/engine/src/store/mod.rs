//! Document store for the three collections: notifications, preferences, templates.
//!
//! Two backends implement the same traits:
//! - [`MemoryStore`] keeps everything in process (default, and used by tests)
//! - [`PgStore`] keeps one JSONB document per row next to indexed filter columns
//!
//! Stores do plain reads and writes. Lifecycle rules live in the services.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    Channel, Notification, NotificationStatus, Preference, Template, TemplateCategory,
};

/// Notification list filters. All present fields must match.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFilter {
    pub status: Option<NotificationStatus>,
    pub channel: Option<Channel>,
    /// Exact recipient value, after normalization
    pub recipient: Option<String>,
    /// Inclusive lower bound on `createdAt`
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `createdAt`
    pub to: Option<DateTime<Utc>>,
}

impl NotificationFilter {
    pub fn matches(&self, n: &Notification) -> bool {
        self.status.is_none_or(|s| n.status() == s)
            && self.channel.is_none_or(|c| n.channel == c)
            && self
                .recipient
                .as_deref()
                .is_none_or(|r| n.recipient.value == r)
            && self.from.is_none_or(|from| n.created_at >= from)
            && self.to.is_none_or(|to| n.created_at <= to)
    }
}

/// Template list filters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateFilter {
    pub category: Option<TemplateCategory>,
    /// Templates having at least one version for this channel
    pub channel: Option<Channel>,
    /// Case-insensitive substring of name, display name or description
    pub search: Option<String>,
}

impl TemplateFilter {
    pub fn matches(&self, t: &Template) -> bool {
        let search_hit = match self.search.as_deref().map(str::to_lowercase) {
            None => true,
            Some(needle) => {
                t.name.to_lowercase().contains(&needle)
                    || t.display_name.to_lowercase().contains(&needle)
                    || t
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            }
        };

        search_hit
            && self.category.is_none_or(|c| t.category == c)
            && self
                .channel
                .is_none_or(|c| t.versions.iter().any(|v| v.channel == c))
    }
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError>;

    /// Replace the stored document. `NotFound` when the id is unknown.
    async fn update_notification(&self, notification: &Notification) -> Result<(), AppError>;

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, AppError>;

    /// Matching notifications, newest first, plus the total match count.
    async fn list_notifications(
        &self,
        filter: &NotificationFilter,
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Notification>, u64), AppError>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_preference(&self, user_id: &str) -> Result<Option<Preference>, AppError>;

    /// `Conflict` when a record for the user already exists.
    async fn insert_preference(&self, preference: &Preference) -> Result<(), AppError>;

    async fn update_preference(&self, preference: &Preference) -> Result<(), AppError>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// `Conflict` when the name is taken.
    async fn insert_template(&self, template: &Template) -> Result<(), AppError>;

    /// `Conflict` when renamed onto a taken name, `NotFound` when the id is unknown.
    async fn update_template(&self, template: &Template) -> Result<(), AppError>;

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, AppError>;

    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>, AppError>;

    /// Returns whether a template was removed.
    async fn delete_template(&self, id: Uuid) -> Result<bool, AppError>;

    /// Matching templates, most recently updated first, plus the total match count.
    async fn list_templates(
        &self,
        filter: &TemplateFilter,
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Template>, u64), AppError>;
}
