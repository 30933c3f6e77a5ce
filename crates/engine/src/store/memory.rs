use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Notification, Preference, Template};

use super::{
    NotificationFilter, NotificationStore, PreferenceStore, TemplateFilter, TemplateStore,
};

/// In-process store. Data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    /// Insertion order, used as the tie-break for equal `created_at`
    notifications: RwLock<Vec<Notification>>,
    preferences: RwLock<HashMap<String, Preference>>,
    templates: RwLock<Vec<Template>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T>(items: Vec<T>, skip: u64, limit: u64) -> Vec<T> {
    items
        .into_iter()
        .skip(skip as usize)
        .take(limit as usize)
        .collect()
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError> {
        let mut notifications = self.notifications.write().await;
        if notifications.iter().any(|n| n.id == notification.id) {
            return Err(AppError::Conflict(format!(
                "Notification {} already exists",
                notification.id
            )));
        }
        notifications.push(notification.clone());
        Ok(())
    }

    async fn update_notification(&self, notification: &Notification) -> Result<(), AppError> {
        let mut notifications = self.notifications.write().await;
        let slot = notifications
            .iter_mut()
            .find(|n| n.id == notification.id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Notification {} not found", notification.id))
            })?;
        *slot = notification.clone();
        Ok(())
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        let notifications = self.notifications.read().await;
        Ok(notifications.iter().find(|n| n.id == id).cloned())
    }

    async fn list_notifications(
        &self,
        filter: &NotificationFilter,
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Notification>, u64), AppError> {
        let notifications = self.notifications.read().await;
        let mut matched: Vec<Notification> = notifications
            .iter()
            .rev()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matched.len() as u64;
        Ok((page(matched, skip, limit), total))
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get_preference(&self, user_id: &str) -> Result<Option<Preference>, AppError> {
        Ok(self.preferences.read().await.get(user_id).cloned())
    }

    async fn insert_preference(&self, preference: &Preference) -> Result<(), AppError> {
        let mut preferences = self.preferences.write().await;
        if preferences.contains_key(&preference.user_id) {
            return Err(AppError::Conflict(format!(
                "Preferences for user {} already exist",
                preference.user_id
            )));
        }
        preferences.insert(preference.user_id.clone(), preference.clone());
        Ok(())
    }

    async fn update_preference(&self, preference: &Preference) -> Result<(), AppError> {
        let mut preferences = self.preferences.write().await;
        match preferences.get_mut(&preference.user_id) {
            Some(slot) => {
                *slot = preference.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "Preferences for user {} not found",
                preference.user_id
            ))),
        }
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn insert_template(&self, template: &Template) -> Result<(), AppError> {
        let mut templates = self.templates.write().await;
        if templates.iter().any(|t| t.name == template.name) {
            return Err(AppError::Conflict(format!(
                "Template name {} is already in use",
                template.name
            )));
        }
        templates.push(template.clone());
        Ok(())
    }

    async fn update_template(&self, template: &Template) -> Result<(), AppError> {
        let mut templates = self.templates.write().await;
        if templates
            .iter()
            .any(|t| t.name == template.name && t.id != template.id)
        {
            return Err(AppError::Conflict(format!(
                "Template name {} is already in use",
                template.name
            )));
        }
        let slot = templates
            .iter_mut()
            .find(|t| t.id == template.id)
            .ok_or_else(|| AppError::NotFound(format!("Template {} not found", template.id)))?;
        *slot = template.clone();
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, AppError> {
        let templates = self.templates.read().await;
        Ok(templates.iter().find(|t| t.id == id).cloned())
    }

    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>, AppError> {
        let templates = self.templates.read().await;
        Ok(templates.iter().find(|t| t.name == name).cloned())
    }

    async fn delete_template(&self, id: Uuid) -> Result<bool, AppError> {
        let mut templates = self.templates.write().await;
        let before = templates.len();
        templates.retain(|t| t.id != id);
        Ok(templates.len() != before)
    }

    async fn list_templates(
        &self,
        filter: &TemplateFilter,
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Template>, u64), AppError> {
        let templates = self.templates.read().await;
        let mut matched: Vec<Template> = templates
            .iter()
            .rev()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let total = matched.len() as u64;
        Ok((page(matched, skip, limit), total))
    }
}
