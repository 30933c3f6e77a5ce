use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Notification, Preference, Template};

use super::{
    NotificationFilter, NotificationStore, PreferenceStore, TemplateFilter, TemplateStore,
};

/// PostgreSQL-backed store. Each row holds the full document in `doc` plus the
/// columns needed for filtering, uniqueness and ordering.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map a unique-key violation to `Conflict`, everything else to `Database`.
fn conflict_or_db(e: sqlx::Error, message: impl FnOnce() -> String) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(message()),
        _ => AppError::Database(e),
    }
}

/// Escape `%`, `_` and `\` so user input matches literally inside `ILIKE`.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_notification_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &NotificationFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(channel) = filter.channel {
        qb.push(" AND channel = ").push_bind(channel.as_str());
    }
    if let Some(recipient) = &filter.recipient {
        qb.push(" AND recipient = ").push_bind(recipient.clone());
    }
    if let Some(from) = filter.from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
}

fn push_template_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &TemplateFilter) {
    if let Some(category) = filter.category {
        qb.push(" AND category = ").push_bind(category.to_string());
    }
    if let Some(channel) = filter.channel {
        qb.push(" AND doc->'versions' @> ")
            .push_bind(Json(serde_json::json!([{ "channel": channel.as_str() }])));
    }
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR doc->>'displayName' ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR doc->>'description' ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, channel, status, recipient, created_at, updated_at, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(notification.id)
        .bind(notification.channel.as_str())
        .bind(notification.status().as_str())
        .bind(&notification.recipient.value)
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .bind(Json(notification))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_or_db(e, || format!("Notification {} already exists", notification.id))
        })?;
        Ok(())
    }

    async fn update_notification(&self, notification: &Notification) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET channel = $2, status = $3, recipient = $4, updated_at = $5, doc = $6
            WHERE id = $1
            "#,
        )
        .bind(notification.id)
        .bind(notification.channel.as_str())
        .bind(notification.status().as_str())
        .bind(&notification.recipient.value)
        .bind(notification.updated_at)
        .bind(Json(notification))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Notification {} not found",
                notification.id
            )));
        }
        Ok(())
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        let row: Option<(Json<Notification>,)> =
            sqlx::query_as("SELECT doc FROM notifications WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(doc,)| doc.0))
    }

    async fn list_notifications(
        &self,
        filter: &NotificationFilter,
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Notification>, u64), AppError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM notifications WHERE TRUE");
        push_notification_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT doc FROM notifications WHERE TRUE");
        push_notification_filters(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, seq DESC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(skip as i64);
        let rows = select
            .build_query_as::<(Json<Notification>,)>()
            .fetch_all(&self.pool)
            .await?;

        Ok((rows.into_iter().map(|(doc,)| doc.0).collect(), total as u64))
    }
}

#[async_trait]
impl PreferenceStore for PgStore {
    async fn get_preference(&self, user_id: &str) -> Result<Option<Preference>, AppError> {
        let row: Option<(Json<Preference>,)> =
            sqlx::query_as("SELECT doc FROM preferences WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(doc,)| doc.0))
    }

    async fn insert_preference(&self, preference: &Preference) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO preferences (user_id, created_at, updated_at, doc) VALUES ($1, $2, $3, $4)",
        )
        .bind(&preference.user_id)
        .bind(preference.created_at)
        .bind(preference.updated_at)
        .bind(Json(preference))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_or_db(e, || {
                format!("Preferences for user {} already exist", preference.user_id)
            })
        })?;
        Ok(())
    }

    async fn update_preference(&self, preference: &Preference) -> Result<(), AppError> {
        let result =
            sqlx::query("UPDATE preferences SET updated_at = $2, doc = $3 WHERE user_id = $1")
                .bind(&preference.user_id)
                .bind(preference.updated_at)
                .bind(Json(preference))
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Preferences for user {} not found",
                preference.user_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TemplateStore for PgStore {
    async fn insert_template(&self, template: &Template) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO templates (id, name, category, updated_at, doc) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(template.category.to_string())
        .bind(template.updated_at)
        .bind(Json(template))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_or_db(e, || format!("Template name {} is already in use", template.name))
        })?;
        Ok(())
    }

    async fn update_template(&self, template: &Template) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE templates SET name = $2, category = $3, updated_at = $4, doc = $5 WHERE id = $1",
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(template.category.to_string())
        .bind(template.updated_at)
        .bind(Json(template))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_or_db(e, || format!("Template name {} is already in use", template.name))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Template {} not found", template.id)));
        }
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, AppError> {
        let row: Option<(Json<Template>,)> =
            sqlx::query_as("SELECT doc FROM templates WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(doc,)| doc.0))
    }

    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>, AppError> {
        let row: Option<(Json<Template>,)> =
            sqlx::query_as("SELECT doc FROM templates WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(doc,)| doc.0))
    }

    async fn delete_template(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_templates(
        &self,
        filter: &TemplateFilter,
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Template>, u64), AppError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM templates WHERE TRUE");
        push_template_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT doc FROM templates WHERE TRUE");
        push_template_filters(&mut select, filter);
        select
            .push(" ORDER BY updated_at DESC, seq DESC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(skip as i64);
        let rows = select
            .build_query_as::<(Json<Template>,)>()
            .fetch_all(&self.pool)
            .await?;

        Ok((rows.into_iter().map(|(doc,)| doc.0).collect(), total as u64))
    }
}
