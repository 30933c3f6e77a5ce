//! Template service: CRUD for named templates and rendering of their versions.
//!
//! Rendering:
//! 1. Look up the template by id, then by name
//! 2. Pick the first active version for the channel
//! 3. Check that every declared parameter was supplied (all missing names are reported)
//! 4. Substitute `{{ name }}` placeholders for declared parameters only

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::{Captures, Regex};
use serde::Deserialize;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    Channel, MessageContent, Page, PageRequest, Pagination, Parameters, Template,
    TemplateCategory, TemplateVersion,
};

use crate::store::{TemplateFilter, TemplateStore};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid placeholder pattern")
});

/// Parameters for creating a template.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateParams {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub versions: Vec<TemplateVersion>,
    #[serde(default)]
    pub category: TemplateCategory,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateParams {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub versions: Option<Vec<TemplateVersion>>,
    pub category: Option<TemplateCategory>,
    pub tags: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct TemplateService {
    store: Arc<dyn TemplateStore>,
}

impl TemplateService {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, params: CreateTemplateParams) -> Result<Template, AppError> {
        let name = params.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("Template name is required"));
        }
        if params.display_name.trim().is_empty() {
            return Err(AppError::validation("Template displayName is required"));
        }

        let now = Utc::now();
        let template = Template {
            id: Uuid::new_v4(),
            name,
            display_name: params.display_name,
            description: params.description,
            versions: stamp_versions(params.versions),
            category: params.category,
            tags: params.tags,
            created_at: now,
            updated_at: now,
        };

        self.store
            .insert_template(&template)
            .await
            .map_err(name_taken_as_validation)?;

        tracing::info!(template_id = %template.id, name = %template.name, "Template created");
        Ok(template)
    }

    pub async fn update(&self, id: Uuid, params: UpdateTemplateParams) -> Result<Template, AppError> {
        let mut template = self.get_by_id(id).await?;

        if let Some(name) = params.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::validation("Template name cannot be empty"));
            }
            template.name = name;
        }
        if let Some(display_name) = params.display_name {
            template.display_name = display_name;
        }
        if let Some(description) = params.description {
            template.description = Some(description);
        }
        if let Some(versions) = params.versions {
            template.versions = stamp_versions(versions);
        }
        if let Some(category) = params.category {
            template.category = category;
        }
        if let Some(tags) = params.tags {
            template.tags = tags;
        }
        template.updated_at = Utc::now();

        self.store
            .update_template(&template)
            .await
            .map_err(name_taken_as_validation)?;

        tracing::info!(template_id = %id, "Template updated");
        Ok(template)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Template, AppError> {
        self.store
            .get_template(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Template {id} not found")))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Template, AppError> {
        self.store
            .get_template_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Template {name} not found")))
    }

    /// Resolve a reference that is either a template id or a template name.
    pub async fn find(&self, id_or_name: &str) -> Result<Template, AppError> {
        if let Ok(id) = id_or_name.parse::<Uuid>()
            && let Some(template) = self.store.get_template(id).await?
        {
            return Ok(template);
        }
        self.get_by_name(id_or_name).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        if !self.store.delete_template(id).await? {
            return Err(AppError::NotFound(format!("Template {id} not found")));
        }
        tracing::info!(template_id = %id, "Template deleted");
        Ok(())
    }

    pub async fn list(
        &self,
        filter: &TemplateFilter,
        page: PageRequest,
    ) -> Result<Page<Template>, AppError> {
        let (page, limit) = page.resolve()?;
        let (data, total) = self
            .store
            .list_templates(filter, Pagination::skip(page, limit), limit)
            .await?;
        Ok(Page {
            data,
            pagination: Pagination::new(total, page, limit),
        })
    }

    /// Render the active version of `id_or_name` for `channel`.
    pub async fn render(
        &self,
        id_or_name: &str,
        channel: Channel,
        parameters: &Parameters,
    ) -> Result<MessageContent, AppError> {
        let template = self.find(id_or_name).await?;
        let version = template.active_version(channel).ok_or_else(|| {
            AppError::NotFound(format!(
                "No active version of template {} for channel {channel}",
                template.name
            ))
        })?;

        let content = render_version(version, parameters)?;
        tracing::debug!(template = %template.name, %channel, "Template rendered");
        Ok(content)
    }
}

fn name_taken_as_validation(e: AppError) -> AppError {
    match e {
        AppError::Conflict(msg) => AppError::Validation(msg),
        other => other,
    }
}

fn stamp_versions(versions: Vec<TemplateVersion>) -> Vec<TemplateVersion> {
    versions
        .into_iter()
        .map(|mut v| {
            if v.version_id.is_empty() {
                v.version_id = Uuid::new_v4().to_string();
            }
            v
        })
        .collect()
}

/// Render one version. Fails with `Validation` naming every missing parameter.
pub fn render_version(
    version: &TemplateVersion,
    parameters: &Parameters,
) -> Result<MessageContent, AppError> {
    let missing: Vec<&str> = version
        .parameters
        .iter()
        .filter(|p| !parameters.contains_key(p.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "Missing template parameters: {}",
            missing.join(", ")
        )));
    }

    let declared: BTreeSet<&str> = version.parameters.iter().map(String::as_str).collect();
    let text = substitute(&version.content, &declared, parameters);

    Ok(match version.channel {
        Channel::Email => MessageContent {
            subject: version
                .subject
                .as_deref()
                .map(|s| substitute(s, &declared, parameters)),
            html: Some(text.clone()),
            text: Some(text),
            attachments: Vec::new(),
        },
        Channel::Sms | Channel::Whatsapp => MessageContent {
            text: Some(text),
            ..Default::default()
        },
    })
}

fn substitute(input: &str, declared: &BTreeSet<&str>, parameters: &Parameters) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &Captures| {
            let name = &caps[1];
            match parameters.get(name) {
                Some(value) if declared.contains(name) => match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    fn version(channel: Channel, content: &str, params: &[&str]) -> TemplateVersion {
        TemplateVersion {
            version_id: String::new(),
            channel,
            subject: Some("Hi {{name}}".to_string()),
            content: content.to_string(),
            parameters: params.iter().map(|p| p.to_string()).collect(),
            active: true,
            created_at: Utc::now(),
        }
    }

    fn params(pairs: &[(&str, serde_json::Value)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_substitutes_declared_placeholders_with_whitespace() {
        let v = version(Channel::Sms, "Hello {{ name }}, code {{code}}", &["name", "code"]);
        let out = render_version(&v, &params(&[("name", json!("Ana")), ("code", json!(1234))]))
            .unwrap();
        assert_eq!(out.text.as_deref(), Some("Hello Ana, code 1234"));
        assert_eq!(out.subject, None);
    }

    #[test]
    fn test_undeclared_placeholders_are_left_alone() {
        let v = version(Channel::Sms, "{{name}} {{ other }}", &["name"]);
        let out = render_version(
            &v,
            &params(&[("name", json!("Ana")), ("other", json!("x"))]),
        )
        .unwrap();
        assert_eq!(out.text.as_deref(), Some("Ana {{ other }}"));
    }

    #[test]
    fn test_missing_parameters_are_all_reported() {
        let v = version(Channel::Sms, "{{a}} {{b}} {{c}}", &["a", "b", "c"]);
        let err = render_version(&v, &params(&[("b", json!("x"))])).unwrap_err();
        match err {
            AppError::Validation(msg) => assert_eq!(msg, "Missing template parameters: a, c"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_email_output_shape() {
        let v = version(Channel::Email, "<p>{{name}}</p>", &["name"]);
        let out = render_version(&v, &params(&[("name", json!("Ana"))])).unwrap();
        assert_eq!(out.subject.as_deref(), Some("Hi Ana"));
        assert_eq!(out.text.as_deref(), Some("<p>Ana</p>"));
        assert_eq!(out.html.as_deref(), Some("<p>Ana</p>"));
    }

    #[test]
    fn test_render_is_idempotent() {
        let v = version(Channel::Whatsapp, "Order {{id}} shipped", &["id"]);
        let p = params(&[("id", json!("A-1"))]);
        assert_eq!(render_version(&v, &p).unwrap(), render_version(&v, &p).unwrap());
    }

    #[tokio::test]
    async fn test_render_by_id_or_name() {
        let service = TemplateService::new(Arc::new(MemoryStore::new()));
        let created = service
            .create(CreateTemplateParams {
                name: "welcome".to_string(),
                display_name: "Welcome".to_string(),
                description: None,
                versions: vec![version(Channel::Sms, "Hi {{name}}", &["name"])],
                category: TemplateCategory::Transactional,
                tags: vec![],
            })
            .await
            .unwrap();
        assert!(!created.versions[0].version_id.is_empty());

        let p = params(&[("name", json!("Ana"))]);
        let by_name = service.render("welcome", Channel::Sms, &p).await.unwrap();
        let by_id = service
            .render(&created.id.to_string(), Channel::Sms, &p)
            .await
            .unwrap();
        assert_eq!(by_name, by_id);

        let err = service.render("welcome", Channel::Email, &p).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = service.render("missing", Channel::Sms, &p).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_name_is_validation_error() {
        let service = TemplateService::new(Arc::new(MemoryStore::new()));
        let make = |name: &str| CreateTemplateParams {
            name: name.to_string(),
            display_name: "X".to_string(),
            description: None,
            versions: vec![],
            category: TemplateCategory::System,
            tags: vec![],
        };
        service.create(make("a")).await.unwrap();
        let b = service.create(make("b")).await.unwrap();

        let err = service.create(make("a")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = service
            .update(
                b.id,
                UpdateTemplateParams {
                    name: Some("a".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let service = TemplateService::new(Arc::new(MemoryStore::new()));
        let err = service.delete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
