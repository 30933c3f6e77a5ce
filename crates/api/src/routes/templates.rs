//! Template CRUD and render routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    Channel, MessageContent, Page, PageRequest, Parameters, Template, TemplateCategory,
};
use courier_engine::store::TemplateFilter;
use courier_engine::templates::{CreateTemplateParams, UpdateTemplateParams};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/templates", post(create_template).get(list_templates))
        .route(
            "/api/templates/{id}",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/api/templates/{id}/render", post(render_template))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    category: Option<TemplateCategory>,
    channel: Option<Channel>,
    search: Option<String>,
    page: Option<u64>,
    limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RenderBody {
    channel: Channel,
    #[serde(default)]
    parameters: Parameters,
}

/// POST /api/templates
async fn create_template(
    State(state): State<AppState>,
    Json(params): Json<CreateTemplateParams>,
) -> Result<(StatusCode, Json<Template>), AppError> {
    let template = state.templates.create(params).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// GET /api/templates: Filtered list, most recently updated first.
async fn list_templates(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Template>>, AppError> {
    let filter = TemplateFilter {
        category: query.category,
        channel: query.channel,
        search: query.search,
    };
    let page = PageRequest {
        page: query.page,
        limit: query.limit,
    };
    Ok(Json(state.templates.list(&filter, page).await?))
}

/// GET /api/templates/:id: Accepts either the id or the unique name.
async fn get_template(
    State(state): State<AppState>,
    Path(id_or_name): Path<String>,
) -> Result<Json<Template>, AppError> {
    Ok(Json(state.templates.find(&id_or_name).await?))
}

/// PUT /api/templates/:id
async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(params): Json<UpdateTemplateParams>,
) -> Result<Json<Template>, AppError> {
    Ok(Json(state.templates.update(id, params).await?))
}

/// DELETE /api/templates/:id
async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.templates.delete(id).await?;
    Ok(Json(json!({"deleted": true})))
}

/// POST /api/templates/:id/render: Preview the active version for a channel.
async fn render_template(
    State(state): State<AppState>,
    Path(id_or_name): Path<String>,
    Json(body): Json<RenderBody>,
) -> Result<Json<MessageContent>, AppError> {
    let content = state
        .templates
        .render(&id_or_name, body.channel, &body.parameters)
        .await?;
    Ok(Json(content))
}
