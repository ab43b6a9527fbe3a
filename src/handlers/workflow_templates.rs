use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::WorkflowTemplate;
use crate::workflows::{self, CreateTemplateRequest, TemplateGraph};
use crate::AppState;

pub fn workflow_template_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route("/:id", get(get_template))
        .route("/:id/deactivate", patch(deactivate_template))
}

async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateTemplateRequest>,
) -> ApiResult<(StatusCode, Json<TemplateGraph>)> {
    let graph = workflows::create_template(&state.db_pool, payload).await?;
    Ok((StatusCode::CREATED, Json(graph)))
}

async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<WorkflowTemplate>>> {
    let templates = workflows::list_templates(&state.db_pool).await?;
    Ok(Json(templates))
}

async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TemplateGraph>> {
    let graph = workflows::get_template(&state.db_pool, id).await?;
    Ok(Json(graph))
}

async fn deactivate_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowTemplate>> {
    let template = workflows::deactivate_template(&state.db_pool, id).await?;
    Ok(Json(template))
}
