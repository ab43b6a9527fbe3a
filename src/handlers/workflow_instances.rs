use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{InstanceStatus, WorkflowAction, WorkflowActionType, WorkflowInstanceDetail};
use crate::workflows::{self, ActionOutcome, ActionSubmission};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StartWorkflowRequest {
    pub template_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TakeActionRequest {
    pub user_id: Uuid,
    pub action_type: WorkflowActionType,
    pub comments: Option<String>,
    pub data_modifications: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct AssignedQuery {
    pub status: Option<InstanceStatus>,
}

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(start_workflow))
        .route("/:id", get(get_workflow))
        .route("/:id/actions", get(list_workflow_actions).post(take_action))
        .route("/assigned/:user_id", get(assigned_workflows))
}

async fn start_workflow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StartWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowInstanceDetail>)> {
    let instance = workflows::start_instance(
        &state.db_pool,
        payload.template_id,
        payload.entity_type,
        payload.entity_id,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(instance)))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowInstanceDetail>> {
    let instance = workflows::fetch_instance_detail(&state.db_pool, id).await?;
    Ok(Json(instance))
}

async fn take_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TakeActionRequest>,
) -> ApiResult<Json<ActionOutcome>> {
    let submission = ActionSubmission {
        action_type: payload.action_type,
        comments: payload.comments,
        data_modifications: payload.data_modifications,
    };

    let outcome = workflows::take_action(&state.db_pool, id, payload.user_id, submission).await?;
    Ok(Json(outcome))
}

async fn list_workflow_actions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<WorkflowAction>>> {
    // Ensure the instance exists so a bad id is a 404, not an empty list.
    workflows::fetch_instance_detail(&state.db_pool, id).await?;
    let actions = workflows::list_actions(&state.db_pool, id).await?;
    Ok(Json(actions))
}

async fn assigned_workflows(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Query(params): Query<AssignedQuery>,
) -> ApiResult<Json<Vec<WorkflowInstanceDetail>>> {
    let instances = workflows::assigned_to(&state.db_pool, user_id, params.status).await?;
    Ok(Json(instances))
}
