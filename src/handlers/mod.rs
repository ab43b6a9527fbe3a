use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;

pub mod workflow_instances;
pub mod workflow_templates;

pub use workflow_instances::workflow_routes;
pub use workflow_templates::workflow_template_routes;

pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let database = crate::database::health_check(&state.db_pool).await;
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(json!({
            "status": if database { "healthy" } else { "degraded" },
            "service": "greenlight-api",
            "database": database,
        })),
    )
}
