// Action recorder - append-only audit trail of workflow actions

use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{WorkflowAction, WorkflowActionType};

/// Append one immutable audit row for an accepted action submission.
///
/// Runs inside the caller's transaction, after the instance row lock is
/// held, so `created_at` is strictly later than every prior action on the
/// same instance. Rows are never updated or deleted.
pub async fn record_action(
    conn: &mut PgConnection,
    instance_id: Uuid,
    step_id: Uuid,
    actor_id: Uuid,
    action_type: WorkflowActionType,
    comments: Option<String>,
    data_modifications: Option<serde_json::Value>,
) -> ApiResult<WorkflowAction> {
    let action = WorkflowAction {
        id: Uuid::new_v4(),
        instance_id,
        step_id,
        actor_id,
        action_type,
        comments,
        data_modifications,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO workflow_actions
        (id, instance_id, step_id, actor_id, action_type, comments, data_modifications, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(action.id)
    .bind(action.instance_id)
    .bind(action.step_id)
    .bind(action.actor_id)
    .bind(action.action_type)
    .bind(&action.comments)
    .bind(&action.data_modifications)
    .bind(action.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(action)
}

/// Audit trail for an instance, timestamp ascending.
pub async fn list_actions(pool: &PgPool, instance_id: Uuid) -> ApiResult<Vec<WorkflowAction>> {
    let actions = sqlx::query_as::<_, WorkflowAction>(
        r#"
        SELECT id, instance_id, step_id, actor_id, action_type, comments,
               data_modifications, created_at
        FROM workflow_actions
        WHERE instance_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(instance_id)
    .fetch_all(pool)
    .await?;

    Ok(actions)
}
