// Instance lifecycle - starts workflows and processes actions against them
//
// Every operation here is one transaction. Actions against the same instance
// are serialized by a row lock on the instance; actions against different
// instances proceed in parallel. No state lives outside the database.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::actions::record_action;
use super::assignments::{close_open_assignment, open_assignment, resolve_assignee};
use super::engine::{compute_next, NextStepDecision, TerminalOutcome};
use super::templates::{fetch_entry_step, fetch_outgoing_transitions, fetch_step, fetch_template};
use crate::error::{ApiResult, AppError};
use crate::models::{InstanceStatus, WorkflowActionType, WorkflowInstance, WorkflowInstanceDetail};

/// An action submission against a running instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSubmission {
    pub action_type: WorkflowActionType,
    pub comments: Option<String>,
    pub data_modifications: Option<JsonValue>,
}

/// Result of processing an action: the instance as it now stands, plus any
/// data modifications the caller must apply to the governed entity (the
/// engine records them but never interprets them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub instance: WorkflowInstanceDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_modifications: Option<JsonValue>,
}

/// Start a new instance of a template against an external entity.
///
/// The instance, its current state and the initial assignment are one atomic
/// unit: either all exist afterwards or none do.
pub async fn start_instance(
    pool: &PgPool,
    template_id: Uuid,
    entity_type: String,
    entity_id: String,
) -> ApiResult<WorkflowInstanceDetail> {
    let mut tx = pool.begin().await?;

    let template = fetch_template(&mut tx, template_id).await?;
    if !template.is_active {
        return Err(AppError::validation_single(
            "template_id",
            format!("template {} is deactivated", template_id),
        ));
    }

    let entry = fetch_entry_step(&mut tx, template_id).await?;
    let assignee = resolve_assignee(&mut tx, entry.role_id).await?;

    let instance_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO workflow_instances
        (id, template_id, current_step_id, current_assignee, entity_type, entity_id, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(instance_id)
    .bind(template_id)
    .bind(entry.id)
    .bind(assignee.id)
    .bind(&entity_type)
    .bind(&entity_id)
    .bind(InstanceStatus::Active)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    open_assignment(&mut tx, instance_id, entry.id, assignee.id).await?;

    tx.commit().await?;

    tracing::info!(
        "Started workflow {} from template '{}' at step '{}' (assignee {})",
        instance_id,
        template.name,
        entry.name,
        assignee.id
    );

    fetch_instance_detail(pool, instance_id).await
}

/// Process one action against an instance.
///
/// Order inside the transaction: lock the instance row, check it is still
/// open, check the actor is the current assignee, compute the decision
/// (which enforces the MODIFY permission), record the audit row, apply the
/// decision. Rejected submissions leave no trace.
pub async fn take_action(
    pool: &PgPool,
    instance_id: Uuid,
    actor_id: Uuid,
    submission: ActionSubmission,
) -> ApiResult<ActionOutcome> {
    let mut tx = pool.begin().await?;

    let instance = lock_instance(&mut tx, instance_id).await?;

    if instance.status.is_terminal() {
        return Err(AppError::InstanceClosed { instance_id });
    }
    if instance.current_assignee != Some(actor_id) {
        return Err(AppError::UnauthorizedAction {
            instance_id,
            actor_id,
        });
    }

    let step = fetch_step(&mut tx, instance.current_step_id).await?;
    let outgoing = fetch_outgoing_transitions(&mut tx, step.id).await?;

    let data = submission
        .data_modifications
        .clone()
        .unwrap_or_else(|| JsonValue::Object(Default::default()));

    let decision = compute_next(&instance, &step, &outgoing, submission.action_type, &data)?;

    record_action(
        &mut tx,
        instance_id,
        step.id,
        actor_id,
        submission.action_type,
        submission.comments.clone(),
        submission.data_modifications.clone(),
    )
    .await?;

    match &decision {
        NextStepDecision::Hold => {}
        NextStepDecision::Advance(to_step_id) | NextStepDecision::RejectTo(to_step_id) => {
            close_open_assignment(&mut tx, instance_id).await?;

            let to_step = fetch_step(&mut tx, *to_step_id).await?;
            let assignee = resolve_assignee(&mut tx, to_step.role_id).await?;

            sqlx::query(
                r#"
                UPDATE workflow_instances
                SET current_step_id = $2, current_assignee = $3
                WHERE id = $1
                "#,
            )
            .bind(instance_id)
            .bind(to_step.id)
            .bind(assignee.id)
            .execute(&mut *tx)
            .await?;

            open_assignment(&mut tx, instance_id, to_step.id, assignee.id).await?;

            tracing::info!(
                "Workflow {} moved to step '{}' (assignee {})",
                instance_id,
                to_step.name,
                assignee.id
            );
        }
        NextStepDecision::Terminal(outcome) => {
            close_open_assignment(&mut tx, instance_id).await?;

            let status = match outcome {
                TerminalOutcome::Completed => InstanceStatus::Completed,
                TerminalOutcome::Rejected => InstanceStatus::Rejected,
            };

            sqlx::query(
                r#"
                UPDATE workflow_instances
                SET status = $2, current_assignee = NULL, completed_at = $3
                WHERE id = $1
                "#,
            )
            .bind(instance_id)
            .bind(status)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            tracing::info!("Workflow {} reached terminal status {:?}", instance_id, status);
        }
    }

    tx.commit().await?;

    let instance = fetch_instance_detail(pool, instance_id).await?;
    let data_modifications = match submission.action_type {
        WorkflowActionType::Modify => submission.data_modifications,
        _ => None,
    };

    Ok(ActionOutcome {
        instance,
        data_modifications,
    })
}

/// Read the instance row under a lock, serializing concurrent actions
/// against the same instance.
async fn lock_instance(conn: &mut PgConnection, instance_id: Uuid) -> ApiResult<WorkflowInstance> {
    let instance = sqlx::query_as::<_, WorkflowInstance>(
        r#"
        SELECT id, template_id, current_step_id, current_assignee, entity_type,
               entity_id, status, created_at, completed_at
        FROM workflow_instances
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(instance_id)
    .fetch_optional(&mut *conn)
    .await?;

    instance.ok_or(AppError::not_found("Workflow instance", instance_id))
}

pub async fn fetch_instance_detail(
    pool: &PgPool,
    instance_id: Uuid,
) -> ApiResult<WorkflowInstanceDetail> {
    let detail = sqlx::query_as::<_, WorkflowInstanceDetail>(
        r#"
        SELECT
            i.id, i.template_id, t.name AS template_name,
            i.current_step_id, s.name AS current_step_name, s.step_order AS current_step_order,
            i.current_assignee, u.display_name AS current_assignee_name,
            i.entity_type, i.entity_id, i.status, i.created_at, i.completed_at
        FROM workflow_instances i
        JOIN workflow_templates t ON i.template_id = t.id
        JOIN workflow_steps s ON i.current_step_id = s.id
        LEFT JOIN users u ON i.current_assignee = u.id
        WHERE i.id = $1
        "#,
    )
    .bind(instance_id)
    .fetch_optional(pool)
    .await?;

    detail.ok_or(AppError::not_found("Workflow instance", instance_id))
}

/// Instances currently assigned to a user, oldest first, optionally
/// filtered by status. Read-only projection.
pub async fn assigned_to(
    pool: &PgPool,
    user_id: Uuid,
    status: Option<InstanceStatus>,
) -> ApiResult<Vec<WorkflowInstanceDetail>> {
    let instances = sqlx::query_as::<_, WorkflowInstanceDetail>(
        r#"
        SELECT
            i.id, i.template_id, t.name AS template_name,
            i.current_step_id, s.name AS current_step_name, s.step_order AS current_step_order,
            i.current_assignee, u.display_name AS current_assignee_name,
            i.entity_type, i.entity_id, i.status, i.created_at, i.completed_at
        FROM workflow_instances i
        JOIN workflow_templates t ON i.template_id = t.id
        JOIN workflow_steps s ON i.current_step_id = s.id
        LEFT JOIN users u ON i.current_assignee = u.id
        WHERE i.current_assignee = $1
          AND ($2::workflow_instance_status IS NULL OR i.status = $2)
        ORDER BY i.created_at ASC
        "#,
    )
    .bind(user_id)
    .bind(status)
    .fetch_all(pool)
    .await?;

    Ok(instances)
}
