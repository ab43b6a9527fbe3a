// Assignment resolver - picks who works a step and tracks assignment rows

use chrono::Utc;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{ApiResult, AppError};
use crate::models::{AssignmentStatus, User, WorkflowStepAssignment};

/// Pick the user to work a step requiring `role_id`.
///
/// Selection is deterministic: the lowest-id active holder of the role.
/// Purely a read; runs inside the caller's transaction so the membership it
/// sees is the membership the commit is based on.
pub async fn resolve_assignee(conn: &mut PgConnection, role_id: Uuid) -> ApiResult<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT u.id, u.email, u.display_name, u.is_active, u.created_at
        FROM users u
        JOIN user_roles ur ON ur.user_id = u.id
        WHERE ur.role_id = $1 AND u.is_active = TRUE
        ORDER BY u.id ASC
        LIMIT 1
        "#,
    )
    .bind(role_id)
    .fetch_optional(&mut *conn)
    .await?;

    user.ok_or(AppError::NoEligibleAssignee { role_id })
}

/// Insert a fresh PENDING assignment row for `step_id`. History is
/// append-only: revisiting a step creates a new row.
pub async fn open_assignment(
    conn: &mut PgConnection,
    instance_id: Uuid,
    step_id: Uuid,
    assignee_id: Uuid,
) -> ApiResult<WorkflowStepAssignment> {
    let assignment = WorkflowStepAssignment {
        id: Uuid::new_v4(),
        instance_id,
        step_id,
        assignee_id,
        status: AssignmentStatus::Pending,
        assigned_at: Utc::now(),
        completed_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO workflow_step_assignments
        (id, instance_id, step_id, assignee_id, status, assigned_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(assignment.id)
    .bind(assignment.instance_id)
    .bind(assignment.step_id)
    .bind(assignment.assignee_id)
    .bind(assignment.status)
    .bind(assignment.assigned_at)
    .execute(&mut *conn)
    .await?;

    Ok(assignment)
}

/// Mark the instance's open PENDING assignment COMPLETED. Called when the
/// assignee takes a terminating action at their step.
pub async fn close_open_assignment(conn: &mut PgConnection, instance_id: Uuid) -> ApiResult<()> {
    sqlx::query(
        r#"
        UPDATE workflow_step_assignments
        SET status = $2, completed_at = $3
        WHERE instance_id = $1 AND status = $4
        "#,
    )
    .bind(instance_id)
    .bind(AssignmentStatus::Completed)
    .bind(Utc::now())
    .bind(AssignmentStatus::Pending)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
