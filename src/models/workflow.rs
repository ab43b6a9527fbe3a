use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A reusable approval workflow definition. Immutable once published:
/// deactivation only refuses new instances, running ones keep working.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One step of a template. `step_order` is unique within the template and
/// defines the default sequence; order 1 is the entry step.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    pub step_order: i32,
    pub role_id: Uuid,
    pub mandatory: bool,
    pub can_modify: bool,
    /// Where REJECT routes to; terminal rejection when absent.
    pub rejection_step_id: Option<Uuid>,
}

/// Directed edge between two steps of the same template. Edges from a step
/// are evaluated in ascending id order; the first satisfied edge wins.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowStepTransition {
    pub id: Uuid,
    pub from_step_id: Uuid,
    pub to_step_id: Uuid,
    pub condition_type: Option<String>,
    pub condition_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "workflow_instance_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Completed,
    Rejected,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "assignment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "workflow_action_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowActionType {
    Approve,
    Reject,
    Modify,
}

/// A running copy of a template, governing one external business entity.
/// While active, `current_step_id` belongs to the template and
/// `current_assignee` holds that step's role; the assignee is cleared in
/// terminal states.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub template_id: Uuid,
    pub current_step_id: Uuid,
    pub current_assignee: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: String,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Append-only assignment history. A step visited twice produces two rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowStepAssignment {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub step_id: Uuid,
    pub assignee_id: Uuid,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One immutable audit row per accepted action submission.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowAction {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub step_id: Uuid,
    pub actor_id: Uuid,
    pub action_type: WorkflowActionType,
    pub comments: Option<String>,
    pub data_modifications: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Instance enriched with template, current step and assignee names, the
/// shape the read endpoints return.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowInstanceDetail {
    pub id: Uuid,
    pub template_id: Uuid,
    pub template_name: String,
    pub current_step_id: Uuid,
    pub current_step_name: String,
    pub current_step_order: i32,
    pub current_assignee: Option<Uuid>,
    pub current_assignee_name: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
