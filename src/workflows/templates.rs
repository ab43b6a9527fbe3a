// Template store - workflow definitions and their step/transition graphs

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use super::conditions::TransitionCondition;
use crate::error::{ApiResult, AppError, ValidationBuilder};
use crate::models::{WorkflowStep, WorkflowStepTransition, WorkflowTemplate};

/// Template creation payload. Steps and transitions arrive together and are
/// validated as a unit. Persisted step ids do not exist yet, so
/// `rejection_step_order`, `from_step_order` and `to_step_order` reference
/// steps by their (unique) `order` within this request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<StepInput>,
    #[serde(default)]
    pub transitions: Vec<TransitionInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInput {
    pub name: String,
    pub order: i32,
    pub role_id: Uuid,
    #[serde(default = "default_true")]
    pub mandatory: bool,
    #[serde(default)]
    pub can_modify: bool,
    pub rejection_step_order: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionInput {
    pub from_step_order: i32,
    pub to_step_order: i32,
    pub condition_type: Option<String>,
    pub condition_value: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// A template with its full step/transition graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateGraph {
    pub template: WorkflowTemplate,
    pub steps: Vec<WorkflowStep>,
    pub transitions: Vec<WorkflowStepTransition>,
}

/// Structural validation of a creation request. Pure: nothing is read or
/// written. Role existence is checked separately, inside the creation
/// transaction.
pub fn validate_graph(req: &CreateTemplateRequest) -> ApiResult<()> {
    let mut errors = ValidationBuilder::new();

    if req.name.trim().is_empty() {
        errors.push("name", "name is required");
    }
    if req.steps.is_empty() {
        errors.push("steps", "at least one step is required");
    }

    let mut orders = std::collections::HashSet::new();
    for step in &req.steps {
        if step.name.trim().is_empty() {
            errors.push("steps", format!("step {} has an empty name", step.order));
        }
        if !orders.insert(step.order) {
            errors.push("steps", format!("duplicate step order {}", step.order));
        }
    }

    for step in &req.steps {
        if let Some(target) = step.rejection_step_order {
            if !orders.contains(&target) {
                errors.push(
                    "steps",
                    format!(
                        "step {} rejects to order {}, which is not part of this template",
                        step.order, target
                    ),
                );
            }
        }
    }

    for (idx, transition) in req.transitions.iter().enumerate() {
        if !orders.contains(&transition.from_step_order) {
            errors.push(
                "transitions",
                format!(
                    "transition {} starts at order {}, which is not part of this template",
                    idx, transition.from_step_order
                ),
            );
        }
        if !orders.contains(&transition.to_step_order) {
            errors.push(
                "transitions",
                format!(
                    "transition {} ends at order {}, which is not part of this template",
                    idx, transition.to_step_order
                ),
            );
        }

        match (&transition.condition_type, &transition.condition_value) {
            (None, None) => {}
            (None, Some(_)) => {
                errors.push(
                    "transitions",
                    format!("transition {} has a condition payload but no condition type", idx),
                );
            }
            (Some(kind), value) => {
                if let Err(e) = TransitionCondition::parse(kind, value.as_ref()) {
                    errors.push("transitions", format!("transition {}: {}", idx, e));
                }
            }
        }
    }

    errors.finish()
}

/// Create a template with its steps and transitions in one transaction.
/// Partial templates are never observable.
pub async fn create_template(pool: &PgPool, req: CreateTemplateRequest) -> ApiResult<TemplateGraph> {
    validate_graph(&req)?;

    let mut tx = pool.begin().await?;

    let role_ids: Vec<Uuid> = {
        let mut ids: Vec<Uuid> = req.steps.iter().map(|s| s.role_id).collect();
        ids.sort();
        ids.dedup();
        ids
    };
    let known: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM roles WHERE id = ANY($1)")
        .bind(&role_ids)
        .fetch_all(&mut *tx)
        .await?;
    let mut errors = ValidationBuilder::new();
    for role_id in role_ids.iter().filter(|id| !known.contains(id)) {
        errors.push("steps", format!("role {} does not exist", role_id));
    }
    errors.finish()?;

    let template = WorkflowTemplate {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        description: req.description.clone(),
        is_active: true,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO workflow_templates (id, name, description, is_active, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(template.id)
    .bind(&template.name)
    .bind(&template.description)
    .bind(template.is_active)
    .bind(template.created_at)
    .execute(&mut *tx)
    .await?;

    // Step ids are generated up front so rejection pointers and transition
    // endpoints can be resolved from request orders.
    let id_by_order: HashMap<i32, Uuid> = req
        .steps
        .iter()
        .map(|s| (s.order, Uuid::new_v4()))
        .collect();

    // Rejection pointers are patched in after all steps exist: a step may
    // reject to one that has not been inserted yet.
    let mut steps = Vec::with_capacity(req.steps.len());
    for input in &req.steps {
        let step = WorkflowStep {
            id: id_by_order[&input.order],
            template_id: template.id,
            name: input.name.trim().to_string(),
            step_order: input.order,
            role_id: input.role_id,
            mandatory: input.mandatory,
            can_modify: input.can_modify,
            rejection_step_id: input.rejection_step_order.map(|o| id_by_order[&o]),
        };

        sqlx::query(
            r#"
            INSERT INTO workflow_steps
            (id, template_id, name, step_order, role_id, mandatory, can_modify)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(step.id)
        .bind(step.template_id)
        .bind(&step.name)
        .bind(step.step_order)
        .bind(step.role_id)
        .bind(step.mandatory)
        .bind(step.can_modify)
        .execute(&mut *tx)
        .await?;

        steps.push(step);
    }

    for step in steps.iter().filter(|s| s.rejection_step_id.is_some()) {
        sqlx::query("UPDATE workflow_steps SET rejection_step_id = $2 WHERE id = $1")
            .bind(step.id)
            .bind(step.rejection_step_id)
            .execute(&mut *tx)
            .await?;
    }

    // Outgoing transitions are evaluated in ascending id order, so ids are
    // handed out pre-sorted: evaluation priority follows the order the
    // transitions were supplied in.
    let mut transition_ids: Vec<Uuid> =
        (0..req.transitions.len()).map(|_| Uuid::new_v4()).collect();
    transition_ids.sort();

    let mut transitions = Vec::with_capacity(req.transitions.len());
    for (input, id) in req.transitions.iter().zip(transition_ids) {
        let transition = WorkflowStepTransition {
            id,
            from_step_id: id_by_order[&input.from_step_order],
            to_step_id: id_by_order[&input.to_step_order],
            condition_type: input.condition_type.clone(),
            condition_value: input.condition_value.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO workflow_step_transitions
            (id, from_step_id, to_step_id, condition_type, condition_value)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(transition.id)
        .bind(transition.from_step_id)
        .bind(transition.to_step_id)
        .bind(&transition.condition_type)
        .bind(&transition.condition_value)
        .execute(&mut *tx)
        .await?;

        transitions.push(transition);
    }

    tx.commit().await?;

    steps.sort_by_key(|s| s.step_order);
    tracing::info!(
        "Created workflow template '{}' with {} steps",
        template.name,
        steps.len()
    );

    Ok(TemplateGraph {
        template,
        steps,
        transitions,
    })
}

pub async fn list_templates(pool: &PgPool) -> ApiResult<Vec<WorkflowTemplate>> {
    let templates = sqlx::query_as::<_, WorkflowTemplate>(
        r#"
        SELECT id, name, description, is_active, created_at
        FROM workflow_templates
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(templates)
}

/// A template with its ordered steps and their transitions, fetched as
/// separate lookups composed here.
pub async fn get_template(pool: &PgPool, template_id: Uuid) -> ApiResult<TemplateGraph> {
    let mut conn = pool.acquire().await?;

    let template = fetch_template(&mut conn, template_id).await?;
    let steps = fetch_steps(&mut conn, template_id).await?;

    let step_ids: Vec<Uuid> = steps.iter().map(|s| s.id).collect();
    let transitions = sqlx::query_as::<_, WorkflowStepTransition>(
        r#"
        SELECT id, from_step_id, to_step_id, condition_type, condition_value
        FROM workflow_step_transitions
        WHERE from_step_id = ANY($1)
        ORDER BY id ASC
        "#,
    )
    .bind(&step_ids)
    .fetch_all(&mut *conn)
    .await?;

    Ok(TemplateGraph {
        template,
        steps,
        transitions,
    })
}

/// Refuse new instances of this template. Running instances are unaffected.
pub async fn deactivate_template(pool: &PgPool, template_id: Uuid) -> ApiResult<WorkflowTemplate> {
    let result = sqlx::query("UPDATE workflow_templates SET is_active = FALSE WHERE id = $1")
        .bind(template_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Workflow template", template_id));
    }

    tracing::info!("Deactivated workflow template {}", template_id);

    let mut conn = pool.acquire().await?;
    fetch_template(&mut conn, template_id).await
}

pub async fn fetch_template(
    conn: &mut PgConnection,
    template_id: Uuid,
) -> ApiResult<WorkflowTemplate> {
    let template = sqlx::query_as::<_, WorkflowTemplate>(
        r#"
        SELECT id, name, description, is_active, created_at
        FROM workflow_templates
        WHERE id = $1
        "#,
    )
    .bind(template_id)
    .fetch_optional(&mut *conn)
    .await?;

    template.ok_or(AppError::not_found("Workflow template", template_id))
}

pub async fn fetch_steps(
    conn: &mut PgConnection,
    template_id: Uuid,
) -> ApiResult<Vec<WorkflowStep>> {
    let steps = sqlx::query_as::<_, WorkflowStep>(
        r#"
        SELECT id, template_id, name, step_order, role_id, mandatory, can_modify, rejection_step_id
        FROM workflow_steps
        WHERE template_id = $1
        ORDER BY step_order ASC
        "#,
    )
    .bind(template_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(steps)
}

pub async fn fetch_step(conn: &mut PgConnection, step_id: Uuid) -> ApiResult<WorkflowStep> {
    let step = sqlx::query_as::<_, WorkflowStep>(
        r#"
        SELECT id, template_id, name, step_order, role_id, mandatory, can_modify, rejection_step_id
        FROM workflow_steps
        WHERE id = $1
        "#,
    )
    .bind(step_id)
    .fetch_optional(&mut *conn)
    .await?;

    step.ok_or(AppError::not_found("Workflow step", step_id))
}

/// The step a new instance starts at: order 1.
pub async fn fetch_entry_step(
    conn: &mut PgConnection,
    template_id: Uuid,
) -> ApiResult<WorkflowStep> {
    let step = sqlx::query_as::<_, WorkflowStep>(
        r#"
        SELECT id, template_id, name, step_order, role_id, mandatory, can_modify, rejection_step_id
        FROM workflow_steps
        WHERE template_id = $1 AND step_order = 1
        "#,
    )
    .bind(template_id)
    .fetch_optional(&mut *conn)
    .await?;

    step.ok_or(AppError::not_found("Entry step for template", template_id))
}

/// Outgoing transitions of a step in evaluation order (ascending id).
pub async fn fetch_outgoing_transitions(
    conn: &mut PgConnection,
    step_id: Uuid,
) -> ApiResult<Vec<WorkflowStepTransition>> {
    let transitions = sqlx::query_as::<_, WorkflowStepTransition>(
        r#"
        SELECT id, from_step_id, to_step_id, condition_type, condition_value
        FROM workflow_step_transitions
        WHERE from_step_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(step_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(transitions)
}
