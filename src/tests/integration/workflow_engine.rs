// End-to-end workflow engine tests against a real database

use serde_json::json;
use serial_test::serial;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{InstanceStatus, WorkflowActionType};
use crate::tests::fixtures::*;
use crate::tests::TestContext;
use crate::workflows::{self, ActionSubmission, CreateTemplateRequest, TransitionInput};

fn approve() -> ActionSubmission {
    ActionSubmission {
        action_type: WorkflowActionType::Approve,
        comments: None,
        data_modifications: None,
    }
}

fn reject(comment: &str) -> ActionSubmission {
    ActionSubmission {
        action_type: WorkflowActionType::Reject,
        comments: Some(comment.to_string()),
        data_modifications: None,
    }
}

async fn count(pool: &sqlx::PgPool, sql: &str, id: Uuid) -> i64 {
    sqlx::query_scalar::<_, i64>(sql)
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("count query failed")
}

#[tokio::test]
#[serial]
async fn test_create_template_persists_full_graph() {
    let ctx = TestContext::new().await;
    let (role1, _) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;
    let (role2, _) = seed_role_with_member(&ctx.db_pool, "finance", "f@test.io").await;

    let graph = workflows::create_template(&ctx.db_pool, two_step_template(role1, role2))
        .await
        .unwrap();

    assert!(graph.template.is_active);
    assert_eq!(graph.steps.len(), 2);
    assert_eq!(graph.transitions.len(), 1);

    // First step rejects back to itself
    assert_eq!(graph.steps[0].rejection_step_id, Some(graph.steps[0].id));

    let fetched = workflows::get_template(&ctx.db_pool, graph.template.id)
        .await
        .unwrap();
    assert_eq!(fetched.steps.len(), 2);
    assert_eq!(fetched.steps[0].step_order, 1);
    assert_eq!(fetched.transitions[0].from_step_id, graph.steps[0].id);
    assert_eq!(fetched.transitions[0].to_step_id, graph.steps[1].id);
}

#[tokio::test]
#[serial]
async fn test_create_template_with_unknown_role_writes_nothing() {
    let ctx = TestContext::new().await;

    let req = single_step_template(Uuid::new_v4());
    let err = workflows::create_template(&ctx.db_pool, req).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError { .. }));

    let templates = workflows::list_templates(&ctx.db_pool).await.unwrap();
    assert!(templates.is_empty());
}

#[tokio::test]
#[serial]
async fn test_start_workflow_enters_first_step() {
    let ctx = TestContext::new().await;
    let (role1, user1) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;
    let (role2, _) = seed_role_with_member(&ctx.db_pool, "finance", "f@test.io").await;

    let graph = workflows::create_template(&ctx.db_pool, two_step_template(role1, role2))
        .await
        .unwrap();

    let instance = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "42".to_string(),
    )
    .await
    .unwrap();

    assert_eq!(instance.status, InstanceStatus::Active);
    assert_eq!(instance.current_step_order, 1);
    assert_eq!(instance.current_assignee, Some(user1));
    assert_eq!(instance.entity_type, "invoice");

    let pending = count(
        &ctx.db_pool,
        "SELECT COUNT(*) FROM workflow_step_assignments WHERE instance_id = $1 AND status = 'pending'",
        instance.id,
    )
    .await;
    assert_eq!(pending, 1);
}

#[tokio::test]
#[serial]
async fn test_start_workflow_without_eligible_assignee_creates_nothing() {
    let ctx = TestContext::new().await;
    let (role1, _) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;
    // Role exists but has no members
    let empty_role = seed_role(&ctx.db_pool, "auditor").await;

    let mut req = two_step_template(role1, empty_role);
    req.steps[0].role_id = empty_role;
    let graph = workflows::create_template(&ctx.db_pool, req).await.unwrap();

    let err = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "42".to_string(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NoEligibleAssignee { .. }));

    let instances = count(
        &ctx.db_pool,
        "SELECT COUNT(*) FROM workflow_instances WHERE template_id = $1",
        graph.template.id,
    )
    .await;
    assert_eq!(instances, 0);
}

#[tokio::test]
#[serial]
async fn test_start_workflow_on_missing_template_is_not_found() {
    let ctx = TestContext::new().await;
    let err = workflows::start_instance(
        &ctx.db_pool,
        Uuid::new_v4(),
        "invoice".to_string(),
        "42".to_string(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test]
#[serial]
async fn test_approve_then_self_rejection_loop() {
    // S1 rejects back to itself, S1 -> S2 unconditioned. Approve at S1 moves
    // to S2; reject at S2 is terminal (no target); reject at S1 loops.
    let ctx = TestContext::new().await;
    let (role1, user1) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;
    let (role2, user2) = seed_role_with_member(&ctx.db_pool, "finance", "f@test.io").await;

    let mut req = two_step_template(role1, role2);
    // Route finance rejections back to the manager step
    req.steps[1].rejection_step_order = Some(1);
    let graph = workflows::create_template(&ctx.db_pool, req).await.unwrap();
    let s1 = graph.steps[0].id;

    let instance = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "42".to_string(),
    )
    .await
    .unwrap();

    let outcome = workflows::take_action(&ctx.db_pool, instance.id, user1, approve())
        .await
        .unwrap();
    assert_eq!(outcome.instance.status, InstanceStatus::Active);
    assert_eq!(outcome.instance.current_step_order, 2);
    assert_eq!(outcome.instance.current_assignee, Some(user2));

    let outcome = workflows::take_action(&ctx.db_pool, instance.id, user2, reject("send back"))
        .await
        .unwrap();
    assert_eq!(outcome.instance.status, InstanceStatus::Active);
    assert_eq!(outcome.instance.current_step_order, 1);
    assert_eq!(outcome.instance.current_assignee, Some(user1));

    // The first step was visited twice: two assignment rows for it
    let s1_assignments = count(
        &ctx.db_pool,
        "SELECT COUNT(*) FROM workflow_step_assignments WHERE step_id = $1",
        s1,
    )
    .await;
    assert_eq!(s1_assignments, 2);

    // Exactly one assignment is still pending
    let pending = count(
        &ctx.db_pool,
        "SELECT COUNT(*) FROM workflow_step_assignments WHERE instance_id = $1 AND status = 'pending'",
        instance.id,
    )
    .await;
    assert_eq!(pending, 1);
}

#[tokio::test]
#[serial]
async fn test_single_step_approval_completes() {
    let ctx = TestContext::new().await;
    let (role, user) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;

    let graph = workflows::create_template(&ctx.db_pool, single_step_template(role))
        .await
        .unwrap();
    let instance = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "7".to_string(),
    )
    .await
    .unwrap();

    let outcome = workflows::take_action(&ctx.db_pool, instance.id, user, approve())
        .await
        .unwrap();
    assert_eq!(outcome.instance.status, InstanceStatus::Completed);
    assert_eq!(outcome.instance.current_assignee, None);
    assert!(outcome.instance.completed_at.is_some());

    let pending = count(
        &ctx.db_pool,
        "SELECT COUNT(*) FROM workflow_step_assignments WHERE instance_id = $1 AND status = 'pending'",
        instance.id,
    )
    .await;
    assert_eq!(pending, 0);
}

#[tokio::test]
#[serial]
async fn test_reject_without_target_is_terminal() {
    let ctx = TestContext::new().await;
    let (role, user) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;

    let graph = workflows::create_template(&ctx.db_pool, single_step_template(role))
        .await
        .unwrap();
    let instance = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "7".to_string(),
    )
    .await
    .unwrap();

    let outcome = workflows::take_action(&ctx.db_pool, instance.id, user, reject("no"))
        .await
        .unwrap();
    assert_eq!(outcome.instance.status, InstanceStatus::Rejected);
    assert_eq!(outcome.instance.current_assignee, None);
    assert!(outcome.instance.completed_at.is_some());
}

#[tokio::test]
#[serial]
async fn test_closed_instance_refuses_actions_and_writes_no_audit_row() {
    let ctx = TestContext::new().await;
    let (role, user) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;

    let graph = workflows::create_template(&ctx.db_pool, single_step_template(role))
        .await
        .unwrap();
    let instance = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "7".to_string(),
    )
    .await
    .unwrap();

    workflows::take_action(&ctx.db_pool, instance.id, user, approve())
        .await
        .unwrap();

    let err = workflows::take_action(&ctx.db_pool, instance.id, user, approve())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InstanceClosed { .. }));

    let actions = workflows::list_actions(&ctx.db_pool, instance.id).await.unwrap();
    assert_eq!(actions.len(), 1);

    // Status never leaves the terminal state
    let detail = workflows::fetch_instance_detail(&ctx.db_pool, instance.id)
        .await
        .unwrap();
    assert_eq!(detail.status, InstanceStatus::Completed);
}

#[tokio::test]
#[serial]
async fn test_only_current_assignee_may_act() {
    let ctx = TestContext::new().await;
    let (role, _user) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;
    let outsider = seed_user(&ctx.db_pool, "x@test.io", "x@test.io").await;

    let graph = workflows::create_template(&ctx.db_pool, single_step_template(role))
        .await
        .unwrap();
    let instance = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "7".to_string(),
    )
    .await
    .unwrap();

    let err = workflows::take_action(&ctx.db_pool, instance.id, outsider, approve())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnauthorizedAction { .. }));

    let actions = workflows::list_actions(&ctx.db_pool, instance.id).await.unwrap();
    assert!(actions.is_empty());
}

#[tokio::test]
#[serial]
async fn test_modify_permission_gate() {
    let ctx = TestContext::new().await;
    let (role, user) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;

    // can_modify defaults to false
    let locked = workflows::create_template(&ctx.db_pool, single_step_template(role))
        .await
        .unwrap();
    let instance = workflows::start_instance(
        &ctx.db_pool,
        locked.template.id,
        "invoice".to_string(),
        "7".to_string(),
    )
    .await
    .unwrap();

    let modify = ActionSubmission {
        action_type: WorkflowActionType::Modify,
        comments: None,
        data_modifications: Some(json!({"amount": 99})),
    };

    let err = workflows::take_action(&ctx.db_pool, instance.id, user, modify.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ForbiddenAction { .. }));
    let actions = workflows::list_actions(&ctx.db_pool, instance.id).await.unwrap();
    assert!(actions.is_empty());

    // Same shape with modifications allowed: the instance holds its step and
    // the payload is surfaced to the caller.
    let mut req = single_step_template(role);
    req.steps[0].can_modify = true;
    let open = workflows::create_template(&ctx.db_pool, req).await.unwrap();
    let instance = workflows::start_instance(
        &ctx.db_pool,
        open.template.id,
        "invoice".to_string(),
        "8".to_string(),
    )
    .await
    .unwrap();

    let outcome = workflows::take_action(&ctx.db_pool, instance.id, user, modify)
        .await
        .unwrap();
    assert_eq!(outcome.instance.status, InstanceStatus::Active);
    assert_eq!(outcome.instance.current_step_order, 1);
    assert_eq!(outcome.instance.current_assignee, Some(user));
    assert_eq!(outcome.data_modifications, Some(json!({"amount": 99})));

    let actions = workflows::list_actions(&ctx.db_pool, instance.id).await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action_type, WorkflowActionType::Modify);
}

#[tokio::test]
#[serial]
async fn test_audit_trail_is_monotonic() {
    let ctx = TestContext::new().await;
    let (role1, user1) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;
    let (role2, user2) = seed_role_with_member(&ctx.db_pool, "finance", "f@test.io").await;

    let mut req = two_step_template(role1, role2);
    req.steps[1].rejection_step_order = Some(1);
    let graph = workflows::create_template(&ctx.db_pool, req).await.unwrap();
    let instance = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "42".to_string(),
    )
    .await
    .unwrap();

    workflows::take_action(&ctx.db_pool, instance.id, user1, approve())
        .await
        .unwrap();
    workflows::take_action(&ctx.db_pool, instance.id, user2, reject("back"))
        .await
        .unwrap();
    workflows::take_action(&ctx.db_pool, instance.id, user1, approve())
        .await
        .unwrap();

    let actions = workflows::list_actions(&ctx.db_pool, instance.id).await.unwrap();
    assert_eq!(actions.len(), 3);
    for pair in actions.windows(2) {
        assert!(pair[0].created_at < pair[1].created_at);
    }
    assert_eq!(actions[0].action_type, WorkflowActionType::Approve);
    assert_eq!(actions[1].action_type, WorkflowActionType::Reject);
}

#[tokio::test]
#[serial]
async fn test_conditional_branching_follows_first_satisfied_transition() {
    let ctx = TestContext::new().await;
    let (role1, user1) = seed_role_with_member(&ctx.db_pool, "clerk", "c@test.io").await;
    let (role2, _) = seed_role_with_member(&ctx.db_pool, "director", "d@test.io").await;
    let (role3, _) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;

    // Large amounts go to the director, everything else to the manager.
    let req = CreateTemplateRequest {
        name: "Amount routed approval".to_string(),
        description: None,
        steps: vec![
            step("Intake", 1, role1),
            step("Director review", 2, role2),
            step("Manager review", 3, role3),
        ],
        transitions: vec![
            TransitionInput {
                from_step_order: 1,
                to_step_order: 2,
                condition_type: Some("field_greater_than".to_string()),
                condition_value: Some(json!({"field": "amount", "value": 1000.0})),
            },
            transition(1, 3),
        ],
    };
    let graph = workflows::create_template(&ctx.db_pool, req).await.unwrap();

    let approve_with = |amount: i64| ActionSubmission {
        action_type: WorkflowActionType::Approve,
        comments: None,
        data_modifications: Some(json!({ "amount": amount })),
    };

    let big = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "expense".to_string(),
        "1".to_string(),
    )
    .await
    .unwrap();
    let outcome = workflows::take_action(&ctx.db_pool, big.id, user1, approve_with(5000))
        .await
        .unwrap();
    assert_eq!(outcome.instance.current_step_order, 2);

    let small = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "expense".to_string(),
        "2".to_string(),
    )
    .await
    .unwrap();
    let outcome = workflows::take_action(&ctx.db_pool, small.id, user1, approve_with(50))
        .await
        .unwrap();
    assert_eq!(outcome.instance.current_step_order, 3);
}

#[tokio::test]
#[serial]
async fn test_assignee_resolution_is_deterministic() {
    let ctx = TestContext::new().await;
    let role = seed_role(&ctx.db_pool, "manager").await;
    let a = seed_user(&ctx.db_pool, "a@test.io", "a@test.io").await;
    let b = seed_user(&ctx.db_pool, "b@test.io", "b@test.io").await;
    grant_role(&ctx.db_pool, a, role).await;
    grant_role(&ctx.db_pool, b, role).await;

    let graph = workflows::create_template(&ctx.db_pool, single_step_template(role))
        .await
        .unwrap();

    let expected = a.min(b);
    for n in 0..3 {
        let instance = workflows::start_instance(
            &ctx.db_pool,
            graph.template.id,
            "invoice".to_string(),
            n.to_string(),
        )
        .await
        .unwrap();
        assert_eq!(instance.current_assignee, Some(expected));
    }
}

#[tokio::test]
#[serial]
async fn test_deactivated_template_refuses_new_starts_only() {
    let ctx = TestContext::new().await;
    let (role, user) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;

    let graph = workflows::create_template(&ctx.db_pool, single_step_template(role))
        .await
        .unwrap();
    let running = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "7".to_string(),
    )
    .await
    .unwrap();

    workflows::deactivate_template(&ctx.db_pool, graph.template.id)
        .await
        .unwrap();

    let err = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "8".to_string(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::ValidationError { .. }));

    // The running instance keeps working
    let outcome = workflows::take_action(&ctx.db_pool, running.id, user, approve())
        .await
        .unwrap();
    assert_eq!(outcome.instance.status, InstanceStatus::Completed);
}

#[tokio::test]
#[serial]
async fn test_assigned_workflows_projection() {
    let ctx = TestContext::new().await;
    let (role, user) = seed_role_with_member(&ctx.db_pool, "manager", "m@test.io").await;

    let graph = workflows::create_template(&ctx.db_pool, single_step_template(role))
        .await
        .unwrap();

    let first = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "1".to_string(),
    )
    .await
    .unwrap();
    let second = workflows::start_instance(
        &ctx.db_pool,
        graph.template.id,
        "invoice".to_string(),
        "2".to_string(),
    )
    .await
    .unwrap();

    let assigned = workflows::assigned_to(&ctx.db_pool, user, None).await.unwrap();
    assert_eq!(assigned.len(), 2);
    // Ordered by creation time
    assert_eq!(assigned[0].id, first.id);
    assert_eq!(assigned[1].id, second.id);
    assert_eq!(assigned[0].template_name, "Single approval");
    assert_eq!(assigned[0].current_assignee_name.as_deref(), Some("m@test.io"));

    let active = workflows::assigned_to(&ctx.db_pool, user, Some(InstanceStatus::Active))
        .await
        .unwrap();
    assert_eq!(active.len(), 2);

    // Completing one removes it from the assignee's queue
    workflows::take_action(&ctx.db_pool, first.id, user, approve())
        .await
        .unwrap();
    let assigned = workflows::assigned_to(&ctx.db_pool, user, None).await.unwrap();
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0].id, second.id);
}
