// Transition engine - decides where an instance goes next
//
// Pure decision core: no storage access. The instance manager fetches the
// current step and its outgoing transitions, asks for a decision, then
// applies it.

use serde_json::Value as JsonValue;

use super::conditions::{ConditionContext, TransitionCondition};
use crate::error::{ApiResult, AppError};
use crate::models::{WorkflowActionType, WorkflowInstance, WorkflowStep, WorkflowStepTransition};

/// Outcome of evaluating an action against the instance's current step.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStepDecision {
    /// Move to this step and resolve a fresh assignee for it.
    Advance(uuid::Uuid),
    /// Rejection routed back to a configured step; the instance stays active.
    RejectTo(uuid::Uuid),
    /// The workflow ends.
    Terminal(TerminalOutcome),
    /// No movement: the action is recorded and the step keeps its assignee.
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    Rejected,
}

/// Compute the next-step decision for an action against `step`.
///
/// `outgoing` holds the step's outgoing transitions; they are evaluated in
/// ascending id order and the first satisfied one wins. A transition with no
/// condition is always satisfied. Conditions were validated at template
/// creation, so a stored condition failing to parse here is a data-integrity
/// error, not a caller error.
pub fn compute_next(
    instance: &WorkflowInstance,
    step: &WorkflowStep,
    outgoing: &[WorkflowStepTransition],
    action_type: WorkflowActionType,
    data_modifications: &JsonValue,
) -> ApiResult<NextStepDecision> {
    match action_type {
        WorkflowActionType::Reject => Ok(match step.rejection_step_id {
            Some(target) => NextStepDecision::RejectTo(target),
            None => NextStepDecision::Terminal(TerminalOutcome::Rejected),
        }),
        WorkflowActionType::Approve => {
            let ctx = ConditionContext {
                entity_type: &instance.entity_type,
                data: data_modifications,
            };

            let mut ordered: Vec<&WorkflowStepTransition> = outgoing.iter().collect();
            ordered.sort_by_key(|t| t.id);

            for transition in ordered {
                if transition_satisfied(transition, &ctx)? {
                    return Ok(NextStepDecision::Advance(transition.to_step_id));
                }
            }
            Ok(NextStepDecision::Terminal(TerminalOutcome::Completed))
        }
        WorkflowActionType::Modify => {
            if !step.can_modify {
                return Err(AppError::ForbiddenAction {
                    instance_id: instance.id,
                    reason: format!("step '{}' does not permit modifications", step.name),
                });
            }
            Ok(NextStepDecision::Hold)
        }
    }
}

fn transition_satisfied(
    transition: &WorkflowStepTransition,
    ctx: &ConditionContext,
) -> ApiResult<bool> {
    let Some(kind) = transition.condition_type.as_deref() else {
        return Ok(true);
    };

    let condition = TransitionCondition::parse(kind, transition.condition_value.as_ref())
        .map_err(|e| {
            AppError::InternalError(format!(
                "stored condition on transition {} is invalid: {}",
                transition.id, e
            ))
        })?;

    Ok(condition.evaluate(ctx))
}
