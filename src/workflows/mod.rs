// Approval workflow engine
//
// Templates define ordered, role-gated approval steps with a directed
// transition graph; instances walk that graph under approve/reject/modify
// actions, leaving an append-only audit trail.

pub mod actions;
pub mod assignments;
pub mod conditions;
pub mod engine;
pub mod instances;
pub mod templates;

pub use actions::{list_actions, record_action};
pub use assignments::{close_open_assignment, open_assignment, resolve_assignee};
pub use conditions::{ConditionContext, ConditionError, TransitionCondition};
pub use engine::{compute_next, NextStepDecision, TerminalOutcome};
pub use instances::{
    assigned_to, fetch_instance_detail, start_instance, take_action, ActionOutcome,
    ActionSubmission,
};
pub use templates::{
    create_template, deactivate_template, get_template, list_templates, CreateTemplateRequest,
    StepInput, TemplateGraph, TransitionInput,
};
