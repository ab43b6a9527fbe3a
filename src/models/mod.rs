pub mod users;
pub mod workflow;

pub use users::{Role, User};
pub use workflow::{
    AssignmentStatus, InstanceStatus, WorkflowAction, WorkflowActionType, WorkflowInstance,
    WorkflowInstanceDetail, WorkflowStep, WorkflowStepAssignment, WorkflowStepTransition,
    WorkflowTemplate,
};
