//! REST API handlers.

mod actions;
mod audit;
mod system;
mod workflows;

pub use actions::{decide_action, pending_actions};
pub use audit::list_audit;
pub use system::health_check;
pub use workflows::{
    create_workflow, execute_workflow, get_instance, get_workflow, list_instances,
    list_workflows, publish_workflow, start_workflow,
};
