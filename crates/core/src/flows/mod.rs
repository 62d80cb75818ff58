pub mod definition;
pub mod engine;
pub mod history;
pub mod store;

pub use definition::{
    DefinitionError, InMemoryWorkflowDefinitionStore, TransitionRule, WorkflowDefinition,
    WorkflowDefinitionStore,
};
pub use engine::{RequestWorkflowEngine, SYSTEM_ACTOR};
pub use history::{verify_history, HistoryVerification};
pub use store::{InMemoryWorkflowStateStore, WorkflowStateStore};
