pub mod engine;
pub mod states;

pub use engine::{FlowTransitionError, WorkflowMachine, WorkflowTrace};
pub use states::{TransitionOutcome, WorkflowEvent, WorkflowState};
