use serde::{Deserialize, Serialize};

use crate::domain::classification::ExecutionStrategy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Start,
    SingleStage,
    MultiStage,
    Iterative,
    ResponseSynthesis,
    Done,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    StrategySelected(ExecutionStrategy),
    /// The direct tool answered; follow-up tools run on its rows as a
    /// single-stage pass.
    DirectToolAnswered,
    StagesCompleted,
    ToolFailed { tool: String },
    ResponseComposed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub event: WorkflowEvent,
}
