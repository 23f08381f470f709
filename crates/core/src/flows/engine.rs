use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::classification::ExecutionStrategy;
use crate::flows::states::{TransitionOutcome, WorkflowEvent, WorkflowState};

/// Transition table for one request:
/// `Start -> {SingleStage | MultiStage | Iterative} -> ResponseSynthesis -> Done`.
/// A tool failure in any execution state moves to `ResponseSynthesis` so a
/// response is always produced from partial data.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkflowMachine;

impl WorkflowMachine {
    pub fn initial_state(&self) -> WorkflowState {
        WorkflowState::Start
    }

    pub fn apply(
        &self,
        current: WorkflowState,
        event: &WorkflowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        use WorkflowState::{Done, Iterative, MultiStage, ResponseSynthesis, SingleStage, Start};

        let to = match (current, event) {
            (Start, WorkflowEvent::StrategySelected(strategy)) => match strategy {
                ExecutionStrategy::SingleStage => SingleStage,
                ExecutionStrategy::MultiStage => MultiStage,
                ExecutionStrategy::Iterative => Iterative,
            },
            (Start, WorkflowEvent::DirectToolAnswered) => SingleStage,
            (SingleStage | MultiStage | Iterative, WorkflowEvent::StagesCompleted)
            | (SingleStage | MultiStage | Iterative, WorkflowEvent::ToolFailed { .. }) => {
                ResponseSynthesis
            }
            (ResponseSynthesis, WorkflowEvent::ResponseComposed) => Done,
            _ => {
                return Err(FlowTransitionError::InvalidTransition {
                    state: current,
                    event: event.clone(),
                })
            }
        };

        Ok(TransitionOutcome { from: current, to, event: event.clone() })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid workflow transition from {state:?} using event {event:?}")]
    InvalidTransition { state: WorkflowState, event: WorkflowEvent },
}

/// Current state plus the transitions taken so far.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTrace {
    state: WorkflowState,
    transitions: Vec<TransitionOutcome>,
}

impl Default for WorkflowTrace {
    fn default() -> Self {
        Self { state: WorkflowMachine.initial_state(), transitions: Vec::new() }
    }
}

impl WorkflowTrace {
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn transitions(&self) -> &[TransitionOutcome] {
        &self.transitions
    }

    pub fn advance(&mut self, event: WorkflowEvent) -> Result<WorkflowState, FlowTransitionError> {
        let outcome = WorkflowMachine.apply(self.state, &event)?;
        self.state = outcome.to;
        self.transitions.push(outcome);
        Ok(self.state)
    }

    pub fn visited(&self) -> Vec<WorkflowState> {
        std::iter::once(WorkflowState::Start)
            .chain(self.transitions.iter().map(|outcome| outcome.to))
            .collect()
    }
}
