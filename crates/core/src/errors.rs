use thiserror::Error;

use crate::flows::FlowTransitionError;

/// Failure taxonomy of the orchestration path. Every variant except `Fatal`
/// is recovered where it occurs; they exist so degraded paths can be logged
/// and asserted on.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("classification response could not be parsed: {0}")]
    ClassificationParse(String),
    #[error("intermediate selection could not be parsed: {0}")]
    IntermediateSelection(String),
    #[error("evaluation response could not be parsed: {0}")]
    EvaluationParse(String),
    #[error("direct tool `{tool}` failed: {message}")]
    DirectTool { tool: String, message: String },
    #[error("tool `{tool}` failed: {message}")]
    ToolExecution { tool: String, message: String },
    #[error("{0}")]
    Fatal(String),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

impl OrchestrationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClassificationParse(_) => "classification_parse",
            Self::IntermediateSelection(_) => "intermediate_selection",
            Self::EvaluationParse(_) => "evaluation_parse",
            Self::DirectTool { .. } => "direct_tool",
            Self::ToolExecution { .. } => "tool_execution",
            Self::Fatal(_) => "fatal",
            Self::FlowTransition(_) => "flow_transition",
        }
    }

    /// Apology shown to the user when the request cannot be answered.
    pub fn apology(&self) -> String {
        format!("I'm sorry, I couldn't complete that request: {self}")
    }
}

/// Failures a transport surfaces as a status code. Orchestration failures
/// never appear here; they travel inside the answer payload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. } | Self::ServiceUnavailable { message, .. } => {
                message
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::InvalidRequest(message) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, InterfaceError, OrchestrationError};

    #[test]
    fn invalid_request_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::InvalidRequest("question must not be empty".to_owned())
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn apology_embeds_the_reason() {
        let error = OrchestrationError::Fatal("no such table: orders".to_owned());

        assert_eq!(error.kind(), "fatal");
        assert_eq!(
            error.apology(),
            "I'm sorry, I couldn't complete that request: no such table: orders"
        );
        let parse_error = OrchestrationError::EvaluationParse("eof".to_owned());
        assert_eq!(parse_error.kind(), "evaluation_parse");
    }
}
