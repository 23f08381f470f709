use crate::errors::OrchestrationError;

/// A value that was either parsed from model output or substituted after a
/// recoverable failure.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution<T> {
    Parsed(T),
    Fallback { value: T, reason: OrchestrationError },
}

impl<T> Resolution<T> {
    pub fn fallback(value: T, reason: OrchestrationError) -> Self {
        Self::Fallback { value, reason }
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Parsed(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Parsed(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn fallback_reason(&self) -> Option<&OrchestrationError> {
        match self {
            Self::Parsed(_) => None,
            Self::Fallback { reason, .. } => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolution<U> {
        match self {
            Self::Parsed(value) => Resolution::Parsed(f(value)),
            Self::Fallback { value, reason } => Resolution::Fallback { value: f(value), reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Resolution;
    use crate::errors::OrchestrationError;

    #[test]
    fn fallback_keeps_value_and_reason() {
        let resolved = Resolution::fallback(3, OrchestrationError::EvaluationParse("eof".into()));

        assert!(resolved.is_fallback());
        assert_eq!(*resolved.value(), 3);
        assert_eq!(
            resolved.fallback_reason().map(OrchestrationError::kind),
            Some("evaluation_parse")
        );
        assert_eq!(resolved.map(|value| value * 2).into_value(), 6);
    }

    #[test]
    fn parsed_has_no_reason() {
        let resolved = Resolution::Parsed("ok");

        assert!(!resolved.is_fallback());
        assert!(resolved.fallback_reason().is_none());
    }
}
