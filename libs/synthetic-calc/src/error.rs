//! Error types for synthetic-calc

use crate::alternate_state::AlternateState;
use thiserror::Error;

/// Signal raised when a formula cannot produce a usable value.
///
/// This is data, not a bug report: the caller is expected to publish the
/// carried [`AlternateState`] instead of a value.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct AlternateStateDetected {
    /// Alternate state the formula resolves to
    pub state: AlternateState,
    /// Human readable description
    pub message: String,
    /// Underlying expression failure, set only when the delegated evaluator failed
    pub cause: Option<String>,
}

impl AlternateStateDetected {
    /// A referenced input holds an alternate state
    pub fn input(state: AlternateState, variable: &str) -> Self {
        Self {
            state,
            message: format!("Variable '{}' is {}", variable, state),
            cause: None,
        }
    }

    /// The evaluated result itself is an alternate state
    pub fn result(state: AlternateState) -> Self {
        Self {
            state,
            message: format!("Formula result is {}", state),
            cause: None,
        }
    }

    /// The delegated expression evaluator failed
    pub fn evaluation_failure(cause: impl Into<String>) -> Self {
        let cause = cause.into();
        Self {
            state: AlternateState::None,
            message: format!("Formula evaluation failed: {}", cause),
            cause: Some(cause),
        }
    }

    /// Whether this signal originated in a failed expression evaluation
    pub fn is_evaluation_failure(&self) -> bool {
        self.cause.is_some()
    }
}

/// Calculation errors
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported comparison: {left} {operator} {right}")]
    UnsupportedComparison {
        left: String,
        operator: String,
        right: String,
    },

    #[error("Cannot categorize value: {0}")]
    Categorization(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Could not resolve computed variables: {}", remaining.join(", "))]
    UnresolvedVariables { remaining: Vec<String> },

    #[error("Computed variable resolution exceeded {passes} passes, still pending: {}", remaining.join(", "))]
    PassLimitExceeded {
        passes: usize,
        remaining: Vec<String>,
    },

    #[error("Computed variable '{name}' failed: {message}")]
    ComputedVariable { name: String, message: String },

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    AlternateState(#[from] AlternateStateDetected),
}

impl CalcError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unsupported_comparison(
        left: impl ToString,
        operator: impl ToString,
        right: impl ToString,
    ) -> Self {
        Self::UnsupportedComparison {
            left: left.to_string(),
            operator: operator.to_string(),
            right: right.to_string(),
        }
    }

    pub fn categorization(msg: impl Into<String>) -> Self {
        Self::Categorization(msg.into())
    }

    pub fn missing_dependency(name: impl Into<String>) -> Self {
        Self::MissingDependency(name.into())
    }

    pub fn expression(msg: impl Into<String>) -> Self {
        Self::Expression(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Alternate state carried by this error, if any
    pub fn alternate_state(&self) -> Option<AlternateState> {
        match self {
            Self::AlternateState(detected) => Some(detected.state),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CalcError>;

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_failure_message() {
        let err = AlternateStateDetected::evaluation_failure("division by zero");
        assert_eq!(err.state, AlternateState::None);
        assert_eq!(err.to_string(), "Formula evaluation failed: division by zero");
        assert!(err.is_evaluation_failure());
    }

    #[test]
    fn test_input_signal_is_not_evaluation_failure() {
        let err = AlternateStateDetected::input(AlternateState::Unavailable, "power");
        assert!(!err.is_evaluation_failure());
        assert!(err.message.contains("power"));
    }

    #[test]
    fn test_unresolved_variables_lists_names() {
        let err = CalcError::UnresolvedVariables {
            remaining: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Could not resolve computed variables: a, b");
    }

    #[test]
    fn test_alternate_state_passthrough() {
        let err: CalcError = AlternateStateDetected::result(AlternateState::Unknown).into();
        assert_eq!(err.alternate_state(), Some(AlternateState::Unknown));
        assert_eq!(CalcError::validation("x").alternate_state(), None);
    }
}
