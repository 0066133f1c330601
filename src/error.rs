//! Error types for the Turnstile admission engine.

use thiserror::Error;

use crate::admission::{Action, AdmissionResult};

/// Main error type for admission operations.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// Unknown action, missing rule, or an invalid rule/override.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The request was rejected by the action's rate policy.
    #[error("Admission denied for {action}: retry after {retry_after}s", retry_after = .result.retry_after.unwrap_or(0))]
    Denied {
        /// The action that was denied
        action: Action,
        /// The decision detail, including `retry_after`
        result: AdmissionResult,
    },

    /// Layered settings could not be loaded
    #[error("Settings error: {0}")]
    Settings(#[from] ::config::ConfigError),

    /// A YAML settings or rules document could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdmissionError {
    /// Whether this error is the expected "over limit" outcome rather than a fault.
    pub fn is_denied(&self) -> bool {
        matches!(self, AdmissionError::Denied { .. })
    }

    /// Seconds the caller should wait, when this is a denial.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AdmissionError::Denied { result, .. } => result.retry_after,
            _ => None,
        }
    }
}

/// Result type alias for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Failure of [`AdmissionController::run_guarded`](crate::admission::AdmissionController::run_guarded).
///
/// Keeps the admission decision apart from the guarded operation's own error,
/// which is passed through untouched.
#[derive(Error, Debug)]
pub enum GuardedError<E> {
    /// The operation never ran: the check failed or was denied.
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    /// The operation ran and returned its own error.
    #[error(transparent)]
    Operation(E),
}

impl<E> GuardedError<E> {
    /// Whether the operation was skipped because admission was denied.
    pub fn is_denied(&self) -> bool {
        matches!(self, GuardedError::Admission(e) if e.is_denied())
    }

    /// The guarded operation's error, if that is what failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            GuardedError::Operation(e) => Some(e),
            GuardedError::Admission(_) => None,
        }
    }
}
