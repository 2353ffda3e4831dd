//! Core error types for the Stepweave engine.
//!
//! `EngineError` is used throughout the core (stores, validation, resolver,
//! coordinator). `ValidationError` is the structured, recoverable report the
//! validation engine produces; it is never raised on its own, only returned
//! in lists or wrapped in `EngineError::Validation` when a write is rejected.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which validation layer produced an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Field,
    Step,
    CrossStep,
    Final,
}

/// A structured validation failure with a machine-readable reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn field(step: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::Field,
            step: step.to_string(),
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    pub fn step(step: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::Step,
            step: step.to_string(),
            field: None,
            message: message.into(),
        }
    }

    pub fn cross_step(step: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::CrossStep,
            step: step.to_string(),
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    pub fn final_check(step: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::Final,
            step: step.to_string(),
            field: None,
            message: message.into(),
        }
    }

    /// `step.field` or just `step` when no field is attached.
    pub fn reference(&self) -> String {
        match &self.field {
            Some(field) => format!("{}.{}", self.step, field),
            None => self.step.clone(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reference(), self.message)
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("Version conflict on session {session_id}: expected {expected}, found {actual}")]
    Conflict {
        session_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Worker unit '{unit}' timed out after {elapsed:?}")]
    Timeout { unit: String, elapsed: Duration },

    #[error("Dispatch cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether the session must halt. Validation is recovered by the worker
    /// unit; `NotFound` only fails the requested operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Protocol(_)
                | EngineError::Conflict { .. }
                | EngineError::Database(_)
                | EngineError::Serialization(_)
                | EngineError::InvalidWorkflow(_)
        )
    }

    /// Message shown to an end user. Protocol and conflict failures are
    /// reported generically; the stored session stays at its last commit.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Validation(errors) => {
                format!("Please correct your input: {}", join_errors(errors))
            }
            EngineError::NotFound(what) => format!("Not found: {}", what),
            EngineError::Cancelled | EngineError::Timeout { .. } => {
                "The current step was interrupted; your progress up to the last saved answer is kept."
                    .to_string()
            }
            _ => "The workflow could not continue.".to_string(),
        }
    }

    /// [`user_message`](Self::user_message) with the underlying error attached.
    pub fn user_report(&self) -> String {
        format!("{} ({})", self.user_message(), self)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::Conflict {
            session_id: "s-1".to_string(),
            expected: 3,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "Version conflict on session s-1: expected 3, found 4"
        );

        let err = EngineError::Validation(vec![
            ValidationError::field("race", "name", "must not be empty"),
            ValidationError::step("class", "missing required field 'skills'"),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: race.name: must not be empty; class: missing required field 'skills'"
        );
    }

    #[test]
    fn test_fatality() {
        assert!(EngineError::Protocol("x".into()).is_fatal());
        assert!(!EngineError::Validation(vec![]).is_fatal());
        assert!(!EngineError::NotFound("session".into()).is_fatal());
        assert_eq!(
            EngineError::Protocol("loop".into()).user_message(),
            "The workflow could not continue."
        );
    }

    #[test]
    fn test_user_report_leads_with_the_generic_message() {
        let err = EngineError::Protocol("session exceeded 64 iterations without completing".into());
        assert_eq!(
            err.user_report(),
            "The workflow could not continue. (Protocol error: session exceeded 64 iterations without completing)"
        );
        let err = EngineError::Validation(vec![ValidationError::step("spellcasting", "cannot edit yet")]);
        assert!(err.user_report().starts_with("Please correct your input: spellcasting: cannot edit yet"));
    }
}
