//! # Research Errors
//!
//! Error taxonomy for the research workflow. Every failure that can end a
//! run is one of these variants; the response adapter turns them into an
//! `error` envelope.

use thiserror::Error;

use crate::services::completion::{Shape, Stage};

/// Result alias used throughout the workflow.
pub type ResearchResult<T> = Result<T, ResearchError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResearchError {
    /// The completion service failed or returned nothing usable
    #[error("{stage} call failed: {reason}")]
    UpstreamFailure { stage: Stage, reason: String },

    /// A structured reply did not match the expected shape
    #[error("reply did not match the {shape} shape: {reason}")]
    SchemaViolation { shape: Shape, reason: String },

    /// The web search service failed for a query
    #[error("search for '{query}' failed: {reason}")]
    SearchFailure { query: String, reason: String },

    /// The run was cancelled or a call exceeded its deadline
    #[error("run aborted: {reason}")]
    RunAborted { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A state machine received an event it cannot handle in its current stage
    #[error("invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// Every section failed under the skip-failed-sections policy
    #[error("no section completed successfully ({failed} failed)")]
    NoSectionsCompleted { failed: usize },

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ResearchError {
    pub fn upstream(stage: Stage, reason: impl Into<String>) -> Self {
        Self::UpstreamFailure {
            stage,
            reason: reason.into(),
        }
    }

    pub fn schema(shape: Shape, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            shape,
            reason: reason.into(),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::RunAborted {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether this error came from cancellation or a deadline rather than a collaborator
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::RunAborted { .. })
    }
}

impl From<rusqlite::Error> for ResearchError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_stage_and_shape() {
        let err = ResearchError::upstream(Stage::Reflect, "timeout from provider");
        assert_eq!(err.to_string(), "reflect call failed: timeout from provider");

        let err = ResearchError::schema(Shape::Sections, "missing field `sections`");
        assert_eq!(
            err.to_string(),
            "reply did not match the sections shape: missing field `sections`"
        );
    }

    #[test]
    fn test_is_abort() {
        assert!(ResearchError::aborted("cancelled").is_abort());
        assert!(!ResearchError::invalid_config("bad").is_abort());
    }
}
