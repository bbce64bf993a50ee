//! Error types for the query pipeline.
//!
//! None of these ever leave [`crate::QueryPipeline::process_query`]: every stage
//! recovers locally (defaults, fallback search, per-dataset markers). They are
//! public so collaborators and direct stage callers can match on them.

use thiserror::Error;

/// Failures of a language-model round trip.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("language model unavailable: {0}")]
    Unavailable(String),

    #[error("language model timed out: {0}")]
    Timeout(String),

    #[error("language model http error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid language model response: {0}")]
    InvalidResponse(String),

    #[error("language model backend is disabled")]
    Disabled,
}

/// A named dataset the loader could not supply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("dataset `{dataset}` unavailable: {reason}")]
pub struct DatasetUnavailable {
    pub dataset: String,
    pub reason: String,
}

impl DatasetUnavailable {
    pub fn new(dataset: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            reason: reason.into(),
        }
    }
}

/// The gateway failed while producing a plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("plan generation failed: {0}")]
pub struct PlanGenerationError(#[from] pub GatewayError);

/// Structural failure of a plan: parsing, validation, or interpretation.
///
/// Execution is atomic, so any of these discards the whole plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan syntax error: {0}")]
    Syntax(String),

    #[error("unsupported plan construct: {0}")]
    Unsupported(String),

    #[error("unknown dataset `{0}`")]
    UnknownDataset(String),

    #[error("unknown column `{column}` in dataset `{dataset}`")]
    UnknownColumn { dataset: String, column: String },

    #[error("type mismatch on column `{column}`: {detail}")]
    TypeMismatch { column: String, detail: String },

    #[error("model declined to produce a plan: {0}")]
    Declined(String),

    #[error("plan is empty")]
    Empty,

    #[error("steps on dataset `{0}` disagree on their projection")]
    ConflictingProjection(String),
}

/// Why the plan path was abandoned in favour of keyword search.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanFailure {
    #[error(transparent)]
    Generation(#[from] PlanGenerationError),

    #[error("plan execution failed: {0}")]
    Execution(#[from] PlanError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_readable() {
        let e = PlanError::UnknownColumn {
            dataset: "syslog".into(),
            column: "hostname".into(),
        };
        assert_eq!(e.to_string(), "unknown column `hostname` in dataset `syslog`");

        let e = PlanFailure::from(PlanGenerationError(GatewayError::Timeout("60s".into())));
        assert_eq!(
            e.to_string(),
            "plan generation failed: language model timed out: 60s"
        );

        let e = GatewayError::Http {
            status: 503,
            body: "overloaded".into(),
        };
        assert_eq!(e.to_string(), "language model http error 503: overloaded");
    }
}
