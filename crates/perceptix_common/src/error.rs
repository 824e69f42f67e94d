//! Error taxonomy for the Perceptix pipeline.
//!
//! The variants mirror the failure classes of the cycle state machine:
//! fatal-to-cycle errors (observation, persistence, verification without
//! evidence, empty plans) propagate and abort the cycle; everything else is
//! captured as data (error evidence items, failed step results) or resolved
//! through the deterministic reasoning fallback and never surfaces here.

use thiserror::Error;

/// Validation failure on a model type.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid hypothesis id '{0}': expected H<n>")]
    InvalidHypothesisId(String),

    #[error("field '{field}' too short: need at least {min} chars")]
    FieldTooShort { field: &'static str, min: usize },

    #[error("confidence score {0} outside [0, 100]")]
    ConfidenceOutOfRange(f64),

    #[error("null rate {rate} for column '{column}' outside [0, 1]")]
    NullRateOutOfRange { column: String, rate: f64 },

    #[error("investigation step id must be >= 1, got {0}")]
    InvalidStepId(u32),

    #[error("{0}")]
    Invalid(String),
}

/// Component errors that abort the current cycle when propagated.
#[derive(Debug, Error)]
pub enum PerceptixError {
    #[error("observer error: {0}")]
    Observer(String),

    #[error("reasoner error: {0}")]
    Reasoner(String),

    #[error("investigator error: {0}")]
    Investigator(String),

    #[error("verifier error: {0}")]
    Verifier(String),

    #[error("insufficient evidence: {0}")]
    InsufficientEvidence(String),

    #[error("historian error: {0}")]
    Historian(String),

    /// Budget and prompt-size violations are configuration errors, not
    /// transient failures; they are fatal to the reasoning call that hit them.
    #[error("reasoning budget violation: {0}")]
    Budget(String),

    #[error("cycle limit exceeded: {0}")]
    CycleLimitExceeded(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("system error: {0}")]
    System(String),
}
