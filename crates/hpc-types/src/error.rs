use thiserror::Error;

/// Errors surfaced while constructing or validating shared data-model values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("capacity invariant violated: {0}")]
    CapacityInvariant(String),

    #[error("invalid job state transition: {from:?} -> {to:?}")]
    InvalidJobTransition { from: String, to: String },

    #[error("message envelope invalid: {0}")]
    InvalidEnvelope(String),

    #[error("usage record invariant violated: {0}")]
    UsageInvariant(String),
}
