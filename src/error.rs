//! Crate-wide error type.
//!
//! Every fallible public operation on every layer (amplitude store,
//! state-vector engine, stabilizer engine, unit layer, pager) returns
//! `Result<T>` built from this enum. See spec §7 for the policy this
//! mirrors: errors are surfaced to the caller except for norm underflow
//! (auto-renormalized) and accelerator-selection failure (falls back to
//! the CPU backend).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Qubit index out of range, a length of zero where disallowed,
    /// division/modulus by zero, or an inconsistent `ForceMeasure` bit.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested qubit count exceeds the representational cap of the
    /// chosen index type, or a requested allocation exceeds
    /// `max_alloc_mb`.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Attempt to measure or normalize a state with total probability
    /// below epsilon.
    #[error("degenerate state: {0}")]
    DegenerateState(String),

    /// `Decompose` was requested on a range that is not separable to
    /// within epsilon.
    #[error("separability violation: {0}")]
    SeparabilityViolation(String),

    /// Accelerator allocation or kernel submission failed.
    #[error("backend failure: {0}")]
    BackendFailure(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn capacity_exceeded(msg: impl Into<String>) -> Self {
        Self::CapacityExceeded(msg.into())
    }

    pub fn degenerate_state(msg: impl Into<String>) -> Self {
        Self::DegenerateState(msg.into())
    }

    pub fn separability_violation(msg: impl Into<String>) -> Self {
        Self::SeparabilityViolation(msg.into())
    }

    pub fn backend_failure(msg: impl Into<String>) -> Self {
        Self::BackendFailure(msg.into())
    }
}
