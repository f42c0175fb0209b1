//! Error types for the escrow system
//!
//! Every precondition violation surfaces as a typed, synchronous failure.
//! Failures are atomic and total: an operation that returns an error has
//! performed no state change and no settlement side effect.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Caller is not the designated client/freelancer/arbitrator
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Referenced escrow does not exist
    #[error("Escrow {0} not found")]
    EscrowNotFound(Uuid),

    /// Referenced milestone index does not exist
    #[error("Milestone {index} not found for escrow {escrow_id}")]
    MilestoneNotFound { escrow_id: Uuid, index: usize },

    /// Operation invoked while the escrow/milestone is in an incompatible status
    #[error("Invalid state transition: {from} -> {to}: {reason}")]
    StateTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// Deadline already passed, or not yet passed
    #[error("Deadline error: {0}")]
    Deadline(String),

    /// Mismatched arrays, invalid identifier, fee cap exceeded, zero amount
    #[error("Validation error: {0}")]
    Validation(String),

    /// Integer overflow in fee or sum arithmetic
    #[error("Amount overflow: {0}")]
    Overflow(String),

    /// Dispute lifecycle violation
    #[error("Dispute error: {0}")]
    Dispute(String),

    /// Funds-moving operations are suspended
    #[error("Engine is paused")]
    Paused,

    /// Settlement primitive rejected a transfer
    #[error("Settlement error: {0}")]
    Settlement(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EscrowError {
    /// Create an authorization error
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create a state transition error
    pub fn state_transition<S: Into<String>>(from: S, to: S, reason: S) -> Self {
        Self::StateTransition {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    /// Create a deadline error
    pub fn deadline<S: Into<String>>(msg: S) -> Self {
        Self::Deadline(msg.into())
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an overflow error
    pub fn overflow<S: Into<String>>(msg: S) -> Self {
        Self::Overflow(msg.into())
    }

    /// Create a dispute error
    pub fn dispute<S: Into<String>>(msg: S) -> Self {
        Self::Dispute(msg.into())
    }

    /// Create a settlement error
    pub fn settlement<S: Into<String>>(msg: S) -> Self {
        Self::Settlement(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}

impl From<config::ConfigError> for EscrowError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
