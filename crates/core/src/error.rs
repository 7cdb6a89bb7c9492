//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic business failures. Missing rows, version conflicts and
/// storage outages are store errors, not domain errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (non-positive quantity, missing field, unknown id,
    /// illegal batch reference).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An issue asked for more than the selected batches hold.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// A reservation would exceed the remaining claimable quantity of a PO line.
    #[error("over-reservation: requested {requested}, available {available}")]
    OverReservation { requested: i64, available: i64 },

    /// The operation is illegal in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier string did not parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn over_reservation(requested: i64, available: i64) -> Self {
        Self::OverReservation {
            requested,
            available,
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Reject zero and negative quantities with a uniform message.
pub fn ensure_positive(field: &str, quantity: i64) -> DomainResult<()> {
    if quantity <= 0 {
        return Err(DomainError::validation(format!(
            "{field} must be positive (got {quantity})"
        )));
    }
    Ok(())
}
