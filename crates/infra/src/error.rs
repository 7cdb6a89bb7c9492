//! Infrastructure and service error types.

use thiserror::Error;

use forgestock_core::DomainError;
use forgestock_reservations::ConversionBooking;

/// Storage operation error.
///
/// These are **infrastructure errors** (missing rows, stale versions, refused
/// conditional writes, unavailable backends) as opposed to domain errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    /// A conditional decrement found less than requested on the row.
    #[error("conditional decrement refused ({available} available)")]
    InsufficientQuantity { available: i64 },

    /// A conditional write would push a claim total or a row quantity past its limit.
    #[error("limit exceeded ({available} available)")]
    LimitExceeded { available: i64 },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn poisoned() -> Self {
        StoreError::Unavailable("lock poisoned".to_string())
    }
}

/// Error returned by ledger and reservation operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Business-rule failure; the caller may correct the input and retry.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),

    /// The ledger booking of a conversion committed but the reservation could
    /// not be updated. The booking is not rolled back; pass it to
    /// `ReservationEngine::complete_conversion` to finish the update.
    #[error(
        "booking {} for reservation {} committed but the reservation was not updated: {source}",
        booking.transaction_id,
        booking.reservation_id
    )]
    ConversionStateLag {
        booking: ConversionBooking,
        source: Box<ServiceError>,
    },
}

impl ServiceError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Store(StoreError::Conflict(_)))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
