//! Optimistic read-modify-write of a single reservation row.

use tracing::debug;

use forgestock_core::DomainResult;
use forgestock_reservations::{PoReservation, ReservationId};

use crate::error::{ServiceError, ServiceResult};
use crate::store::ReservationStore;

/// Result of [`modify_reservation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Modified {
    /// The row was rewritten; holds the stored revision.
    Written(PoReservation),
    /// `change` reported nothing to do; holds the row as read.
    Unchanged(PoReservation),
    /// The row no longer exists.
    Gone,
}

/// Load `id`, apply `change`, and write it back if it reported a change.
///
/// A stale write reloads and re-applies `change`, up to `attempts` times in
/// total. `change` must therefore be safe to run more than once.
pub(crate) fn modify_reservation(
    store: &dyn ReservationStore,
    id: ReservationId,
    attempts: u32,
    mut change: impl FnMut(&mut PoReservation) -> DomainResult<bool>,
) -> ServiceResult<Modified> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let Some(current) = store.get(id)? else {
            return Ok(Modified::Gone);
        };

        let mut next = current.clone();
        if !change(&mut next)? {
            return Ok(Modified::Unchanged(current));
        }

        match store.update(next) {
            Ok(stored) => return Ok(Modified::Written(stored)),
            Err(e) => {
                let e = ServiceError::from(e);
                if !e.is_conflict() || attempt >= attempts {
                    return Err(e);
                }
                debug!(reservation = %id, attempt, "stale reservation write; retrying");
                attempt += 1;
            }
        }
    }
}
