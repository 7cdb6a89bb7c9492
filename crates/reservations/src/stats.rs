use serde::{Deserialize, Serialize};

use crate::reservation::{PoReservation, ReservationStatus};

/// Counts and quantity sums over a set of reservations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationStats {
    pub total: usize,
    pub pending: usize,
    pub delivered: usize,
    pub converted: usize,
    pub reserved_quantity: i64,
    pub delivered_quantity: i64,
    pub converted_quantity: i64,
}

impl ReservationStats {
    pub fn from_reservations<'a>(reservations: impl IntoIterator<Item = &'a PoReservation>) -> Self {
        reservations
            .into_iter()
            .fold(Self::default(), |mut acc, r| {
                acc.total += 1;
                match r.status() {
                    ReservationStatus::Pending => acc.pending += 1,
                    ReservationStatus::Delivered => acc.delivered += 1,
                    ReservationStatus::Converted => acc.converted += 1,
                }
                acc.reserved_quantity += r.reserved_quantity();
                acc.delivered_quantity += r.delivered_quantity();
                acc.converted_quantity += r.converted_quantity();
                acc
            })
    }

    /// Reserved but not yet converted.
    pub fn open_quantity(&self) -> i64 {
        self.reserved_quantity - self.converted_quantity
    }
}
