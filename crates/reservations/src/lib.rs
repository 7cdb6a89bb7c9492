//! Purchase-order reservation domain module.
//!
//! A reservation claims part of a purchase order line before the goods arrive.
//! It moves `pending → delivered → converted`; cancellation removes it and is
//! only legal before it is fully converted. All rules here are pure; stores,
//! the ledger booking and scheduling live in the infrastructure crate.

pub mod matching;
pub mod reservation;
pub mod stats;

pub use matching::{MatchCandidate, MatchStrategy, find_matching_batches};
pub use reservation::{
    ConsumerId, ConversionBooking, LinkRead, LinkedBatch, NewReservation, PoReservation,
    ReservationId, ReservationStatus,
};
pub use stats::ReservationStats;
