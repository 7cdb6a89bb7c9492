//! Batch matching for delivery synchronization.
//!
//! Batches received against a purchase order are found through an ordered
//! chain of strategies. The first strategy that yields at least one batch wins;
//! later ones are fallbacks for older or incomplete provenance data.

use serde::{Deserialize, Serialize};

use forgestock_inventory::Batch;

use crate::reservation::PoReservation;

/// A batch offered to the matchers, with its item's display name when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCandidate {
    pub batch: Batch,
    pub item_name: Option<String>,
}

impl MatchCandidate {
    pub fn new(batch: Batch, item_name: Option<String>) -> Self {
        Self { batch, item_name }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Current provenance carries the exact order and line ids.
    ExactId,
    /// Older provenance schema carries the same ids as strings.
    LegacyField,
    /// Same order; same material id or same material name (case-insensitive).
    HeuristicName,
}

impl MatchStrategy {
    /// Strategies in the order they are tried.
    pub const CHAIN: [MatchStrategy; 3] = [
        MatchStrategy::ExactId,
        MatchStrategy::LegacyField,
        MatchStrategy::HeuristicName,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrategy::ExactId => "exact_id",
            MatchStrategy::LegacyField => "legacy_field",
            MatchStrategy::HeuristicName => "heuristic_name",
        }
    }

    pub fn matches(self, reservation: &PoReservation, candidate: &MatchCandidate) -> bool {
        let batch = &candidate.batch;
        let order_id = reservation.purchase_order_id();
        let line_id = reservation.line_id();

        match self {
            MatchStrategy::ExactId => batch.is_from_purchase_line(order_id, line_id),
            MatchStrategy::LegacyField => batch.is_from_legacy_purchase_line(order_id, line_id),
            MatchStrategy::HeuristicName => {
                if !batch.references_purchase_order(order_id) {
                    return false;
                }
                let wanted = reservation.material_name().trim();
                batch.item_id == reservation.material_id()
                    || (!wanted.is_empty()
                        && candidate
                            .item_name
                            .as_deref()
                            .is_some_and(|n| n.trim().eq_ignore_ascii_case(wanted)))
            }
        }
    }

    /// Candidates this strategy accepts, in input order.
    pub fn select(self, reservation: &PoReservation, candidates: &[MatchCandidate]) -> Vec<Batch> {
        candidates
            .iter()
            .filter(|c| self.matches(reservation, c))
            .map(|c| c.batch.clone())
            .collect()
    }
}

/// Run the strategy chain; `None` when no strategy finds anything.
pub fn find_matching_batches(
    reservation: &PoReservation,
    candidates: &[MatchCandidate],
) -> Option<(MatchStrategy, Vec<Batch>)> {
    MatchStrategy::CHAIN.into_iter().find_map(|strategy| {
        let found = strategy.select(reservation, candidates);
        (!found.is_empty()).then_some((strategy, found))
    })
}
