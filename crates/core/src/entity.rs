//! Identity of persisted records.

/// A record identified by its id rather than its contents.
///
/// Stock items, batches and purchase order lines are entities: two records with
/// the same id are the same thing even when their quantities differ. Stores
/// key their rows by `id()`.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
