use chrono::{DateTime, Utc};

/// A fact published after a state change has been committed.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, e.g. `inventory.batch.issued`.
    fn event_type(&self) -> &'static str;

    /// Payload schema version; bump on breaking shape changes.
    fn version(&self) -> u32 {
        1
    }

    /// Identifier of the record the event is about (used for routing and logs).
    fn subject(&self) -> String;

    /// Business time of the change.
    fn occurred_at(&self) -> DateTime<Utc>;
}
