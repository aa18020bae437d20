use chrono::{DateTime, Utc};

/// A domain event.
///
/// Events are facts: once a `PeriodPosted` or `QuotaAllocated` is committed
/// it is never edited, only followed by further events. Each type carries a
/// stable name and a schema version so stored payloads stay readable.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "ledger.energy.period_posted").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
