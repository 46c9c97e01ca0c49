//! Core data model shared by every nectar crate: signed events, their
//! canonical serialization, query filters, kind categorization and the
//! auxiliary moderation markers.

pub mod event;
pub mod filter;
pub mod kind;
pub mod moderation;

mod ids;

pub use event::{Event, Tag};
pub use filter::Filter;
pub use ids::{EventId, IdParseError, Pubkey, Sig};
pub use kind::{Kind, KindCategory};
pub use moderation::ModerationMarker;

/// Seconds of clock skew tolerated on `created_at` in the future.
pub const MAX_FUTURE_SKEW_SECS: u64 = 90;

/// Events claiming creation before this epoch are rejected outright.
pub const EARLIEST_CREATED_AT: u64 = 1_231_006_505;

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
