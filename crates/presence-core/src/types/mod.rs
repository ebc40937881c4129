//! Presence data model and upstream wire shapes.

pub mod presence;
pub mod wire;

pub use presence::{
    Activity, ActivityKind, PresenceRecord, PresenceSnapshot, PresenceStatus, RecordOrigin,
    TimeRange,
};
pub use wire::{WireActivity, WirePresence, WireTimestamps, WireUser};
