//! Upstream wire shapes.
//!
//! Only the fields needed to derive a [`PresenceRecord`] are modelled; the
//! rest of the upstream payload is ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::presence::{
    Activity, ActivityKind, PresenceRecord, PresenceSnapshot, PresenceStatus, RecordOrigin,
    TimeRange,
};

/// Partial user object carried by presence payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireUser {
    /// Snowflake identifier
    pub id: String,
}

/// Millisecond epoch timestamps of an activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireTimestamps {
    /// Start, unix millis
    #[serde(default)]
    pub start: Option<i64>,
    /// End, unix millis
    #[serde(default)]
    pub end: Option<i64>,
}

/// Activity as delivered by the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireActivity {
    /// Activity name
    pub name: String,
    /// Numeric activity type
    #[serde(rename = "type", default)]
    pub kind: u8,
    /// Details line
    #[serde(default)]
    pub details: Option<String>,
    /// State line
    #[serde(default)]
    pub state: Option<String>,
    /// Timestamps
    #[serde(default)]
    pub timestamps: Option<WireTimestamps>,
    /// Stream URL
    #[serde(default)]
    pub url: Option<String>,
}

impl From<WireActivity> for Activity {
    fn from(wire: WireActivity) -> Self {
        let time_range = wire.timestamps.and_then(|ts| {
            let start = ts.start.and_then(DateTime::from_timestamp_millis);
            let end = ts.end.and_then(DateTime::from_timestamp_millis);
            (start.is_some() || end.is_some()).then_some(TimeRange { start, end })
        });
        Self {
            kind: ActivityKind::from_code(wire.kind),
            name: wire.name,
            details: wire.details,
            state: wire.state,
            time_range,
            url: wire.url,
        }
    }
}

/// Presence payload, shared by REST responses and push-channel updates.
///
/// Push updates always carry `user`; REST responses may omit it, in which
/// case the requested subject id is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePresence {
    /// The subject this presence belongs to
    #[serde(default)]
    pub user: Option<WireUser>,
    /// Status token (`online`, `idle`, `dnd`, `offline`)
    pub status: String,
    /// Activities
    #[serde(default)]
    pub activities: Vec<WireActivity>,
}

impl WirePresence {
    /// The subject id carried by the payload, if any.
    pub fn subject_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    /// Transform into the internal `(status, activities)` pair.
    pub fn into_snapshot(self) -> PresenceSnapshot {
        PresenceSnapshot {
            status: PresenceStatus::from_str_or_default(&self.status),
            activities: self.activities.into_iter().map(Activity::from).collect(),
        }
    }

    /// Transform into an internal record.
    pub fn into_record(
        self,
        subject_id: &str,
        origin: RecordOrigin,
        observed_at: DateTime<Utc>,
    ) -> PresenceRecord {
        self.into_snapshot()
            .into_record(subject_id, origin, observed_at)
    }
}
