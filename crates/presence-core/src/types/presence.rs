//! Internal presence record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subject presence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Subject is online.
    Online,
    /// Subject is connected but idle.
    Idle,
    /// Do not disturb.
    #[serde(rename = "dnd")]
    DoNotDisturb,
    /// Subject is offline (or invisible).
    Offline,
}

impl PresenceStatus {
    /// Parses from the upstream string with an offline fallback.
    ///
    /// The upstream reports invisible subjects as offline to third parties,
    /// and an unknown value is treated the same way.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "online" => Self::Online,
            "idle" => Self::Idle,
            "dnd" | "do_not_disturb" => Self::DoNotDisturb,
            _ => Self::Offline,
        }
    }

    /// Converts to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::DoNotDisturb => "dnd",
            Self::Offline => "offline",
        }
    }
}

/// What kind of activity a subject is engaged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Playing a game.
    Playing,
    /// Streaming.
    Streaming,
    /// Listening to audio.
    Listening,
    /// Watching video.
    Watching,
    /// Custom status.
    Custom,
    /// Competing in something.
    Competing,
}

impl ActivityKind {
    /// Map the upstream numeric activity type. Unknown codes become `Custom`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Playing,
            1 => Self::Streaming,
            2 => Self::Listening,
            3 => Self::Watching,
            5 => Self::Competing,
            _ => Self::Custom,
        }
    }
}

/// Start/end of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// When the activity started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    /// When the activity ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// A single activity descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Activity {
    /// Activity kind
    pub kind: ActivityKind,
    /// Activity name
    pub name: String,
    /// What the subject is currently doing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Current party or custom state text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Time range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    /// Stream URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Activity {
    /// Create an activity with only a kind and a name.
    pub fn new(kind: ActivityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            details: None,
            state: None,
            time_range: None,
            url: None,
        }
    }
}

/// Where a record came from. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    /// Delivered by the real-time push channel.
    Push,
    /// Fetched from the REST API.
    #[default]
    ApiFetch,
    /// Written by a reconciliation repair.
    Reconciliation,
}

impl RecordOrigin {
    /// Converts to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::ApiFetch => "api_fetch",
            Self::Reconciliation => "reconciliation",
        }
    }
}

/// The `(status, activities)` pair the event ingestor observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    /// Status
    pub status: PresenceStatus,
    /// Activities, in upstream order
    #[serde(default)]
    pub activities: Vec<Activity>,
}

impl PresenceSnapshot {
    /// Create a snapshot.
    pub fn new(status: PresenceStatus, activities: Vec<Activity>) -> Self {
        Self { status, activities }
    }

    /// Stamp this snapshot into a record.
    pub fn into_record(
        self,
        subject_id: impl Into<String>,
        origin: RecordOrigin,
        last_updated: DateTime<Utc>,
    ) -> PresenceRecord {
        PresenceRecord {
            subject_id: subject_id.into(),
            status: self.status,
            activities: self.activities,
            last_updated,
            origin,
        }
    }
}

/// The cached presence of one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Opaque upstream identifier
    pub subject_id: String,
    /// Status
    pub status: PresenceStatus,
    /// Activities, in upstream order
    #[serde(default)]
    pub activities: Vec<Activity>,
    /// When this state was observed. The greatest value wins in the cache.
    pub last_updated: DateTime<Utc>,
    /// Where this record came from
    #[serde(default)]
    pub origin: RecordOrigin,
}

impl PresenceRecord {
    /// The `(status, activities)` part of this record.
    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            status: self.status,
            activities: self.activities.clone(),
        }
    }

    /// Age of the record relative to `now`. Records from the future have zero age.
    pub fn age_at(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.last_updated).to_std().unwrap_or_default()
    }
}
