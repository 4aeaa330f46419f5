//! Favourite stop records and their identifiers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Longest accepted stop identifier.
pub const MAX_STOP_ID_LEN: usize = 32;

/// Identifier of a transit stop.
///
/// Short, opaque and ASCII alphanumeric. It is the primary key in every
/// store the engine touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StopId(String);

impl StopId {
    /// Validates and wraps a stop identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidStopId`] if the input is empty, longer
    /// than [`MAX_STOP_ID_LEN`], or contains anything but ASCII letters and
    /// digits.
    pub fn new(id: impl Into<String>) -> ProtocolResult<Self> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("empty")
        } else if id.len() > MAX_STOP_ID_LEN {
            Some("too long")
        } else if !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Some("not ASCII alphanumeric")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ProtocolError::InvalidStopId { id, reason }),
            None => Ok(Self(id)),
        }
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StopId {
    type Error = ProtocolError;

    fn try_from(value: String) -> ProtocolResult<Self> {
        Self::new(value)
    }
}

impl From<StopId> for String {
    fn from(id: StopId) -> Self {
        id.0
    }
}

impl fmt::Display for StopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Wraps a raw millisecond value.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the raw millisecond value.
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self(millis)
    }

    /// Stamp for a local edit replacing a value stamped `previous`.
    ///
    /// Never earlier than `now` and always strictly after `previous`, so a
    /// local edit outranks the value it replaces even when the clock has
    /// gone backwards.
    pub fn next_after(now: Self, previous: Option<Self>) -> Self {
        match previous {
            Some(prev) if prev.0 >= now.0 => Self(prev.0.saturating_add(1)),
            _ => now,
        }
    }

    /// Returns this timestamp moved forward by `millis`.
    pub const fn plus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Synchronization state of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncState {
    /// Matches the cloud as far as this device knows.
    #[default]
    Clean,
    /// Edited locally, not yet confirmed by the cloud.
    PendingPush,
    /// Deleted locally, not yet confirmed by the cloud.
    PendingDelete,
}

impl SyncState {
    /// True for states holding an unconfirmed local mutation.
    pub fn is_pending(self) -> bool {
        !matches!(self, SyncState::Clean)
    }
}

/// A user's favourite stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavouriteStop {
    /// Primary key.
    pub stop_id: StopId,
    /// User label. May be empty.
    pub description: String,
    /// Whether the stop is pinned to the top of the list.
    pub preferred: bool,
    /// Time of the last edit, used to order conflicting values.
    pub last_modified: Timestamp,
    /// Local sync state.
    pub sync_state: SyncState,
    /// Server change tag last seen for this record.
    pub remote_version: Option<u64>,
}

impl FavouriteStop {
    /// Creates a clean record with no known server version.
    pub fn new(
        stop_id: StopId,
        description: impl Into<String>,
        preferred: bool,
        last_modified: Timestamp,
    ) -> Self {
        Self {
            stop_id,
            description: description.into(),
            preferred,
            last_modified,
            sync_state: SyncState::Clean,
            remote_version: None,
        }
    }

    /// Returns a copy with a different sync state.
    #[must_use]
    pub fn with_sync_state(mut self, sync_state: SyncState) -> Self {
        self.sync_state = sync_state;
        self
    }

    /// True if this record holds an unconfirmed local mutation.
    pub fn is_pending(&self) -> bool {
        self.sync_state.is_pending()
    }
}

/// Display order: preferred first, then description (case-insensitive),
/// then stop id.
pub fn display_order(a: &FavouriteStop, b: &FavouriteStop) -> Ordering {
    b.preferred
        .cmp(&a.preferred)
        .then_with(|| {
            a.description
                .to_lowercase()
                .cmp(&b.description.to_lowercase())
        })
        .then_with(|| a.description.cmp(&b.description))
        .then_with(|| a.stop_id.cmp(&b.stop_id))
}
