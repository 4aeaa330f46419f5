//! Cloud backend abstraction.

use async_trait::async_trait;
use std::time::Duration;
use stopsync_protocol::{ChangeBatch, ChangeToken, FavouriteStop, StopId};
use thiserror::Error;

/// Result type for cloud calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Failures reported by a cloud backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// Network or service failure that may clear up on its own.
    #[error("transient cloud failure: {0}")]
    Transient(String),

    /// The presented change token is no longer valid.
    #[error("change token expired")]
    TokenExpired,

    /// The zone or subscription does not exist yet.
    #[error("zone not ready")]
    ZoneNotReady,

    /// The account cannot be used until the user acts.
    #[error("permanent auth failure: {0}")]
    PermanentAuth(String),

    /// The service asked the client to slow down.
    #[error("rate limited for {retry_after:?}")]
    RateLimited {
        /// How long to wait before calling again.
        retry_after: Duration,
    },
}

/// Result of pushing a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The record was stored under a new server version.
    Saved {
        /// Server change tag of the stored record.
        version: u64,
    },
    /// The server holds a different version than the one the push was
    /// based on.
    Conflict {
        /// The server's current record.
        server: FavouriteStop,
    },
}

/// A cloud store of record for favourite stops.
///
/// Implementations talk to one record zone. Every method may be called
/// concurrently from several tasks.
#[async_trait]
pub trait CloudBackend: Send + Sync + 'static {
    /// Creates the record zone and change subscription if missing.
    ///
    /// Must be idempotent.
    async fn ensure_zone_and_subscription(&self) -> CloudResult<()>;

    /// Saves `record`.
    ///
    /// `record.remote_version` is the server version the edit was based on
    /// (`None` for a record the client has never seen remotely). A server
    /// holding a different version answers [`PushOutcome::Conflict`].
    async fn push(&self, record: &FavouriteStop) -> CloudResult<PushOutcome>;

    /// Deletes a record. A record that is already absent counts as deleted.
    async fn push_delete(&self, stop_id: &StopId) -> CloudResult<()>;

    /// Fetches one page of changes after `token`, or from the beginning
    /// when `token` is `None`.
    async fn fetch_changes(&self, token: Option<&ChangeToken>) -> CloudResult<ChangeBatch>;
}
