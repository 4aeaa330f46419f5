//! Error types for the sync engine.

use crate::cloud::CloudError;
use stopsync_protocol::{ProtocolError, StopId};
use stopsync_storage::StorageError;
use std::sync::Arc;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Errors are `Clone` so that callers coalesced onto one in-flight fetch can
/// each receive the result.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// The cloud could not be reached or failed temporarily.
    #[error("transient network failure: {0}")]
    TransientNetworkFailure(String),

    /// The server kept rejecting a push as stale.
    #[error("unresolved push conflict for stop {stop_id}")]
    ConflictDetected {
        /// Stop whose push kept conflicting.
        stop_id: StopId,
    },

    /// The server no longer honours the change token.
    #[error("change token expired")]
    TokenExpired,

    /// The record zone or subscription is missing.
    #[error("cloud zone not ready")]
    ZoneNotReady,

    /// Credentials were rejected; automatic retries stop until cleared.
    #[error("permanent authentication failure: {0}")]
    PermanentAuthFailure(String),

    /// The local journal cannot be replayed.
    #[error("local store corrupted at offset {offset}: {reason}")]
    LocalStoreCorruption {
        /// Offset of the first unreadable frame.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A stop identifier failed validation.
    #[error("invalid stop id {id:?}: {reason}")]
    InvalidStopId {
        /// The rejected input.
        id: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(Arc<StorageError>),

    /// Encoding error.
    #[error("codec error: {0}")]
    Codec(String),

    /// The operation was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The operation did not finish within its budget.
    #[error("operation timed out")]
    Timeout,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Returns true if a later attempt may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientNetworkFailure(_)
                | SyncError::ConflictDetected { .. }
                | SyncError::TokenExpired
                | SyncError::ZoneNotReady
                | SyncError::Timeout
        )
    }

    /// Returns true if the error should be shown to the user.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            SyncError::PermanentAuthFailure(_) | SyncError::LocalStoreCorruption { .. }
        )
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Corrupted { offset, reason } => {
                SyncError::LocalStoreCorruption { offset, reason }
            }
            other => SyncError::Storage(Arc::new(other)),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidStopId { id, reason } => SyncError::InvalidStopId { id, reason },
            other => SyncError::Codec(other.to_string()),
        }
    }
}

impl From<CloudError> for SyncError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Transient(message) => SyncError::TransientNetworkFailure(message),
            CloudError::RateLimited { retry_after } => SyncError::TransientNetworkFailure(
                format!("rate limited, retry after {retry_after:?}"),
            ),
            CloudError::TokenExpired => SyncError::TokenExpired,
            CloudError::ZoneNotReady => SyncError::ZoneNotReady,
            CloudError::PermanentAuth(message) => SyncError::PermanentAuthFailure(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::TransientNetworkFailure("offline".into()).is_retryable());
        assert!(SyncError::TokenExpired.is_retryable());
        assert!(SyncError::ZoneNotReady.is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::PermanentAuthFailure("revoked".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn only_auth_and_corruption_are_user_actionable() {
        assert!(SyncError::PermanentAuthFailure("revoked".into()).is_user_actionable());
        assert!(SyncError::LocalStoreCorruption {
            offset: 0,
            reason: "bad".into()
        }
        .is_user_actionable());
        assert!(!SyncError::TransientNetworkFailure("x".into()).is_user_actionable());
        assert!(!SyncError::TokenExpired.is_user_actionable());
    }

    #[test]
    fn corrupted_storage_becomes_store_corruption() {
        let err: SyncError = StorageError::corrupted(42, "checksum mismatch").into();
        assert!(matches!(err, SyncError::LocalStoreCorruption { offset: 42, .. }));
    }

    #[test]
    fn cloud_errors_map_to_taxonomy() {
        let rate: SyncError = CloudError::RateLimited {
            retry_after: Duration::from_secs(3),
        }
        .into();
        assert!(rate.is_retryable());

        let auth: SyncError = CloudError::PermanentAuth("signed out".into()).into();
        assert!(matches!(auth, SyncError::PermanentAuthFailure(_)));
        assert!(matches!(
            SyncError::from(CloudError::TokenExpired),
            SyncError::TokenExpired
        ));
    }

    #[test]
    fn error_display() {
        let err = SyncError::InvalidStateTransition {
            from: "Uninitialized".into(),
            to: "Syncing".into(),
        };
        assert!(err.to_string().contains("Uninitialized"));
        assert!(err.to_string().contains("Syncing"));
    }
}
