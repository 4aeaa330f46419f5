//! Delta fetch types.

use crate::stop::{FavouriteStop, StopId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque cursor issued by the cloud after a delta fetch.
///
/// Presented on the next fetch to receive only later changes. The bytes
/// mean nothing to the client.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken(Vec<u8>);

impl ChangeToken {
    /// Wraps raw token bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeToken(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// One entry of a delta fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteChange {
    /// The record was created or modified remotely.
    Upsert(FavouriteStop),
    /// The record was deleted remotely.
    Tombstone {
        /// Deleted record.
        stop_id: StopId,
        /// When the delete happened, if the backend knows.
        deleted_at: Option<Timestamp>,
    },
}

impl RemoteChange {
    /// The record this change applies to.
    pub fn stop_id(&self) -> &StopId {
        match self {
            RemoteChange::Upsert(stop) => &stop.stop_id,
            RemoteChange::Tombstone { stop_id, .. } => stop_id,
        }
    }

    /// True for tombstones.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, RemoteChange::Tombstone { .. })
    }
}

/// One page of a delta fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Changes in server order.
    pub changes: Vec<RemoteChange>,
    /// Cursor to present for the next page or the next fetch.
    pub new_token: ChangeToken,
    /// True if the server has further pages for this fetch.
    pub more_coming: bool,
}

impl ChangeBatch {
    /// Creates a batch.
    pub fn new(changes: Vec<RemoteChange>, new_token: ChangeToken, more_coming: bool) -> Self {
        Self {
            changes,
            new_token,
            more_coming,
        }
    }

    /// Returns the number of changes in this page.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if this page carries no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_debug_is_hex() {
        let token = ChangeToken::new(vec![0x0a, 0xff]);
        assert_eq!(format!("{token:?}"), "ChangeToken(0aff)");
        assert_eq!(token.as_bytes(), &[0x0a, 0xff]);
    }

    #[test]
    fn change_reports_its_key() {
        let id = StopId::new("ABCD").unwrap();
        let upsert = RemoteChange::Upsert(FavouriteStop::new(
            id.clone(),
            "",
            false,
            Timestamp::from_millis(5),
        ));
        let tombstone = RemoteChange::Tombstone {
            stop_id: id.clone(),
            deleted_at: None,
        };

        assert_eq!(upsert.stop_id(), &id);
        assert_eq!(tombstone.stop_id(), &id);
        assert!(!upsert.is_tombstone());
        assert!(tombstone.is_tombstone());
    }
}
