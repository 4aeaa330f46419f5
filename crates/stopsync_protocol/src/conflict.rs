//! Conflict resolution between local and remote values.
//!
//! Every place that has to choose between a local record and a remote one
//! (an inbound delta, or a push the server rejected as stale) asks the
//! [`ConflictPolicy`].

use crate::change::RemoteChange;
use crate::stop::{FavouriteStop, SyncState};

/// What to do with the local record after comparing it to a remote value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local record and any pending operation as they are.
    KeepLocal,
    /// Replace the local record with the remote value and drop any pending
    /// operation.
    AcceptRemote,
    /// Remove the local record and drop any pending operation.
    DeleteLocal,
}

/// Policy for choosing between local and remote values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Later `last_modified` wins in full; remote wins ties.
    ///
    /// A pending local record is never overwritten by a provably older
    /// remote value. A tombstone removes a clean record outright, but beats
    /// a pending edit only if it carries a later deletion time.
    #[default]
    LastWriteWins,
    /// The remote value always wins.
    ServerWins,
    /// A pending local value always wins; clean records follow the remote.
    ClientWins,
}

impl ConflictPolicy {
    /// Resolves an inbound remote change against the local record.
    pub fn resolve_incoming(
        &self,
        local: Option<&FavouriteStop>,
        incoming: &RemoteChange,
    ) -> Resolution {
        let Some(local) = local else {
            return match incoming {
                RemoteChange::Upsert(_) => Resolution::AcceptRemote,
                RemoteChange::Tombstone { .. } => Resolution::KeepLocal,
            };
        };

        match incoming {
            RemoteChange::Upsert(remote) => match self {
                ConflictPolicy::ServerWins => Resolution::AcceptRemote,
                ConflictPolicy::ClientWins if local.is_pending() => Resolution::KeepLocal,
                ConflictPolicy::ClientWins => Resolution::AcceptRemote,
                ConflictPolicy::LastWriteWins => later_wins(local, remote),
            },
            RemoteChange::Tombstone { deleted_at, .. } => match local.sync_state {
                SyncState::Clean | SyncState::PendingDelete => Resolution::DeleteLocal,
                SyncState::PendingPush => match self {
                    ConflictPolicy::ServerWins => Resolution::DeleteLocal,
                    ConflictPolicy::ClientWins => Resolution::KeepLocal,
                    ConflictPolicy::LastWriteWins => match deleted_at {
                        Some(at) if *at > local.last_modified => Resolution::DeleteLocal,
                        _ => Resolution::KeepLocal,
                    },
                },
            },
        }
    }

    /// Resolves a push the server rejected because it holds `server`.
    ///
    /// Returns [`Resolution::KeepLocal`] when the local value should be
    /// pushed again over the server's, or [`Resolution::AcceptRemote`] when
    /// the server's value should replace the local one.
    pub fn resolve_push_conflict(
        &self,
        local: &FavouriteStop,
        server: &FavouriteStop,
    ) -> Resolution {
        match self {
            ConflictPolicy::ServerWins => Resolution::AcceptRemote,
            ConflictPolicy::ClientWins => Resolution::KeepLocal,
            ConflictPolicy::LastWriteWins => later_wins(local, server),
        }
    }
}

fn later_wins(local: &FavouriteStop, remote: &FavouriteStop) -> Resolution {
    if remote.last_modified >= local.last_modified {
        Resolution::AcceptRemote
    } else {
        Resolution::KeepLocal
    }
}
