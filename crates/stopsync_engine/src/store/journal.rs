//! Journal entries and replay.
//!
//! A store's journal is a sequence of frames (see
//! [`stopsync_storage::frame`]). Each frame carries one commit: a CBOR array
//! of [`JournalEntry`] values that are applied together or not at all.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stopsync_protocol::{
    from_cbor, to_cbor, ChangeToken, FavouriteStop, PendingOperation, PendingQueue, StopId,
};
use stopsync_storage::{encode_frame, FrameReader, StorageError};

/// One change inside a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// Insert or replace a record.
    PutStop(FavouriteStop),
    /// Remove a record.
    RemoveStop(StopId),
    /// Insert or replace the pending operation for a stop.
    PutPending(PendingOperation),
    /// Remove the pending operation for a stop.
    RemovePending(StopId),
    /// Replace the change token.
    SetToken(Option<ChangeToken>),
    /// The legacy source has been consulted.
    SetLegacyMigrated,
    /// A complete cloud fetch has been applied at least once.
    SetCloudDataReceived,
    /// Replace the whole state. Written by compaction.
    Snapshot(Snapshot),
}

/// Full persisted state, as written by compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    records: Vec<FavouriteStop>,
    pending: Vec<PendingOperation>,
    next_seq: u64,
    token: Option<ChangeToken>,
    legacy_migrated: bool,
    cloud_data_received: bool,
}

/// Everything a store persists.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub(crate) records: BTreeMap<StopId, FavouriteStop>,
    pub(crate) pending: PendingQueue,
    pub(crate) token: Option<ChangeToken>,
    pub(crate) legacy_migrated: bool,
    pub(crate) cloud_data_received: bool,
}

impl StoreState {
    pub(crate) fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::PutStop(stop) => {
                self.records.insert(stop.stop_id.clone(), stop);
            }
            JournalEntry::RemoveStop(stop_id) => {
                self.records.remove(&stop_id);
            }
            JournalEntry::PutPending(op) => self.pending.restore(op),
            JournalEntry::RemovePending(stop_id) => {
                self.pending.dequeue(&stop_id);
            }
            JournalEntry::SetToken(token) => self.token = token,
            JournalEntry::SetLegacyMigrated => self.legacy_migrated = true,
            JournalEntry::SetCloudDataReceived => self.cloud_data_received = true,
            JournalEntry::Snapshot(snapshot) => *self = Self::from_snapshot(snapshot),
        }
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            records: self.records.values().cloned().collect(),
            pending: self.pending.list_pending().cloned().collect(),
            next_seq: self.pending.next_seq(),
            token: self.token.clone(),
            legacy_migrated: self.legacy_migrated,
            cloud_data_received: self.cloud_data_received,
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            records: snapshot
                .records
                .into_iter()
                .map(|stop| (stop.stop_id.clone(), stop))
                .collect(),
            pending: PendingQueue::from_operations(snapshot.pending)
                .with_next_seq(snapshot.next_seq),
            token: snapshot.token,
            legacy_migrated: snapshot.legacy_migrated,
            cloud_data_received: snapshot.cloud_data_received,
        }
    }
}

/// Encodes one commit as a framed journal record.
pub(crate) fn encode_commit(entries: &[JournalEntry]) -> SyncResult<Vec<u8>> {
    Ok(encode_frame(&to_cbor(&entries)?))
}

/// Outcome of replaying a journal.
pub(crate) struct Replay {
    pub(crate) state: StoreState,
    pub(crate) frames: usize,
    pub(crate) valid_len: u64,
    pub(crate) torn_tail: bool,
}

/// Rebuilds state from journal bytes.
///
/// A torn trailing frame is reported, not treated as an error.
pub(crate) fn replay(bytes: &[u8]) -> SyncResult<Replay> {
    let mut state = StoreState::default();
    let mut reader = FrameReader::new(bytes);
    let mut frames = 0;

    for frame in reader.by_ref() {
        let frame = frame?;
        let entries: Vec<JournalEntry> =
            from_cbor(frame.payload).map_err(|e| SyncError::LocalStoreCorruption {
                offset: frame.offset,
                reason: e.to_string(),
            })?;
        for entry in entries {
            state.apply(entry);
        }
        frames += 1;
    }

    Ok(Replay {
        state,
        frames,
        valid_len: reader.valid_len(),
        torn_tail: reader.torn_tail(),
    })
}

/// Result of walking a journal without opening a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalReport {
    /// Total journal size in bytes.
    pub size: u64,
    /// Number of intact frames.
    pub frames: usize,
    /// Number of entries across intact frames.
    pub entries: usize,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// True if the journal ends in an incomplete frame.
    pub torn_tail: bool,
    /// Offset and description of the first bad frame, if any.
    pub first_error: Option<(u64, String)>,
}

impl JournalReport {
    /// True if every frame could be read back.
    pub fn is_healthy(&self) -> bool {
        self.first_error.is_none()
    }
}

/// Walks every frame of a journal and reports the first problem.
pub fn inspect_journal(bytes: &[u8]) -> JournalReport {
    let mut reader = FrameReader::new(bytes);
    let mut frames = 0;
    let mut entries = 0;
    let mut first_error = None;
    let mut frame_error = None;

    for frame in reader.by_ref() {
        match frame {
            Ok(frame) => match from_cbor::<Vec<JournalEntry>>(frame.payload) {
                Ok(decoded) => {
                    frames += 1;
                    entries += decoded.len();
                }
                Err(e) => {
                    first_error = Some((frame.offset, e.to_string()));
                    break;
                }
            },
            Err(e) => {
                frame_error = Some(e);
                break;
            }
        }
    }
    if let Some(e) = frame_error {
        first_error = Some(match e {
            StorageError::Corrupted { offset, reason } => (offset, reason),
            other => (reader.valid_len(), other.to_string()),
        });
    }

    JournalReport {
        size: bytes.len() as u64,
        frames,
        entries,
        valid_len: reader.valid_len(),
        torn_tail: reader.torn_tail(),
        first_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stopsync_protocol::{OperationKind, SyncState, Timestamp};

    fn stop(id: &str) -> FavouriteStop {
        FavouriteStop::new(StopId::new(id).unwrap(), id, false, Timestamp::from_millis(1))
    }

    fn journal(commits: &[Vec<JournalEntry>]) -> Vec<u8> {
        commits
            .iter()
            .flat_map(|c| encode_commit(c).unwrap())
            .collect()
    }

    #[test]
    fn replay_applies_commits_in_order() {
        let id = StopId::new("A1").unwrap();
        let bytes = journal(&[
            vec![
                JournalEntry::PutStop(stop("A1")),
                JournalEntry::SetToken(Some(ChangeToken::new(vec![1]))),
            ],
            vec![JournalEntry::PutStop(
                stop("A1").with_sync_state(SyncState::PendingPush),
            )],
            vec![JournalEntry::SetLegacyMigrated],
        ]);

        let replay = replay(&bytes).unwrap();
        assert_eq!(replay.frames, 3);
        assert!(!replay.torn_tail);
        assert_eq!(replay.state.records.len(), 1);
        assert_eq!(replay.state.records[&id].sync_state, SyncState::PendingPush);
        assert_eq!(replay.state.token, Some(ChangeToken::new(vec![1])));
        assert!(replay.state.legacy_migrated);
        assert!(!replay.state.cloud_data_received);
    }

    #[test]
    fn snapshot_replaces_everything() {
        let mut before = StoreState::default();
        before.apply(JournalEntry::PutStop(stop("B2")));
        let op = before.pending.enqueue(
            StopId::new("B2").unwrap(),
            OperationKind::Delete,
            None,
            Timestamp::from_millis(5),
        );
        before.legacy_migrated = true;

        let bytes = journal(&[
            vec![JournalEntry::PutStop(stop("GONE"))],
            vec![JournalEntry::Snapshot(before.to_snapshot())],
        ]);
        let state = replay(&bytes).unwrap().state;

        assert!(!state.records.contains_key(&StopId::new("GONE").unwrap()));
        assert_eq!(state.pending.get(&op.stop_id), Some(&op));
        assert_eq!(state.pending.next_seq(), op.seq + 1);
        assert!(state.legacy_migrated);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let mut bytes = journal(&[vec![JournalEntry::PutStop(stop("C3"))]]);
        let good = bytes.len() as u64;
        let partial = encode_commit(&[JournalEntry::PutStop(stop("D4"))]).unwrap();
        bytes.extend_from_slice(&partial[..partial.len() / 2]);

        let replay = replay(&bytes).unwrap();
        assert!(replay.torn_tail);
        assert_eq!(replay.valid_len, good);
        assert_eq!(replay.state.records.len(), 1);
    }

    #[test]
    fn undecodable_frame_is_corruption() {
        let mut bytes = journal(&[vec![JournalEntry::SetLegacyMigrated]]);
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(&encode_frame(b"not cbor entries"));

        match replay(&bytes) {
            Err(SyncError::LocalStoreCorruption { offset: at, .. }) => assert_eq!(at, offset),
            other => panic!("expected corruption, got {:?}", other.map(|r| r.frames)),
        }
    }

    #[test]
    fn inspect_reports_first_bad_frame() {
        let mut bytes = journal(&[
            vec![JournalEntry::SetLegacyMigrated],
            vec![JournalEntry::SetCloudDataReceived, JournalEntry::SetToken(None)],
        ]);
        let healthy = inspect_journal(&bytes);
        assert!(healthy.is_healthy());
        assert_eq!(healthy.frames, 2);
        assert_eq!(healthy.entries, 3);

        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let damaged = inspect_journal(&bytes);
        assert_eq!(damaged.frames, 1);
        assert!(damaged.first_error.is_some());
    }
}
