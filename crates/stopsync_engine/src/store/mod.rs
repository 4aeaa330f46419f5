//! The device-local favourites cache.
//!
//! A [`LocalStore`] owns one journal on a [`StorageBackend`] and an
//! in-memory copy of everything the journal describes: records, the pending
//! operation queue, the change token and the bootstrap flags.
//!
//! All mutations go through [`LocalStore::transaction`]. A transaction runs
//! against a working copy of the state, is written as one journal frame and
//! only then becomes visible. Writers are serialized by a single lock, and
//! change events are published before that lock is released.

mod journal;

pub use journal::{inspect_journal, JournalEntry, JournalReport, Snapshot};

use crate::error::SyncResult;
use crate::notifier::{ChangeEvent, ChangeNotifier, ChangeSubscription};
use journal::StoreState;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use stopsync_protocol::{
    display_order, ChangeToken, FavouriteStop, OperationKind, PendingOperation, StopId,
    SyncState, Timestamp,
};
use stopsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::{debug, info, warn};

/// File name of the journal inside a store directory.
pub const JOURNAL_FILE_NAME: &str = "favourites.journal";

const DEFAULT_COMPACT_AFTER_FRAMES: usize = 256;

struct StoreInner {
    backend: Box<dyn StorageBackend>,
    state: StoreState,
    frames_since_snapshot: usize,
}

/// Persistent, single-writer favourites cache.
pub struct LocalStore {
    inner: Mutex<StoreInner>,
    notifier: ChangeNotifier,
    compact_after_frames: AtomicUsize,
}

impl LocalStore {
    /// Opens a store by replaying the journal held by `backend`.
    ///
    /// A torn trailing frame left by a crash is cut off.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::LocalStoreCorruption`] if any complete
    /// frame fails its checksum or cannot be decoded.
    pub fn open(backend: impl StorageBackend + 'static) -> SyncResult<Self> {
        let mut backend: Box<dyn StorageBackend> = Box::new(backend);
        let bytes = backend.read_all()?;
        let replay = journal::replay(&bytes)?;

        if replay.torn_tail {
            warn!(
                valid_len = replay.valid_len,
                size = bytes.len(),
                "dropping torn journal tail"
            );
            backend.truncate(replay.valid_len)?;
        }

        info!(
            records = replay.state.records.len(),
            pending = replay.state.pending.len(),
            frames = replay.frames,
            "opened local store"
        );

        let store = Self::from_parts(backend, replay.state);
        store.inner.lock().frames_since_snapshot = replay.frames;
        Ok(store)
    }

    /// Opens the store kept in `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is locked by another process, the
    /// journal cannot be read, or it is corrupt.
    pub fn open_dir(dir: &Path) -> SyncResult<Self> {
        Self::open(FileBackend::open_with_create_dirs(&dir.join(JOURNAL_FILE_NAME))?)
    }

    /// Creates an empty store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::from_parts(Box::new(InMemoryBackend::new()), StoreState::default())
    }

    /// Discards whatever `backend` holds and starts an empty store.
    ///
    /// Used to recover from [`crate::SyncError::LocalStoreCorruption`].
    /// The fresh store is marked as already migrated so the legacy source
    /// is never consulted a second time.
    ///
    /// # Errors
    ///
    /// Returns an error if the empty journal cannot be written.
    pub fn reset(backend: impl StorageBackend + 'static) -> SyncResult<Self> {
        let mut backend: Box<dyn StorageBackend> = Box::new(backend);
        let state = StoreState {
            legacy_migrated: true,
            ..StoreState::default()
        };
        let frame = journal::encode_commit(&[JournalEntry::Snapshot(state.to_snapshot())])?;
        backend.replace(&frame)?;
        warn!("local store reset to empty");
        Ok(Self::from_parts(backend, state))
    }

    fn from_parts(backend: Box<dyn StorageBackend>, state: StoreState) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                backend,
                state,
                frames_since_snapshot: 0,
            }),
            notifier: ChangeNotifier::new(),
            compact_after_frames: AtomicUsize::new(DEFAULT_COMPACT_AFTER_FRAMES),
        }
    }

    /// Sets how many frames may accumulate before automatic compaction.
    ///
    /// Zero disables automatic compaction.
    pub fn set_compact_after_frames(&self, frames: usize) {
        self.compact_after_frames.store(frames, Ordering::Relaxed);
    }

    /// Runs `f` as one atomic, durable commit.
    ///
    /// If `f` returns an error, or the frame cannot be written, nothing
    /// changes and no events are published.
    ///
    /// # Errors
    ///
    /// Returns the closure's error or a storage error.
    pub fn transaction<R>(
        &self,
        f: impl FnOnce(&mut StoreTxn<'_>) -> SyncResult<R>,
    ) -> SyncResult<R> {
        let mut inner = self.inner.lock();
        let mut working = inner.state.clone();
        let mut txn = StoreTxn {
            state: &mut working,
            entries: Vec::new(),
            events: Vec::new(),
        };
        let result = f(&mut txn)?;
        let StoreTxn {
            entries, events, ..
        } = txn;

        if entries.is_empty() {
            return Ok(result);
        }

        let frame = journal::encode_commit(&entries)?;
        let size_before = inner.backend.size()?;
        let written = match inner.backend.append(&frame) {
            Ok(_) => inner.backend.sync(),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // Leave no partial frame for the next commit to land behind.
            if let Err(cleanup) = inner.backend.truncate(size_before) {
                warn!(error = %cleanup, "could not cut failed commit");
            }
            return Err(e.into());
        }

        inner.state = working;
        inner.frames_since_snapshot += 1;
        debug!(entries = entries.len(), "committed");

        for event in events {
            self.notifier.publish(event);
        }

        let threshold = self.compact_after_frames.load(Ordering::Relaxed);
        if threshold > 0 && inner.frames_since_snapshot >= threshold {
            if let Err(e) = compact_locked(&mut inner) {
                warn!(error = %e, "automatic compaction failed");
            }
        }

        Ok(result)
    }

    /// Rewrites the journal as a single snapshot frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written. The old journal
    /// stays in place.
    pub fn compact(&self) -> SyncResult<()> {
        compact_locked(&mut self.inner.lock())
    }

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn upsert(&self, record: FavouriteStop) -> SyncResult<()> {
        self.transaction(|txn| {
            txn.upsert(record);
            Ok(())
        })
    }

    /// Removes a record, returning it if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn delete(&self, stop_id: &StopId) -> SyncResult<Option<FavouriteStop>> {
        self.transaction(|txn| Ok(txn.delete(stop_id)))
    }

    /// Changes a record's sync state. Returns false if there is no record.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn mark_sync_state(&self, stop_id: &StopId, state: SyncState) -> SyncResult<bool> {
        self.transaction(|txn| Ok(txn.mark_sync_state(stop_id, state)))
    }

    /// Returns the record for `stop_id`, whatever its sync state.
    pub fn find(&self, stop_id: &StopId) -> Option<FavouriteStop> {
        self.inner.lock().state.records.get(stop_id).cloned()
    }

    /// Returns every record in display order, whatever its sync state.
    pub fn list_all(&self) -> Vec<FavouriteStop> {
        let mut records: Vec<_> = self.inner.lock().state.records.values().cloned().collect();
        records.sort_by(display_order);
        records
    }

    /// Returns the pending operation for `stop_id`.
    pub fn pending(&self, stop_id: &StopId) -> Option<PendingOperation> {
        self.inner.lock().state.pending.get(stop_id).cloned()
    }

    /// Returns pending operations in enqueue order.
    pub fn list_pending(&self) -> Vec<PendingOperation> {
        self.inner
            .lock()
            .state
            .pending
            .list_pending()
            .cloned()
            .collect()
    }

    /// Returns the persisted change token.
    pub fn change_token(&self) -> Option<ChangeToken> {
        self.inner.lock().state.token.clone()
    }

    /// True once the legacy source has been consulted.
    pub fn legacy_migrated(&self) -> bool {
        self.inner.lock().state.legacy_migrated
    }

    /// True once a complete cloud fetch has been applied.
    pub fn cloud_data_received(&self) -> bool {
        self.inner.lock().state.cloud_data_received
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.inner.lock().state.records.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns counters describing the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal size cannot be read.
    pub fn summary(&self) -> SyncResult<StoreSummary> {
        let inner = self.inner.lock();
        let state = &inner.state;
        Ok(StoreSummary {
            records: state.records.len(),
            pending_push: count_state(state, SyncState::PendingPush),
            pending_delete: count_state(state, SyncState::PendingDelete),
            queued_operations: state.pending.len(),
            has_change_token: state.token.is_some(),
            legacy_migrated: state.legacy_migrated,
            cloud_data_received: state.cloud_data_received,
            journal_size: inner.backend.size()?,
            frames_since_compaction: inner.frames_since_snapshot,
        })
    }

    /// Subscribes to change events.
    pub fn subscribe(&self) -> ChangeSubscription {
        self.notifier.subscribe()
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LocalStore")
            .field("records", &inner.state.records.len())
            .field("pending", &inner.state.pending.len())
            .field("frames_since_snapshot", &inner.frames_since_snapshot)
            .finish()
    }
}

fn compact_locked(inner: &mut StoreInner) -> SyncResult<()> {
    let frame = journal::encode_commit(&[JournalEntry::Snapshot(inner.state.to_snapshot())])?;
    let before = inner.backend.size()?;
    inner.backend.replace(&frame)?;
    info!(before, after = frame.len(), "compacted journal");
    inner.frames_since_snapshot = 1;
    Ok(())
}

fn count_state(state: &StoreState, sync_state: SyncState) -> usize {
    state
        .records
        .values()
        .filter(|r| r.sync_state == sync_state)
        .count()
}

/// Counters describing a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    /// Number of records, including ones awaiting a confirmed delete.
    pub records: usize,
    /// Records edited locally and not yet confirmed.
    pub pending_push: usize,
    /// Records deleted locally and not yet confirmed.
    pub pending_delete: usize,
    /// Operations in the pending queue.
    pub queued_operations: usize,
    /// Whether a change token is stored.
    pub has_change_token: bool,
    /// Whether the legacy source has been consulted.
    pub legacy_migrated: bool,
    /// Whether a complete cloud fetch has been applied.
    pub cloud_data_received: bool,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Frames written since the last snapshot.
    pub frames_since_compaction: usize,
}

/// A working copy of the store inside [`LocalStore::transaction`].
///
/// Reads see the transaction's own writes. Writes that would not change
/// anything are skipped and produce neither journal entries nor events.
pub struct StoreTxn<'a> {
    state: &'a mut StoreState,
    entries: Vec<JournalEntry>,
    events: Vec<ChangeEvent>,
}

impl StoreTxn<'_> {
    /// Returns the record for `stop_id`.
    pub fn find(&self, stop_id: &StopId) -> Option<&FavouriteStop> {
        self.state.records.get(stop_id)
    }

    /// Inserts or replaces a record. Returns false if it was already stored
    /// exactly as given.
    pub fn upsert(&mut self, record: FavouriteStop) -> bool {
        if self.state.records.get(&record.stop_id) == Some(&record) {
            return false;
        }
        self.events.push(ChangeEvent {
            stop_id: record.stop_id.clone(),
            // A record awaiting a confirmed delete is already gone for
            // observers.
            new_value: (record.sync_state != SyncState::PendingDelete).then(|| record.clone()),
        });
        self.entries.push(JournalEntry::PutStop(record.clone()));
        self.state.records.insert(record.stop_id.clone(), record);
        true
    }

    /// Removes a record, returning it if it existed.
    pub fn delete(&mut self, stop_id: &StopId) -> Option<FavouriteStop> {
        let removed = self.state.records.remove(stop_id)?;
        self.entries.push(JournalEntry::RemoveStop(stop_id.clone()));
        self.events.push(ChangeEvent {
            stop_id: stop_id.clone(),
            new_value: None,
        });
        Some(removed)
    }

    /// Changes a record's sync state. Returns false if there is no record.
    pub fn mark_sync_state(&mut self, stop_id: &StopId, sync_state: SyncState) -> bool {
        let Some(record) = self.find(stop_id) else {
            return false;
        };
        let updated = record.clone().with_sync_state(sync_state);
        self.upsert(updated);
        true
    }

    /// Returns the pending operation for `stop_id`.
    pub fn pending(&self, stop_id: &StopId) -> Option<&PendingOperation> {
        self.state.pending.get(stop_id)
    }

    /// Returns pending operations in enqueue order.
    pub fn list_pending(&self) -> impl Iterator<Item = &PendingOperation> {
        self.state.pending.list_pending()
    }

    /// Enqueues an operation, superseding any older one for the same stop.
    pub fn enqueue(
        &mut self,
        stop_id: StopId,
        kind: OperationKind,
        payload: Option<FavouriteStop>,
        now: Timestamp,
    ) -> PendingOperation {
        let op = self.state.pending.enqueue(stop_id, kind, payload, now);
        self.entries.push(JournalEntry::PutPending(op.clone()));
        op
    }

    /// Removes the pending operation for `stop_id`.
    pub fn dequeue(&mut self, stop_id: &StopId) -> Option<PendingOperation> {
        let op = self.state.pending.dequeue(stop_id)?;
        self.entries.push(JournalEntry::RemovePending(stop_id.clone()));
        Some(op)
    }

    /// Records a push attempt. Returns the new attempt count.
    pub fn increment_attempt(&mut self, stop_id: &StopId, now: Timestamp) -> Option<u32> {
        let count = self.state.pending.increment_attempt(stop_id, now)?;
        let op = self.state.pending.get(stop_id)?.clone();
        self.entries.push(JournalEntry::PutPending(op));
        Some(count)
    }

    /// Returns the change token.
    pub fn change_token(&self) -> Option<&ChangeToken> {
        self.state.token.as_ref()
    }

    /// Replaces the change token.
    pub fn set_change_token(&mut self, token: Option<ChangeToken>) {
        if self.state.token == token {
            return;
        }
        self.entries.push(JournalEntry::SetToken(token.clone()));
        self.state.token = token;
    }

    /// True once the legacy source has been consulted.
    pub fn legacy_migrated(&self) -> bool {
        self.state.legacy_migrated
    }

    /// Records that the legacy source has been consulted.
    pub fn set_legacy_migrated(&mut self) {
        if !self.state.legacy_migrated {
            self.entries.push(JournalEntry::SetLegacyMigrated);
            self.state.legacy_migrated = true;
        }
    }

    /// True once a complete cloud fetch has been applied.
    pub fn cloud_data_received(&self) -> bool {
        self.state.cloud_data_received
    }

    /// Records that a complete cloud fetch has been applied.
    pub fn set_cloud_data_received(&mut self) {
        if !self.state.cloud_data_received {
            self.entries.push(JournalEntry::SetCloudDataReceived);
            self.state.cloud_data_received = true;
        }
    }
}
