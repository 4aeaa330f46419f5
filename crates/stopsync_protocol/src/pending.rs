//! Queue of local mutations not yet confirmed by the cloud.

use crate::stop::{FavouriteStop, StopId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// What a pending operation will do remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Save the record.
    Upsert,
    /// Delete the record.
    Delete,
}

/// A local mutation waiting for cloud confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Enqueue sequence number. A newer operation for the same key always
    /// has a larger `seq`.
    pub seq: u64,
    /// Target record.
    pub stop_id: StopId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Record to save. `None` for deletes.
    pub payload: Option<FavouriteStop>,
    /// When the operation was enqueued.
    pub enqueued_at: Timestamp,
    /// Number of push attempts so far.
    pub attempt_count: u32,
    /// When the last attempt started.
    pub last_attempt_at: Option<Timestamp>,
}

/// Pending operations, at most one per stop.
///
/// # Invariants
///
/// - Operations are kept in enqueue order (`seq` ascending)
/// - Enqueueing for a key that already has an operation supersedes it; the
///   new operation takes a fresh, larger `seq` and moves to the back
/// - `seq` values are never reused
#[derive(Debug, Clone)]
pub struct PendingQueue {
    entries: BTreeMap<u64, PendingOperation>,
    by_key: HashMap<StopId, u64>,
    next_seq: u64,
}

impl PendingQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            by_key: HashMap::new(),
            next_seq: 1,
        }
    }

    /// Rebuilds a queue from persisted operations.
    pub fn from_operations(operations: impl IntoIterator<Item = PendingOperation>) -> Self {
        let mut queue = Self::new();
        for op in operations {
            queue.restore(op);
        }
        queue
    }

    /// Makes the next enqueue take at least `next_seq`.
    #[must_use]
    pub fn with_next_seq(mut self, next_seq: u64) -> Self {
        self.next_seq = self.next_seq.max(next_seq);
        self
    }

    /// Enqueues an operation, superseding any older one for the same stop.
    ///
    /// Returns a copy of the stored operation.
    pub fn enqueue(
        &mut self,
        stop_id: StopId,
        kind: OperationKind,
        payload: Option<FavouriteStop>,
        now: Timestamp,
    ) -> PendingOperation {
        let seq = self.next_seq;
        self.next_seq += 1;

        let op = PendingOperation {
            seq,
            stop_id,
            kind,
            payload,
            enqueued_at: now,
            attempt_count: 0,
            last_attempt_at: None,
        };
        self.insert(op.clone());
        op
    }

    /// Puts back an operation exactly as it was persisted, keeping its `seq`.
    pub fn restore(&mut self, op: PendingOperation) {
        self.next_seq = self.next_seq.max(op.seq + 1);
        self.insert(op);
    }

    fn insert(&mut self, op: PendingOperation) {
        if let Some(old_seq) = self.by_key.insert(op.stop_id.clone(), op.seq) {
            self.entries.remove(&old_seq);
        }
        self.entries.insert(op.seq, op);
    }

    /// Removes and returns the operation for `stop_id`.
    pub fn dequeue(&mut self, stop_id: &StopId) -> Option<PendingOperation> {
        let seq = self.by_key.remove(stop_id)?;
        self.entries.remove(&seq)
    }

    /// Returns the operation for `stop_id`.
    pub fn get(&self, stop_id: &StopId) -> Option<&PendingOperation> {
        self.by_key.get(stop_id).and_then(|seq| self.entries.get(seq))
    }

    /// Returns true if `stop_id` has a queued operation.
    pub fn contains(&self, stop_id: &StopId) -> bool {
        self.by_key.contains_key(stop_id)
    }

    /// Returns queued operations in enqueue order.
    pub fn list_pending(&self) -> impl Iterator<Item = &PendingOperation> {
        self.entries.values()
    }

    /// Records a push attempt for `stop_id`.
    ///
    /// Returns the new attempt count, or `None` if nothing is queued.
    pub fn increment_attempt(&mut self, stop_id: &StopId, now: Timestamp) -> Option<u32> {
        let seq = self.by_key.get(stop_id)?;
        let op = self.entries.get_mut(seq)?;
        op.attempt_count = op.attempt_count.saturating_add(1);
        op.last_attempt_at = Some(now);
        Some(op.attempt_count)
    }

    /// Returns the sequence number the next enqueue will take.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every operation. Sequence numbers keep counting.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_key.clear();
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(s: &str) -> StopId {
        StopId::new(s).unwrap()
    }

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn enqueue_assigns_increasing_seq() {
        let mut queue = PendingQueue::new();
        let a = queue.enqueue(id("A"), OperationKind::Upsert, None, ts(1));
        let b = queue.enqueue(id("B"), OperationKind::Delete, None, ts(2));

        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next_seq(), 3);
    }

    #[test]
    fn enqueue_supersedes_and_moves_to_back() {
        let mut queue = PendingQueue::new();
        queue.enqueue(id("A"), OperationKind::Upsert, None, ts(1));
        queue.enqueue(id("B"), OperationKind::Upsert, None, ts(2));
        queue.increment_attempt(&id("A"), ts(3));
        let newer = queue.enqueue(id("A"), OperationKind::Delete, None, ts(4));

        assert_eq!(queue.len(), 2);
        let order: Vec<_> = queue.list_pending().map(|op| op.stop_id.as_str()).collect();
        assert_eq!(order, vec!["B", "A"]);

        let stored = queue.get(&id("A")).unwrap();
        assert_eq!(stored, &newer);
        assert_eq!(stored.kind, OperationKind::Delete);
        assert_eq!(stored.attempt_count, 0);
    }

    #[test]
    fn dequeue_removes_only_target() {
        let mut queue = PendingQueue::new();
        queue.enqueue(id("A"), OperationKind::Upsert, None, ts(1));
        queue.enqueue(id("B"), OperationKind::Upsert, None, ts(1));

        let removed = queue.dequeue(&id("A")).unwrap();
        assert_eq!(removed.stop_id, id("A"));
        assert!(queue.dequeue(&id("A")).is_none());
        assert!(queue.contains(&id("B")));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn increment_attempt_tracks_time() {
        let mut queue = PendingQueue::new();
        queue.enqueue(id("A"), OperationKind::Upsert, None, ts(1));

        assert_eq!(queue.increment_attempt(&id("A"), ts(10)), Some(1));
        assert_eq!(queue.increment_attempt(&id("A"), ts(20)), Some(2));
        assert_eq!(queue.increment_attempt(&id("missing"), ts(20)), None);

        let op = queue.get(&id("A")).unwrap();
        assert_eq!(op.attempt_count, 2);
        assert_eq!(op.last_attempt_at, Some(ts(20)));
    }

    #[test]
    fn restore_keeps_seq_and_advances_counter() {
        let mut original = PendingQueue::new();
        original.enqueue(id("A"), OperationKind::Upsert, None, ts(1));
        original.enqueue(id("B"), OperationKind::Upsert, None, ts(1));
        original.enqueue(id("A"), OperationKind::Delete, None, ts(1));

        let persisted: Vec<_> = original.list_pending().cloned().collect();
        let mut rebuilt = PendingQueue::from_operations(persisted);

        assert_eq!(rebuilt.get(&id("A")).unwrap().seq, 3);
        let next = rebuilt.enqueue(id("C"), OperationKind::Upsert, None, ts(2));
        assert_eq!(next.seq, 4);
    }

    #[test]
    fn clear_keeps_counting() {
        let mut queue = PendingQueue::new();
        queue.enqueue(id("A"), OperationKind::Upsert, None, ts(1));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.enqueue(id("A"), OperationKind::Upsert, None, ts(1)).seq, 2);
    }

    proptest! {
        #[test]
        fn at_most_one_operation_per_stop(keys in prop::collection::vec(0u8..6, 0..64)) {
            let mut queue = PendingQueue::new();
            for (i, key) in keys.iter().enumerate() {
                let stop = id(&format!("S{key}"));
                if i % 5 == 4 {
                    queue.dequeue(&stop);
                } else {
                    queue.enqueue(stop, OperationKind::Upsert, None, ts(i as i64));
                }
            }

            let ops: Vec<_> = queue.list_pending().collect();
            let mut seen = std::collections::HashSet::new();
            for op in &ops {
                prop_assert!(seen.insert(op.stop_id.clone()));
            }
            prop_assert!(ops.windows(2).all(|w| w[0].seq < w[1].seq));
            prop_assert_eq!(ops.len(), queue.len());
        }
    }
}
