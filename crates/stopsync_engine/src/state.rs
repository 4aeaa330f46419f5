//! Engine states, statuses and counters.

use std::time::Instant;

/// Lifecycle state of the sync engine.
///
/// ```text
/// Uninitialized -> Bootstrapping -> Ready <-> Syncing
/// ```
///
/// `Bootstrapping` is re-entered if the cloud reports that the zone has
/// gone missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, nothing attempted yet.
    Uninitialized,
    /// Importing legacy data and setting up the cloud zone. Stays here
    /// until setup succeeds.
    Bootstrapping,
    /// Set up and idle.
    Ready,
    /// A fetch is in progress.
    Syncing,
}

impl EngineState {
    /// True once bootstrap has completed.
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineState::Ready | EngineState::Syncing)
    }

    /// Returns true if the engine may move from this state to `next`.
    pub fn can_transition_to(&self, next: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (*self, next),
            (Uninitialized, Bootstrapping)
                | (Bootstrapping, Bootstrapping)
                | (Bootstrapping, Ready)
                | (Ready, Syncing)
                | (Syncing, Ready)
                | (Ready, Bootstrapping)
                | (Syncing, Bootstrapping)
        )
    }
}

/// Sync status of one record as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Matches the cloud.
    Clean,
    /// Local edit waiting to be pushed.
    PendingPush,
    /// Local delete waiting to be pushed.
    PendingDelete,
    /// The last local change was given up on after too many failed pushes.
    /// Editing the record again retries it.
    Failed,
}

/// Counts from one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Pages fetched.
    pub batches: usize,
    /// Remote values written to the store.
    pub applied: usize,
    /// Local records removed by tombstones.
    pub deleted: usize,
    /// Remote changes that lost to a pending local record.
    pub kept_local: usize,
    /// Remote changes that matched what was already stored.
    pub unchanged: usize,
    /// True if the fetch ignored the stored token.
    pub full_refetch: bool,
}

impl FetchOutcome {
    /// True if the fetch changed any record.
    pub fn has_changes(&self) -> bool {
        self.applied > 0 || self.deleted > 0
    }

    pub(crate) fn merge(&mut self, other: FetchOutcome) {
        self.batches += other.batches;
        self.applied += other.applied;
        self.deleted += other.deleted;
        self.kept_local += other.kept_local;
        self.unchanged += other.unchanged;
        self.full_refetch |= other.full_refetch;
    }
}

/// Answer to a host's background fetch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundFetchResult {
    /// The fetch changed the cache.
    NewData,
    /// The fetch finished without changes, or there was nothing to fetch.
    NoData,
    /// The fetch failed or ran out of time.
    Failed,
}

/// Platform events that prompt the engine to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The app launched.
    Startup,
    /// The app came to the foreground.
    Foreground,
    /// The network came back.
    ConnectivityRestored,
    /// A scheduled background wake-up.
    PeriodicWake,
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Pushes and deletes the cloud confirmed.
    pub pushes_confirmed: u64,
    /// Push attempts that failed and stayed queued.
    pub pushes_failed: u64,
    /// Pushes the server rejected as conflicting.
    pub push_conflicts: u64,
    /// Operations given up on after `max_attempts`.
    pub operations_abandoned: u64,
    /// Fetches that completed.
    pub fetches_completed: u64,
    /// Remote changes written to the store.
    pub changes_applied: u64,
    /// Times the change token was discarded as expired.
    pub token_resets: u64,
    /// Last completed fetch.
    pub last_fetch_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_states() {
        assert!(!EngineState::Uninitialized.is_ready());
        assert!(!EngineState::Bootstrapping.is_ready());
        assert!(EngineState::Ready.is_ready());
        assert!(EngineState::Syncing.is_ready());
    }

    #[test]
    fn transitions() {
        use EngineState::*;
        assert!(Uninitialized.can_transition_to(Bootstrapping));
        assert!(Bootstrapping.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Ready));
        assert!(Syncing.can_transition_to(Bootstrapping));

        assert!(!Uninitialized.can_transition_to(Ready));
        assert!(!Uninitialized.can_transition_to(Syncing));
        assert!(!Bootstrapping.can_transition_to(Syncing));
        assert!(!Syncing.can_transition_to(Syncing));
    }

    #[test]
    fn outcome_merge_and_changes() {
        let mut total = FetchOutcome::default();
        assert!(!total.has_changes());

        total.merge(FetchOutcome {
            batches: 1,
            unchanged: 3,
            ..FetchOutcome::default()
        });
        assert!(!total.has_changes());

        total.merge(FetchOutcome {
            batches: 1,
            deleted: 1,
            full_refetch: true,
            ..FetchOutcome::default()
        });
        assert!(total.has_changes());
        assert_eq!(total.batches, 2);
        assert!(total.full_refetch);
    }
}
