//! The sync engine.

use crate::cloud::{CloudBackend, CloudError};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::legacy::LegacySource;
use crate::notifier::ChangeSubscription;
use crate::state::{EngineState, FetchOutcome, SyncStats, SyncStatus, Trigger};
use crate::store::LocalStore;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use stopsync_protocol::{FavouriteStop, StopId, SyncState};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

pub(crate) type FetchSlot = Option<watch::Receiver<Option<SyncResult<FetchOutcome>>>>;

/// Keeps the local favourites cache in step with the cloud.
///
/// The engine owns the [`LocalStore`], talks to a [`CloudBackend`] and
/// drains a [`LegacySource`] once. Local reads and writes never wait for
/// the network; pushes and fetches run as Tokio tasks.
///
/// Methods that start background work take `self: &Arc<Self>`.
///
/// # Example
///
/// ```rust,ignore
/// let engine = Arc::new(SyncEngine::new(SyncConfig::default(), store, cloud));
/// engine.handle_trigger(Trigger::Startup).await?;
/// engine.add_or_edit(StopId::new("ABCD")?, "Main St", true)?;
/// ```
pub struct SyncEngine<C: CloudBackend> {
    pub(crate) config: SyncConfig,
    pub(crate) store: LocalStore,
    pub(crate) cloud: C,
    legacy: Mutex<Option<Arc<dyn LegacySource>>>,
    state: RwLock<EngineState>,
    pub(crate) stats: RwLock<SyncStats>,
    bootstrap_lock: AsyncMutex<()>,
    key_locks: Mutex<HashMap<StopId, Arc<AsyncMutex<()>>>>,
    pub(crate) fetch_slot: Mutex<FetchSlot>,
    pub(crate) full_refetch_requested: AtomicBool,
    pub(crate) cancel_requested: AtomicBool,
    auth_failure: RwLock<Option<String>>,
    rate_limited_until: Mutex<Option<Instant>>,
}

impl<C: CloudBackend> SyncEngine<C> {
    /// Creates an engine over `store` and `cloud`.
    pub fn new(config: SyncConfig, store: LocalStore, cloud: C) -> Self {
        store.set_compact_after_frames(config.compact_after_frames);
        Self {
            config,
            store,
            cloud,
            legacy: Mutex::new(None),
            state: RwLock::new(EngineState::Uninitialized),
            stats: RwLock::new(SyncStats::default()),
            bootstrap_lock: AsyncMutex::new(()),
            key_locks: Mutex::new(HashMap::new()),
            fetch_slot: Mutex::new(None),
            full_refetch_requested: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            auth_failure: RwLock::new(None),
            rate_limited_until: Mutex::new(None),
        }
    }

    /// Sets the legacy cache to import from during bootstrap.
    pub fn with_legacy_source(self, source: impl LegacySource + 'static) -> Self {
        *self.legacy.lock() = Some(Arc::new(source));
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the local store.
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Gets the cloud backend.
    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    /// Subscribes to cache changes from any source.
    pub fn subscribe(&self) -> ChangeSubscription {
        self.store.subscribe()
    }

    /// Returns a favourite, unless it is deleted or awaiting deletion.
    pub fn find(&self, stop_id: &StopId) -> Option<FavouriteStop> {
        self.store
            .find(stop_id)
            .filter(|r| r.sync_state != SyncState::PendingDelete)
    }

    /// Returns favourites in display order, without those awaiting deletion.
    pub fn list_all(&self) -> Vec<FavouriteStop> {
        self.store
            .list_all()
            .into_iter()
            .filter(|r| r.sync_state != SyncState::PendingDelete)
            .collect()
    }

    /// Reports whether a record's last local change has reached the cloud.
    ///
    /// Returns `None` if the store has no such record.
    pub fn sync_status(&self, stop_id: &StopId) -> Option<SyncStatus> {
        let record = self.store.find(stop_id)?;
        let queued = self.store.pending(stop_id).is_some();
        Some(match (record.sync_state, queued) {
            (SyncState::Clean, _) => SyncStatus::Clean,
            (_, false) => SyncStatus::Failed,
            (SyncState::PendingPush, true) => SyncStatus::PendingPush,
            (SyncState::PendingDelete, true) => SyncStatus::PendingDelete,
        })
    }

    /// True once a complete cloud fetch has been applied on this device.
    pub fn has_received_cloud_data(&self) -> bool {
        self.store.cloud_data_received()
    }

    /// Returns the stored authentication failure, if cloud calls are blocked.
    pub fn auth_failure(&self) -> Option<String> {
        self.auth_failure.read().clone()
    }

    /// Lifts the block set by a permanent authentication failure.
    pub fn clear_auth_failure(&self) {
        if self.auth_failure.write().take().is_some() {
            info!("authentication failure cleared; cloud calls resume");
        }
    }

    /// Asks the in-flight fetch to stop before its next page.
    pub fn cancel_fetch(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Imports legacy data once and sets up the cloud zone.
    ///
    /// Does nothing if the engine is already ready. On failure the engine
    /// stays `Bootstrapping` and the next call tries again.
    ///
    /// # Errors
    ///
    /// Returns the cloud setup error, or a store error.
    pub async fn bootstrap(&self) -> SyncResult<()> {
        let _guard = self.bootstrap_lock.lock().await;
        if self.state().is_ready() {
            return Ok(());
        }

        self.transition(EngineState::Bootstrapping)?;
        self.import_legacy().await?;
        self.check_auth()?;

        match self.cloud.ensure_zone_and_subscription().await {
            Ok(()) => {
                self.transition(EngineState::Ready)?;
                info!(
                    zone = %self.config.zone.zone_name,
                    record_type = %self.config.zone.record_type,
                    "sync engine ready"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "cloud setup failed; will retry on next trigger");
                Err(self.note_cloud_error(e))
            }
        }
    }

    async fn import_legacy(&self) -> SyncResult<()> {
        if self.store.legacy_migrated() {
            return Ok(());
        }

        let source = self.legacy.lock().clone();
        let records = match source {
            Some(source) => match source.fetch_all_once().await {
                Ok(records) => records,
                Err(e) => {
                    warn!(error = %e, "legacy cache unreadable; importing nothing");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let found = records.len();
        let imported = self.store.transaction(|txn| {
            let mut imported = 0;
            for record in records {
                if txn.find(&record.stop_id).is_some() {
                    debug!(stop_id = %record.stop_id, "local record wins over legacy");
                    continue;
                }
                txn.upsert(FavouriteStop::new(
                    record.stop_id,
                    record.description,
                    record.preferred,
                    record.last_modified.unwrap_or_default(),
                ));
                imported += 1;
            }
            txn.set_legacy_migrated();
            Ok(imported)
        })?;
        self.legacy.lock().take();

        info!(found, imported, "legacy import finished");
        Ok(())
    }

    /// Runs the work a platform event calls for.
    ///
    /// Bootstraps if needed, retries due pending operations, then fetches
    /// remote changes incrementally.
    ///
    /// # Errors
    ///
    /// Returns bootstrap or fetch errors, and user-actionable errors from
    /// the retry pass. Other retry failures are logged and left queued.
    pub async fn handle_trigger(self: &Arc<Self>, trigger: Trigger) -> SyncResult<FetchOutcome> {
        info!(?trigger, "handling trigger");
        self.bootstrap().await?;

        match self.retry_pending().await {
            Ok(report) => debug!(?report, "retry pass finished"),
            Err(e) if e.is_user_actionable() => return Err(e),
            Err(e) => warn!(error = %e, "retry pass failed"),
        }

        self.fetch_remote_changes(false).await
    }

    pub(crate) fn transition(&self, to: EngineState) -> SyncResult<()> {
        let mut state = self.state.write();
        if !state.can_transition_to(to) {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: format!("{to:?}"),
            });
        }
        if *state != to {
            debug!(from = ?*state, to = ?to, "engine state");
        }
        *state = to;
        Ok(())
    }

    /// Moves `Syncing` back to `Ready`, leaving other states alone.
    pub(crate) fn end_syncing(&self) {
        let mut state = self.state.write();
        if *state == EngineState::Syncing {
            *state = EngineState::Ready;
        }
    }

    pub(crate) fn check_auth(&self) -> SyncResult<()> {
        match self.auth_failure.read().as_ref() {
            Some(message) => Err(SyncError::PermanentAuthFailure(message.clone())),
            None => Ok(()),
        }
    }

    /// Whether a push may go out now: `Ok(false)` means try later.
    pub(crate) fn cloud_gate(&self) -> SyncResult<bool> {
        self.check_auth()?;
        if !self.state().is_ready() {
            return Ok(false);
        }
        let mut until = self.rate_limited_until.lock();
        match *until {
            Some(deadline) if deadline > Instant::now() => Ok(false),
            Some(_) => {
                *until = None;
                Ok(true)
            }
            None => Ok(true),
        }
    }

    /// Applies the side effects of a cloud failure and converts it.
    pub(crate) fn note_cloud_error(&self, err: CloudError) -> SyncError {
        match &err {
            CloudError::PermanentAuth(message) => {
                error!(error = %message, "cloud rejected credentials; automatic sync stopped");
                *self.auth_failure.write() = Some(message.clone());
            }
            CloudError::RateLimited { retry_after } => {
                warn!(?retry_after, "cloud rate limit");
                *self.rate_limited_until.lock() = Some(Instant::now() + *retry_after);
            }
            CloudError::ZoneNotReady => {
                let mut state = self.state.write();
                if state.can_transition_to(EngineState::Bootstrapping) {
                    *state = EngineState::Bootstrapping;
                }
            }
            CloudError::Transient(_) | CloudError::TokenExpired => {}
        }

        let err = SyncError::from(err);
        self.stats.write().last_error = Some(err.to_string());
        err
    }

    pub(crate) fn key_lock(&self, stop_id: &StopId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.key_locks.lock().entry(stop_id.clone()).or_default())
    }

    pub(crate) fn release_key_lock(&self, stop_id: &StopId) {
        let mut locks = self.key_locks.lock();
        if locks
            .get(stop_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(stop_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CloudResult, PushOutcome};
    use crate::legacy::{LegacyRecord, StaticLegacySource};
    use crate::push::PushStatus;
    use async_trait::async_trait;
    use stopsync_protocol::{ChangeBatch, ChangeToken};

    /// A cloud that is never reachable.
    struct OfflineCloud;

    #[async_trait]
    impl CloudBackend for OfflineCloud {
        async fn ensure_zone_and_subscription(&self) -> CloudResult<()> {
            Err(CloudError::Transient("offline".into()))
        }

        async fn push(&self, _record: &FavouriteStop) -> CloudResult<PushOutcome> {
            Err(CloudError::Transient("offline".into()))
        }

        async fn push_delete(&self, _stop_id: &StopId) -> CloudResult<()> {
            Err(CloudError::Transient("offline".into()))
        }

        async fn fetch_changes(&self, _token: Option<&ChangeToken>) -> CloudResult<ChangeBatch> {
            Err(CloudError::Transient("offline".into()))
        }
    }

    fn engine() -> Arc<SyncEngine<OfflineCloud>> {
        Arc::new(SyncEngine::new(
            SyncConfig::default(),
            LocalStore::in_memory(),
            OfflineCloud,
        ))
    }

    fn id(s: &str) -> StopId {
        StopId::new(s).unwrap()
    }

    #[test]
    fn writes_without_runtime_are_deferred() {
        let engine = engine();
        let handle = engine.add_or_edit(id("ABCD"), "Main St", true).unwrap();
        assert!(handle.is_finished());

        assert_eq!(engine.find(&id("ABCD")).unwrap().description, "Main St");
        assert_eq!(engine.sync_status(&id("ABCD")), Some(SyncStatus::PendingPush));
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[test]
    fn edits_stamp_strictly_later() {
        let engine = engine();
        engine.add_or_edit(id("ABCD"), "one", false).unwrap();
        let first = engine.find(&id("ABCD")).unwrap().last_modified;
        engine.add_or_edit(id("ABCD"), "two", false).unwrap();
        let second = engine.find(&id("ABCD")).unwrap().last_modified;

        assert!(second > first);
        assert_eq!(engine.store().list_pending().len(), 1);
    }

    #[test]
    fn deleted_records_are_hidden_until_confirmed() {
        let engine = engine();
        engine.add_or_edit(id("ABCD"), "Main St", true).unwrap();
        engine.add_or_edit(id("EFGH"), "Elsewhere", false).unwrap();
        engine.delete(&id("ABCD")).unwrap();

        assert!(engine.find(&id("ABCD")).is_none());
        assert_eq!(engine.list_all().len(), 1);
        assert_eq!(engine.store().len(), 2);
        assert_eq!(engine.sync_status(&id("ABCD")), Some(SyncStatus::PendingDelete));
    }

    #[tokio::test]
    async fn failed_bootstrap_still_imports_legacy_once() {
        let engine = Arc::new(
            SyncEngine::new(SyncConfig::default(), LocalStore::in_memory(), OfflineCloud)
                .with_legacy_source(StaticLegacySource::new(vec![LegacyRecord::new(
                    id("WXYZ"),
                    "Old Name",
                    false,
                )])),
        );

        let result = engine.bootstrap().await;
        assert!(matches!(result, Err(SyncError::TransientNetworkFailure(_))));
        assert_eq!(engine.state(), EngineState::Bootstrapping);
        assert!(engine.store().legacy_migrated());
        assert_eq!(
            engine.find(&id("WXYZ")).unwrap().sync_state,
            SyncState::Clean
        );

        assert!(engine.bootstrap().await.is_err());
        assert_eq!(engine.store().len(), 1);
        assert!(engine.stats().last_error.is_some());
    }

    #[tokio::test]
    async fn pushes_wait_for_bootstrap() {
        let engine = engine();
        let status = engine
            .add_or_edit(id("ABCD"), "Main St", true)
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(status, PushStatus::Deferred);

        let report = engine.retry_pending().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(report.attempted, 0);
    }

    #[test]
    fn key_locks_are_released() {
        let engine = engine();
        let lock = engine.key_lock(&id("ABCD"));
        engine.release_key_lock(&id("ABCD"));
        assert_eq!(engine.key_locks.lock().len(), 1);

        drop(lock);
        engine.release_key_lock(&id("ABCD"));
        assert!(engine.key_locks.lock().is_empty());
    }
}
