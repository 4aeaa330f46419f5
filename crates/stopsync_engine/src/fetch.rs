//! The fetch path: pulling remote changes into the store.

use crate::cloud::CloudBackend;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::notification::RemoteNotification;
use crate::state::{BackgroundFetchResult, EngineState, FetchOutcome, Trigger};
use crate::store::StoreTxn;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use stopsync_protocol::{ConflictPolicy, RemoteChange, Resolution, SyncState};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type FetchReceiver = watch::Receiver<Option<SyncResult<FetchOutcome>>>;

impl<C: CloudBackend> SyncEngine<C> {
    /// Fetches remote changes and applies them to the store.
    ///
    /// Concurrent calls share one in-flight fetch and all receive its
    /// result. With `ignore_prior_token` the stored change token is
    /// discarded and every record is fetched again; asking for this while a
    /// fetch is running makes that fetch finish with a full pass.
    ///
    /// # Errors
    ///
    /// Returns the cloud or store error that ended the fetch. Batches
    /// applied before the failure stay applied.
    pub async fn fetch_remote_changes(
        self: &Arc<Self>,
        ignore_prior_token: bool,
    ) -> SyncResult<FetchOutcome> {
        let mut rx = self.join_or_start_fetch(ignore_prior_token);
        loop {
            let current = rx.borrow().clone();
            if let Some(result) = current {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(SyncError::Cancelled);
            }
        }
    }

    /// Starts [`SyncEngine::fetch_remote_changes`] on a Tokio task.
    pub fn trigger_fetch(
        self: &Arc<Self>,
        ignore_prior_token: bool,
    ) -> JoinHandle<SyncResult<FetchOutcome>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.fetch_remote_changes(ignore_prior_token).await })
    }

    /// Handles a push notification from the cloud.
    ///
    /// Payloads that do not name this engine's zone are ignored. Otherwise
    /// a fetch runs within the configured background budget; if the budget
    /// runs out the fetch carries on detached and the host is told it
    /// failed.
    pub async fn handle_remote_notification(
        self: &Arc<Self>,
        payload: &Value,
    ) -> BackgroundFetchResult {
        let Some(notification) = RemoteNotification::parse(payload) else {
            debug!("ignoring unrecognised notification");
            return BackgroundFetchResult::NoData;
        };
        if !notification.is_for(&self.config.zone) {
            debug!(zone = %notification.zone_id, "notification for another zone");
            return BackgroundFetchResult::NoData;
        }

        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            engine.bootstrap().await?;
            engine.fetch_remote_changes(false).await
        });
        self.within_budget(task).await
    }

    /// Runs a periodic background wake-up within the background budget.
    pub async fn background_fetch(self: &Arc<Self>) -> BackgroundFetchResult {
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move { engine.handle_trigger(Trigger::PeriodicWake).await });
        self.within_budget(task).await
    }

    async fn within_budget(
        &self,
        task: JoinHandle<SyncResult<FetchOutcome>>,
    ) -> BackgroundFetchResult {
        let budget = self.config.background_fetch_budget;
        match tokio::time::timeout(budget, task).await {
            Ok(Ok(Ok(outcome))) if outcome.has_changes() => BackgroundFetchResult::NewData,
            Ok(Ok(Ok(_))) => BackgroundFetchResult::NoData,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "background fetch failed");
                BackgroundFetchResult::Failed
            }
            Ok(Err(e)) => {
                warn!(error = %e, "background fetch task did not finish");
                BackgroundFetchResult::Failed
            }
            Err(_) => {
                let err = SyncError::Timeout;
                warn!(?budget, error = %err, "background fetch over budget; left running");
                self.stats.write().last_error = Some(err.to_string());
                BackgroundFetchResult::Failed
            }
        }
    }

    fn join_or_start_fetch(self: &Arc<Self>, ignore_prior_token: bool) -> FetchReceiver {
        let mut slot = self.fetch_slot.lock();
        if let Some(rx) = slot.as_ref() {
            if ignore_prior_token {
                self.full_refetch_requested.store(true, Ordering::SeqCst);
            }
            debug!("joining in-flight fetch");
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());
        self.cancel_requested.store(false, Ordering::SeqCst);
        drop(slot);

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let result = engine.run_fetch(ignore_prior_token).await;
            // A successful fetch closes its own slot; a newer fetch may own it by now.
            if result.is_err() {
                engine.fetch_slot.lock().take();
            }
            tx.send_replace(Some(result));
        });
        rx
    }

    async fn run_fetch(&self, ignore_prior_token: bool) -> SyncResult<FetchOutcome> {
        self.bootstrap().await?;
        self.check_auth()?;
        if self.cancel_requested.swap(false, Ordering::SeqCst) {
            info!("fetch cancelled before it started");
            return Err(SyncError::Cancelled);
        }
        self.transition(EngineState::Syncing)?;

        let mut from_scratch =
            self.full_refetch_requested.swap(false, Ordering::SeqCst) || ignore_prior_token;
        let mut total = FetchOutcome::default();
        let (result, slot) = loop {
            match self.fetch_cycle(from_scratch).await {
                Ok(outcome) => {
                    total.merge(outcome);
                    // Joiners set the flag under the slot lock, so once it is
                    // held and clear every full request that joined is served.
                    let slot = self.fetch_slot.lock();
                    if self.full_refetch_requested.swap(false, Ordering::SeqCst) {
                        drop(slot);
                        from_scratch = true;
                        continue;
                    }
                    break (Ok(total), Some(slot));
                }
                Err(e) => break (Err(e), None),
            }
        };

        self.end_syncing();
        if let Some(mut slot) = slot {
            slot.take();
        }
        let mut stats = self.stats.write();
        match &result {
            Ok(outcome) => {
                stats.fetches_completed += 1;
                stats.changes_applied += (outcome.applied + outcome.deleted) as u64;
                stats.last_fetch_time = Some(Instant::now());
                info!(
                    batches = outcome.batches,
                    applied = outcome.applied,
                    deleted = outcome.deleted,
                    kept_local = outcome.kept_local,
                    full = outcome.full_refetch,
                    "fetch complete"
                );
            }
            Err(e) => {
                stats.last_error = Some(e.to_string());
                warn!(error = %e, "fetch failed");
            }
        }
        result
    }

    async fn fetch_cycle(&self, from_scratch: bool) -> SyncResult<FetchOutcome> {
        if from_scratch {
            self.store.transaction(|txn| {
                txn.set_change_token(None);
                Ok(())
            })?;
        }

        match self.fetch_pages().await {
            Err(SyncError::TokenExpired) => {
                info!("change token expired; fetching everything");
                self.store.transaction(|txn| {
                    txn.set_change_token(None);
                    Ok(())
                })?;
                self.stats.write().token_resets += 1;
                self.fetch_pages().await.inspect_err(|_| {
                    self.full_refetch_requested.store(true, Ordering::SeqCst);
                })
            }
            other => other,
        }
    }

    async fn fetch_pages(&self) -> SyncResult<FetchOutcome> {
        let mut cursor = self.store.change_token();
        let mut outcome = FetchOutcome {
            full_refetch: cursor.is_none(),
            ..FetchOutcome::default()
        };
        let policy = self.config.conflict_policy;

        loop {
            if self.cancel_requested.swap(false, Ordering::SeqCst) {
                info!(batches = outcome.batches, "fetch cancelled");
                return Err(SyncError::Cancelled);
            }

            let batch = self
                .cloud
                .fetch_changes(cursor.as_ref())
                .await
                .map_err(|e| self.note_cloud_error(e))?;
            let last_page = !batch.more_coming;

            let page = self.store.transaction(|txn| {
                let mut page = FetchOutcome {
                    batches: 1,
                    ..FetchOutcome::default()
                };
                for change in &batch.changes {
                    apply_remote_change(txn, policy, change, &mut page);
                }
                // Only a complete pass may move the resume point.
                if last_page {
                    txn.set_change_token(Some(batch.new_token.clone()));
                    txn.set_cloud_data_received();
                }
                Ok(page)
            })?;
            debug!(
                changes = batch.len(),
                applied = page.applied,
                more_coming = batch.more_coming,
                "applied batch"
            );
            outcome.merge(page);

            if last_page {
                return Ok(outcome);
            }
            cursor = Some(batch.new_token);
        }
    }
}

fn apply_remote_change(
    txn: &mut StoreTxn<'_>,
    policy: ConflictPolicy,
    change: &RemoteChange,
    page: &mut FetchOutcome,
) {
    let stop_id = change.stop_id();
    match policy.resolve_incoming(txn.find(stop_id), change) {
        Resolution::AcceptRemote => {
            let RemoteChange::Upsert(remote) = change else {
                page.unchanged += 1;
                return;
            };
            if txn.dequeue(stop_id).is_some() {
                debug!(stop_id = %stop_id, "remote value replaced pending local change");
            }
            if txn.upsert(remote.clone().with_sync_state(SyncState::Clean)) {
                page.applied += 1;
            } else {
                page.unchanged += 1;
            }
        }
        Resolution::DeleteLocal => {
            txn.dequeue(stop_id);
            if txn.delete(stop_id).is_some() {
                page.deleted += 1;
            } else {
                page.unchanged += 1;
            }
        }
        Resolution::KeepLocal => {
            if txn.find(stop_id).is_some() {
                page.kept_local += 1;
            } else {
                page.unchanged += 1;
            }
        }
    }
}
