//! Local writes and the push path.

use crate::cloud::{CloudBackend, CloudError, PushOutcome};
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use stopsync_protocol::{
    FavouriteStop, OperationKind, PendingOperation, Resolution, StopId, SyncState, Timestamp,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How a push of one pending operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// The cloud stored the change; the record is clean.
    Confirmed,
    /// The cloud held a winning value, which replaced the local one.
    RemoteWon,
    /// A newer local change or a remote change took over the operation.
    Superseded,
    /// Not attempted: the engine is not ready or the cloud asked to wait.
    Deferred,
    /// The attempt failed; the operation stays queued.
    Failed,
    /// The attempt failed and the retry limit was reached.
    Abandoned,
    /// There was nothing to do.
    Unchanged,
}

/// Handle to the push started by a local write.
///
/// The local write is durable before the handle exists, so dropping it
/// does not lose anything.
#[derive(Debug)]
pub struct PushHandle {
    inner: HandleInner,
}

#[derive(Debug)]
enum HandleInner {
    Spawned(JoinHandle<SyncResult<PushStatus>>),
    Done(PushStatus),
}

impl PushHandle {
    fn spawned(handle: JoinHandle<SyncResult<PushStatus>>) -> Self {
        Self {
            inner: HandleInner::Spawned(handle),
        }
    }

    fn done(status: PushStatus) -> Self {
        Self {
            inner: HandleInner::Done(status),
        }
    }

    /// Waits for the push to finish.
    ///
    /// # Errors
    ///
    /// Returns the push error, or [`SyncError::Cancelled`] if the task was
    /// aborted.
    pub async fn wait(self) -> SyncResult<PushStatus> {
        match self.inner {
            HandleInner::Spawned(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "push task did not finish");
                    Err(SyncError::Cancelled)
                }
            },
            HandleInner::Done(status) => Ok(status),
        }
    }

    /// True if the push has finished or was never started.
    pub fn is_finished(&self) -> bool {
        match &self.inner {
            HandleInner::Spawned(handle) => handle.is_finished(),
            HandleInner::Done(_) => true,
        }
    }
}

/// Result of one pass over the pending queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Operations pushed in this pass.
    pub attempted: usize,
    /// Pushes that ended with the record clean.
    pub confirmed: usize,
    /// Pushes that failed and stay queued.
    pub failed: usize,
    /// Operations dropped after reaching the retry limit.
    pub abandoned: usize,
    /// Operations not pushed because the engine could not reach the cloud.
    pub deferred: usize,
    /// Operations still inside their backoff delay.
    pub waiting: usize,
}

enum Outgoing {
    Save(FavouriteStop),
    Delete,
}

impl<C: CloudBackend> SyncEngine<C> {
    /// Saves a favourite locally and starts pushing it.
    ///
    /// The record is durable and visible to [`SyncEngine::find`] when this
    /// returns. Its timestamp is strictly later than the one it replaces.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local write fails.
    pub fn add_or_edit(
        self: &Arc<Self>,
        stop_id: StopId,
        description: impl Into<String>,
        preferred: bool,
    ) -> SyncResult<PushHandle> {
        let description = description.into();
        let now = Timestamp::now();

        self.store.transaction(|txn| {
            let previous = txn.find(&stop_id);
            let record = FavouriteStop {
                stop_id: stop_id.clone(),
                description,
                preferred,
                last_modified: Timestamp::next_after(now, previous.map(|p| p.last_modified)),
                sync_state: SyncState::PendingPush,
                remote_version: previous.and_then(|p| p.remote_version),
            };
            txn.upsert(record.clone());
            txn.enqueue(stop_id.clone(), OperationKind::Upsert, Some(record), now);
            Ok(())
        })?;

        debug!(stop_id = %stop_id, "saved locally; push queued");
        Ok(self.spawn_push(stop_id))
    }

    /// Deletes a favourite locally and starts pushing the delete.
    ///
    /// The record disappears from [`SyncEngine::find`] at once and is
    /// removed from the store when the cloud confirms. Deleting a stop that
    /// is not stored does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local write fails.
    pub fn delete(self: &Arc<Self>, stop_id: &StopId) -> SyncResult<PushHandle> {
        let now = Timestamp::now();

        let queued = self.store.transaction(|txn| {
            let Some(existing) = txn.find(stop_id) else {
                return Ok(false);
            };
            if existing.sync_state == SyncState::PendingDelete
                && txn
                    .pending(stop_id)
                    .is_some_and(|op| op.kind == OperationKind::Delete)
            {
                return Ok(true);
            }

            let mut record = existing.clone();
            record.last_modified = Timestamp::next_after(now, Some(record.last_modified));
            record.sync_state = SyncState::PendingDelete;
            txn.upsert(record);
            txn.enqueue(stop_id.clone(), OperationKind::Delete, None, now);
            Ok(true)
        })?;

        if !queued {
            debug!(stop_id = %stop_id, "delete of unknown stop ignored");
            return Ok(PushHandle::done(PushStatus::Unchanged));
        }
        debug!(stop_id = %stop_id, "deleted locally; push queued");
        Ok(self.spawn_push(stop_id.clone()))
    }

    fn spawn_push(self: &Arc<Self>, stop_id: StopId) -> PushHandle {
        if !self.state().is_ready() {
            debug!(stop_id = %stop_id, "engine not ready; push deferred");
            return PushHandle::done(PushStatus::Deferred);
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(stop_id = %stop_id, "no async runtime; push deferred");
            return PushHandle::done(PushStatus::Deferred);
        };

        let engine = Arc::clone(self);
        PushHandle::spawned(runtime.spawn(async move { engine.push_pending(&stop_id).await }))
    }

    /// Pushes every pending operation whose backoff delay has passed.
    ///
    /// Operations go out one at a time in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PermanentAuthFailure`] if cloud calls are
    /// blocked, or a store error. Individual push failures are counted in
    /// the report.
    pub async fn retry_pending(&self) -> SyncResult<RetryReport> {
        self.check_auth()?;
        let pending = self.store.list_pending();
        let mut report = RetryReport::default();

        if !self.state().is_ready() {
            report.deferred = pending.len();
            return Ok(report);
        }

        let now = Timestamp::now();
        for op in pending {
            if !self.is_due(&op, now) {
                report.waiting += 1;
                continue;
            }
            report.attempted += 1;
            match self.push_pending(&op.stop_id).await? {
                PushStatus::Confirmed | PushStatus::RemoteWon => report.confirmed += 1,
                PushStatus::Failed => report.failed += 1,
                PushStatus::Abandoned => report.abandoned += 1,
                PushStatus::Deferred => report.deferred += 1,
                PushStatus::Superseded | PushStatus::Unchanged => {}
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                confirmed = report.confirmed,
                failed = report.failed,
                abandoned = report.abandoned,
                "retried pending operations"
            );
        }
        Ok(report)
    }

    fn is_due(&self, op: &PendingOperation, now: Timestamp) -> bool {
        match op.last_attempt_at {
            None => true,
            Some(last) => {
                let delay = self.config.retry.delay_for_attempt(op.attempt_count);
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                last.plus_millis(delay_ms) <= now
            }
        }
    }

    /// Pushes the pending operation for `stop_id`, holding its key lock.
    pub(crate) async fn push_pending(&self, stop_id: &StopId) -> SyncResult<PushStatus> {
        let lock = self.key_lock(stop_id);
        let status = {
            let _guard = lock.lock().await;
            self.push_locked(stop_id).await
        };
        drop(lock);
        self.release_key_lock(stop_id);
        status
    }

    async fn push_locked(&self, stop_id: &StopId) -> SyncResult<PushStatus> {
        if !self.cloud_gate()? {
            return Ok(PushStatus::Deferred);
        }

        let now = Timestamp::now();
        let started = self.store.transaction(|txn| {
            let Some(attempt) = txn.increment_attempt(stop_id, now) else {
                return Ok(None);
            };
            let Some(op) = txn.pending(stop_id).cloned() else {
                return Ok(None);
            };
            let current = txn.find(stop_id);
            let outgoing = match op.kind {
                OperationKind::Delete => Outgoing::Delete,
                OperationKind::Upsert => match op.payload.clone().or_else(|| current.cloned()) {
                    Some(mut record) => {
                        // Base the push on the newest server version we know.
                        record.remote_version = current.and_then(|r| r.remote_version);
                        Outgoing::Save(record)
                    }
                    None => return Ok(None),
                },
            };
            Ok(Some((op.seq, attempt, outgoing)))
        })?;
        let Some((seq, attempt, mut outgoing)) = started else {
            return Ok(PushStatus::Superseded);
        };

        debug!(stop_id = %stop_id, attempt, "pushing");
        let mut zone_retried = false;
        let mut conflict_rounds = 0;

        loop {
            let failure = match &mut outgoing {
                Outgoing::Delete => match self.cloud.push_delete(stop_id).await {
                    Ok(()) => return self.complete_delete(stop_id, seq),
                    Err(e) => e,
                },
                Outgoing::Save(record) => match self.cloud.push(record).await {
                    Ok(PushOutcome::Saved { version }) => {
                        return self.complete_save(stop_id, seq, version)
                    }
                    Ok(PushOutcome::Conflict { server }) => {
                        self.stats.write().push_conflicts += 1;
                        match self.config.conflict_policy.resolve_push_conflict(record, &server) {
                            Resolution::KeepLocal => {
                                conflict_rounds += 1;
                                if conflict_rounds > self.config.max_conflict_rounds {
                                    let err = SyncError::ConflictDetected {
                                        stop_id: stop_id.clone(),
                                    };
                                    self.stats.write().last_error = Some(err.to_string());
                                    return self.fail_push(stop_id, seq, attempt, err);
                                }
                                debug!(stop_id = %stop_id, "local value wins conflict; pushing again");
                                record.remote_version = server.remote_version;
                                continue;
                            }
                            Resolution::AcceptRemote | Resolution::DeleteLocal => {
                                return self.accept_server_value(stop_id, seq, server)
                            }
                        }
                    }
                    Err(e) => e,
                },
            };

            if failure == CloudError::ZoneNotReady && !zone_retried {
                zone_retried = true;
                match self.cloud.ensure_zone_and_subscription().await {
                    Ok(()) => {
                        info!("cloud zone re-created");
                        continue;
                    }
                    Err(e) => warn!(error = %e, "could not re-create cloud zone"),
                }
            }

            let err = self.note_cloud_error(failure);
            return self.fail_push(stop_id, seq, attempt, err);
        }
    }

    fn complete_save(&self, stop_id: &StopId, seq: u64, version: u64) -> SyncResult<PushStatus> {
        let status = self.store.transaction(|txn| {
            let current_seq = txn.pending(stop_id).map(|op| op.seq);
            let Some(mut record) = txn.find(stop_id).cloned() else {
                return Ok(PushStatus::Superseded);
            };

            if current_seq == Some(seq) {
                txn.dequeue(stop_id);
                record.remote_version = Some(version);
                record.sync_state = SyncState::Clean;
                txn.upsert(record);
                return Ok(PushStatus::Confirmed);
            }

            // A newer edit is queued; it must be based on this version.
            if record.remote_version.map_or(true, |known| known < version) {
                record.remote_version = Some(version);
                txn.upsert(record);
            }
            Ok(PushStatus::Superseded)
        })?;

        if status == PushStatus::Confirmed {
            self.stats.write().pushes_confirmed += 1;
            info!(stop_id = %stop_id, version, "push confirmed");
        } else {
            debug!(stop_id = %stop_id, version, "push saved but superseded locally");
        }
        Ok(status)
    }

    fn complete_delete(&self, stop_id: &StopId, seq: u64) -> SyncResult<PushStatus> {
        let status = self.store.transaction(|txn| match txn.pending(stop_id) {
            Some(op) if op.seq == seq => {
                txn.dequeue(stop_id);
                txn.delete(stop_id);
                Ok(PushStatus::Confirmed)
            }
            _ => Ok(PushStatus::Superseded),
        })?;

        if status == PushStatus::Confirmed {
            self.stats.write().pushes_confirmed += 1;
            info!(stop_id = %stop_id, "delete confirmed");
        }
        Ok(status)
    }

    fn accept_server_value(
        &self,
        stop_id: &StopId,
        seq: u64,
        server: FavouriteStop,
    ) -> SyncResult<PushStatus> {
        let status = self.store.transaction(|txn| match txn.pending(stop_id) {
            Some(op) if op.seq == seq => {
                txn.dequeue(stop_id);
                txn.upsert(server.with_sync_state(SyncState::Clean));
                Ok(PushStatus::RemoteWon)
            }
            _ => Ok(PushStatus::Superseded),
        })?;

        if status == PushStatus::RemoteWon {
            info!(stop_id = %stop_id, "server value won push conflict");
        }
        Ok(status)
    }

    fn fail_push(
        &self,
        stop_id: &StopId,
        seq: u64,
        attempt: u32,
        err: SyncError,
    ) -> SyncResult<PushStatus> {
        if matches!(err, SyncError::PermanentAuthFailure(_)) {
            return Err(err);
        }
        self.stats.write().pushes_failed += 1;

        if attempt < self.config.retry.max_attempts {
            warn!(stop_id = %stop_id, attempt, error = %err, "push failed; will retry");
            return Ok(PushStatus::Failed);
        }

        let abandoned = self.store.transaction(|txn| match txn.pending(stop_id) {
            Some(op) if op.seq == seq => Ok(txn.dequeue(stop_id).is_some()),
            _ => Ok(false),
        })?;
        if !abandoned {
            return Ok(PushStatus::Superseded);
        }

        self.stats.write().operations_abandoned += 1;
        error!(
            stop_id = %stop_id,
            attempts = attempt,
            error = %err,
            "giving up on push; the record keeps its local value"
        );
        Ok(PushStatus::Abandoned)
    }
}
