//! In-memory cloud backend.
//!
//! [`InMemoryCloud`] behaves like a single record zone: pushes are checked
//! against server versions, every save and delete is appended to a change
//! log, and fetches return the newest change per stop since the presented
//! token. Tests drive it from the "server side" to simulate other devices
//! and inject faults per operation.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use stopsync_engine::{CloudBackend, CloudError, CloudResult, CloudZone, PushOutcome};
use stopsync_protocol::{
    ChangeBatch, ChangeToken, FavouriteStop, RemoteChange, StopId, SyncState, Timestamp,
};
use uuid::Uuid;

/// Cloud operations, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudOp {
    /// `ensure_zone_and_subscription`.
    EnsureZone,
    /// `push`.
    Push,
    /// `push_delete`.
    PushDelete,
    /// `fetch_changes`.
    FetchChanges,
}

struct CloudState {
    zone_ready: bool,
    records: BTreeMap<StopId, FavouriteStop>,
    log: Vec<RemoteChange>,
    next_version: u64,
    epoch: Uuid,
    page_size: usize,
    scripted: VecDeque<CloudResult<ChangeBatch>>,
    fail_next: HashMap<CloudOp, VecDeque<CloudError>>,
    fail_always: HashMap<CloudOp, CloudError>,
    calls: HashMap<CloudOp, usize>,
    tokens_seen: Vec<Option<ChangeToken>>,
    latency: Duration,
}

impl CloudState {
    fn take_fault(&mut self, op: CloudOp) -> Option<CloudError> {
        if let Some(error) = self.fail_always.get(&op) {
            return Some(error.clone());
        }
        self.fail_next.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn token_at(&self, position: usize) -> ChangeToken {
        let mut bytes = self.epoch.as_bytes().to_vec();
        bytes.extend_from_slice(&(position as u64).to_le_bytes());
        ChangeToken::new(bytes)
    }

    fn position_of(&self, token: &ChangeToken) -> CloudResult<usize> {
        let bytes = token.as_bytes();
        if bytes.len() != 24 || bytes[..16] != self.epoch.as_bytes()[..] {
            return Err(CloudError::TokenExpired);
        }
        let mut position = [0u8; 8];
        position.copy_from_slice(&bytes[16..]);
        let position = u64::from_le_bytes(position) as usize;
        if position > self.log.len() {
            return Err(CloudError::TokenExpired);
        }
        Ok(position)
    }

    /// Newest change per stop after `start`, in log order.
    fn changes_since(&self, start: usize) -> Vec<(usize, RemoteChange)> {
        let mut latest: HashMap<&StopId, usize> = HashMap::new();
        for (position, change) in self.log.iter().enumerate().skip(start) {
            latest.insert(change.stop_id(), position);
        }
        let mut positions: Vec<usize> = latest.into_values().collect();
        positions.sort_unstable();
        positions
            .into_iter()
            .map(|p| (p, self.log[p].clone()))
            .collect()
    }

    fn save(&mut self, record: &FavouriteStop) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        let mut stored = record.clone().with_sync_state(SyncState::Clean);
        stored.remote_version = Some(version);
        self.records.insert(stored.stop_id.clone(), stored.clone());
        self.log.push(RemoteChange::Upsert(stored));
        version
    }

    fn remove(&mut self, stop_id: &StopId, deleted_at: Option<Timestamp>) {
        self.records.remove(stop_id);
        self.log.push(RemoteChange::Tombstone {
            stop_id: stop_id.clone(),
            deleted_at,
        });
    }
}

struct Shared {
    zone: CloudZone,
    state: Mutex<CloudState>,
}

/// An in-memory record zone.
///
/// Clones share the same zone, so a test can hand one clone to the engine
/// and keep another to act as the server.
#[derive(Clone)]
pub struct InMemoryCloud {
    shared: Arc<Shared>,
}

impl InMemoryCloud {
    /// Creates an empty cloud for the default zone. The zone does not exist
    /// until the engine sets it up.
    pub fn new() -> Self {
        Self::with_zone(CloudZone::default())
    }

    /// Creates an empty cloud for `zone`.
    pub fn with_zone(zone: CloudZone) -> Self {
        Self {
            shared: Arc::new(Shared {
                zone,
                state: Mutex::new(CloudState {
                    zone_ready: false,
                    records: BTreeMap::new(),
                    log: Vec::new(),
                    next_version: 1,
                    epoch: Uuid::new_v4(),
                    page_size: 0,
                    scripted: VecDeque::new(),
                    fail_next: HashMap::new(),
                    fail_always: HashMap::new(),
                    calls: HashMap::new(),
                    tokens_seen: Vec::new(),
                    latency: Duration::ZERO,
                }),
            }),
        }
    }

    /// Returns the zone this cloud serves.
    pub fn zone(&self) -> &CloudZone {
        &self.shared.zone
    }

    /// True once the zone has been set up.
    pub fn zone_ready(&self) -> bool {
        self.shared.state.lock().zone_ready
    }

    /// Writes a record as another device would. The zone is created if
    /// needed. Returns the stored record with its new version.
    pub fn insert_remote(&self, record: FavouriteStop) -> FavouriteStop {
        let mut state = self.shared.state.lock();
        state.zone_ready = true;
        state.save(&record);
        state.records[&record.stop_id].clone()
    }

    /// Deletes a record as another device would.
    pub fn delete_remote(&self, stop_id: &StopId, deleted_at: Option<Timestamp>) {
        let mut state = self.shared.state.lock();
        state.zone_ready = true;
        state.remove(stop_id, deleted_at);
    }

    /// Returns the server's copy of a record.
    pub fn record(&self, stop_id: &StopId) -> Option<FavouriteStop> {
        self.shared.state.lock().records.get(stop_id).cloned()
    }

    /// Returns every server record in stop-id order.
    pub fn records(&self) -> Vec<FavouriteStop> {
        self.shared.state.lock().records.values().cloned().collect()
    }

    /// Returns the number of changes the server has logged.
    pub fn log_len(&self) -> usize {
        self.shared.state.lock().log.len()
    }

    /// Returns a token positioned at the end of the change log.
    pub fn current_token(&self) -> ChangeToken {
        let state = self.shared.state.lock();
        state.token_at(state.log.len())
    }

    /// Limits fetch pages to `size` changes. Zero means unlimited.
    pub fn set_page_size(&self, size: usize) {
        self.shared.state.lock().page_size = size;
    }

    /// Queues a canned answer for the next fetch, ahead of the change log.
    pub fn script_batch(&self, batch: CloudResult<ChangeBatch>) {
        self.shared.state.lock().scripted.push_back(batch);
    }

    /// Invalidates every token issued so far.
    pub fn expire_tokens(&self) {
        self.shared.state.lock().epoch = Uuid::new_v4();
    }

    /// Deletes the zone with all its records, as a user resetting their
    /// cloud data would.
    pub fn reset_zone(&self) {
        let mut state = self.shared.state.lock();
        state.zone_ready = false;
        state.records.clear();
        state.log.clear();
        state.epoch = Uuid::new_v4();
    }

    /// Makes the next `times` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: CloudOp, error: CloudError, times: usize) {
        let mut state = self.shared.state.lock();
        let queue = state.fail_next.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Makes every call of `op` fail with `error` until cleared.
    pub fn fail_always(&self, op: CloudOp, error: CloudError) {
        self.shared.state.lock().fail_always.insert(op, error);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        let mut state = self.shared.state.lock();
        state.fail_next.clear();
        state.fail_always.clear();
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.shared.state.lock().latency = latency;
    }

    /// Returns how many times `op` was called.
    pub fn calls(&self, op: CloudOp) -> usize {
        self.shared
            .state
            .lock()
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the token presented on every fetch, in call order.
    pub fn fetch_tokens_seen(&self) -> Vec<Option<ChangeToken>> {
        self.shared.state.lock().tokens_seen.clone()
    }

    /// Builds the push payload the platform would deliver for this zone.
    pub fn notification_payload(&self) -> Value {
        json!({
            "aps": {"content-available": 1},
            "ck": {
                "ce": 2,
                "met": {
                    "zid": self.shared.zone.zone_name,
                    "sid": self.shared.zone.subscription_id,
                }
            }
        })
    }

    async fn enter(&self, op: CloudOp) -> CloudResult<()> {
        let latency = {
            let mut state = self.shared.state.lock();
            *state.calls.entry(op).or_default() += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let fault = self.shared.state.lock().take_fault(op);
        match fault {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("InMemoryCloud")
            .field("zone", &self.shared.zone.zone_name)
            .field("zone_ready", &state.zone_ready)
            .field("records", &state.records.len())
            .field("log", &state.log.len())
            .finish()
    }
}

#[async_trait]
impl CloudBackend for InMemoryCloud {
    async fn ensure_zone_and_subscription(&self) -> CloudResult<()> {
        self.enter(CloudOp::EnsureZone).await?;
        self.shared.state.lock().zone_ready = true;
        Ok(())
    }

    async fn push(&self, record: &FavouriteStop) -> CloudResult<PushOutcome> {
        self.enter(CloudOp::Push).await?;
        let mut state = self.shared.state.lock();
        if !state.zone_ready {
            return Err(CloudError::ZoneNotReady);
        }

        if let Some(server) = state.records.get(&record.stop_id) {
            if server.remote_version != record.remote_version {
                return Ok(PushOutcome::Conflict {
                    server: server.clone(),
                });
            }
        }
        let version = state.save(record);
        Ok(PushOutcome::Saved { version })
    }

    async fn push_delete(&self, stop_id: &StopId) -> CloudResult<()> {
        self.enter(CloudOp::PushDelete).await?;
        let mut state = self.shared.state.lock();
        if !state.zone_ready {
            return Err(CloudError::ZoneNotReady);
        }
        state.remove(stop_id, Some(Timestamp::now()));
        Ok(())
    }

    async fn fetch_changes(&self, token: Option<&ChangeToken>) -> CloudResult<ChangeBatch> {
        self.shared
            .state
            .lock()
            .tokens_seen
            .push(token.cloned());
        self.enter(CloudOp::FetchChanges).await?;

        let mut state = self.shared.state.lock();
        if let Some(scripted) = state.scripted.pop_front() {
            return scripted;
        }
        if !state.zone_ready {
            return Err(CloudError::ZoneNotReady);
        }

        let start = match token {
            Some(token) => state.position_of(token)?,
            None => 0,
        };
        let mut changes = state.changes_since(start);
        let more_coming = state.page_size > 0 && changes.len() > state.page_size;
        if more_coming {
            changes.truncate(state.page_size);
        }
        let next = match changes.last() {
            Some((position, _)) if more_coming => position + 1,
            _ => state.log.len(),
        };

        Ok(ChangeBatch::new(
            changes.into_iter().map(|(_, change)| change).collect(),
            state.token_at(next),
            more_coming,
        ))
    }
}
