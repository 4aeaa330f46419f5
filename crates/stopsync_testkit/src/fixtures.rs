//! Test fixtures and engine helpers.
//!
//! Provides constructors for common records and a [`TestEngine`] that
//! keeps the journal bytes around so a test can restart the engine the way
//! a process restart would.

use crate::cloud::InMemoryCloud;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stopsync_engine::{
    LegacyRecord, LocalStore, RetryConfig, StaticLegacySource, SyncConfig, SyncEngine,
    JOURNAL_FILE_NAME,
};
use stopsync_protocol::{FavouriteStop, StopId, Timestamp};
use stopsync_storage::InMemoryBackend;
use tempfile::TempDir;

/// Parses a stop id, panicking on invalid input.
pub fn stop_id(id: &str) -> StopId {
    StopId::new(id).expect("invalid stop id in test")
}

/// Creates a clean record stamped `millis`.
pub fn stop(id: &str, description: &str, preferred: bool, millis: i64) -> FavouriteStop {
    FavouriteStop::new(
        stop_id(id),
        description,
        preferred,
        Timestamp::from_millis(millis),
    )
}

/// A timestamp `offset_ms` away from now.
pub fn from_now(offset_ms: i64) -> Timestamp {
    Timestamp::now().plus_millis(offset_ms)
}

/// Configuration for tests: no backoff, three attempts, a short background
/// budget and frequent compaction.
pub fn test_config() -> SyncConfig {
    SyncConfig::new()
        .with_retry(RetryConfig::immediate(3))
        .with_background_fetch_budget(Duration::from_secs(2))
        .with_compact_after_frames(16)
}

/// An engine over an in-memory cloud and an in-memory journal.
pub struct TestEngine {
    /// The engine under test.
    pub engine: Arc<SyncEngine<InMemoryCloud>>,
    /// Server-side handle on the engine's cloud.
    pub cloud: InMemoryCloud,
    backend: InMemoryBackend,
    config: SyncConfig,
}

impl TestEngine {
    /// Starts building a test engine.
    pub fn builder() -> TestEngineBuilder {
        TestEngineBuilder::default()
    }

    /// Bootstraps the engine, panicking on failure.
    pub async fn ready(self) -> Self {
        self.engine
            .bootstrap()
            .await
            .expect("bootstrap failed in test");
        self
    }

    /// Returns the journal backend shared with the store.
    pub fn backend(&self) -> &InMemoryBackend {
        &self.backend
    }

    /// Drops the engine and opens a new one over the same journal and cloud.
    ///
    /// Await every outstanding push and fetch first; a task still holding
    /// the old engine would keep writing to the journal.
    pub fn restart(self) -> Self {
        let Self {
            engine,
            cloud,
            backend,
            config,
        } = self;
        drop(engine);

        let store = LocalStore::open(backend.clone()).expect("journal replay failed in test");
        Self {
            engine: Arc::new(SyncEngine::new(config.clone(), store, cloud.clone())),
            cloud,
            backend,
            config,
        }
    }
}

/// Builder for [`TestEngine`].
#[derive(Default)]
pub struct TestEngineBuilder {
    config: Option<SyncConfig>,
    cloud: Option<InMemoryCloud>,
    backend: Option<InMemoryBackend>,
    legacy: Option<Vec<LegacyRecord>>,
}

impl TestEngineBuilder {
    /// Uses `config` instead of [`test_config`].
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses an existing cloud, e.g. one shared with another device.
    pub fn with_cloud(mut self, cloud: InMemoryCloud) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Opens the store over existing journal bytes.
    pub fn with_backend(mut self, backend: InMemoryBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Seeds the legacy cache.
    pub fn with_legacy(mut self, records: Vec<LegacyRecord>) -> Self {
        self.legacy = Some(records);
        self
    }

    /// Builds the engine without bootstrapping it.
    pub fn build(self) -> TestEngine {
        let config = self.config.unwrap_or_else(test_config);
        let cloud = self
            .cloud
            .unwrap_or_else(|| InMemoryCloud::with_zone(config.zone.clone()));
        let backend = self.backend.unwrap_or_default();

        let store = LocalStore::open(backend.clone()).expect("journal replay failed in test");
        let mut engine = SyncEngine::new(config.clone(), store, cloud.clone());
        if let Some(records) = self.legacy {
            engine = engine.with_legacy_source(StaticLegacySource::new(records));
        }

        TestEngine {
            engine: Arc::new(engine),
            cloud,
            backend,
            config,
        }
    }
}

/// A store directory on disk that is deleted when dropped.
pub struct TestStoreDir {
    dir: TempDir,
}

impl TestStoreDir {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    /// Returns the directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the journal path inside the directory.
    pub fn journal_path(&self) -> PathBuf {
        self.dir.path().join(JOURNAL_FILE_NAME)
    }

    /// Opens the file-backed store, panicking on failure.
    ///
    /// Only one store may be open at a time; drop the previous one first.
    pub fn open(&self) -> LocalStore {
        LocalStore::open_dir(self.dir.path()).expect("failed to open store in test")
    }

    /// Opens an engine over the file-backed store and `cloud`.
    pub fn engine(&self, cloud: &InMemoryCloud) -> Arc<SyncEngine<InMemoryCloud>> {
        Arc::new(SyncEngine::new(test_config(), self.open(), cloud.clone()))
    }
}

impl Default for TestStoreDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_dir_survives_reopen() {
        let dir = TestStoreDir::new();
        {
            let store = dir.open();
            store.upsert(stop("ABCD", "Main St", true, 5)).unwrap();
        }
        assert!(dir.journal_path().exists());

        let store = dir.open();
        assert_eq!(store.find(&stop_id("ABCD")).unwrap().description, "Main St");
    }
}
