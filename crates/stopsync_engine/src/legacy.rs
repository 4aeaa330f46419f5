//! One-shot import from the deprecated favourites cache.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use stopsync_protocol::{StopId, Timestamp};
use tracing::{debug, warn};

/// A favourite read from the legacy cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRecord {
    /// Stop identifier.
    pub stop_id: StopId,
    /// User label.
    pub description: String,
    /// Whether the stop was pinned.
    pub preferred: bool,
    /// Edit time, if the legacy cache kept one.
    pub last_modified: Option<Timestamp>,
}

impl LegacyRecord {
    /// Creates a legacy record without an edit time.
    pub fn new(stop_id: StopId, description: impl Into<String>, preferred: bool) -> Self {
        Self {
            stop_id,
            description: description.into(),
            preferred,
            last_modified: None,
        }
    }
}

/// Read-only source of favourites saved by an earlier version.
///
/// The engine consults a source at most once per installation. A source
/// that cannot be reached counts as holding no records.
#[async_trait]
pub trait LegacySource: Send + Sync {
    /// Reads every legacy record.
    async fn fetch_all_once(&self) -> SyncResult<Vec<LegacyRecord>>;
}

/// A legacy source backed by a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticLegacySource {
    records: Vec<LegacyRecord>,
}

impl StaticLegacySource {
    /// Creates a source holding `records`.
    pub fn new(records: Vec<LegacyRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl LegacySource for StaticLegacySource {
    async fn fetch_all_once(&self) -> SyncResult<Vec<LegacyRecord>> {
        Ok(self.records.clone())
    }
}

#[derive(Deserialize)]
struct LegacyEntry {
    stop_id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    preferred: bool,
}

/// A legacy source reading a JSON export.
///
/// The file holds an array of `{"stop_id", "description", "preferred"}`
/// objects. A missing file holds no records. Entries with an invalid stop
/// id are skipped.
#[derive(Debug, Clone)]
pub struct JsonFileLegacySource {
    path: PathBuf,
}

impl JsonFileLegacySource {
    /// Creates a source reading `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl LegacySource for JsonFileLegacySource {
    async fn fetch_all_once(&self) -> SyncResult<Vec<LegacyRecord>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no legacy export");
                return Ok(Vec::new());
            }
            Err(e) => return Err(SyncError::TransientNetworkFailure(e.to_string())),
        };

        let entries: Vec<LegacyEntry> = serde_json::from_str(&text)
            .map_err(|e| SyncError::Codec(format!("legacy export: {e}")))?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| match StopId::new(entry.stop_id) {
                Ok(stop_id) => Some(LegacyRecord::new(
                    stop_id,
                    entry.description,
                    entry.preferred,
                )),
                Err(e) => {
                    warn!(error = %e, "skipping legacy entry");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn static_source_returns_its_records() {
        let record = LegacyRecord::new(StopId::new("WXYZ").unwrap(), "Old Name", false);
        let source = StaticLegacySource::new(vec![record.clone()]);
        assert_eq!(source.fetch_all_once().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn missing_json_file_is_empty() {
        let dir = tempdir().unwrap();
        let source = JsonFileLegacySource::new(dir.path().join("absent.json"));
        assert!(source.fetch_all_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn json_file_skips_bad_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(
            &path,
            r#"[
                {"stop_id": "WXYZ", "description": "Old Name"},
                {"stop_id": "not valid", "description": "skipped"},
                {"stop_id": "1234", "preferred": true}
            ]"#,
        )
        .unwrap();

        let records = JsonFileLegacySource::new(&path).fetch_all_once().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].description, "Old Name");
        assert!(!records[0].preferred);
        assert_eq!(records[1].stop_id.as_str(), "1234");
        assert!(records[1].preferred);
        assert_eq!(records[1].description, "");
    }

    #[tokio::test]
    async fn malformed_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = JsonFileLegacySource::new(&path).fetch_all_once().await;
        assert!(matches!(result, Err(SyncError::Codec(_))));
    }
}
