//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod list;
pub mod pending;
pub mod verify;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use stopsync_engine::{LocalStore, JOURNAL_FILE_NAME};
use stopsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use thiserror::Error;
use tracing::debug;

/// Errors raised by the CLI before a command runs.
#[derive(Error, Debug)]
pub enum CliError {
    /// No journal in the given directory.
    #[error("no journal found at {0}")]
    MissingJournal(PathBuf),

    /// Unrecognised `--format` value.
    #[error("unknown output format {0:?} (expected text or json)")]
    UnknownFormat(String),
}

/// How a command prints its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// Returns the journal path inside `dir`, failing if there is none.
pub fn journal_path(dir: &Path) -> Result<PathBuf, CliError> {
    let path = dir.join(JOURNAL_FILE_NAME);
    if path.exists() {
        Ok(path)
    } else {
        Err(CliError::MissingJournal(path))
    }
}

/// Loads an existing store from a copy of its journal.
///
/// The file is only read. A torn tail is dropped from the copy, never
/// from disk, so diagnostics leave the journal as they found it.
pub fn open_read_only(dir: &Path) -> Result<LocalStore, Box<dyn std::error::Error>> {
    let journal = journal_path(dir)?;
    debug!(journal = %journal.display(), "reading cache");
    let bytes = FileBackend::open(&journal)?.read_all()?;
    Ok(LocalStore::open(InMemoryBackend::with_data(bytes))?)
}

/// Opens an existing store for writing. Never creates one.
pub fn open_existing(dir: &Path) -> Result<LocalStore, Box<dyn std::error::Error>> {
    let journal = journal_path(dir)?;
    debug!(journal = %journal.display(), "opening cache");
    Ok(LocalStore::open_dir(dir)?)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use stopsync_engine::LocalStore;
    use stopsync_protocol::{FavouriteStop, OperationKind, StopId, SyncState, Timestamp};

    /// Writes a store with one clean, one edited and one deleted stop.
    pub fn seed(dir: &Path) {
        let store = LocalStore::open_dir(dir).unwrap();
        let stop = |id: &str, desc: &str, preferred: bool| {
            FavouriteStop::new(
                StopId::new(id).unwrap(),
                desc,
                preferred,
                Timestamp::from_millis(1_000),
            )
        };
        store.upsert(stop("1001", "Harbour", false)).unwrap();
        store
            .transaction(|txn| {
                let edited = stop("1002", "Airport", true).with_sync_state(SyncState::PendingPush);
                txn.upsert(edited.clone());
                txn.enqueue(
                    edited.stop_id.clone(),
                    OperationKind::Upsert,
                    Some(edited),
                    Timestamp::from_millis(2_000),
                );
                let gone = stop("1003", "Depot", false).with_sync_state(SyncState::PendingDelete);
                txn.upsert(gone.clone());
                txn.enqueue(
                    gone.stop_id,
                    OperationKind::Delete,
                    None,
                    Timestamp::from_millis(3_000),
                );
                Ok(())
            })
            .unwrap();
    }
}
