//! # StopSync Engine
//!
//! Offline-first cache of a user's favourite transit stops, kept in step
//! with a cloud record store.
//!
//! This crate provides:
//! - A durable local store backed by a checksummed journal
//! - A persistent queue of unconfirmed local changes, retried with
//!   exponential backoff
//! - Incremental change fetches driven by an opaque change token
//! - Configurable conflict resolution, last-write-wins by default
//! - One-time import from a legacy favourites cache
//! - Change notifications for observers
//!
//! ## Architecture
//!
//! Local writes commit to the store first and return at once; a Tokio task
//! then pushes them. Fetches are triggered by app lifecycle events and push
//! notifications and are coalesced so only one runs at a time. The store
//! is the single source of truth for readers.
//!
//! ## Key Invariants
//!
//! - At most one record and one pending operation per stop
//! - A remote change never overwrites a newer unpushed local edit
//! - The change token only advances after a complete fetch is applied
//! - Replaying the same remote changes leaves the store unchanged

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cloud;
mod config;
mod engine;
mod error;
mod fetch;
mod legacy;
mod notification;
mod notifier;
mod push;
mod state;
mod store;

pub use cloud::{CloudBackend, CloudError, CloudResult, PushOutcome};
pub use config::{CloudZone, RetryConfig, SyncConfig};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use legacy::{JsonFileLegacySource, LegacyRecord, LegacySource, StaticLegacySource};
pub use notification::RemoteNotification;
pub use notifier::{ChangeEvent, ChangeNotifier, ChangeSubscription};
pub use push::{PushHandle, PushStatus, RetryReport};
pub use state::{BackgroundFetchResult, EngineState, FetchOutcome, SyncStats, SyncStatus, Trigger};
pub use store::{
    inspect_journal, JournalEntry, JournalReport, LocalStore, Snapshot, StoreSummary, StoreTxn,
    JOURNAL_FILE_NAME,
};
