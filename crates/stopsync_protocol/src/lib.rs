//! # stopsync protocol
//!
//! Data model and sync rules for the favourite-stop cache.
//!
//! This crate provides:
//! - [`FavouriteStop`] and its identifiers, timestamps and sync state
//! - [`RemoteChange`] / [`ChangeBatch`] for delta fetches
//! - [`PendingQueue`] of unconfirmed local mutations
//! - [`ConflictPolicy`], the single place where local and remote values
//!   are reconciled
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod codec;
mod conflict;
mod error;
mod pending;
mod stop;

pub use change::{ChangeBatch, ChangeToken, RemoteChange};
pub use codec::{from_cbor, to_cbor};
pub use conflict::{ConflictPolicy, Resolution};
pub use error::{ProtocolError, ProtocolResult};
pub use pending::{OperationKind, PendingOperation, PendingQueue};
pub use stop::{display_order, FavouriteStop, StopId, SyncState, Timestamp, MAX_STOP_ID_LEN};
