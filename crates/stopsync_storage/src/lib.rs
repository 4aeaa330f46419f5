//! # stopsync storage
//!
//! Lowest-level persistence for the favourites cache.
//!
//! Backends are **opaque byte stores**: they append, read back and
//! atomically replace bytes without knowing what the bytes mean. The
//! [`frame`] module adds the only structure this crate understands, a
//! checksummed length-prefixed frame, so that a journal written through a
//! backend can be replayed and a torn final write detected.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral stores
//! - [`FileBackend`] - Persistent, single-writer (advisory lock) file storage
//!
//! ## Example
//!
//! ```rust
//! use stopsync_storage::{encode_frame, FrameReader, InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.append(&encode_frame(b"first")).unwrap();
//! backend.append(&encode_frame(b"second")).unwrap();
//!
//! let bytes = backend.read_all().unwrap();
//! let payloads: Vec<_> = FrameReader::new(&bytes)
//!     .map(|frame| frame.unwrap().payload.to_vec())
//!     .collect();
//! assert_eq!(payloads, vec![b"first".to_vec(), b"second".to_vec()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
pub mod frame;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use frame::{compute_crc32, encode_frame, Frame, FrameReader, FRAME_MAGIC, FRAME_VERSION};
pub use memory::InMemoryBackend;
