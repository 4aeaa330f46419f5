//! Journal damage for recovery tests.
//!
//! Each helper copies the bytes of a journal and damages the copy, so the
//! original store can stay open while a second one replays the damage.

use stopsync_storage::InMemoryBackend;

/// Copies `backend` without its last `bytes` bytes, like a crash in the
/// middle of a write.
pub fn torn_copy(backend: &InMemoryBackend, bytes: usize) -> InMemoryBackend {
    let mut data = backend.data();
    let keep = data.len().saturating_sub(bytes);
    data.truncate(keep);
    InMemoryBackend::with_data(data)
}

/// Copies `backend` with one bit flipped at `offset`, like media corruption.
pub fn flipped_copy(backend: &InMemoryBackend, offset: usize) -> InMemoryBackend {
    let mut data = backend.data();
    if let Some(byte) = data.get_mut(offset) {
        *byte ^= 0x01;
    }
    InMemoryBackend::with_data(data)
}

/// Copies `backend` with `garbage` appended, like a write that never got
/// its frame header.
pub fn with_trailing_garbage(backend: &InMemoryBackend, garbage: &[u8]) -> InMemoryBackend {
    let mut data = backend.data();
    data.extend_from_slice(garbage);
    InMemoryBackend::with_data(data)
}
