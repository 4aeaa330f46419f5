//! Storage backend trait definition.

use crate::error::StorageResult;

/// A byte store holding one journal.
///
/// Backends never interpret the bytes they hold. The local store owns the
/// journal format; a backend only has to keep appended bytes in order and
/// hand them back.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `replace` is all-or-nothing: after a crash the store holds either the
///   old contents or the new contents, never a mix
/// - Backends must be `Send + Sync` so a store can move between tasks
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends past
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Reads the whole store.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Atomically swaps the whole contents for `data`.
    ///
    /// Used to rewrite a journal as a compacted snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents cannot be written. On error the
    /// previous contents are still in place.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Drops everything after `new_size`.
    ///
    /// Used to cut a torn trailing frame before new frames are appended.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
