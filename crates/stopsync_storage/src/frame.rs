//! Checksummed journal frames.
//!
//! Frame layout (little endian):
//!
//! ```text
//! | magic "SSJF" (4) | version u16 (2) | payload len u32 (4) | header crc32 (4) | payload | crc32 u32 (4) |
//! ```
//!
//! The header CRC covers the first ten bytes, so a damaged length field is
//! caught before it is trusted. The trailing CRC covers header and payload.
//! Only a frame with an intact header whose bytes run past the end of the
//! store, or a header cut short by the end of the store, is a torn write
//! from a crash; it ends the journal quietly. Anything else that fails to
//! check out is corruption.

use crate::error::{StorageError, StorageResult};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"SSJF";

/// Current frame format version.
pub const FRAME_VERSION: u16 = 1;

const PREFIX_SIZE: usize = 10;
const HEADER_SIZE: usize = PREFIX_SIZE + 4;
const CRC_SIZE: usize = 4;

/// Wraps a payload in a frame.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    let header_crc = compute_crc32(&out);
    out.extend_from_slice(&header_crc.to_le_bytes());
    out.extend_from_slice(payload);
    let crc = compute_crc32(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// One decoded frame borrowed from the journal bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Offset of the frame header.
    pub offset: u64,
    /// The frame payload.
    pub payload: &'a [u8],
}

/// Walks the frames of a journal.
///
/// Iteration stops after the first error. After iteration,
/// [`FrameReader::valid_len`] is the length of the intact prefix and
/// [`FrameReader::torn_tail`] reports whether trailing bytes were dropped.
#[derive(Debug)]
pub struct FrameReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    torn: bool,
    finished: bool,
}

impl<'a> FrameReader<'a> {
    /// Creates a reader over the full journal bytes.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            torn: false,
            finished: false,
        }
    }

    /// Length of the prefix made of complete, valid frames.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.pos as u64
    }

    /// True if iteration ended on an incomplete trailing frame.
    #[must_use]
    pub fn torn_tail(&self) -> bool {
        self.torn
    }

    fn read_frame(&mut self) -> StorageResult<Option<Frame<'a>>> {
        let remaining = self.bytes.len() - self.pos;
        if remaining == 0 {
            return Ok(None);
        }
        let offset = self.pos as u64;
        if remaining < HEADER_SIZE {
            self.torn = true;
            return Ok(None);
        }

        let header = &self.bytes[self.pos..self.pos + HEADER_SIZE];
        let stored_header_crc = u32::from_le_bytes([header[10], header[11], header[12], header[13]]);
        if compute_crc32(&header[..PREFIX_SIZE]) != stored_header_crc {
            return Err(StorageError::corrupted(offset, "header checksum mismatch"));
        }
        if header[0..4] != FRAME_MAGIC {
            return Err(StorageError::corrupted(offset, "bad magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > FRAME_VERSION {
            return Err(StorageError::corrupted(
                offset,
                format!("unsupported version {version}"),
            ));
        }
        let payload_len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;

        let total = HEADER_SIZE + payload_len + CRC_SIZE;
        if remaining < total {
            self.torn = true;
            return Ok(None);
        }

        let payload_end = self.pos + HEADER_SIZE + payload_len;
        let stored = u32::from_le_bytes([
            self.bytes[payload_end],
            self.bytes[payload_end + 1],
            self.bytes[payload_end + 2],
            self.bytes[payload_end + 3],
        ]);
        let computed = compute_crc32(&self.bytes[self.pos..payload_end]);
        if stored != computed {
            return Err(StorageError::corrupted(
                offset,
                format!("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"),
            ));
        }

        let payload = &self.bytes[self.pos + HEADER_SIZE..payload_end];
        self.pos += total;
        Ok(Some(Frame { offset, payload }))
    }
}

impl<'a> Iterator for FrameReader<'a> {
    type Item = StorageResult<Frame<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// CRC32 (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[index];
    }
    crc ^ 0xFFFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn journal(payloads: &[&[u8]]) -> Vec<u8> {
        payloads.iter().flat_map(|p| encode_frame(p)).collect()
    }

    #[test]
    fn crc32_known_vector() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn reads_back_frames_in_order() {
        let bytes = journal(&[b"one", b"", b"three"]);
        let mut reader = FrameReader::new(&bytes);
        let payloads: Vec<_> = reader.by_ref().map(|f| f.unwrap().payload).collect();

        assert_eq!(payloads, vec![&b"one"[..], &b""[..], &b"three"[..]]);
        assert_eq!(reader.valid_len(), bytes.len() as u64);
        assert!(!reader.torn_tail());
    }

    #[test]
    fn torn_tail_is_not_an_error() {
        let mut bytes = journal(&[b"complete"]);
        let good_len = bytes.len();
        let partial = encode_frame(b"never finished");
        bytes.extend_from_slice(&partial[..partial.len() - 3]);

        let mut reader = FrameReader::new(&bytes);
        let frames: Vec<_> = reader.by_ref().collect();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_ok());
        assert!(reader.torn_tail());
        assert_eq!(reader.valid_len(), good_len as u64);
    }

    #[test]
    fn short_header_is_torn() {
        let mut bytes = journal(&[b"x"]);
        bytes.extend_from_slice(&FRAME_MAGIC[..2]);

        let mut reader = FrameReader::new(&bytes);
        assert_eq!(reader.by_ref().count(), 1);
        assert!(reader.torn_tail());
    }

    #[test]
    fn flipped_payload_bit_is_corruption() {
        let mut bytes = journal(&[b"first", b"second"]);
        let second_payload = encode_frame(b"first").len() + HEADER_SIZE;
        bytes[second_payload] ^= 0x01;

        let results: Vec<_> = FrameReader::new(&bytes).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(StorageError::Corrupted { offset, .. }) if offset > 0
        ));
    }

    #[test]
    fn damaged_length_is_corruption_not_torn() {
        let mut bytes = journal(&[b"first", b"second", b"third"]);
        bytes[9] = 0x7f;

        let mut reader = FrameReader::new(&bytes);
        let first = reader.next().unwrap();
        assert!(matches!(first, Err(StorageError::Corrupted { offset: 0, .. })));
        assert!(!reader.torn_tail());
        assert_eq!(reader.valid_len(), 0);
    }

    #[test]
    fn torn_tail_needs_an_intact_header() {
        let mut bytes = journal(&[b"first"]);
        let mut partial = encode_frame(b"second");
        partial.truncate(HEADER_SIZE + 2);
        partial[7] ^= 0x01;
        bytes.extend_from_slice(&partial);

        let results: Vec<_> = FrameReader::new(&bytes).collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = journal(&[b"payload"]);
        bytes[0] = b'X';
        let first = FrameReader::new(&bytes).next().unwrap();
        assert!(matches!(first, Err(StorageError::Corrupted { offset: 0, .. })));
    }

    proptest! {
        #[test]
        fn any_prefix_yields_only_whole_frames(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8),
            cut in any::<prop::sample::Index>(),
        ) {
            let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
            let bytes = journal(&refs);
            let cut = cut.index(bytes.len() + 1);

            let reader = FrameReader::new(&bytes[..cut]);
            let decoded: Vec<Vec<u8>> = reader
                .map(|f| f.unwrap().payload.to_vec())
                .collect();

            prop_assert!(decoded.len() <= payloads.len());
            prop_assert_eq!(&decoded[..], &payloads[..decoded.len()]);
        }
    }
}
