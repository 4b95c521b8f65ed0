//! On-disk record envelope.
//!
//! Every burrow file - log segments, tree snapshots, hash collection logs -
//! is a sequence of framed records:
//!
//! ```text
//! | magic (4) | version (2) | kind (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The magic bytes identify the file flavor; `kind` is interpreted by the
//! owning module. The CRC covers everything before it.
//!
//! ## Recovery policy
//!
//! Reading distinguishes tolerated from fatal conditions:
//!
//! - **Torn tail** (truncated header or payload at the end of the file):
//!   treated as a clean end. This is what a crash mid-write leaves behind;
//!   the incomplete record is discarded.
//! - **Bad magic, unknown version, CRC mismatch** on a complete record:
//!   fatal. These indicate real corruption and must not be repaired
//!   heuristically.

use crate::error::{StoreError, StoreResult};
use burrow_storage::Backend;
use tracing::debug;

/// Current envelope version.
pub const FRAME_VERSION: u16 = 1;

/// Header size: magic (4) + version (2) + kind (1) + length (4).
const HEADER_LEN: usize = 11;

/// Trailing CRC size.
const CRC_LEN: usize = 4;

/// Maximum payload size accepted in a single frame.
const MAX_PAYLOAD: usize = u32::MAX as usize;

/// Computes a CRC32 (IEEE polynomial) over `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
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

    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    crc ^ 0xFFFF_FFFF
}

/// Encodes one frame.
///
/// # Errors
///
/// Fails if the payload exceeds the 4 GiB frame limit.
pub fn encode_frame(magic: [u8; 4], kind: u8, payload: &[u8]) -> StoreResult<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(StoreError::invalid_operation("record payload too large"));
    }

    let mut data = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    data.extend_from_slice(&magic);
    data.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    data.push(kind);
    data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    data.extend_from_slice(payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Appends a little-endian u64 to a payload buffer.
pub(crate) fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Appends a length-prefixed byte field to a payload buffer.
pub(crate) fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Bounds-checked reader over a frame payload.
pub(crate) struct PayloadCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadCursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> StoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| StoreError::corrupted("record payload too short"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn take_u8(&mut self) -> StoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn take_u64(&mut self) -> StoreResult<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub(crate) fn take_bytes(&mut self) -> StoreResult<Vec<u8>> {
        let len = {
            let bytes = self.take(4)?;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        };
        Ok(self.take(len)?.to_vec())
    }

    pub(crate) fn take_string(&mut self) -> StoreResult<String> {
        String::from_utf8(self.take_bytes()?)
            .map_err(|_| StoreError::corrupted("record field is not UTF-8"))
    }

    pub(crate) fn finish(&self) -> StoreResult<()> {
        if self.pos != self.data.len() {
            return Err(StoreError::corrupted("trailing bytes in record payload"));
        }
        Ok(())
    }
}

/// Streaming reader over the frames of one backend.
///
/// Reads frames one by one without loading the whole file. `next_frame`
/// returns `Ok(None)` at a clean end *or* a torn tail; [`FrameReader::torn`]
/// tells the two apart so the caller can truncate the damage away.
pub struct FrameReader<'a> {
    backend: &'a dyn Backend,
    magic: [u8; 4],
    pos: u64,
    size: u64,
    torn: bool,
}

impl<'a> FrameReader<'a> {
    /// Creates a reader over `backend`, expecting frames tagged `magic`.
    pub fn new(backend: &'a dyn Backend, magic: [u8; 4]) -> StoreResult<Self> {
        let size = backend.len()?;
        Ok(Self {
            backend,
            magic,
            pos: 0,
            size,
            torn: false,
        })
    }

    /// Offset of the first byte not consumed by a complete frame.
    ///
    /// After a torn tail this is where the file should be truncated to.
    #[must_use]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Whether reading stopped at a torn (incomplete) trailing record.
    #[must_use]
    pub fn torn(&self) -> bool {
        self.torn
    }

    /// Reads the next frame, returning `(offset, kind, payload)`.
    ///
    /// # Errors
    ///
    /// Fails on bad magic, an unsupported envelope version, or a CRC
    /// mismatch on a complete record.
    pub fn next_frame(&mut self) -> StoreResult<Option<(u64, u8, Vec<u8>)>> {
        if self.pos == self.size {
            return Ok(None);
        }
        if self.pos + HEADER_LEN as u64 > self.size {
            debug!(pos = self.pos, size = self.size, "torn frame header at end");
            self.torn = true;
            return Ok(None);
        }

        let header = self.backend.read_at(self.pos, HEADER_LEN)?;
        if header[0..4] != self.magic {
            return Err(StoreError::corrupted(format!(
                "bad magic at offset {}: expected {:?}, got {:?}",
                self.pos,
                self.magic,
                &header[0..4]
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > FRAME_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: version,
                supported: FRAME_VERSION,
            });
        }
        let kind = header[6];
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let total = HEADER_LEN as u64 + len as u64 + CRC_LEN as u64;
        if self.pos + total > self.size {
            debug!(pos = self.pos, len, "torn frame payload at end");
            self.torn = true;
            return Ok(None);
        }

        let body = self
            .backend
            .read_at(self.pos + HEADER_LEN as u64, len + CRC_LEN)?;
        let (payload, crc_bytes) = body.split_at(len);

        let mut covered = header;
        covered.extend_from_slice(payload);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = compute_crc32(&covered);
        if expected != actual {
            return Err(StoreError::ChecksumMismatch { expected, actual });
        }

        let offset = self.pos;
        self.pos += total;
        Ok(Some((offset, kind, payload.to_vec())))
    }
}
