//! Log segment management.

use crate::config::LOG_BUFFER_SIZE;
use crate::error::{StoreError, StoreResult};
use crate::frame::{encode_frame, FrameReader};
use crate::fsutil;
use crate::log::record::{LogRecord, LOG_MAGIC};
use crate::types::TxnId;
use burrow_storage::{Backend, FileBackend};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Manages the numbered log segments of one environment.
///
/// Appends are staged in a write buffer and land in the active (highest
/// numbered) segment; [`LogManager::flush`] makes them durable. Sealed
/// segments become recyclable once no transaction recorded in them is still
/// needed for recovery.
pub struct LogManager {
    inner: Mutex<LogInner>,
}

struct SealedSegment {
    id: u64,
    path: PathBuf,
    size: u64,
}

struct LogInner {
    dir: PathBuf,
    max_log_size: u64,
    active: FileBackend,
    active_id: u64,
    buffer: Vec<u8>,
    sealed: Vec<SealedSegment>,
    /// Lowest segment holding a record of each live (not yet resolved) txn.
    txn_low: HashMap<TxnId, u64>,
    /// Commit sequence -> lowest segment holding that txn's records.
    /// Pruned when a checkpoint covers the sequence.
    committed_low: BTreeMap<u64, u64>,
    closed: bool,
}

impl LogManager {
    /// Opens the log in `dir`, scanning existing segments.
    ///
    /// Returns the manager plus every record found, in write order, for the
    /// environment's recovery pass. A torn tail on the final segment is
    /// truncated away; a torn tail on an earlier (sealed) segment is treated
    /// as corruption, since only the segment being written when the process
    /// died can legitimately end mid-record.
    pub fn open(dir: &Path, max_log_size: u64) -> StoreResult<(Self, Vec<LogRecord>)> {
        let mut ids = segment_ids(dir)?;
        if ids.is_empty() {
            ids.push(1);
        }

        let mut records = Vec::new();
        let mut tagged = Vec::new(); // (segment id, record index range) bookkeeping input
        let mut sealed = Vec::new();

        let last_index = ids.len() - 1;
        let mut active = None;
        for (index, &id) in ids.iter().enumerate() {
            let path = segment_path(dir, id);
            let mut backend = FileBackend::open(&path)?;
            let is_last = index == last_index;

            let (segment_records, torn_at) = scan_segment(&backend, id, is_last)?;
            if let Some(pos) = torn_at {
                warn!(segment = id, pos, "truncating torn tail of active log segment");
                backend.truncate(pos)?;
            }
            for record in segment_records {
                tagged.push((id, records.len()));
                records.push(record);
            }

            if is_last {
                active = Some(backend);
            } else {
                let size = backend.len()?;
                sealed.push(SealedSegment { id, path, size });
            }
        }

        let mut inner = LogInner {
            dir: dir.to_path_buf(),
            max_log_size,
            // ids is never empty, so the last segment always became active
            active: active.expect("active segment"),
            active_id: *ids.last().expect("segment id"),
            buffer: Vec::with_capacity(LOG_BUFFER_SIZE),
            sealed,
            txn_low: HashMap::new(),
            committed_low: BTreeMap::new(),
            closed: false,
        };

        for (segment, index) in tagged {
            track_record(&mut inner, segment, &records[index]);
        }

        Ok((Self { inner: Mutex::new(inner) }, records))
    }

    /// Appends a record to the active segment, rotating first if the segment
    /// is full.
    pub fn append(&self, record: &LogRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(StoreError::invalid_operation("log is closed"));
        }

        let frame = encode_frame(LOG_MAGIC, record.kind().as_byte(), &record.encode_payload())?;

        let written = inner.active.len()? + inner.buffer.len() as u64;
        if written > 0 && written + frame.len() as u64 > inner.max_log_size {
            seal_active(&mut inner)?;
        }

        let segment = inner.active_id;
        track_record(&mut inner, segment, record);

        inner.buffer.extend_from_slice(&frame);
        if inner.buffer.len() >= LOG_BUFFER_SIZE {
            write_buffer(&mut inner)?;
        }
        Ok(())
    }

    /// Flushes buffered records and syncs the active segment to disk.
    pub fn flush(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(StoreError::invalid_operation("log is closed"));
        }
        write_buffer(&mut inner)?;
        inner.active.flush()?;
        inner.active.sync()?;
        Ok(())
    }

    /// Deletes every sealed segment no longer needed for recovery.
    ///
    /// The log is flushed first; returns the paths of the deleted segments.
    pub fn recycle(&self) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(StoreError::invalid_operation("log is closed"));
        }
        write_buffer(&mut inner)?;
        inner.active.flush()?;
        inner.active.sync()?;

        let cutoff = recovery_cutoff(&inner);
        let mut recycled = Vec::new();
        // delete one at a time so a failure leaves the remaining segments
        // tracked; an untracked segment file could be replayed as live log
        // by a later open
        while let Some(pos) = inner.sealed.iter().position(|s| s.id < cutoff) {
            let segment = inner.sealed.remove(pos);
            debug!(segment = segment.id, "deleting recyclable log segment");
            if let Err(e) = fs::remove_file(&segment.path) {
                inner.sealed.insert(pos, segment);
                return Err(e.into());
            }
            recycled.push(segment.path.display().to_string());
        }

        if !recycled.is_empty() {
            fsutil::sync_dir(&inner.dir)?;
        }
        Ok(recycled)
    }

    /// Number of on-disk segments, including the active one.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.sealed.len() + 1
    }

    /// Total log volume in bytes, including unflushed buffered records.
    pub fn total_bytes(&self) -> StoreResult<u64> {
        let inner = self.inner.lock();
        let sealed: u64 = inner.sealed.iter().map(|s| s.size).sum();
        Ok(sealed + inner.active.len()? + inner.buffer.len() as u64)
    }

    /// Paths of every remaining segment file.
    #[must_use]
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        let inner = self.inner.lock();
        let mut paths: Vec<PathBuf> = inner.sealed.iter().map(|s| s.path.clone()).collect();
        paths.push(segment_path(&inner.dir, inner.active_id));
        paths
    }

    /// Flushes and closes the log. Idempotent.
    pub fn close(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        write_buffer(&mut inner)?;
        inner.active.flush()?;
        inner.active.sync()?;
        inner.closed = true;
        Ok(())
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LogManager")
            .field("dir", &inner.dir)
            .field("active_id", &inner.active_id)
            .field("sealed", &inner.sealed.len())
            .field("closed", &inner.closed)
            .finish_non_exhaustive()
    }
}

/// Updates transaction bookkeeping for one appended or scanned record.
fn track_record(inner: &mut LogInner, segment: u64, record: &LogRecord) {
    match record {
        LogRecord::Begin { txn } | LogRecord::Put { txn, .. } | LogRecord::Delete { txn, .. } => {
            inner.txn_low.entry(*txn).or_insert(segment);
        }
        LogRecord::Commit { txn, seq } => {
            let low = inner.txn_low.remove(txn).unwrap_or(segment);
            inner.committed_low.insert(seq.as_u64(), low);
        }
        LogRecord::Abort { txn } => {
            inner.txn_low.remove(txn);
        }
        LogRecord::Checkpoint { seq } => {
            let covered = seq.as_u64();
            inner.committed_low.retain(|&s, _| s > covered);
        }
    }
}

/// First segment still needed for recovery.
///
/// Everything below the earliest record of a live transaction or of a commit
/// not yet covered by a checkpoint must stay; with neither, only the active
/// segment is needed.
fn recovery_cutoff(inner: &LogInner) -> u64 {
    inner
        .txn_low
        .values()
        .chain(inner.committed_low.values())
        .copied()
        .min()
        .unwrap_or(inner.active_id)
}

fn write_buffer(inner: &mut LogInner) -> StoreResult<()> {
    if !inner.buffer.is_empty() {
        let buffer = std::mem::take(&mut inner.buffer);
        inner.active.append(&buffer)?;
        inner.buffer = buffer;
        inner.buffer.clear();
    }
    Ok(())
}

fn seal_active(inner: &mut LogInner) -> StoreResult<()> {
    write_buffer(inner)?;
    inner.active.flush()?;
    inner.active.sync()?;

    let path = segment_path(&inner.dir, inner.active_id);
    let size = inner.active.len()?;
    let id = inner.active_id;
    inner.sealed.push(SealedSegment { id, path, size });

    inner.active_id += 1;
    let next = segment_path(&inner.dir, inner.active_id);
    debug!(segment = inner.active_id, "rotating to new log segment");
    inner.active = FileBackend::open(&next)?;
    fsutil::sync_dir(&inner.dir)?;
    Ok(())
}

/// Reads every record of one segment.
///
/// Returns the records plus, when the segment ends in a torn record, the
/// offset the file should be truncated to. Torn tails are only tolerated on
/// the final (active) segment.
fn scan_segment(
    backend: &FileBackend,
    id: u64,
    is_last: bool,
) -> StoreResult<(Vec<LogRecord>, Option<u64>)> {
    let mut records = Vec::new();
    let mut reader = FrameReader::new(backend, LOG_MAGIC)?;

    while let Some((_, kind, payload)) = reader.next_frame()? {
        records.push(LogRecord::decode_payload(kind, &payload)?);
    }

    if reader.torn() {
        if !is_last {
            return Err(StoreError::corrupted(format!(
                "log segment {id} ends mid-record but is not the last segment"
            )));
        }
        return Ok((records, Some(reader.pos())));
    }
    Ok((records, None))
}

fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("log.{id:06}"))
}

/// Sorted IDs of the `log.NNNNNN` files present in `dir`.
fn segment_ids(dir: &Path) -> StoreResult<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(id) = parse_segment_name(name) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

fn parse_segment_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("log.")?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
