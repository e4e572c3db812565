//! Keyed append-only record log.
//!
//! Frame layout after the 24-byte file header, all integers little-endian:
//!
//! ```text
//! key: u64 | payload_len: u32 | payload | frame_xxh3: u64
//! ```
//!
//! `frame_xxh3` covers everything before it in the frame. The whole file is
//! replayed into memory at open time; a partial frame at the tail (torn
//! write) is logged and truncated away, while a checksum failure anywhere
//! before the tail is reported as corruption so the owner can wipe and
//! rebuild.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use covmap_error::{CovmapError, Result};
use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::failpoint;
use crate::header::{
    LOG_HEADER_BYTES, LogHeader, read_u32_at, read_u64_at, usize_to_u32, usize_to_u64,
};

/// On-disk framing version for record logs.
pub const RECORD_LOG_VERSION: u32 = 1;

/// Upper bound on a single payload chunk.
pub const MAX_CHUNK_BYTES: usize = 16 * 1024 * 1024;

const FRAME_HEADER_BYTES: usize = 12;
const FRAME_TRAILER_BYTES: usize = 8;

type Chain = SmallVec<[Box<[u8]>; 2]>;

/// A `u64`-keyed append-only log of checksummed payload chunks.
///
/// Appends are buffered in memory (and immediately visible to reads) until
/// [`RecordLog::flush`] writes them out. Chains preserve append order per
/// key, which is what makes delta replay deterministic.
#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
    file: File,
    keep_history: bool,
    entries: HashMap<u64, Chain>,
    pending: Vec<u8>,
    record_count: u64,
}

impl RecordLog {
    /// Open (or create) a log whose chains keep every chunk ever appended.
    pub fn open(path: &Path, magic: [u8; 4]) -> Result<Self> {
        Self::open_inner(path, magic, true)
    }

    /// Open (or create) a log retaining only the newest chunk per key, for
    /// snapshot-valued keys where older chunks are dead weight.
    pub fn open_latest_only(path: &Path, magic: [u8; 4]) -> Result<Self> {
        Self::open_inner(path, magic, false)
    }

    fn open_inner(path: &Path, magic: [u8; 4], keep_history: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let bytes = std::fs::read(path)?;

        let mut log = Self {
            path: path.to_path_buf(),
            file,
            keep_history,
            entries: HashMap::new(),
            pending: Vec::new(),
            record_count: 0,
        };

        if bytes.is_empty() {
            let header = LogHeader::new(magic, RECORD_LOG_VERSION);
            log.file.write_all(&header.encode())?;
            log.file.sync_data()?;
            debug!(path = %path.display(), "created record log");
            return Ok(log);
        }

        LogHeader::decode(&bytes, magic, RECORD_LOG_VERSION)?;
        log.replay(&bytes)?;
        Ok(log)
    }

    fn replay(&mut self, bytes: &[u8]) -> Result<()> {
        let mut cursor = LOG_HEADER_BYTES;
        while cursor < bytes.len() {
            match frame_at(bytes, cursor)? {
                FrameScan::Complete {
                    key,
                    payload,
                    frame_len,
                } => {
                    let chunk = Box::from(payload);
                    self.insert_chunk(key, chunk);
                    self.record_count += 1;
                    cursor = cursor.checked_add(frame_len).ok_or_else(|| {
                        CovmapError::corrupt("cursor overflow while replaying record log")
                    })?;
                }
                FrameScan::Torn => {
                    warn!(
                        path = %self.path.display(),
                        offset = cursor,
                        dropped_bytes = bytes.len() - cursor,
                        "truncating torn tail of record log"
                    );
                    self.file.set_len(usize_to_u64(cursor, "log length")?)?;
                    self.file.sync_data()?;
                    break;
                }
            }
        }

        debug!(
            path = %self.path.display(),
            keys = self.entries.len(),
            records = self.record_count,
            "replayed record log"
        );
        Ok(())
    }

    fn insert_chunk(&mut self, key: u64, chunk: Box<[u8]>) {
        let chain = self.entries.entry(key).or_default();
        if !self.keep_history {
            chain.clear();
        }
        chain.push(chunk);
    }

    /// Append one payload chunk under `key`. The chunk is visible to reads
    /// immediately and reaches disk on the next flush.
    pub fn append(&mut self, key: u64, payload: &[u8]) -> Result<()> {
        failpoint::check_append()?;
        if payload.len() > MAX_CHUNK_BYTES {
            return Err(CovmapError::OutOfRange {
                what: "record chunk length".to_owned(),
                value: payload.len().to_string(),
            });
        }
        let payload_len = usize_to_u32(payload.len(), "record chunk length")?;

        let frame_start = self.pending.len();
        self.pending.extend_from_slice(&key.to_le_bytes());
        self.pending.extend_from_slice(&payload_len.to_le_bytes());
        self.pending.extend_from_slice(payload);
        let checksum = xxh3_64(&self.pending[frame_start..]);
        self.pending.extend_from_slice(&checksum.to_le_bytes());

        self.insert_chunk(key, Box::from(payload));
        self.record_count += 1;
        Ok(())
    }

    /// Write buffered frames out and sync file data.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        failpoint::check_flush()?;
        self.file.write_all(&self.pending)?;
        self.file.sync_data()?;
        debug!(
            path = %self.path.display(),
            bytes = self.pending.len(),
            "flushed record log"
        );
        self.pending.clear();
        Ok(())
    }

    /// Chunks appended under `key`, oldest first.
    pub fn chunks(&self, key: u64) -> impl Iterator<Item = &[u8]> {
        self.entries
            .get(&key)
            .into_iter()
            .flat_map(|chain| chain.iter().map(|chunk| &chunk[..]))
    }

    /// Newest chunk under `key`.
    #[must_use]
    pub fn latest(&self, key: u64) -> Option<&[u8]> {
        self.entries
            .get(&key)
            .and_then(|chain| chain.last())
            .map(|chunk| &chunk[..])
    }

    /// Whether any chunk exists under `key`.
    #[must_use]
    pub fn contains_key(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    /// All keys with at least one chunk, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = u64> {
        self.entries.keys().copied()
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Total chunks appended over the log's lifetime, replayed ones included.
    #[must_use]
    pub const fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Whether unflushed appends are buffered.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

enum FrameScan<'a> {
    Complete {
        key: u64,
        payload: &'a [u8],
        frame_len: usize,
    },
    Torn,
}

fn frame_at(bytes: &[u8], cursor: usize) -> Result<FrameScan<'_>> {
    let remaining = bytes.len() - cursor;
    if remaining < FRAME_HEADER_BYTES + FRAME_TRAILER_BYTES {
        return Ok(FrameScan::Torn);
    }

    let key = read_u64_at(bytes, cursor, "frame key")?;
    let payload_len = read_u32_at(bytes, cursor + 8, "frame payload length")? as usize;
    let frame_len = FRAME_HEADER_BYTES
        .checked_add(payload_len)
        .and_then(|len| len.checked_add(FRAME_TRAILER_BYTES))
        .ok_or_else(|| CovmapError::corrupt("record frame length overflow"))?;
    if remaining < frame_len {
        return Ok(FrameScan::Torn);
    }

    let payload_start = cursor + FRAME_HEADER_BYTES;
    let payload_end = payload_start + payload_len;
    let stored_checksum = read_u64_at(bytes, payload_end, "frame checksum")?;
    let computed_checksum = xxh3_64(&bytes[cursor..payload_end]);
    if stored_checksum != computed_checksum {
        // A damaged final frame is indistinguishable from a partial write;
        // anything before the tail is genuine corruption.
        if cursor + frame_len == bytes.len() {
            return Ok(FrameScan::Torn);
        }
        return Err(CovmapError::corrupt(format!(
            "record frame checksum mismatch at offset {cursor}: stored {stored_checksum:#018X}, computed {computed_checksum:#018X}"
        )));
    }

    Ok(FrameScan::Complete {
        key,
        payload: &bytes[payload_start..payload_end],
        frame_len,
    })
}
