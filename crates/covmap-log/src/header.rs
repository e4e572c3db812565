//! Shared file header and byte-level read helpers.

use std::time::{SystemTime, UNIX_EPOCH};

use covmap_error::{CovmapError, Result};
use xxhash_rust::xxh3::xxh3_64;

/// Header stored at the start of every log and name-table file.
///
/// Layout (24 bytes, little-endian integer fields):
/// - `magic[4]`
/// - `version: u32`
/// - `created_at: u64` (unix seconds)
/// - `header_xxh3: u64` (hash of preceding 16 bytes)
pub(crate) const LOG_HEADER_BYTES: usize = 24;

const HEADER_HASH_INPUT_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LogHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub created_at: u64,
}

impl LogHeader {
    pub fn new(magic: [u8; 4], version: u32) -> Self {
        Self {
            magic,
            version,
            created_at: unix_seconds(),
        }
    }

    pub fn encode(&self) -> [u8; LOG_HEADER_BYTES] {
        let mut out = [0_u8; LOG_HEADER_BYTES];
        out[0..4].copy_from_slice(&self.magic);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..16].copy_from_slice(&self.created_at.to_le_bytes());
        let checksum = xxh3_64(&out[..HEADER_HASH_INPUT_BYTES]);
        out[16..24].copy_from_slice(&checksum.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8], expected_magic: [u8; 4], expected_version: u32) -> Result<Self> {
        if bytes.len() < LOG_HEADER_BYTES {
            return Err(CovmapError::corrupt(format!(
                "file header too short: expected {LOG_HEADER_BYTES} bytes, got {}",
                bytes.len()
            )));
        }

        if bytes[0..4] != expected_magic {
            return Err(CovmapError::corrupt(format!(
                "invalid file magic: {:02X?}, expected {:02X?}",
                &bytes[0..4],
                expected_magic
            )));
        }

        let version = read_u32_at(bytes, 4, "version")?;
        if version != expected_version {
            return Err(CovmapError::corrupt(format!(
                "unsupported file format version {version}, expected {expected_version}"
            )));
        }

        let created_at = read_u64_at(bytes, 8, "created_at")?;
        let stored_checksum = read_u64_at(bytes, 16, "header_xxh3")?;
        let computed_checksum = xxh3_64(&bytes[..HEADER_HASH_INPUT_BYTES]);
        if stored_checksum != computed_checksum {
            return Err(CovmapError::corrupt(format!(
                "file header checksum mismatch: stored {stored_checksum:#018X}, computed {computed_checksum:#018X}"
            )));
        }

        Ok(Self {
            magic: expected_magic,
            version,
            created_at,
        })
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

pub(crate) fn read_u16_at(bytes: &[u8], start: usize, field: &str) -> Result<u16> {
    let end = start
        .checked_add(2)
        .ok_or_else(|| CovmapError::corrupt(format!("overflow while reading field {field}")))?;
    let slice = bytes.get(start..end).ok_or_else(|| {
        CovmapError::corrupt(format!(
            "field {field} out of bounds: start={start}, end={end}, len={}",
            bytes.len()
        ))
    })?;
    let array: [u8; 2] = slice
        .try_into()
        .map_err(|_| CovmapError::corrupt(format!("failed to parse field {field}")))?;
    Ok(u16::from_le_bytes(array))
}

pub(crate) fn read_u32_at(bytes: &[u8], start: usize, field: &str) -> Result<u32> {
    let end = start
        .checked_add(4)
        .ok_or_else(|| CovmapError::corrupt(format!("overflow while reading field {field}")))?;
    let slice = bytes.get(start..end).ok_or_else(|| {
        CovmapError::corrupt(format!(
            "field {field} out of bounds: start={start}, end={end}, len={}",
            bytes.len()
        ))
    })?;
    let array: [u8; 4] = slice
        .try_into()
        .map_err(|_| CovmapError::corrupt(format!("failed to parse field {field}")))?;
    Ok(u32::from_le_bytes(array))
}

pub(crate) fn read_u64_at(bytes: &[u8], start: usize, field: &str) -> Result<u64> {
    let end = start
        .checked_add(8)
        .ok_or_else(|| CovmapError::corrupt(format!("overflow while reading field {field}")))?;
    let slice = bytes.get(start..end).ok_or_else(|| {
        CovmapError::corrupt(format!(
            "field {field} out of bounds: start={start}, end={end}, len={}",
            bytes.len()
        ))
    })?;
    let array: [u8; 8] = slice
        .try_into()
        .map_err(|_| CovmapError::corrupt(format!("failed to parse field {field}")))?;
    Ok(u64::from_le_bytes(array))
}

pub(crate) fn usize_to_u64(value: usize, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| CovmapError::OutOfRange {
        what: what.to_owned(),
        value: value.to_string(),
    })
}

pub(crate) fn usize_to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| CovmapError::OutOfRange {
        what: what.to_owned(),
        value: value.to_string(),
    })
}
