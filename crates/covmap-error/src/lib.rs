use thiserror::Error;

/// Primary error type for covmap operations.
///
/// The index is a derived cache, so the taxonomy is deliberately small:
/// almost every storage-side failure funnels into the same recovery path
/// (dispose the store, delete the index root, rebuild lazily). The
/// [`CovmapError::triggers_rebuild`] predicate is what the facade consults.
#[derive(Error, Debug)]
pub enum CovmapError {
    /// File I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk state failed validation (bad magic, checksum, or framing).
    #[error("index storage is malformed: {detail}")]
    StoreCorrupt { detail: String },

    /// The `index.version` gate did not match the expected format version.
    #[error("index format version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    /// A name table produced contradictory id/name evidence at open time,
    /// e.g. the same name interned under two ids. Query-time resolution
    /// misses are not errors; they are logged and skipped per record.
    #[error("name table inconsistency: {detail}")]
    EnumeratorInconsistency { detail: String },

    /// A trace frame could not be decoded.
    #[error("malformed trace frame at offset {offset}: {detail}")]
    Protocol { offset: u64, detail: String },

    /// Fewer bytes than a frame header promised.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// A numeric field does not fit its on-disk or in-memory representation.
    #[error("{what} out of range: {value}")]
    OutOfRange { what: String, value: String },

    /// Operation against an index that has already been disposed.
    #[error("index store is disposed")]
    Disposed,

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl CovmapError {
    /// Create a corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a name-table inconsistency error.
    pub fn inconsistency(detail: impl Into<String>) -> Self {
        Self::EnumeratorInconsistency {
            detail: detail.into(),
        }
    }

    /// Create a protocol decode error.
    pub fn protocol(offset: u64, detail: impl Into<String>) -> Self {
        Self::Protocol {
            offset,
            detail: detail.into(),
        }
    }

    /// Whether the facade must respond by wiping and rebuilding the store.
    ///
    /// True for every storage-side failure. False for [`Self::Disposed`]
    /// (benign: the caller raced a shutdown and gets an empty result) and
    /// for [`Self::Protocol`] (trace decoding happens before the store is
    /// ever touched, so the on-disk state is still trustworthy).
    #[must_use]
    pub const fn triggers_rebuild(&self) -> bool {
        !matches!(self, Self::Disposed | Self::Protocol { .. })
    }

    /// Process exit code for CLI use: 2 for storage/protocol failures,
    /// 0 is reserved for success and 1 for usage errors.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        2
    }
}

/// Result type alias using `CovmapError`.
pub type Result<T> = std::result::Result<T, CovmapError>;
