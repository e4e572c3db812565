//! Persistent string interner.
//!
//! Record layout after the 24-byte file header:
//!
//! ```text
//! name_len: u16 | name utf-8 bytes | name_xxh3: u64
//! ```
//!
//! A name's id is its 1-based position in the file. Ids are never reused,
//! reassigned, or removed; the table only ever grows. Torn tails are
//! truncated on open, a bad record before the tail is corruption.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use covmap_error::{CovmapError, Result};
use hashbrown::HashMap;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::failpoint;
use crate::header::{
    LOG_HEADER_BYTES, LogHeader, read_u16_at, read_u64_at, usize_to_u32, usize_to_u64,
};

/// On-disk framing version for name tables.
pub const NAME_TABLE_VERSION: u32 = 1;

/// Magic for name-table files.
pub const NAME_TABLE_MAGIC: [u8; 4] = *b"CVNT";

/// Upper bound on one interned name, limited by the u16 length field.
pub const MAX_NAME_BYTES: usize = u16::MAX as usize;

const RECORD_HEADER_BYTES: usize = 2;
const RECORD_TRAILER_BYTES: usize = 8;

/// Append-only name/id interner with dense 1-based ids.
#[derive(Debug)]
pub struct NameTable {
    path: PathBuf,
    file: File,
    ids: HashMap<Box<str>, u32>,
    names: Vec<Box<str>>,
    pending: Vec<u8>,
}

impl NameTable {
    /// Open (or create) a name table file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let bytes = std::fs::read(path)?;

        let mut table = Self {
            path: path.to_path_buf(),
            file,
            ids: HashMap::new(),
            names: Vec::new(),
            pending: Vec::new(),
        };

        if bytes.is_empty() {
            let header = LogHeader::new(NAME_TABLE_MAGIC, NAME_TABLE_VERSION);
            table.file.write_all(&header.encode())?;
            table.file.sync_data()?;
            debug!(path = %path.display(), "created name table");
            return Ok(table);
        }

        LogHeader::decode(&bytes, NAME_TABLE_MAGIC, NAME_TABLE_VERSION)?;
        table.replay(&bytes)?;
        Ok(table)
    }

    fn replay(&mut self, bytes: &[u8]) -> Result<()> {
        let mut cursor = LOG_HEADER_BYTES;
        while cursor < bytes.len() {
            let remaining = bytes.len() - cursor;
            if remaining < RECORD_HEADER_BYTES + RECORD_TRAILER_BYTES {
                self.truncate_torn(bytes.len(), cursor)?;
                break;
            }

            let name_len = read_u16_at(bytes, cursor, "name length")? as usize;
            let record_len = RECORD_HEADER_BYTES + name_len + RECORD_TRAILER_BYTES;
            if remaining < record_len {
                self.truncate_torn(bytes.len(), cursor)?;
                break;
            }

            let name_start = cursor + RECORD_HEADER_BYTES;
            let name_end = name_start + name_len;
            let name_bytes = &bytes[name_start..name_end];
            let stored_checksum = read_u64_at(bytes, name_end, "name checksum")?;
            let computed_checksum = xxh3_64(name_bytes);
            if stored_checksum != computed_checksum {
                if cursor + record_len == bytes.len() {
                    self.truncate_torn(bytes.len(), cursor)?;
                    break;
                }
                return Err(CovmapError::corrupt(format!(
                    "name record checksum mismatch at offset {cursor}"
                )));
            }

            let name = std::str::from_utf8(name_bytes).map_err(|err| {
                CovmapError::corrupt(format!("name record at offset {cursor} is not utf-8: {err}"))
            })?;
            let id = usize_to_u32(self.names.len() + 1, "name id")?;
            if self.ids.insert(Box::from(name), id).is_some() {
                return Err(CovmapError::inconsistency(format!(
                    "duplicate name record at offset {cursor} (id {id})"
                )));
            }
            self.names.push(Box::from(name));
            cursor += record_len;
        }

        debug!(
            path = %self.path.display(),
            names = self.names.len(),
            "replayed name table"
        );
        Ok(())
    }

    fn truncate_torn(&mut self, file_len: usize, cursor: usize) -> Result<()> {
        warn!(
            path = %self.path.display(),
            offset = cursor,
            dropped_bytes = file_len - cursor,
            "truncating torn tail of name table"
        );
        self.file.set_len(usize_to_u64(cursor, "table length")?)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Return the id already assigned to `name`, or assign and persist the
    /// next unused id. Ids are stable across reopen once flushed.
    pub fn enumerate(&mut self, name: &str) -> Result<u32> {
        if let Some(&id) = self.ids.get(name) {
            return Ok(id);
        }

        failpoint::check_append()?;
        if name.len() > MAX_NAME_BYTES {
            return Err(CovmapError::OutOfRange {
                what: "name length".to_owned(),
                value: name.len().to_string(),
            });
        }

        let id = usize_to_u32(self.names.len() + 1, "name id")?;
        let name_bytes = name.as_bytes();
        self.pending
            .extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        self.pending.extend_from_slice(name_bytes);
        self.pending
            .extend_from_slice(&xxh3_64(name_bytes).to_le_bytes());

        self.ids.insert(Box::from(name), id);
        self.names.push(Box::from(name));
        Ok(id)
    }

    /// Id for `name` if one was already assigned. Never allocates.
    #[must_use]
    pub fn try_enumerate(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    /// Name behind `id`, or `None` for ids never handed out (including 0).
    #[must_use]
    pub fn resolve(&self, id: u32) -> Option<&str> {
        let index = (id as usize).checked_sub(1)?;
        self.names.get(index).map(|name| &**name)
    }

    /// Number of names interned so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no name has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Write buffered records out and sync file data.
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
            "flushed name table"
        );
        self.pending.clear();
        Ok(())
    }

    /// Whether unflushed records are buffered.
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

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::Write;

    use proptest::prelude::*;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn enumerate_assigns_dense_stable_ids() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("class-names.cvn");
        let mut table = NameTable::open(&path).expect("open");

        assert_eq!(table.enumerate("com.foo.Bar").expect("enumerate"), 1);
        assert_eq!(table.enumerate("com.foo.Baz").expect("enumerate"), 2);
        assert_eq!(table.enumerate("com.foo.Bar").expect("re-enumerate"), 1);
        assert_eq!(table.len(), 2);

        assert_eq!(table.resolve(1), Some("com.foo.Bar"));
        assert_eq!(table.resolve(2), Some("com.foo.Baz"));
        assert_eq!(table.resolve(0), None);
        assert_eq!(table.resolve(3), None);
    }

    #[test]
    fn try_enumerate_never_allocates() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("method-names.cvn");
        let mut table = NameTable::open(&path).expect("open");

        assert_eq!(table.try_enumerate("qux"), None);
        assert_eq!(table.len(), 0);
        let id = table.enumerate("qux").expect("enumerate");
        assert_eq!(table.try_enumerate("qux"), Some(id));
    }

    #[test]
    fn flushed_ids_survive_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("test-names.cvn");

        let mut table = NameTable::open(&path).expect("open");
        let bar = table.enumerate("0:com.foo.Bar.testBaz").expect("enumerate");
        let qux = table.enumerate("1:com.foo.Qux.testQux").expect("enumerate");
        table.flush().expect("flush");
        drop(table);

        let mut table = NameTable::open(&path).expect("reopen");
        assert_eq!(table.resolve(bar), Some("0:com.foo.Bar.testBaz"));
        assert_eq!(table.resolve(qux), Some("1:com.foo.Qux.testQux"));
        assert_eq!(
            table.enumerate("0:com.foo.Bar.testBaz").expect("enumerate"),
            bar
        );
        assert_eq!(table.enumerate("fresh").expect("enumerate"), 3);
    }

    #[test]
    fn unflushed_names_are_lost_on_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("module-names.cvn");

        let mut table = NameTable::open(&path).expect("open");
        table.enumerate("moduleA").expect("enumerate");
        drop(table);

        let table = NameTable::open(&path).expect("reopen");
        assert!(table.is_empty());
        assert_eq!(table.try_enumerate("moduleA"), None);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("file-names.cvn");

        let mut table = NameTable::open(&path).expect("open");
        table.enumerate("src/main/java/Foo.java").expect("enumerate");
        table.flush().expect("flush");
        drop(table);

        let good_len = std::fs::metadata(&path).expect("metadata").len();
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open for append");
        file.write_all(&[12, 0, b'p', b'a', b'r'])
            .expect("write partial record");
        drop(file);

        let table = NameTable::open(&path).expect("reopen tolerates torn tail");
        assert_eq!(table.len(), 1);
        assert_eq!(std::fs::metadata(&path).expect("metadata").len(), good_len);
    }

    #[test]
    fn duplicate_record_is_corruption() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("class-names.cvn");

        let mut table = NameTable::open(&path).expect("open");
        table.enumerate("dup").expect("enumerate");
        table.flush().expect("flush");
        drop(table);

        // Hand-craft a second, checksum-valid record for the same name.
        let name = b"dup";
        let mut record = Vec::new();
        record.extend_from_slice(&(name.len() as u16).to_le_bytes());
        record.extend_from_slice(name);
        record.extend_from_slice(&xxh3_64(name).to_le_bytes());
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open for append");
        file.write_all(&record).expect("write duplicate record");
        drop(file);

        let err = NameTable::open(&path).expect_err("duplicate must surface");
        assert!(err.to_string().contains("duplicate name record"));
    }

    #[test]
    fn injected_failure_only_hits_new_names() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("class-names.cvn");
        let mut table = NameTable::open(&path).expect("open");
        let id = table.enumerate("known").expect("enumerate");

        failpoint::reset();
        failpoint::arm_append_failure();
        assert_eq!(table.enumerate("known").expect("lookup hit"), id);
        let err = table.enumerate("fresh").expect_err("allocation fails");
        assert!(matches!(err, CovmapError::Io(_)));
        table.enumerate("fresh").expect("next allocation succeeds");
    }

    proptest! {
        #[test]
        fn prop_ids_stable_across_reopen(names in proptest::collection::vec(".{0,48}", 1..24)) {
            let dir = tempdir().expect("tempdir");
            let path = dir.path().join("names.cvn");

            let mut assigned = Vec::new();
            let mut table = NameTable::open(&path).expect("open");
            for name in &names {
                let id = table.enumerate(name).expect("enumerate");
                prop_assert_eq!(table.enumerate(name).expect("re-enumerate"), id);
                assigned.push((name.clone(), id));
            }
            table.flush().expect("flush");
            drop(table);

            let table = NameTable::open(&path).expect("reopen");
            for (name, id) in assigned {
                prop_assert_eq!(table.try_enumerate(&name), Some(id));
                prop_assert_eq!(table.resolve(id), Some(name.as_str()));
            }
        }
    }
}
