//! Append-only persistence primitives for the coverage index.
//!
//! Two building blocks live here, both single-file and checksummed per
//! record, both tolerant of a torn tail after a crash:
//!
//! - [`RecordLog`]: a `u64`-keyed log of opaque payload chunks. Chunks for
//!   one key accumulate into a chain that callers replay at query time.
//! - [`NameTable`]: a string interner handing out dense 1-based ids, backed
//!   by an append-only record file. Ids are never reused or reassigned.
//!
//! Writes are buffered in memory and reach disk on [`RecordLog::flush`] /
//! [`NameTable::flush`]; crash-losing unflushed entries is acceptable
//! because the index is a cache that the next coverage run repopulates.

pub mod failpoint;
mod header;
pub mod name_table;
pub mod record_log;

pub use name_table::NameTable;
pub use record_log::RecordLog;
