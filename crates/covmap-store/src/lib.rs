//! Persistent reverse coverage index store.
//!
//! One [`IndexStore`] owns one on-disk index root: five name tables that
//! intern class, method, test, module, and file names into dense ids, and
//! four keyed record logs holding the actual index — the reverse map from
//! `(class, method)` to covering tests, per-test usage snapshots, module
//! associations, and the reverse map from files to tests.
//!
//! The store has no internal locking; the facade crate serializes access
//! under a single mutex.

mod codec;
mod store;
mod version;

pub use store::{IndexStore, StoreStats};
pub use version::{INDEX_FORMAT_VERSION, VERSION_FILE_NAME, read_version, write_version};
