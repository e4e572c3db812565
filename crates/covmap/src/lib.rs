//! Persistent reverse test-coverage index.
//!
//! covmap keeps an on-disk mapping from production methods to the tests
//! that exercised them, built incrementally from coverage traces emitted
//! by instrumented test runs. The index is a derived cache: any corruption
//! or format change is answered by wiping the directory and rebuilding
//! from the next traces, never by in-place repair.
//!
//! [`CoverageIndex`] is the only entry point. All reads and writes are
//! serialized under one lock, the store underneath is materialized lazily
//! on first access, and every query degrades to an empty result instead of
//! surfacing storage errors to the caller.
//!
//! ```no_run
//! use covmap::{CoverageIndex, FrameworkId, IndexConfig};
//!
//! # fn main() -> covmap::Result<()> {
//! let index = CoverageIndex::new(IndexConfig::new("/tmp/covmap-demo"))?;
//! for test in index.covering_tests("com.foo.Bar", "doWork", FrameworkId::JUNIT) {
//!     println!("{test}");
//! }
//! index.dispose();
//! # Ok(())
//! # }
//! ```

mod config;
mod index;

pub use config::{DEFAULT_FLUSH_INTERVAL, IndexConfig};
pub use covmap_error::{CovmapError, Result};
pub use covmap_store::StoreStats;
pub use covmap_types::{FrameworkId, TestIdentity, TraceRecord};
pub use index::CoverageIndex;
