//! Core types shared across the covmap crates.
//!
//! Everything persisted by the index is expressed in terms of small
//! integer ids handed out by the name tables; the types here make those
//! ids impossible to mix up and define the delta algebra the reverse
//! index is replayed with.

pub mod delta;
pub mod ids;
pub mod trace;
pub mod usage;

pub use delta::{Delta, ResolvedSet};
pub use ids::{ClassId, FileId, FrameworkId, IdLike, MethodId, MethodKey, ModuleId, TestId};
pub use trace::{TestIdentity, TraceRecord};
pub use usage::TestUsage;
