//! Coverage trace transport for covmap.
//!
//! Test runs hand their coverage over in one of two ways: a flat trace
//! file written by the agent after the run, or a live socket stream while
//! the run is still going. Both carry the same frame sequence (see
//! [`codec`]), so the consuming side never cares which transport produced
//! a record.

pub mod codec;
pub mod file;
pub mod socket;

use covmap_error::Result;
use covmap_types::TraceRecord;

pub use codec::{Frame, PROTOCOL_VERSION, RecordAssembler};
pub use file::{TRACE_FILE_MAGIC, TRACE_FILE_VERSION, TraceFileReader, TraceFileWriter};
pub use socket::{ListenerHandle, SocketTraceListener};

/// A stream of decoded trace records, transport left to the implementor.
pub trait TraceSource {
    /// Decode the next complete record, `Ok(None)` at clean end of stream.
    fn next_record(&mut self) -> Result<Option<TraceRecord>>;
}
