//! Flat trace files written by a test run and ingested afterwards.
//!
//! Layout:
//!
//! ```text
//! [magic "CVTR"] [container version: u32 LE] [xxh3_64 of the first 8 bytes]
//! [frame]*        (length-prefixed, see `codec`)
//! ```
//!
//! The first frame is always a start frame; everything after it is name
//! and test-finished frames in run order. The conventional extension is
//! `.ctr`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use covmap_error::{CovmapError, Result};
use covmap_types::{FrameworkId, TraceRecord};
use hashbrown::HashMap;
use xxhash_rust::xxh3::xxh3_64;

use crate::TraceSource;
use crate::codec::{Frame, PROTOCOL_VERSION, RecordAssembler, read_frame, write_frame};

pub const TRACE_FILE_MAGIC: [u8; 4] = *b"CVTR";

/// Container layout version; bumped when the header or framing changes.
pub const TRACE_FILE_VERSION: u32 = 1;

const HEADER_BYTES: usize = 16;
const MAX_NAME_BYTES: usize = u16::MAX as usize;

fn encode_header() -> [u8; HEADER_BYTES] {
    let mut out = [0u8; HEADER_BYTES];
    out[0..4].copy_from_slice(&TRACE_FILE_MAGIC);
    out[4..8].copy_from_slice(&TRACE_FILE_VERSION.to_le_bytes());
    let digest = xxh3_64(&out[0..8]);
    out[8..16].copy_from_slice(&digest.to_le_bytes());
    out
}

fn decode_header(bytes: &[u8; HEADER_BYTES]) -> Result<()> {
    if bytes[0..4] != TRACE_FILE_MAGIC {
        return Err(CovmapError::protocol(0, "invalid trace file magic"));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != TRACE_FILE_VERSION {
        return Err(CovmapError::protocol(
            4,
            format!("unsupported trace file version {version} (expected {TRACE_FILE_VERSION})"),
        ));
    }
    let stored = u64::from_le_bytes([
        bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    ]);
    if stored != xxh3_64(&bytes[0..8]) {
        return Err(CovmapError::protocol(8, "trace file header checksum mismatch"));
    }
    Ok(())
}

/// Streams one test run's records into a trace file.
///
/// Strings are interned on first use and emitted as name frames ahead of
/// the record that references them, so a reader never sees a dangling id.
#[derive(Debug)]
pub struct TraceFileWriter {
    file: BufWriter<File>,
    framework: FrameworkId,
    ids: HashMap<String, u32>,
    offset: u64,
}

impl TraceFileWriter {
    /// Create (or truncate) a trace file and write its preamble.
    pub fn create(path: &Path, framework: FrameworkId) -> Result<Self> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&encode_header())?;
        let mut writer = Self {
            file,
            framework,
            ids: HashMap::new(),
            offset: HEADER_BYTES as u64,
        };
        writer.emit(&Frame::Start {
            version: PROTOCOL_VERSION,
            framework,
        })?;
        Ok(writer)
    }

    /// Append one record. Its framework must match the stream's.
    pub fn append(&mut self, record: &TraceRecord) -> Result<()> {
        if record.test.framework != self.framework {
            return Err(CovmapError::protocol(
                self.offset,
                format!(
                    "record framework {} does not match stream framework {}",
                    record.test.framework, self.framework
                ),
            ));
        }
        let test_class = self.intern(&record.test.class)?;
        let test_method = self.intern(&record.test.method)?;
        let module = match &record.module {
            Some(name) => self.intern(name)?,
            None => 0,
        };
        let mut covered = Vec::with_capacity(record.covered_methods.len());
        for (class, methods) in &record.covered_methods {
            let class_id = self.intern(class)?;
            let mut method_ids = Vec::with_capacity(methods.len());
            for method in methods {
                method_ids.push(self.intern(method)?);
            }
            covered.push((class_id, method_ids));
        }
        let mut files = Vec::with_capacity(record.affected_files.len());
        for file in &record.affected_files {
            files.push(self.intern(file)?);
        }
        self.emit(&Frame::TestFinished {
            test_class,
            test_method,
            module,
            covered,
            files,
        })
    }

    /// Flush buffered frames and sync the file to disk.
    pub fn finish(self) -> Result<()> {
        let file = self
            .file
            .into_inner()
            .map_err(std::io::IntoInnerError::into_error)?;
        file.sync_data()?;
        Ok(())
    }

    fn intern(&mut self, name: &str) -> Result<u32> {
        if let Some(&id) = self.ids.get(name) {
            return Ok(id);
        }
        if name.len() > MAX_NAME_BYTES {
            return Err(CovmapError::OutOfRange {
                what: "trace name".to_owned(),
                value: name.len().to_string(),
            });
        }
        let id = self.ids.len() as u32 + 1;
        self.emit(&Frame::Name {
            id,
            name: name.to_owned(),
        })?;
        self.ids.insert(name.to_owned(), id);
        Ok(id)
    }

    fn emit(&mut self, frame: &Frame) -> Result<()> {
        self.offset += write_frame(&mut self.file, frame)?;
        Ok(())
    }
}

/// Reads a trace file, yielding records in run order.
#[derive(Debug)]
pub struct TraceFileReader {
    file: BufReader<File>,
    assembler: RecordAssembler,
    offset: u64,
}

impl TraceFileReader {
    /// Open a trace file and validate its header. Frame decoding happens
    /// lazily in [`TraceSource::next_record`].
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        let mut header = [0u8; HEADER_BYTES];
        file.read_exact(&mut header).map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                CovmapError::protocol(0, "truncated trace file header")
            }
            _ => CovmapError::Io(err),
        })?;
        decode_header(&header)?;
        Ok(Self {
            file,
            assembler: RecordAssembler::new(),
            offset: HEADER_BYTES as u64,
        })
    }
}

impl TraceSource for TraceFileReader {
    fn next_record(&mut self) -> Result<Option<TraceRecord>> {
        loop {
            let Some((frame, consumed)) = read_frame(&mut self.file, self.offset)? else {
                return Ok(None);
            };
            let at = self.offset;
            self.offset += consumed;
            if let Some(record) = self.assembler.push(frame, at)? {
                return Ok(Some(record));
            }
        }
    }
}
