//! Frame codec shared by the file and socket transports.
//!
//! A trace stream is a sequence of length-prefixed frames:
//!
//! ```text
//! [frame_len: u32 LE] [kind: u8] [frame body]
//! ```
//!
//! The first frame must be a start frame carrying the protocol version and
//! the test framework for the whole stream. Name frames assign dense ids
//! (starting at 1, in frame order) to every string the stream mentions;
//! test-finished frames reference those ids. A stream carries one name
//! dictionary, shared across records.

use std::io::{Read, Write};

use covmap_error::{CovmapError, Result};
use covmap_types::{FrameworkId, TestIdentity, TraceRecord};

/// Bumped on any change to the frame layout. Readers reject other versions.
pub const PROTOCOL_VERSION: u8 = 1;

/// Upper bound on a single frame body; anything larger is a corrupt length.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const KIND_START: u8 = 0;
const KIND_NAME: u8 = 1;
const KIND_TEST_FINISHED: u8 = 2;

/// One protocol frame, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Stream preamble. Exactly one, first.
    Start {
        version: u8,
        framework: FrameworkId,
    },
    /// Binds `id` to `name` for the rest of the stream. Ids are assigned
    /// by the writer in order: 1, 2, 3, ...
    Name { id: u32, name: String },
    /// End of one test: its identity plus everything it touched, all in
    /// name-dictionary ids. A module id of 0 means no module.
    TestFinished {
        test_class: u32,
        test_method: u32,
        module: u32,
        covered: Vec<(u32, Vec<u32>)>,
        files: Vec<u32>,
    },
}

impl Frame {
    /// Serialize the frame body (kind byte included, length prefix not).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::Start { version, framework } => {
                out.push(KIND_START);
                out.push(*version);
                out.push(framework.0);
            }
            Self::Name { id, name } => {
                out.push(KIND_NAME);
                out.extend_from_slice(&id.to_le_bytes());
                // Writers bound names at u16::MAX before ever building
                // this variant.
                out.extend_from_slice(&(name.len() as u16).to_le_bytes());
                out.extend_from_slice(name.as_bytes());
            }
            Self::TestFinished {
                test_class,
                test_method,
                module,
                covered,
                files,
            } => {
                out.push(KIND_TEST_FINISHED);
                out.extend_from_slice(&test_class.to_le_bytes());
                out.extend_from_slice(&test_method.to_le_bytes());
                out.extend_from_slice(&module.to_le_bytes());
                out.extend_from_slice(&(covered.len() as u32).to_le_bytes());
                for (class, methods) in covered {
                    out.extend_from_slice(&class.to_le_bytes());
                    out.extend_from_slice(&(methods.len() as u32).to_le_bytes());
                    for method in methods {
                        out.extend_from_slice(&method.to_le_bytes());
                    }
                }
                out.extend_from_slice(&(files.len() as u32).to_le_bytes());
                for file in files {
                    out.extend_from_slice(&file.to_le_bytes());
                }
            }
        }
        out
    }

    /// Decode a frame body. `base` is the absolute stream offset of the
    /// frame start, used only for error reporting.
    pub fn decode(bytes: &[u8], base: u64) -> Result<Self> {
        let mut reader = FrameReader::new(bytes, base);
        let kind = reader.u8("frame kind")?;
        let frame = match kind {
            KIND_START => Self::Start {
                version: reader.u8("protocol version")?,
                framework: FrameworkId(reader.u8("framework")?),
            },
            KIND_NAME => {
                let id = reader.u32("name id")?;
                let len = usize::from(reader.u16("name length")?);
                let raw = reader.take(len, "name bytes")?;
                let name = std::str::from_utf8(raw)
                    .map_err(|_| CovmapError::protocol(base, "name is not valid utf-8"))?
                    .to_owned();
                Self::Name { id, name }
            }
            KIND_TEST_FINISHED => {
                let test_class = reader.u32("test class id")?;
                let test_method = reader.u32("test method id")?;
                let module = reader.u32("module id")?;
                let class_count = reader.u32("covered class count")? as usize;
                let mut covered = Vec::with_capacity(class_count.min(1024));
                for _ in 0..class_count {
                    let class = reader.u32("covered class id")?;
                    let method_count = reader.u32("covered method count")? as usize;
                    let mut methods = Vec::with_capacity(method_count.min(1024));
                    for _ in 0..method_count {
                        methods.push(reader.u32("covered method id")?);
                    }
                    covered.push((class, methods));
                }
                let file_count = reader.u32("affected file count")? as usize;
                let mut files = Vec::with_capacity(file_count.min(1024));
                for _ in 0..file_count {
                    files.push(reader.u32("affected file id")?);
                }
                Self::TestFinished {
                    test_class,
                    test_method,
                    module,
                    covered,
                    files,
                }
            }
            other => {
                return Err(CovmapError::protocol(
                    base,
                    format!("unknown frame kind {other}"),
                ));
            }
        };
        reader.finish("frame")?;
        Ok(frame)
    }
}

/// Write one length-prefixed frame, returning the bytes consumed on the
/// wire (prefix included).
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<u64> {
    let body = frame.encode();
    if body.len() > MAX_FRAME_BYTES {
        return Err(CovmapError::OutOfRange {
            what: "frame body".to_owned(),
            value: body.len().to_string(),
        });
    }
    let len = body.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&body)?;
    Ok(4 + body.len() as u64)
}

/// Read one length-prefixed frame. `Ok(None)` at a clean end of stream
/// (EOF exactly on a frame boundary); EOF anywhere else is an error.
/// Returns the frame and the bytes it consumed on the wire.
pub fn read_frame<R: Read>(reader: &mut R, offset: u64) -> Result<Option<(Frame, u64)>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(CovmapError::protocol(
                    offset,
                    format!("truncated frame length ({filled} of 4 bytes)"),
                ));
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(CovmapError::protocol(
            offset,
            format!("frame length {len} exceeds limit {MAX_FRAME_BYTES}"),
        ));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => CovmapError::protocol(
                offset,
                format!("truncated frame body ({len} bytes expected)"),
            ),
            _ => CovmapError::Io(err),
        })?;
    let frame = Frame::decode(&body, offset)?;
    Ok(Some((frame, 4 + len as u64)))
}

/// Name dictionary built from name frames. Ids are dense and start at 1;
/// a writer that skips or repeats an id has lost sync and the stream is
/// rejected.
#[derive(Debug, Default)]
struct TraceDict {
    names: Vec<String>,
}

impl TraceDict {
    fn insert(&mut self, id: u32, name: String, offset: u64) -> Result<()> {
        let expected = self.names.len() as u32 + 1;
        if id != expected {
            return Err(CovmapError::protocol(
                offset,
                format!("name id {id} out of order, expected {expected}"),
            ));
        }
        self.names.push(name);
        Ok(())
    }

    fn get(&self, id: u32, offset: u64) -> Result<&str> {
        id.checked_sub(1)
            .and_then(|index| self.names.get(index as usize))
            .map(String::as_str)
            .ok_or_else(|| CovmapError::protocol(offset, format!("unknown name id {id}")))
    }
}

/// Folds a frame sequence into complete trace records. Feed frames in
/// stream order; a record comes back on each test-finished frame.
#[derive(Debug, Default)]
pub struct RecordAssembler {
    dict: TraceDict,
    framework: Option<FrameworkId>,
}

impl RecordAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one frame. `offset` is the frame's stream position, used
    /// for error reporting only.
    pub fn push(&mut self, frame: Frame, offset: u64) -> Result<Option<TraceRecord>> {
        match frame {
            Frame::Start { version, framework } => {
                if self.framework.is_some() {
                    return Err(CovmapError::protocol(offset, "duplicate start frame"));
                }
                if version != PROTOCOL_VERSION {
                    return Err(CovmapError::protocol(
                        offset,
                        format!(
                            "unsupported trace protocol version {version} (expected {PROTOCOL_VERSION})"
                        ),
                    ));
                }
                self.framework = Some(framework);
                Ok(None)
            }
            Frame::Name { id, name } => {
                if self.framework.is_none() {
                    return Err(CovmapError::protocol(offset, "name frame before start frame"));
                }
                self.dict.insert(id, name, offset)?;
                Ok(None)
            }
            Frame::TestFinished {
                test_class,
                test_method,
                module,
                covered,
                files,
            } => {
                let Some(framework) = self.framework else {
                    return Err(CovmapError::protocol(
                        offset,
                        "test-finished frame before start frame",
                    ));
                };
                let identity = TestIdentity::new(
                    self.dict.get(test_class, offset)?,
                    self.dict.get(test_method, offset)?,
                    framework,
                );
                let mut record = TraceRecord::new(identity);
                if module != 0 {
                    record.module = Some(self.dict.get(module, offset)?.to_owned());
                }
                for (class, methods) in covered {
                    let class_name = self.dict.get(class, offset)?.to_owned();
                    let mut method_names = Vec::with_capacity(methods.len());
                    for method in methods {
                        method_names.push(self.dict.get(method, offset)?.to_owned());
                    }
                    record.covered_methods.insert(class_name, method_names);
                }
                for file in files {
                    record.affected_files.push(self.dict.get(file, offset)?.to_owned());
                }
                Ok(Some(record))
            }
        }
    }
}

/// Little-endian cursor over one frame body. Errors carry the absolute
/// stream offset of the failing field.
struct FrameReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> FrameReader<'a> {
    const fn new(bytes: &'a [u8], base: u64) -> Self {
        Self { bytes, pos: 0, base }
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(CovmapError::protocol(
                self.base + self.pos as u64,
                format!("frame ends inside {field}"),
            ));
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &str) -> Result<u16> {
        let raw = self.take(2, field)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self, field: &str) -> Result<u32> {
        let raw = self.take(4, field)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn finish(&self, what: &str) -> Result<()> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(CovmapError::protocol(
                self.base + self.pos as u64,
                format!("{what} has {} trailing bytes", self.bytes.len() - self.pos),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> Frame {
        Frame::Start {
            version: PROTOCOL_VERSION,
            framework: FrameworkId::JUNIT,
        }
    }

    fn name(id: u32, name: &str) -> Frame {
        Frame::Name {
            id,
            name: name.to_owned(),
        }
    }

    #[test]
    fn frames_round_trip() {
        let frames = [
            start(),
            name(1, "com.foo.BarTest"),
            Frame::TestFinished {
                test_class: 1,
                test_method: 2,
                module: 0,
                covered: vec![(3, vec![4, 5]), (6, vec![])],
                files: vec![7],
            },
        ];
        for frame in frames {
            let body = frame.encode();
            let decoded = Frame::decode(&body, 0).expect("decode");
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn assembler_builds_records() {
        let mut assembler = RecordAssembler::new();
        let frames = [
            start(),
            name(1, "com.foo.BarTest"),
            name(2, "testBaz"),
            name(3, "com.foo.Bar"),
            name(4, "doWork"),
            name(5, "src/Bar.java"),
            name(6, "core"),
            Frame::TestFinished {
                test_class: 1,
                test_method: 2,
                module: 6,
                covered: vec![(3, vec![4])],
                files: vec![5],
            },
        ];
        let mut records = Vec::new();
        for (i, frame) in frames.into_iter().enumerate() {
            if let Some(record) = assembler.push(frame, i as u64).expect("push") {
                records.push(record);
            }
        }
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.test.class, "com.foo.BarTest");
        assert_eq!(record.test.method, "testBaz");
        assert_eq!(record.test.framework, FrameworkId::JUNIT);
        assert_eq!(record.module.as_deref(), Some("core"));
        assert_eq!(
            record.covered_methods.get("com.foo.Bar").map(Vec::as_slice),
            Some(["doWork".to_owned()].as_slice())
        );
        assert_eq!(record.affected_files, ["src/Bar.java"]);
    }

    #[test]
    fn frame_before_start_is_rejected() {
        let mut assembler = RecordAssembler::new();
        let err = assembler
            .push(name(1, "x"), 0)
            .expect_err("name before start");
        assert!(err.to_string().contains("before start"));
    }

    #[test]
    fn wrong_protocol_version_is_rejected() {
        let mut assembler = RecordAssembler::new();
        let err = assembler
            .push(
                Frame::Start {
                    version: PROTOCOL_VERSION + 1,
                    framework: FrameworkId::JUNIT,
                },
                0,
            )
            .expect_err("future version");
        assert!(err.to_string().contains("unsupported trace protocol version"));
    }

    #[test]
    fn out_of_order_name_id_is_rejected() {
        let mut assembler = RecordAssembler::new();
        assembler.push(start(), 0).expect("start");
        let err = assembler.push(name(2, "x"), 4).expect_err("gap in ids");
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn unknown_id_in_test_frame_is_rejected() {
        let mut assembler = RecordAssembler::new();
        assembler.push(start(), 0).expect("start");
        assembler.push(name(1, "Class"), 4).expect("name");
        let err = assembler
            .push(
                Frame::TestFinished {
                    test_class: 1,
                    test_method: 9,
                    module: 0,
                    covered: vec![],
                    files: vec![],
                },
                8,
            )
            .expect_err("dangling id");
        assert!(err.to_string().contains("unknown name id 9"));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut body = start().encode();
        body.push(0xFF);
        let err = Frame::decode(&body, 0).expect_err("trailing byte");
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn clean_eof_yields_none() {
        let mut empty: &[u8] = &[];
        let got = read_frame(&mut empty, 0).expect("eof");
        assert!(got.is_none());
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &name(1, "com.foo.Bar")).expect("write");
        wire.truncate(wire.len() - 3);
        let err = read_frame(&mut &wire[..], 0).expect_err("short body");
        assert!(err.to_string().contains("truncated frame body"));
    }

    #[test]
    fn oversized_length_prefix_is_an_error() {
        let wire = (u32::MAX).to_le_bytes();
        let err = read_frame(&mut &wire[..], 0).expect_err("absurd length");
        assert!(err.to_string().contains("exceeds limit"));
    }
}
