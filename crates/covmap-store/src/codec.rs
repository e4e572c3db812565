//! Payload encodings for the record logs.
//!
//! Two payload kinds exist. A *delta* is one membership change for a keyed
//! set, 5 bytes: direction tag then the id, little-endian. A *usage
//! snapshot* is the flat encoding of a whole [`TestUsage`]; the zero-length
//! payload is reserved as the snapshot's tombstone.

use covmap_error::{CovmapError, Result};
use covmap_types::{ClassId, Delta, FileId, IdLike, MethodId, ModuleId, TestUsage};

const DELTA_ADDED: u8 = 0;
const DELTA_REMOVED: u8 = 1;

pub(crate) const DELTA_BYTES: usize = 5;

pub(crate) fn encode_delta<T: IdLike>(delta: Delta<T>) -> [u8; DELTA_BYTES] {
    let (tag, id) = match delta {
        Delta::Added(id) => (DELTA_ADDED, id),
        Delta::Removed(id) => (DELTA_REMOVED, id),
    };
    let mut out = [0_u8; DELTA_BYTES];
    out[0] = tag;
    out[1..5].copy_from_slice(&id.raw().to_le_bytes());
    out
}

pub(crate) fn decode_delta<T: IdLike>(bytes: &[u8]) -> Result<Delta<T>> {
    if bytes.len() != DELTA_BYTES {
        return Err(CovmapError::corrupt(format!(
            "delta chunk has {} bytes, expected {DELTA_BYTES}",
            bytes.len()
        )));
    }
    let raw = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let id = T::from_raw(raw).ok_or_else(|| CovmapError::corrupt("delta chunk carries id 0"))?;
    match bytes[0] {
        DELTA_ADDED => Ok(Delta::Added(id)),
        DELTA_REMOVED => Ok(Delta::Removed(id)),
        tag => Err(CovmapError::corrupt(format!("unknown delta tag {tag}"))),
    }
}

/// Flat usage snapshot layout, all integers u32 little-endian:
///
/// ```text
/// module (0 = none)
/// file_count, file_id*
/// class_count, (class_id, method_count, method_id*)*
/// ```
pub(crate) fn encode_usage(usage: &TestUsage) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(12 + 4 * (usage.files.len() + 2 * usage.method_count()));
    out.extend_from_slice(&usage.module.map_or(0, ModuleId::get).to_le_bytes());

    out.extend_from_slice(&count_u32(usage.files.len(), "file count")?.to_le_bytes());
    for file in &usage.files {
        out.extend_from_slice(&file.get().to_le_bytes());
    }

    out.extend_from_slice(&count_u32(usage.methods.len(), "class count")?.to_le_bytes());
    for (class, methods) in &usage.methods {
        out.extend_from_slice(&class.get().to_le_bytes());
        out.extend_from_slice(&count_u32(methods.len(), "method count")?.to_le_bytes());
        for method in methods {
            out.extend_from_slice(&method.get().to_le_bytes());
        }
    }
    Ok(out)
}

/// Decode a usage snapshot. The empty payload is the tombstone and decodes
/// to `None`.
pub(crate) fn decode_usage(bytes: &[u8]) -> Result<Option<TestUsage>> {
    if bytes.is_empty() {
        return Ok(None);
    }

    let mut reader = Reader::new(bytes);
    let mut usage = TestUsage::new();
    usage.module = ModuleId::new(reader.u32("module id")?);

    let file_count = reader.u32("file count")?;
    for _ in 0..file_count {
        let raw = reader.u32("file id")?;
        let file = FileId::new(raw)
            .ok_or_else(|| CovmapError::corrupt("usage snapshot carries file id 0"))?;
        usage.add_file(file);
    }

    let class_count = reader.u32("class count")?;
    for _ in 0..class_count {
        let class = ClassId::new(reader.u32("class id")?)
            .ok_or_else(|| CovmapError::corrupt("usage snapshot carries class id 0"))?;
        let method_count = reader.u32("method count")?;
        for _ in 0..method_count {
            let method = MethodId::new(reader.u32("method id")?)
                .ok_or_else(|| CovmapError::corrupt("usage snapshot carries method id 0"))?;
            usage.add_method(class, method);
        }
    }

    reader.finish("usage snapshot")?;
    Ok(Some(usage))
}

fn count_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| CovmapError::OutOfRange {
        what: what.to_owned(),
        value: value.to_string(),
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn u32(&mut self, field: &str) -> Result<u32> {
        let end = self
            .pos
            .checked_add(4)
            .ok_or_else(|| CovmapError::corrupt(format!("overflow while reading {field}")))?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| CovmapError::ShortRead {
                expected: 4,
                actual: self.bytes.len().saturating_sub(self.pos),
            })?;
        let array: [u8; 4] = slice
            .try_into()
            .map_err(|_| CovmapError::corrupt(format!("failed to parse {field}")))?;
        self.pos = end;
        Ok(u32::from_le_bytes(array))
    }

    fn finish(&self, what: &str) -> Result<()> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(CovmapError::corrupt(format!(
                "{} trailing bytes after {what}",
                self.bytes.len() - self.pos
            )))
        }
    }
}
