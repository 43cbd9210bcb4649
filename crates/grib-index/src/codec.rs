//! Persisted index format.
//!
//! Big-endian binary layout, version-tagged and checksummed:
//!
//! ```text
//! magic "GBIX" | version u16
//! source path: u16 length + bytes
//! key count u16, per key: name (u16 length + bytes) + kind tag u8 + declared u8
//! per key: dictionary count u32 + tagged values
//! row count u64, per row: key-count u32 ordinals + u64 offset + u64 length
//! crc32 u32 over everything after the magic
//! ```
//!
//! The file is a record of past extraction, not a live view: reading it
//! back does not revalidate the original message file. Enumerating a
//! reloaded index re-reads the source by the stored byte ranges, so a
//! moved source file surfaces as `FileNotFound` at enumeration time,
//! not at load time. Selections and the cursor are not persisted; a
//! reloaded index starts unselected.

use grib_common::{DecodeContext, GribError, GribResult, Value, ValueKind};
use grib_message::SchemaService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::index::{Dictionary, Index, KeySpec, Row};

const MAGIC: &[u8; 4] = b"GBIX";
const FORMAT_VERSION: u16 = 1;

// Value tags in the dictionary section.
const TAG_LONG: u8 = 0;
const TAG_DOUBLE: u8 = 1;
const TAG_STRING: u8 = 2;
const TAG_BYTES: u8 = 3;
const TAG_MISSING: u8 = 4;

impl Index {
    /// Serialize this index to `path`.
    pub fn write(&self, path: &Path) -> GribResult<()> {
        let mut body = Vec::new();
        body.extend_from_slice(&FORMAT_VERSION.to_be_bytes());

        let source = self.source.to_string_lossy();
        write_str(&mut body, &source);

        body.extend_from_slice(&(self.specs.len() as u16).to_be_bytes());
        for (spec, kind) in self.specs.iter().zip(&self.kinds) {
            write_str(&mut body, &spec.name);
            body.push(kind_tag(*kind));
            body.push(spec.kind.is_some() as u8);
        }

        for dictionary in &self.dictionaries {
            body.extend_from_slice(&(dictionary.len() as u32).to_be_bytes());
            for value in dictionary.values() {
                write_value(&mut body, value);
            }
        }

        body.extend_from_slice(&(self.rows.len() as u64).to_be_bytes());
        for row in &self.rows {
            for ordinal in &row.ordinals {
                body.extend_from_slice(&ordinal.to_be_bytes());
            }
            body.extend_from_slice(&row.offset.to_be_bytes());
            body.extend_from_slice(&row.length.to_be_bytes());
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let mut file = Vec::with_capacity(4 + body.len() + 4);
        file.extend_from_slice(MAGIC);
        file.extend_from_slice(&body);
        file.extend_from_slice(&crc.to_be_bytes());

        std::fs::write(path, &file)?;
        info!(
            path = %path.display(),
            bytes = file.len(),
            rows = self.rows.len(),
            "Wrote index file"
        );
        Ok(())
    }

    /// Reload an index from `path`.
    ///
    /// Fails `CorruptedIndex` atomically on a bad magic, an unsupported
    /// version, a checksum mismatch, or structurally inconsistent
    /// content; no partially usable index is ever returned.
    pub fn read(
        context: Arc<DecodeContext>,
        schema: Arc<dyn SchemaService>,
        path: &Path,
    ) -> GribResult<Index> {
        let data = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GribError::FileNotFound(path.display().to_string())
            } else {
                GribError::Io(e)
            }
        })?;

        if data.len() < 4 + 2 + 4 || &data[0..4] != MAGIC {
            return Err(GribError::CorruptedIndex("bad magic".to_string()));
        }

        let body = &data[4..data.len() - 4];
        let stored_crc = u32::from_be_bytes(data[data.len() - 4..].try_into().expect("4 bytes"));
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            return Err(GribError::CorruptedIndex("checksum mismatch".to_string()));
        }

        let mut reader = BodyReader::new(body);
        let version = reader.u16()?;
        if version != FORMAT_VERSION {
            return Err(GribError::CorruptedIndex(format!(
                "unsupported format version {}",
                version
            )));
        }

        let source = PathBuf::from(reader.string()?);

        let key_count = reader.u16()? as usize;
        let mut specs = Vec::with_capacity(key_count);
        let mut kinds = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let name = reader.string()?;
            let kind = kind_from_tag(reader.u8()?)?;
            let declared = reader.u8()? != 0;
            specs.push(KeySpec::new(&name, declared.then_some(kind)));
            kinds.push(kind);
        }

        let mut dictionaries = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let count = reader.u32()? as usize;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(reader.value()?);
            }
            dictionaries.push(Dictionary::from_values(values));
        }

        let row_count = reader.u64()? as usize;
        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            let mut ordinals = Vec::with_capacity(key_count);
            for (key, dictionary) in dictionaries.iter().enumerate() {
                let ordinal = reader.u32()?;
                if ordinal as usize >= dictionary.len() {
                    return Err(GribError::CorruptedIndex(format!(
                        "row references entry {} of key {}, dictionary holds {}",
                        ordinal,
                        key,
                        dictionary.len()
                    )));
                }
                ordinals.push(ordinal);
            }
            let offset = reader.u64()?;
            let length = reader.u64()?;
            rows.push(Row {
                ordinals,
                offset,
                length,
            });
        }
        reader.expect_end()?;

        info!(path = %path.display(), rows = rows.len(), "Loaded index file");
        Ok(Index::from_parts(
            context,
            schema,
            source,
            specs,
            kinds,
            dictionaries,
            rows,
        ))
    }
}

fn kind_tag(kind: ValueKind) -> u8 {
    match kind {
        ValueKind::Long => 0,
        ValueKind::Double => 1,
        ValueKind::String => 2,
        ValueKind::Bytes => 3,
    }
}

fn kind_from_tag(tag: u8) -> GribResult<ValueKind> {
    match tag {
        0 => Ok(ValueKind::Long),
        1 => Ok(ValueKind::Double),
        2 => Ok(ValueKind::String),
        3 => Ok(ValueKind::Bytes),
        other => Err(GribError::CorruptedIndex(format!(
            "unknown kind tag {}",
            other
        ))),
    }
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Long(v) => {
            out.push(TAG_LONG);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::Double(v) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            out.extend_from_slice(&(b.len() as u32).to_be_bytes());
            out.extend_from_slice(b);
        }
        Value::Missing(kind) => {
            out.push(TAG_MISSING);
            out.push(kind_tag(*kind));
        }
        // Index dictionaries only ever hold scalars: extraction reads
        // one scalar per key per message.
        Value::LongArray(_) | Value::DoubleArray(_) | Value::StringArray(_) => {
            unreachable!("array values are never interned into dictionaries")
        }
    }
}

/// Bounds-checked cursor over the file body; every short read is a
/// `CorruptedIndex`.
struct BodyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> GribResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(GribError::CorruptedIndex("truncated index body".to_string()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> GribResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> GribResult<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().expect("2 bytes")))
    }

    fn u32(&mut self) -> GribResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> GribResult<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn i64(&mut self) -> GribResult<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn string(&mut self) -> GribResult<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| GribError::CorruptedIndex("non-UTF-8 string".to_string()))
    }

    fn value(&mut self) -> GribResult<Value> {
        match self.u8()? {
            TAG_LONG => Ok(Value::Long(self.i64()?)),
            TAG_DOUBLE => Ok(Value::Double(f64::from_bits(self.u64()?))),
            TAG_STRING => {
                let len = self.u32()? as usize;
                let bytes = self.take(len)?;
                String::from_utf8(bytes.to_vec())
                    .map(Value::String)
                    .map_err(|_| GribError::CorruptedIndex("non-UTF-8 string value".to_string()))
            }
            TAG_BYTES => {
                let len = self.u32()? as usize;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            TAG_MISSING => Ok(Value::Missing(kind_from_tag(self.u8()?)?)),
            other => Err(GribError::CorruptedIndex(format!(
                "unknown value tag {}",
                other
            ))),
        }
    }

    fn expect_end(&self) -> GribResult<()> {
        if self.pos != self.data.len() {
            return Err(GribError::CorruptedIndex(format!(
                "{} trailing bytes after row section",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}
