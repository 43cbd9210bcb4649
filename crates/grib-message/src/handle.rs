//! Message handles.
//!
//! A [`MessageHandle`] owns one message's bytes and its fully decoded
//! accessor tree. Decoding is eager: construction validates the message
//! structure, walks the sections, and materializes every key the schema
//! defines. Field access afterwards only reads the tree and coerces
//! types on demand.
//!
//! Sets update the decoded tree only; [`MessageHandle::message`] keeps
//! returning the original bytes. Re-encoding is out of scope.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use grib_common::{DecodeContext, GribError, GribResult, KeyFlags, Value, ValueKind};
use std::io::Read;
use std::sync::Arc;
use tracing::debug;

use crate::accessor::{kind_label, Accessor, AccessorTree};
use crate::keys::KeysIterator;
use crate::scan::MessageScanner;
use crate::schema::{Derivation, EditionSchema, Encoding, KeySchema, KeySource, SchemaService};
use crate::unpack::unpack_simple;

const END_MARKER: &[u8; 4] = b"7777";

/// A decoded message: raw bytes plus the accessor tree built from them.
pub struct MessageHandle {
    context: Arc<DecodeContext>,
    schema: Arc<dyn SchemaService>,
    data: Bytes,
    tree: AccessorTree,
    offset: Option<u64>,
}

impl MessageHandle {
    /// Decode a message from a buffer without copying it.
    pub fn from_message(
        context: Arc<DecodeContext>,
        schema: Arc<dyn SchemaService>,
        data: Bytes,
    ) -> GribResult<Self> {
        decode(context, schema, data, None)
    }

    /// Decode a message from a caller-owned buffer, copying it into the
    /// handle.
    pub fn from_message_copy(
        context: Arc<DecodeContext>,
        schema: Arc<dyn SchemaService>,
        data: &[u8],
    ) -> GribResult<Self> {
        decode(context, schema, Bytes::copy_from_slice(data), None)
    }

    /// Decode the next message from a scanner, recording its byte
    /// offset. Returns `None` at a clean end of stream.
    pub fn next_from_reader<R: Read>(
        context: Arc<DecodeContext>,
        schema: Arc<dyn SchemaService>,
        scanner: &mut MessageScanner<R>,
    ) -> GribResult<Option<Self>> {
        match scanner.next_message()? {
            Some((offset, data)) => Ok(Some(decode(context, schema, data, Some(offset))?)),
            None => Ok(None),
        }
    }

    /// Decode a message known to come from `offset` in some stream,
    /// recording that offset on the handle.
    pub fn from_bytes_at_offset(
        context: Arc<DecodeContext>,
        schema: Arc<dyn SchemaService>,
        data: Bytes,
        offset: u64,
    ) -> GribResult<Self> {
        decode(context, schema, data, Some(offset))
    }

    /// Re-decode a copy of this message into a fresh handle.
    pub fn try_clone(&self) -> GribResult<Self> {
        decode(
            Arc::clone(&self.context),
            Arc::clone(&self.schema),
            Bytes::copy_from_slice(&self.data),
            self.offset,
        )
    }

    // === Raw message access ===

    pub fn message(&self) -> &[u8] {
        &self.data
    }

    pub fn message_length(&self) -> usize {
        self.data.len()
    }

    /// Byte offset within the source stream, when the handle came from
    /// one.
    pub fn message_offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn tree(&self) -> &AccessorTree {
        &self.tree
    }

    pub fn context(&self) -> &Arc<DecodeContext> {
        &self.context
    }

    // === Typed get ===

    pub fn get_value(&self, key: &str) -> GribResult<&Value> {
        self.tree
            .find(key)
            .map(|e| &e.value)
            .ok_or_else(|| GribError::KeyNotFound(key.to_string()))
    }

    pub fn get_long(&self, key: &str) -> GribResult<i64> {
        let value = self.get_value(key)?;
        value.as_long().ok_or_else(|| GribError::WrongConversion {
            key: key.to_string(),
            from: kind_label(value),
            to: "long",
        })
    }

    pub fn get_double(&self, key: &str) -> GribResult<f64> {
        let value = self.get_value(key)?;
        value.as_double().ok_or_else(|| GribError::WrongConversion {
            key: key.to_string(),
            from: kind_label(value),
            to: "double",
        })
    }

    pub fn get_string(&self, key: &str) -> GribResult<String> {
        let value = self.get_value(key)?;
        value.as_string().ok_or_else(|| GribError::WrongConversion {
            key: key.to_string(),
            from: kind_label(value),
            to: "string",
        })
    }

    pub fn get_bytes(&self, key: &str) -> GribResult<&[u8]> {
        let value = self.get_value(key)?;
        value.as_bytes().ok_or_else(|| GribError::WrongConversion {
            key: key.to_string(),
            from: kind_label(value),
            to: "bytes",
        })
    }

    pub fn get_long_array(&self, key: &str) -> GribResult<Vec<i64>> {
        let value = self.get_value(key)?;
        match value {
            Value::LongArray(v) => Ok(v.clone()),
            Value::Long(v) => Ok(vec![*v]),
            Value::DoubleArray(v) if v.iter().all(|x| x.is_finite()) => {
                Ok(v.iter().map(|x| *x as i64).collect())
            }
            Value::Double(v) if v.is_finite() => Ok(vec![*v as i64]),
            other => Err(GribError::WrongConversion {
                key: key.to_string(),
                from: kind_label(other),
                to: "long array",
            }),
        }
    }

    pub fn get_double_array(&self, key: &str) -> GribResult<Vec<f64>> {
        let value = self.get_value(key)?;
        match value {
            Value::DoubleArray(v) => Ok(v.clone()),
            Value::Double(v) => Ok(vec![*v]),
            Value::LongArray(v) => Ok(v.iter().map(|x| *x as f64).collect()),
            Value::Long(v) => Ok(vec![*v as f64]),
            other => Err(GribError::WrongConversion {
                key: key.to_string(),
                from: kind_label(other),
                to: "double array",
            }),
        }
    }

    pub fn get_string_array(&self, key: &str) -> GribResult<Vec<String>> {
        let value = self.get_value(key)?;
        match value {
            Value::StringArray(v) => Ok(v.clone()),
            Value::LongArray(v) => Ok(v.iter().map(|x| x.to_string()).collect()),
            Value::DoubleArray(v) => Ok(v.iter().map(|x| x.to_string()).collect()),
            other => other
                .as_string()
                .map(|s| vec![s])
                .ok_or_else(|| GribError::WrongConversion {
                    key: key.to_string(),
                    from: kind_label(other),
                    to: "string array",
                }),
        }
    }

    // === Capacity-negotiation variants ===

    /// Copy the key's string bytes into a caller buffer, returning the
    /// length written. Fails `BufferTooSmall` without writing when the
    /// buffer cannot hold the value; query [`get_length`](Self::get_length)
    /// first.
    pub fn get_string_into(&self, key: &str, buf: &mut [u8]) -> GribResult<usize> {
        let s = self.get_string(key)?;
        if buf.len() < s.len() {
            return Err(GribError::BufferTooSmall {
                needed: s.len(),
                capacity: buf.len(),
            });
        }
        buf[..s.len()].copy_from_slice(s.as_bytes());
        Ok(s.len())
    }

    /// Copy the key's values into a caller slice, returning the count
    /// written. Fails `ArrayTooSmall` without writing when the slice is
    /// short; query [`get_size`](Self::get_size) first.
    pub fn get_double_array_into(&self, key: &str, out: &mut [f64]) -> GribResult<usize> {
        let values = self.get_double_array(key)?;
        if out.len() < values.len() {
            return Err(GribError::ArrayTooSmall {
                needed: values.len(),
                capacity: out.len(),
            });
        }
        out[..values.len()].copy_from_slice(&values);
        Ok(values.len())
    }

    pub fn get_long_array_into(&self, key: &str, out: &mut [i64]) -> GribResult<usize> {
        let values = self.get_long_array(key)?;
        if out.len() < values.len() {
            return Err(GribError::ArrayTooSmall {
                needed: values.len(),
                capacity: out.len(),
            });
        }
        out[..values.len()].copy_from_slice(&values);
        Ok(values.len())
    }

    // === Metadata queries ===

    /// Total element count for the key; duplicated names sum.
    pub fn get_size(&self, key: &str) -> GribResult<usize> {
        self.tree
            .total_count(key)
            .ok_or_else(|| GribError::KeyNotFound(key.to_string()))
    }

    /// Longest string representation for the key; duplicated names take
    /// the maximum.
    pub fn get_length(&self, key: &str) -> GribResult<usize> {
        self.tree
            .max_string_length(key)
            .ok_or_else(|| GribError::KeyNotFound(key.to_string()))
    }

    pub fn native_kind(&self, key: &str) -> GribResult<ValueKind> {
        self.tree
            .find(key)
            .map(|e| e.native_kind)
            .ok_or_else(|| GribError::KeyNotFound(key.to_string()))
    }

    pub fn is_missing(&self, key: &str) -> GribResult<bool> {
        Ok(self.get_value(key)?.is_missing())
    }

    // === Typed set ===

    pub fn set_long(&mut self, key: &str, value: i64) -> GribResult<()> {
        self.tree.set(key, Value::Long(value))
    }

    pub fn set_double(&mut self, key: &str, value: f64) -> GribResult<()> {
        self.tree.set(key, Value::Double(value))
    }

    pub fn set_string(&mut self, key: &str, value: &str) -> GribResult<()> {
        self.tree.set(key, Value::String(value.to_string()))
    }

    pub fn set_double_array(&mut self, key: &str, values: &[f64]) -> GribResult<()> {
        self.tree.set(key, Value::DoubleArray(values.to_vec()))
    }

    pub fn set_missing(&mut self, key: &str) -> GribResult<()> {
        self.tree.set_missing(key)
    }

    // === Iteration ===

    /// Iterate key names, filtered by attribute flags (all requested
    /// flags must be present) and/or namespace.
    pub fn keys(&self, filter: KeyFlags, namespace: Option<&str>) -> KeysIterator<'_> {
        KeysIterator::new(&self.tree, filter, namespace)
    }
}

impl std::fmt::Debug for MessageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandle")
            .field("length", &self.data.len())
            .field("offset", &self.offset)
            .field("keys", &self.tree.len())
            .finish()
    }
}

// ===== Decode =====

/// Section start offsets, lengths, and template numbers, indexed by
/// section number.
#[derive(Debug, Default)]
struct SectionDirectory {
    sections: [Option<(usize, usize)>; 8],
    templates: [Option<u16>; 8],
}

impl SectionDirectory {
    fn section(&self, number: u8) -> Option<(usize, usize)> {
        self.sections.get(number as usize).copied().flatten()
    }

    fn template(&self, number: u8) -> Option<u16> {
        self.templates.get(number as usize).copied().flatten()
    }
}

fn decode(
    context: Arc<DecodeContext>,
    schema_service: Arc<dyn SchemaService>,
    data: Bytes,
    offset: Option<u64>,
) -> GribResult<MessageHandle> {
    if data.len() < 16 {
        return Err(GribError::InvalidMessage(format!(
            "buffer of {} bytes is too short for an indicator section",
            data.len()
        )));
    }
    if &data[0..4] != b"GRIB" {
        return Err(GribError::InvalidMessage("missing GRIB magic".to_string()));
    }

    let edition = data[7];
    let declared = match edition {
        1 => u32::from_be_bytes([0, data[4], data[5], data[6]]) as usize,
        2 => {
            let len = u64::from_be_bytes([
                data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
            ]);
            usize::try_from(len).map_err(|_| {
                GribError::Malformed(format!("declared length {} exceeds addressable memory", len))
            })?
        }
        other => return Err(GribError::UnsupportedEdition(other)),
    };
    if declared < 20 {
        return Err(GribError::Malformed(format!(
            "declared length {} too small",
            declared
        )));
    }
    if data.len() < declared {
        return Err(GribError::PrematureEndOfFile);
    }

    let data = if data.len() > declared {
        if context.multi_field_support || !context.strict_total_length {
            data.slice(0..declared)
        } else {
            return Err(GribError::Malformed(format!(
                "declared length {} but buffer holds {} bytes",
                declared,
                data.len()
            )));
        }
    } else {
        data
    };

    if &data[declared - 4..] != END_MARKER {
        return Err(GribError::MissingEndMarker);
    }

    let schema = schema_service
        .edition_schema(edition)
        .ok_or(GribError::UnsupportedEdition(edition))?;

    let directory = build_directory(&data, edition)?;

    let mut tree = AccessorTree::new();
    for key in schema.keys() {
        let decoded = match &key.source {
            KeySource::Coded {
                section,
                offset,
                width,
                encoding,
                template,
            } => decode_coded(&data, &directory, key, *section, *offset, *width, *encoding, *template),
            KeySource::Computed(derivation) => {
                derive(*derivation, &tree, &data, &directory, schema)?
            }
        };

        if let Some(value) = decoded {
            tree.push(make_accessor(key, value));
        }
    }

    debug!(
        edition,
        length = data.len(),
        keys = tree.len(),
        "Decoded message"
    );

    Ok(MessageHandle {
        context,
        schema: schema_service,
        data,
        tree,
        offset,
    })
}

fn build_directory(data: &[u8], edition: u8) -> GribResult<SectionDirectory> {
    let mut dir = SectionDirectory::default();
    dir.sections[0] = Some((0, if edition == 1 { 8 } else { 16 }));
    if edition != 2 {
        return Ok(dir);
    }

    let end = data.len() - 4; // the 7777 marker
    let mut off = 16;
    while off < end {
        if end - off < 5 {
            return Err(GribError::Malformed("truncated section header".to_string()));
        }
        let len =
            u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]) as usize;
        let num = data[off + 4];
        if !(1..=7).contains(&num) {
            return Err(GribError::Malformed(format!(
                "invalid section number {}",
                num
            )));
        }
        if len < 5 || off + len > end {
            return Err(GribError::Malformed(format!(
                "invalid length {} for section {}",
                len, num
            )));
        }
        // Repeated sections can occur; the first occurrence wins.
        if dir.sections[num as usize].is_none() {
            dir.sections[num as usize] = Some((off, len));
        }
        off += len;
    }

    for (sec, t_off) in [(3usize, 12usize), (4, 7), (5, 9)] {
        if let Some((start, len)) = dir.sections[sec] {
            if t_off + 2 <= len {
                dir.templates[sec] =
                    Some(u16::from_be_bytes([data[start + t_off], data[start + t_off + 1]]));
            }
        }
    }

    Ok(dir)
}

fn make_accessor(key: &KeySchema, value: Value) -> Accessor {
    let (coded_bits, signed) = match &key.source {
        KeySource::Coded {
            width, encoding, ..
        } => (
            Some(*width as u32 * 8),
            matches!(encoding, Encoding::SignMagnitude),
        ),
        KeySource::Computed(_) => (None, false),
    };

    Accessor {
        name: key.name.clone(),
        value,
        native_kind: key.kind,
        read_only: key.read_only,
        namespace: key.namespace.clone(),
        flags: key.flags,
        coded_bits,
        signed,
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_coded(
    data: &[u8],
    directory: &SectionDirectory,
    key: &KeySchema,
    section: u8,
    offset: usize,
    width: usize,
    encoding: Encoding,
    template: Option<u16>,
) -> Option<Value> {
    let (start, len) = directory.section(section)?;
    if let Some(required) = template {
        if directory.template(section) != Some(required) {
            return None;
        }
    }
    if offset + width > len {
        return None;
    }

    let bytes = &data[start + offset..start + offset + width];

    if key.can_be_missing && bytes.iter().all(|b| *b == 0xFF) {
        return Some(Value::Missing(key.kind));
    }

    let value = match encoding {
        Encoding::Unsigned => {
            let v = be_unsigned(bytes);
            match key.kind {
                ValueKind::Long => Value::Long(v as i64),
                ValueKind::Double => Value::Double(v as f64),
                ValueKind::String => Value::String(v.to_string()),
                ValueKind::Bytes => Value::Bytes(bytes.to_vec()),
            }
        }
        Encoding::SignMagnitude => {
            let v = sign_magnitude(bytes);
            match key.kind {
                ValueKind::Double => Value::Double(v as f64),
                _ => Value::Long(v),
            }
        }
        Encoding::Ieee32 => {
            let v = f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64;
            match key.kind {
                ValueKind::Long => Value::Long(v as i64),
                _ => Value::Double(v),
            }
        }
        Encoding::Ascii => match key.kind {
            ValueKind::Bytes => Value::Bytes(bytes.to_vec()),
            _ => Value::String(
                String::from_utf8_lossy(bytes)
                    .trim_end_matches('\0')
                    .to_string(),
            ),
        },
    };

    Some(value)
}

fn be_unsigned(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// Sign-magnitude decoding: the high bit of the first byte is the sign,
/// the remaining bits the magnitude.
fn sign_magnitude(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut magnitude = (bytes[0] & 0x7F) as u64;
    for b in &bytes[1..] {
        magnitude = (magnitude << 8) | *b as u64;
    }
    if bytes[0] & 0x80 != 0 {
        -(magnitude as i64)
    } else {
        magnitude as i64
    }
}

fn tree_long(tree: &AccessorTree, name: &str) -> Option<i64> {
    tree.find(name).and_then(|e| e.value.as_long())
}

fn tree_double(tree: &AccessorTree, name: &str) -> Option<f64> {
    tree.find(name).and_then(|e| e.value.as_double())
}

fn derive(
    derivation: Derivation,
    tree: &AccessorTree,
    data: &[u8],
    directory: &SectionDirectory,
    schema: &EditionSchema,
) -> GribResult<Option<Value>> {
    match derivation {
        Derivation::ShortName => {
            let (Some(d), Some(c), Some(n)) = (
                tree_long(tree, "discipline"),
                tree_long(tree, "parameterCategory"),
                tree_long(tree, "parameterNumber"),
            ) else {
                return Ok(None);
            };
            Ok(Some(Value::String(
                schema.parameter_name(d as u8, c as u8, n as u8),
            )))
        }
        Derivation::Level => {
            let Some(scaled) = tree_long(tree, "scaledValueOfFirstFixedSurface") else {
                return Ok(None);
            };
            let surface = tree_long(tree, "typeOfFirstFixedSurface").unwrap_or(255);
            let scale_factor = tree_long(tree, "scaleFactorOfFirstFixedSurface").unwrap_or(0);

            let mut level = scaled;
            // Positive scale factors divide; negative multiply.
            if scale_factor > 0 {
                level /= 10i64.pow(scale_factor.min(18) as u32);
            } else if scale_factor < 0 {
                level = level.saturating_mul(10i64.pow((-scale_factor).min(18) as u32));
            }
            // Isobaric surfaces are coded in Pa but conventionally
            // addressed in mb.
            if surface == 100 {
                level /= 100;
            }
            Ok(Some(Value::Long(level)))
        }
        Derivation::LevelDescription => {
            let Some(surface) = tree_long(tree, "typeOfFirstFixedSurface") else {
                return Ok(None);
            };
            let level = tree_long(tree, "level").unwrap_or(0);
            Ok(Some(Value::String(
                schema.level_description(surface as u8, level),
            )))
        }
        Derivation::ReferenceTime => Ok(reference_time(tree)?.map(|t| Value::String(t.to_rfc3339()))),
        Derivation::DataDate => {
            let (Some(y), Some(m), Some(d)) = (
                tree_long(tree, "year"),
                tree_long(tree, "month"),
                tree_long(tree, "day"),
            ) else {
                return Ok(None);
            };
            Ok(Some(Value::Long(y * 10000 + m * 100 + d)))
        }
        Derivation::DataTime => {
            let (Some(h), Some(min)) = (tree_long(tree, "hour"), tree_long(tree, "minute")) else {
                return Ok(None);
            };
            Ok(Some(Value::Long(h * 100 + min)))
        }
        Derivation::Values => decode_values(tree, data, directory),
    }
}

fn reference_time(tree: &AccessorTree) -> GribResult<Option<DateTime<Utc>>> {
    let (Some(year), Some(month), Some(day)) = (
        tree_long(tree, "year"),
        tree_long(tree, "month"),
        tree_long(tree, "day"),
    ) else {
        return Ok(None);
    };
    let hour = tree_long(tree, "hour").unwrap_or(0);
    let minute = tree_long(tree, "minute").unwrap_or(0);
    let second = tree_long(tree, "second").unwrap_or(0);

    let naive = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| {
            GribError::Malformed(format!(
                "invalid reference time {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ))
        })?;

    Ok(Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)))
}

fn decode_values(
    tree: &AccessorTree,
    data: &[u8],
    directory: &SectionDirectory,
) -> GribResult<Option<Value>> {
    let Some((data_start, data_len)) = directory.section(7) else {
        return Ok(None);
    };
    match directory.template(5) {
        Some(0) => {}
        other => {
            debug!(template = ?other, "Unsupported data representation, skipping values");
            return Ok(None);
        }
    }

    let (Some(num_points), Some(bits)) = (
        tree_long(tree, "numberOfValues"),
        tree_long(tree, "bitsPerValue"),
    ) else {
        return Ok(None);
    };
    let reference_value = tree_double(tree, "referenceValue").unwrap_or(0.0);
    let binary_scale = tree_long(tree, "binaryScaleFactor").unwrap_or(0) as i32;
    let decimal_scale = tree_long(tree, "decimalScaleFactor").unwrap_or(0) as i32;

    let bitmap = match (tree_long(tree, "bitMapIndicator"), directory.section(6)) {
        (Some(0), Some((start, len))) if len > 6 => Some(&data[start + 6..start + len]),
        _ => None,
    };

    let packed = &data[data_start + 5..data_start + data_len];
    let values = unpack_simple(
        packed,
        num_points as usize,
        bits as u8,
        reference_value,
        binary_scale,
        decimal_scale,
        bitmap,
    )?;

    Ok(Some(Value::DoubleArray(values)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{KeySchema, StandardTables};

    /// Minimal edition-2 message: indicator, one identification
    /// section, end marker.
    fn tiny_message() -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(b"GRIB");
        msg.extend_from_slice(&[0, 0]);
        msg.push(0); // discipline
        msg.push(2); // edition
        msg.extend_from_slice(&0u64.to_be_bytes()); // patched below

        // Section 1, 21 bytes
        msg.extend_from_slice(&21u32.to_be_bytes());
        msg.push(1);
        msg.extend_from_slice(&7u16.to_be_bytes()); // centre
        msg.extend_from_slice(&3u16.to_be_bytes()); // subCentre
        msg.extend_from_slice(&[2, 1, 1]); // tables, local tables, significance
        msg.extend_from_slice(&2025u16.to_be_bytes());
        msg.extend_from_slice(&[12, 10, 12, 0, 0]); // month day hour minute second
        msg.extend_from_slice(&[0, 1]); // production status, data type

        msg.extend_from_slice(b"7777");
        let total = msg.len() as u64;
        msg[8..16].copy_from_slice(&total.to_be_bytes());
        msg
    }

    fn schema_with_duplicate_key() -> Arc<StandardTables> {
        use grib_common::ValueKind::Long;

        let mut tables = StandardTables::new();
        let mut schema = EditionSchema::new(2);
        schema.push_key(KeySchema::coded("edition", Long, 0, 7, 1).read_only());
        // Same name, two different coded fields: centre then subCentre.
        schema.push_key(KeySchema::coded("K", Long, 1, 5, 2));
        schema.push_key(KeySchema::coded("K", Long, 1, 7, 2));
        tables.set_edition(schema);
        Arc::new(tables)
    }

    #[test]
    fn test_decode_tiny_message_with_standard_tables() {
        let handle = MessageHandle::from_message_copy(
            DecodeContext::shared(),
            Arc::new(StandardTables::new()),
            &tiny_message(),
        )
        .unwrap();

        assert_eq!(handle.get_long("edition").unwrap(), 2);
        assert_eq!(handle.get_long("centre").unwrap(), 7);
        assert_eq!(handle.get_long("dataDate").unwrap(), 20251210);
        assert_eq!(handle.get_long("dataTime").unwrap(), 1200);
        assert_eq!(handle.get_string("identifier").unwrap(), "GRIB");
        // No grid/product sections in this message.
        assert!(matches!(
            handle.get_long("Ni"),
            Err(GribError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_last_entry_wins_for_duplicate_names() {
        let handle = MessageHandle::from_message_copy(
            DecodeContext::shared(),
            schema_with_duplicate_key(),
            &tiny_message(),
        )
        .unwrap();

        // First K decodes centre (7), second decodes subCentre (3);
        // lookup resolves to the later entry.
        assert_eq!(handle.get_long("K").unwrap(), 3);
        assert_eq!(handle.get_size("K").unwrap(), 2);
    }

    #[test]
    fn test_unsupported_edition_without_schema() {
        let mut tables = StandardTables::new();
        let mut data = tiny_message();
        data[7] = 1;
        // Patch an edition-1 style length so scanning-level checks pass.
        data[4..7].copy_from_slice(&[0, 0, 41]);

        tables.set_edition(EditionSchema::new(9)); // irrelevant edition
        let err = MessageHandle::from_message_copy(
            DecodeContext::shared(),
            Arc::new(tables),
            &data,
        )
        .unwrap_err();
        assert!(matches!(err, GribError::UnsupportedEdition(1)));
    }

    #[test]
    fn test_trailing_bytes_rejected_by_default() {
        let mut data = tiny_message();
        data.extend_from_slice(b"junk");

        let err = MessageHandle::from_message_copy(
            DecodeContext::shared(),
            Arc::new(StandardTables::new()),
            &data,
        )
        .unwrap_err();
        assert!(matches!(err, GribError::Malformed(_)));
    }

    #[test]
    fn test_trailing_bytes_tolerated_with_multi_field_support() {
        let mut data = tiny_message();
        data.extend_from_slice(b"junk");

        let ctx = Arc::new(DecodeContext {
            multi_field_support: true,
            ..DecodeContext::default()
        });
        let handle =
            MessageHandle::from_message(ctx, Arc::new(StandardTables::new()), Bytes::from(data))
                .unwrap();
        assert_eq!(handle.message_length(), 41);
    }

    #[test]
    fn test_set_and_get_round_trip() {
        let mut handle = MessageHandle::from_message_copy(
            DecodeContext::shared(),
            Arc::new(StandardTables::new()),
            &tiny_message(),
        )
        .unwrap();

        handle.set_long("centre", 98).unwrap();
        assert_eq!(handle.get_long("centre").unwrap(), 98);
        assert_eq!(handle.get_string("centre").unwrap(), "98");
        // The raw message is untouched.
        assert_eq!(&handle.message()[21..23], &7u16.to_be_bytes());
    }

    #[test]
    fn test_set_out_of_range_for_coded_width() {
        let mut handle = MessageHandle::from_message_copy(
            DecodeContext::shared(),
            Arc::new(StandardTables::new()),
            &tiny_message(),
        )
        .unwrap();

        // month is one coded byte.
        let err = handle.set_long("month", 300).unwrap_err();
        assert!(matches!(err, GribError::OutOfRange { bits: 8, .. }));
    }

    #[test]
    fn test_read_only_key_rejects_set() {
        let mut handle = MessageHandle::from_message_copy(
            DecodeContext::shared(),
            Arc::new(StandardTables::new()),
            &tiny_message(),
        )
        .unwrap();

        assert!(matches!(
            handle.set_long("edition", 1),
            Err(GribError::ReadOnly(_))
        ));
        assert!(matches!(
            handle.set_string("shortName", "t"),
            Err(GribError::ReadOnly(_))
        ));
    }

    #[test]
    fn test_missing_round_trip() {
        let mut handle = MessageHandle::from_message_copy(
            DecodeContext::shared(),
            Arc::new(StandardTables::new()),
            &tiny_message(),
        )
        .unwrap();

        assert!(!handle.is_missing("centre").unwrap());
        handle.set_missing("centre").unwrap();
        assert!(handle.is_missing("centre").unwrap());
        assert!(matches!(
            handle.get_long("centre"),
            Err(GribError::WrongConversion { .. })
        ));
    }

    #[test]
    fn test_try_clone_is_fresh() {
        let mut handle = MessageHandle::from_message_copy(
            DecodeContext::shared(),
            Arc::new(StandardTables::new()),
            &tiny_message(),
        )
        .unwrap();
        handle.set_long("centre", 98).unwrap();

        // The clone re-decodes from the raw bytes, not the mutated tree.
        let clone = handle.try_clone().unwrap();
        assert_eq!(clone.get_long("centre").unwrap(), 7);
    }

    #[test]
    fn test_capacity_negotiation_for_strings() {
        let handle = MessageHandle::from_message_copy(
            DecodeContext::shared(),
            Arc::new(StandardTables::new()),
            &tiny_message(),
        )
        .unwrap();

        let needed = handle.get_length("identifier").unwrap();
        assert_eq!(needed, 4);

        let mut small = [0u8; 2];
        assert!(matches!(
            handle.get_string_into("identifier", &mut small),
            Err(GribError::BufferTooSmall { needed: 4, .. })
        ));

        let mut big = [0u8; 8];
        let written = handle.get_string_into("identifier", &mut big).unwrap();
        assert_eq!(&big[..written], b"GRIB");
    }

    #[test]
    fn test_sign_magnitude_decoding() {
        assert_eq!(sign_magnitude(&[0x00, 0x00, 0x03, 0xE8]), 1000);
        assert_eq!(sign_magnitude(&[0x80, 0x00, 0x03, 0xE8]), -1000);
        assert_eq!(sign_magnitude(&[0x80, 0x00]), 0);
        assert_eq!(sign_magnitude(&[0x7F, 0xFF]), 32767);
    }
}
