//! Index build, selection, and enumeration.

use bytes::Bytes;
use grib_common::{
    DecodeContext, GribError, GribResult, MissingKeyPolicy, Value, ValueKind, MISSING_DOUBLE,
    MISSING_LONG,
};
use grib_message::{open_scanner, MessageHandle, SchemaService};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// One indexed key: name plus optionally declared kind. Without a
/// declared kind the key's native kind is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub name: String,
    pub kind: Option<ValueKind>,
}

impl KeySpec {
    pub fn new(name: &str, kind: Option<ValueKind>) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    /// Parse a key with an optional type suffix: `level:l` (long, `:i`
    /// is accepted as an alias), `referenceValue:d` (double),
    /// `shortName:s` (string).
    pub fn parse(spec: &str) -> GribResult<Self> {
        match spec.split_once(':') {
            None => Ok(Self::new(spec.trim(), None)),
            Some((name, suffix)) => {
                let kind = ValueKind::from_suffix(suffix.trim()).ok_or_else(|| {
                    GribError::InvalidType {
                        key: spec.to_string(),
                        expected: "type suffix l, i, d or s",
                        actual: "unknown suffix",
                    }
                })?;
                Ok(Self::new(name.trim(), Some(kind)))
            }
        }
    }

    /// Parse a comma-separated key list: `shortName,level:l`.
    pub fn parse_list(specs: &str) -> GribResult<Vec<Self>> {
        specs
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

/// Per-key set of distinct values in first-seen order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Dictionary {
    values: Vec<Value>,
}

impl Dictionary {
    pub(crate) fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    fn intern(&mut self, value: Value) -> u32 {
        match self.position(&value) {
            Some(ordinal) => ordinal,
            None => {
                self.values.push(value);
                (self.values.len() - 1) as u32
            }
        }
    }

    fn position(&self, value: &Value) -> Option<u32> {
        self.values.iter().position(|v| v == value).map(|i| i as u32)
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn values(&self) -> &[Value] {
        &self.values
    }
}

/// One indexed message: per-key dictionary ordinals plus its byte range
/// in the source file. Rows never retain decoded state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Row {
    pub(crate) ordinals: Vec<u32>,
    pub(crate) offset: u64,
    pub(crate) length: u64,
}

/// Per-key selection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    /// Nothing selected yet; enumeration refuses to run.
    Unset,
    /// A dictionary ordinal.
    Chosen(u32),
    /// A value outside the dictionary was selected; enumeration
    /// terminates immediately with zero rows.
    NoMatch,
}

/// Keyed index over one file of messages.
pub struct Index {
    pub(crate) context: Arc<DecodeContext>,
    pub(crate) schema: Arc<dyn SchemaService>,
    pub(crate) source: PathBuf,
    pub(crate) specs: Vec<KeySpec>,
    pub(crate) kinds: Vec<ValueKind>,
    pub(crate) dictionaries: Vec<Dictionary>,
    pub(crate) rows: Vec<Row>,
    selections: Vec<Selection>,
    cursor: usize,
    source_file: Option<File>,
    skipped_messages: usize,
}

impl Index {
    /// Build an index by scanning `path` message by message.
    ///
    /// Messages lacking one of the requested keys are skipped (and
    /// counted) under the default policy, or abort the build with
    /// `MissingKey` under [`MissingKeyPolicy::AbortBuild`]. A message
    /// that fails to decode aborts the build.
    pub fn build(
        context: Arc<DecodeContext>,
        schema: Arc<dyn SchemaService>,
        path: &Path,
        specs: Vec<KeySpec>,
    ) -> GribResult<Self> {
        if specs.is_empty() {
            return Err(GribError::MissingKey(
                "an index needs at least one key".to_string(),
            ));
        }

        let mut scanner = open_scanner(path)?;
        let mut kinds: Vec<Option<ValueKind>> = specs.iter().map(|s| s.kind).collect();
        let mut dictionaries = vec![Dictionary::default(); specs.len()];
        let mut rows = Vec::new();
        let mut skipped_messages = 0usize;

        while let Some(handle) =
            MessageHandle::next_from_reader(Arc::clone(&context), Arc::clone(&schema), &mut scanner)?
        {
            let offset = handle.message_offset().unwrap_or(0);
            let length = handle.message_length() as u64;

            // Extract every key before touching the dictionaries so a
            // skipped message leaves no partial row behind.
            let mut extracted = Vec::with_capacity(specs.len());
            let mut absent_key = None;
            for (i, spec) in specs.iter().enumerate() {
                match extract_key(&handle, &spec.name, kinds[i]) {
                    Ok((value, kind)) => {
                        kinds[i] = Some(kind);
                        extracted.push(value);
                    }
                    Err(GribError::KeyNotFound(key)) => {
                        absent_key = Some(key);
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }

            if let Some(key) = absent_key {
                match context.missing_key_policy {
                    MissingKeyPolicy::SkipMessage => {
                        skipped_messages += 1;
                        debug!(key = %key, offset, "Message lacks indexed key, skipping");
                        continue;
                    }
                    MissingKeyPolicy::AbortBuild => return Err(GribError::MissingKey(key)),
                }
            }

            let ordinals = extracted
                .into_iter()
                .enumerate()
                .map(|(i, value)| dictionaries[i].intern(value))
                .collect();
            rows.push(Row {
                ordinals,
                offset,
                length,
            });
        }

        info!(
            file = %path.display(),
            rows = rows.len(),
            skipped = skipped_messages,
            keys = specs.len(),
            "Built index"
        );

        let selections = vec![Selection::Unset; specs.len()];
        Ok(Self {
            context,
            schema,
            source: path.to_path_buf(),
            kinds: kinds
                .into_iter()
                .map(|k| k.unwrap_or(ValueKind::Long))
                .collect(),
            specs,
            dictionaries,
            rows,
            selections,
            cursor: 0,
            source_file: None,
            skipped_messages,
        })
    }

    pub(crate) fn from_parts(
        context: Arc<DecodeContext>,
        schema: Arc<dyn SchemaService>,
        source: PathBuf,
        specs: Vec<KeySpec>,
        kinds: Vec<ValueKind>,
        dictionaries: Vec<Dictionary>,
        rows: Vec<Row>,
    ) -> Self {
        let selections = vec![Selection::Unset; specs.len()];
        Self {
            context,
            schema,
            source,
            specs,
            kinds,
            dictionaries,
            rows,
            selections,
            cursor: 0,
            source_file: None,
            skipped_messages: 0,
        }
    }

    // === Introspection ===

    pub fn key_specs(&self) -> &[KeySpec] {
        &self.specs
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Messages dropped during the build because an indexed key was
    /// absent.
    pub fn skipped_messages(&self) -> usize {
        self.skipped_messages
    }

    fn spec_index(&self, key: &str) -> GribResult<usize> {
        self.specs
            .iter()
            .position(|s| s.name == key)
            .ok_or_else(|| GribError::KeyNotFound(key.to_string()))
    }

    /// The kind values of this key are stored as.
    pub fn kind(&self, key: &str) -> GribResult<ValueKind> {
        Ok(self.kinds[self.spec_index(key)?])
    }

    /// Number of distinct values observed for the key.
    pub fn size(&self, key: &str) -> GribResult<usize> {
        Ok(self.dictionaries[self.spec_index(key)?].len())
    }

    /// Distinct values for the key, in first-seen order.
    pub fn values(&self, key: &str) -> GribResult<&[Value]> {
        Ok(self.dictionaries[self.spec_index(key)?].values())
    }

    // === Typed distinct-value queries ===

    pub fn long_values(&self, key: &str) -> GribResult<Vec<i64>> {
        let i = self.typed_index(key, ValueKind::Long)?;
        Ok(self.dictionaries[i]
            .values()
            .iter()
            .map(|v| v.as_long().unwrap_or(MISSING_LONG))
            .collect())
    }

    pub fn double_values(&self, key: &str) -> GribResult<Vec<f64>> {
        let i = self.typed_index(key, ValueKind::Double)?;
        Ok(self.dictionaries[i]
            .values()
            .iter()
            .map(|v| v.as_double().unwrap_or(MISSING_DOUBLE))
            .collect())
    }

    pub fn string_values(&self, key: &str) -> GribResult<Vec<String>> {
        let i = self.typed_index(key, ValueKind::String)?;
        Ok(self.dictionaries[i]
            .values()
            .iter()
            .map(|v| v.as_string().unwrap_or_default())
            .collect())
    }

    /// Copy the key's distinct long values into a caller slice,
    /// returning the count written. Fails `ArrayTooSmall` without
    /// writing when the slice is short; query [`size`](Self::size)
    /// first.
    pub fn long_values_into(&self, key: &str, out: &mut [i64]) -> GribResult<usize> {
        let values = self.long_values(key)?;
        copy_into(&values, out)
    }

    pub fn double_values_into(&self, key: &str, out: &mut [f64]) -> GribResult<usize> {
        let values = self.double_values(key)?;
        copy_into(&values, out)
    }

    pub fn string_values_into(&self, key: &str, out: &mut [String]) -> GribResult<usize> {
        let values = self.string_values(key)?;
        if out.len() < values.len() {
            return Err(GribError::ArrayTooSmall {
                needed: values.len(),
                capacity: out.len(),
            });
        }
        let count = values.len();
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = value;
        }
        Ok(count)
    }

    fn typed_index(&self, key: &str, requested: ValueKind) -> GribResult<usize> {
        let i = self.spec_index(key)?;
        if self.kinds[i] != requested {
            return Err(GribError::InvalidType {
                key: key.to_string(),
                expected: self.kinds[i].as_str(),
                actual: requested.as_str(),
            });
        }
        Ok(i)
    }

    // === Selection ===

    /// Select the subset of rows where `key` equals `value`, rewinding
    /// the enumeration cursor.
    ///
    /// A value absent from the key's dictionary fails `KeyNotFound` and
    /// poisons the selection: enumeration afterwards terminates
    /// immediately with `EndOfIndex` instead of erroring.
    pub fn select(&mut self, key: &str, value: Value) -> GribResult<()> {
        let i = self.spec_index(key)?;
        let kind = self.kinds[i];

        // Any selection change restarts enumeration from the top.
        self.cursor = 0;

        let coerced = coerce_to_kind(&value, kind).ok_or_else(|| GribError::WrongConversion {
            key: key.to_string(),
            from: if value.is_missing() {
                "missing"
            } else {
                value.kind().as_str()
            },
            to: kind.as_str(),
        })?;

        match self.dictionaries[i].position(&coerced) {
            Some(ordinal) => {
                self.selections[i] = Selection::Chosen(ordinal);
                debug!(key = %key, value = %coerced, ordinal, "Selected index value");
                Ok(())
            }
            None => {
                self.selections[i] = Selection::NoMatch;
                Err(GribError::KeyNotFound(format!("{}={}", key, coerced)))
            }
        }
    }

    pub fn select_long(&mut self, key: &str, value: i64) -> GribResult<()> {
        self.select(key, Value::Long(value))
    }

    pub fn select_double(&mut self, key: &str, value: f64) -> GribResult<()> {
        self.select(key, Value::Double(value))
    }

    pub fn select_string(&mut self, key: &str, value: &str) -> GribResult<()> {
        self.select(key, Value::String(value.to_string()))
    }

    /// Restart enumeration without touching selections.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    // === Enumeration ===

    /// The next message matching every key's selection, re-decoded
    /// fresh from the source file.
    ///
    /// Every indexed key must have been selected, else `MissingKey`.
    /// `EndOfIndex` signals exhaustion and keeps being returned on
    /// further calls; it is a termination sentinel, not a failure.
    pub fn next_handle(&mut self) -> GribResult<MessageHandle> {
        for (i, selection) in self.selections.iter().enumerate() {
            if *selection == Selection::Unset {
                return Err(GribError::MissingKey(self.specs[i].name.clone()));
            }
        }
        if self.selections.iter().any(|s| *s == Selection::NoMatch) {
            self.cursor = self.rows.len();
            return Err(GribError::EndOfIndex);
        }

        let chosen: Vec<u32> = self
            .selections
            .iter()
            .map(|s| match s {
                Selection::Chosen(ordinal) => *ordinal,
                _ => unreachable!("checked above"),
            })
            .collect();

        while self.cursor < self.rows.len() {
            let row = &self.rows[self.cursor];
            self.cursor += 1;
            if row.ordinals == chosen {
                let (offset, length) = (row.offset, row.length);
                return self.read_handle(offset, length);
            }
        }

        Err(GribError::EndOfIndex)
    }

    /// Iterator over matching handles, terminating on `EndOfIndex`.
    pub fn handles(&mut self) -> Handles<'_> {
        Handles { index: self }
    }

    fn read_handle(&mut self, offset: u64, length: u64) -> GribResult<MessageHandle> {
        if self.source_file.is_none() {
            let file = File::open(&self.source).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    GribError::FileNotFound(self.source.display().to_string())
                } else {
                    GribError::Io(e)
                }
            })?;
            self.source_file = Some(file);
        }

        let file = self.source_file.as_mut().expect("opened above");
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                GribError::PrematureEndOfFile
            } else {
                GribError::Io(e)
            }
        })?;

        MessageHandle::from_bytes_at_offset(
            Arc::clone(&self.context),
            Arc::clone(&self.schema),
            Bytes::from(buffer),
            offset,
        )
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("source", &self.source)
            .field("keys", &self.specs.len())
            .field("rows", &self.rows.len())
            .finish()
    }
}

/// Iterator adapter over [`Index::next_handle`].
pub struct Handles<'a> {
    index: &'a mut Index,
}

impl Iterator for Handles<'_> {
    type Item = GribResult<MessageHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.index.next_handle() {
            Err(e) if e.is_end_of_index() => None,
            other => Some(other),
        }
    }
}

/// Extract one key from a handle as the resolved kind (declared kind
/// wins over native).
fn extract_key(
    handle: &MessageHandle,
    name: &str,
    declared: Option<ValueKind>,
) -> GribResult<(Value, ValueKind)> {
    let native = handle.native_kind(name)?;
    let kind = declared.unwrap_or(native);

    if handle.is_missing(name)? {
        return Ok((Value::Missing(kind), kind));
    }

    let value = match kind {
        ValueKind::Long => Value::Long(handle.get_long(name)?),
        ValueKind::Double => Value::Double(handle.get_double(name)?),
        ValueKind::String => Value::String(handle.get_string(name)?),
        ValueKind::Bytes => Value::Bytes(handle.get_bytes(name)?.to_vec()),
    };
    Ok((value, kind))
}

fn coerce_to_kind(value: &Value, kind: ValueKind) -> Option<Value> {
    if value.is_missing() {
        return Some(Value::Missing(kind));
    }
    match kind {
        ValueKind::Long => value.as_long().map(Value::Long),
        ValueKind::Double => value.as_double().map(Value::Double),
        ValueKind::String => value.as_string().map(Value::String),
        ValueKind::Bytes => value.as_bytes().map(|b| Value::Bytes(b.to_vec())),
    }
}

fn copy_into<T: Copy>(values: &[T], out: &mut [T]) -> GribResult<usize> {
    if out.len() < values.len() {
        return Err(GribError::ArrayTooSmall {
            needed: values.len(),
            capacity: out.len(),
        });
    }
    out[..values.len()].copy_from_slice(values);
    Ok(values.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_spec_parsing() {
        assert_eq!(
            KeySpec::parse("level:l").unwrap(),
            KeySpec::new("level", Some(ValueKind::Long))
        );
        assert_eq!(
            KeySpec::parse("step:i").unwrap(),
            KeySpec::new("step", Some(ValueKind::Long))
        );
        assert_eq!(
            KeySpec::parse("referenceValue:d").unwrap(),
            KeySpec::new("referenceValue", Some(ValueKind::Double))
        );
        assert_eq!(
            KeySpec::parse("shortName:s").unwrap(),
            KeySpec::new("shortName", Some(ValueKind::String))
        );
        assert_eq!(
            KeySpec::parse("shortName").unwrap(),
            KeySpec::new("shortName", None)
        );
        assert!(KeySpec::parse("level:x").is_err());
    }

    #[test]
    fn test_key_spec_list_parsing() {
        let specs = KeySpec::parse_list("shortName, level:l").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "shortName");
        assert_eq!(specs[1].name, "level");
        assert_eq!(specs[1].kind, Some(ValueKind::Long));
    }

    #[test]
    fn test_dictionary_first_seen_order() {
        let mut dict = Dictionary::default();
        assert_eq!(dict.intern(Value::Long(850)), 0);
        assert_eq!(dict.intern(Value::Long(500)), 1);
        assert_eq!(dict.intern(Value::Long(850)), 0);
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.values()[0], Value::Long(850));
    }

    #[test]
    fn test_dictionary_missing_is_distinct() {
        let mut dict = Dictionary::default();
        dict.intern(Value::Long(0));
        dict.intern(Value::Missing(ValueKind::Long));
        assert_eq!(dict.len(), 2);
    }
}
