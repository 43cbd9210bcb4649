//! The decoded accessor tree.
//!
//! An ordered collection of named, typed entries built once per message.
//! Names are not unique; lookups resolve to the last entry with the
//! requested name. The entry list never changes after decode — sets
//! replace values in place — so key-iterator cursors stay valid for the
//! tree's lifetime.

use grib_common::{GribError, GribResult, KeyFlags, Value, ValueKind};

/// One named, typed field of a decoded message.
#[derive(Debug, Clone)]
pub struct Accessor {
    pub name: String,
    pub value: Value,
    pub native_kind: ValueKind,
    pub read_only: bool,
    pub namespace: Option<String>,
    pub flags: KeyFlags,
    /// Coded width in bits for keys backed by fixed-width message bytes.
    pub coded_bits: Option<u32>,
    /// Sign-magnitude coded keys spend one bit on the sign.
    pub signed: bool,
}

/// Ordered, possibly duplicate-named collection of accessors.
#[derive(Debug, Clone, Default)]
pub struct AccessorTree {
    entries: Vec<Accessor>,
}

impl AccessorTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append an entry. A repeated name marks the new entry as the
    /// duplicate, since it shadows the earlier one for lookups.
    pub(crate) fn push(&mut self, mut accessor: Accessor) {
        if self.entries.iter().any(|e| e.name == accessor.name) {
            accessor.flags |= KeyFlags::DUPLICATE;
        }
        self.entries.push(accessor);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Accessor] {
        &self.entries
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// The entry a lookup of `name` resolves to: the last one with that
    /// name.
    pub fn find(&self, name: &str) -> Option<&Accessor> {
        self.entries.iter().rev().find(|e| e.name == name)
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        self.entries.iter().rposition(|e| e.name == name)
    }

    /// Total element count over every entry named `name`.
    pub fn total_count(&self, name: &str) -> Option<usize> {
        let mut found = false;
        let mut total = 0;
        for e in self.entries.iter().filter(|e| e.name == name) {
            found = true;
            total += e.value.element_count();
        }
        found.then_some(total)
    }

    /// Longest string representation over every entry named `name`.
    pub fn max_string_length(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .filter(|e| e.name == name)
            .map(|e| {
                e.value
                    .as_string()
                    .map(|s| s.len())
                    .unwrap_or_else(|| e.value.to_string().len())
            })
            .max()
    }

    /// Replace the value of the last entry named `name`, coercing the
    /// incoming value to the entry's native kind.
    ///
    /// Fails without mutating anything: `ReadOnly` for read-only
    /// entries, `WrongConversion` when the coercion is undefined,
    /// `OutOfRange` when a long does not fit the entry's coded width.
    pub fn set(&mut self, name: &str, incoming: Value) -> GribResult<()> {
        let idx = self
            .find_index(name)
            .ok_or_else(|| GribError::KeyNotFound(name.to_string()))?;
        let entry = &self.entries[idx];

        if entry.read_only {
            return Err(GribError::ReadOnly(name.to_string()));
        }

        let new_value = coerce_for_entry(name, entry, incoming)?;
        self.entries[idx].value = new_value;
        Ok(())
    }

    /// Mark the last entry named `name` as missing.
    pub fn set_missing(&mut self, name: &str) -> GribResult<()> {
        let idx = self
            .find_index(name)
            .ok_or_else(|| GribError::KeyNotFound(name.to_string()))?;
        if self.entries[idx].read_only {
            return Err(GribError::ReadOnly(name.to_string()));
        }
        let kind = self.entries[idx].native_kind;
        self.entries[idx].value = Value::Missing(kind);
        Ok(())
    }
}

pub(crate) fn kind_label(value: &Value) -> &'static str {
    if value.is_missing() {
        "missing"
    } else {
        value.kind().as_str()
    }
}

fn coerce_for_entry(name: &str, entry: &Accessor, incoming: Value) -> GribResult<Value> {
    // Arrays pass through when their element kind already matches; no
    // elementwise conversion.
    if incoming.is_array() {
        if incoming.kind() == entry.native_kind {
            return Ok(incoming);
        }
        return Err(GribError::WrongConversion {
            key: name.to_string(),
            from: kind_label(&incoming),
            to: entry.native_kind.as_str(),
        });
    }

    match entry.native_kind {
        ValueKind::Long => {
            let v = incoming.as_long().ok_or_else(|| GribError::WrongConversion {
                key: name.to_string(),
                from: kind_label(&incoming),
                to: "long",
            })?;
            check_coded_range(name, entry, v)?;
            Ok(Value::Long(v))
        }
        ValueKind::Double => {
            let v = incoming
                .as_double()
                .ok_or_else(|| GribError::WrongConversion {
                    key: name.to_string(),
                    from: kind_label(&incoming),
                    to: "double",
                })?;
            Ok(Value::Double(v))
        }
        ValueKind::String => {
            let v = incoming
                .as_string()
                .ok_or_else(|| GribError::WrongConversion {
                    key: name.to_string(),
                    from: kind_label(&incoming),
                    to: "string",
                })?;
            Ok(Value::String(v))
        }
        ValueKind::Bytes => match incoming {
            Value::Bytes(b) => Ok(Value::Bytes(b)),
            other => Err(GribError::WrongConversion {
                key: name.to_string(),
                from: kind_label(&other),
                to: "bytes",
            }),
        },
    }
}

fn check_coded_range(name: &str, entry: &Accessor, value: i64) -> GribResult<()> {
    let Some(bits) = entry.coded_bits else {
        return Ok(());
    };
    let value_bits = if entry.signed { bits - 1 } else { bits };
    if value_bits >= 63 {
        return Ok(());
    }

    let max = (1i64 << value_bits) - 1;
    let min = if entry.signed { -max } else { 0 };
    if value < min || value > max {
        return Err(GribError::OutOfRange {
            key: name.to_string(),
            value,
            bits,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, value: Value, kind: ValueKind) -> Accessor {
        Accessor {
            name: name.to_string(),
            value,
            native_kind: kind,
            read_only: false,
            namespace: None,
            flags: KeyFlags::CODED,
            coded_bits: None,
            signed: false,
        }
    }

    fn tree_with(entries: Vec<Accessor>) -> AccessorTree {
        let mut tree = AccessorTree::new();
        for e in entries {
            tree.push(e);
        }
        tree
    }

    #[test]
    fn test_last_entry_wins() {
        let tree = tree_with(vec![
            entry("K", Value::Long(1), ValueKind::Long),
            entry("other", Value::Long(5), ValueKind::Long),
            entry("K", Value::Long(2), ValueKind::Long),
        ]);

        assert_eq!(tree.find("K").unwrap().value, Value::Long(2));
    }

    #[test]
    fn test_duplicate_flagging() {
        let tree = tree_with(vec![
            entry("K", Value::Long(1), ValueKind::Long),
            entry("K", Value::Long(2), ValueKind::Long),
        ]);

        let entries = tree.entries();
        assert!(!entries[0].flags.contains(KeyFlags::DUPLICATE));
        assert!(entries[1].flags.contains(KeyFlags::DUPLICATE));
    }

    #[test]
    fn test_total_count_sums_duplicates() {
        let tree = tree_with(vec![
            entry("K", Value::Long(1), ValueKind::Long),
            entry("K", Value::DoubleArray(vec![1.0, 2.0, 3.0]), ValueKind::Double),
        ]);

        assert_eq!(tree.total_count("K"), Some(4));
        assert_eq!(tree.total_count("absent"), None);
    }

    #[test]
    fn test_set_replaces_last_entry_only() {
        let mut tree = tree_with(vec![
            entry("K", Value::Long(1), ValueKind::Long),
            entry("K", Value::Long(2), ValueKind::Long),
        ]);

        tree.set("K", Value::Long(9)).unwrap();
        assert_eq!(tree.entries()[0].value, Value::Long(1));
        assert_eq!(tree.entries()[1].value, Value::Long(9));
    }

    #[test]
    fn test_set_read_only_rejected() {
        let mut acc = entry("edition", Value::Long(2), ValueKind::Long);
        acc.read_only = true;
        let mut tree = tree_with(vec![acc]);

        let err = tree.set("edition", Value::Long(1)).unwrap_err();
        assert!(matches!(err, GribError::ReadOnly(_)));
        assert_eq!(tree.find("edition").unwrap().value, Value::Long(2));
    }

    #[test]
    fn test_set_coerces_long_into_string_field() {
        let mut tree = tree_with(vec![entry("name", Value::String("x".into()), ValueKind::String)]);

        tree.set("name", Value::Long(42)).unwrap();
        assert_eq!(tree.find("name").unwrap().value, Value::String("42".into()));
    }

    #[test]
    fn test_set_non_numeric_string_into_long_field() {
        let mut tree = tree_with(vec![entry("level", Value::Long(850), ValueKind::Long)]);

        let err = tree
            .set("level", Value::String("not a number".into()))
            .unwrap_err();
        assert!(matches!(err, GribError::WrongConversion { .. }));
        // The failed set left the tree untouched.
        assert_eq!(tree.find("level").unwrap().value, Value::Long(850));
    }

    #[test]
    fn test_set_out_of_coded_range() {
        let mut acc = entry("scanningMode", Value::Long(0), ValueKind::Long);
        acc.coded_bits = Some(8);
        let mut tree = tree_with(vec![acc]);

        tree.set("scanningMode", Value::Long(255)).unwrap();
        let err = tree.set("scanningMode", Value::Long(256)).unwrap_err();
        assert!(matches!(err, GribError::OutOfRange { bits: 8, .. }));
        assert_eq!(tree.find("scanningMode").unwrap().value, Value::Long(255));
    }

    #[test]
    fn test_signed_coded_range() {
        let mut acc = entry("binaryScaleFactor", Value::Long(0), ValueKind::Long);
        acc.coded_bits = Some(16);
        acc.signed = true;
        let mut tree = tree_with(vec![acc]);

        tree.set("binaryScaleFactor", Value::Long(-32767)).unwrap();
        assert!(tree.set("binaryScaleFactor", Value::Long(40000)).is_err());
    }

    #[test]
    fn test_set_missing_and_back() {
        let mut tree = tree_with(vec![entry("level", Value::Long(850), ValueKind::Long)]);

        tree.set_missing("level").unwrap();
        assert!(tree.find("level").unwrap().value.is_missing());

        tree.set("level", Value::Long(500)).unwrap();
        assert_eq!(tree.find("level").unwrap().value, Value::Long(500));
    }

    #[test]
    fn test_set_unknown_key() {
        let mut tree = tree_with(vec![]);
        let err = tree.set("nope", Value::Long(1)).unwrap_err();
        assert!(matches!(err, GribError::KeyNotFound(_)));
    }

    #[test]
    fn test_max_string_length() {
        let tree = tree_with(vec![
            entry("K", Value::String("ab".into()), ValueKind::String),
            entry("K", Value::String("abcd".into()), ValueKind::String),
        ]);
        assert_eq!(tree.max_string_length("K"), Some(4));
    }
}
