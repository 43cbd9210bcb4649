//! Typed key values.
//!
//! Every key reachable on a message handle or stored in an index
//! dictionary carries one of these values. Kinds are determined at
//! runtime by the decode schema, so the value is a tagged union rather
//! than a per-key generated type.

use serde::Serialize;
use std::fmt;

/// Sentinel surfaced for missing long values in flat typed output.
pub const MISSING_LONG: i64 = i64::MAX;

/// Sentinel surfaced for missing double values in flat typed output.
pub const MISSING_DOUBLE: f64 = 9999.0;

/// The native or declared type of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Long,
    Double,
    String,
    Bytes,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Long => "long",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
        }
    }

    /// Parse a key type suffix as used in index key lists
    /// (`level:l`, `shortName:s`). `l` and `i` both mean long.
    pub fn from_suffix(suffix: &str) -> Option<ValueKind> {
        match suffix {
            "l" | "i" => Some(ValueKind::Long),
            "d" => Some(ValueKind::Double),
            "s" => Some(ValueKind::String),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed key value, scalar or array, with a kind-carrying missing
/// sentinel.
///
/// A `Missing` value never compares equal to any real value, so
/// dictionary deduplication keeps missing entries separate from
/// legitimate data.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    LongArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
    Missing(ValueKind),
}

impl Value {
    /// The element kind of this value (arrays report their element kind,
    /// missing values report the kind they stand in for).
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Long(_) | Value::LongArray(_) => ValueKind::Long,
            Value::Double(_) | Value::DoubleArray(_) => ValueKind::Double,
            Value::String(_) | Value::StringArray(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Missing(k) => *k,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Value::LongArray(_) | Value::DoubleArray(_) | Value::StringArray(_)
        )
    }

    /// Number of elements carried: 1 for scalars, the array length for
    /// arrays, 0 for missing.
    pub fn element_count(&self) -> usize {
        match self {
            Value::LongArray(v) => v.len(),
            Value::DoubleArray(v) => v.len(),
            Value::StringArray(v) => v.len(),
            Value::Missing(_) => 0,
            _ => 1,
        }
    }

    /// Coerce to a long. Doubles truncate toward zero (lossy); strings
    /// are parsed. Returns `None` when the conversion is undefined:
    /// non-numeric strings, bytes, missing values, and arrays with more
    /// than one element.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            Value::Double(v) if v.is_finite() => Some(*v as i64),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
            }
            Value::LongArray(v) if v.len() == 1 => Some(v[0]),
            Value::DoubleArray(v) if v.len() == 1 && v[0].is_finite() => Some(v[0] as i64),
            _ => None,
        }
    }

    /// Coerce to a double. Longs convert exactly for magnitudes below
    /// 2^53; strings are parsed.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::LongArray(v) if v.len() == 1 => Some(v[0] as f64),
            Value::DoubleArray(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// Coerce to a string. Numerics format canonically (`42`, `850.5`).
    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Long(v) => Some(v.to_string()),
            Value::Double(v) => Some(v.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::LongArray(v) if v.len() == 1 => Some(v[0].to_string()),
            Value::DoubleArray(v) if v.len() == 1 => Some(v[0].to_string()),
            Value::StringArray(v) if v.len() == 1 => Some(v[0].clone()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::LongArray(v) => write!(f, "<{} longs>", v.len()),
            Value::DoubleArray(v) => write!(f, "<{} doubles>", v.len()),
            Value::StringArray(v) => write!(f, "<{} strings>", v.len()),
            Value::Missing(k) => write!(f, "<missing {}>", k),
        }
    }
}

// Doubles compare by bit pattern so Value is usable as a dictionary
// entry without ordering hacks. Missing equals only missing of the
// same kind, never a real value.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::LongArray(a), Value::LongArray(b)) => a == b,
            (Value::DoubleArray(a), Value::DoubleArray(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Value::StringArray(a), Value::StringArray(b)) => a == b,
            (Value::Missing(a), Value::Missing(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_to_double_exact() {
        assert_eq!(Value::Long(850).as_double(), Some(850.0));
    }

    #[test]
    fn test_double_to_long_truncates() {
        assert_eq!(Value::Double(2.9).as_long(), Some(2));
        assert_eq!(Value::Double(-2.9).as_long(), Some(-2));
        assert_eq!(Value::Double(f64::NAN).as_long(), None);
    }

    #[test]
    fn test_numeric_to_string() {
        assert_eq!(Value::Long(42).as_string().as_deref(), Some("42"));
        assert_eq!(Value::Double(0.5).as_string().as_deref(), Some("0.5"));
    }

    #[test]
    fn test_string_to_numeric() {
        assert_eq!(Value::String("850".into()).as_long(), Some(850));
        assert_eq!(Value::String(" 850.5 ".into()).as_double(), Some(850.5));
        assert_eq!(Value::String("not a number".into()).as_long(), None);
        assert_eq!(Value::String("t".into()).as_double(), None);
    }

    #[test]
    fn test_missing_never_equals_real() {
        assert_ne!(Value::Missing(ValueKind::Long), Value::Long(0));
        assert_ne!(Value::Missing(ValueKind::Double), Value::Double(0.0));
        assert_eq!(
            Value::Missing(ValueKind::Long),
            Value::Missing(ValueKind::Long)
        );
        assert_ne!(
            Value::Missing(ValueKind::Long),
            Value::Missing(ValueKind::Double)
        );
    }

    #[test]
    fn test_missing_coerces_to_nothing() {
        let m = Value::Missing(ValueKind::Long);
        assert_eq!(m.as_long(), None);
        assert_eq!(m.as_double(), None);
        assert_eq!(m.as_string(), None);
    }

    #[test]
    fn test_double_equality_by_bits() {
        assert_eq!(Value::Double(850.0), Value::Double(850.0));
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
        // NaN is equal to itself under bit equality, so it can live in a
        // dictionary.
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
    }

    #[test]
    fn test_single_element_array_coerces() {
        assert_eq!(Value::LongArray(vec![7]).as_long(), Some(7));
        assert_eq!(Value::DoubleArray(vec![1.5, 2.5]).as_double(), None);
    }

    #[test]
    fn test_kind_suffix_parsing() {
        assert_eq!(ValueKind::from_suffix("l"), Some(ValueKind::Long));
        assert_eq!(ValueKind::from_suffix("i"), Some(ValueKind::Long));
        assert_eq!(ValueKind::from_suffix("d"), Some(ValueKind::Double));
        assert_eq!(ValueKind::from_suffix("s"), Some(ValueKind::String));
        assert_eq!(ValueKind::from_suffix("x"), None);
    }

    #[test]
    fn test_element_count() {
        assert_eq!(Value::Long(1).element_count(), 1);
        assert_eq!(Value::DoubleArray(vec![1.0, 2.0, 3.0]).element_count(), 3);
        assert_eq!(Value::Missing(ValueKind::Double).element_count(), 0);
    }
}
