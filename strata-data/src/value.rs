use std::borrow::Borrow;
use std::fmt;

use enum_kinds::EnumKind;
use serde::{Deserialize, Serialize};

/// Series names must be shorter than this many bytes (and non-empty).
pub const SERIES_NAME_LEN_MAX: usize = 65535;

/// A single time-series value.
///
/// A series commits to one [`ValueKind`] when it is created from its first
/// value; every later point must carry the same kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, EnumKind)]
#[enum_kind(ValueKind)]
pub enum Value {
    /// A signed 64-bit integer value.
    Int(i64),
    /// An IEEE 754 double value.
    Double(f64),
    /// An opaque byte-string value.
    Raw(Vec<u8>),
}

impl Value {
    /// The kind of this value, used for the per-series type check.
    pub fn kind(&self) -> ValueKind {
        ValueKind::from(self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Raw(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Raw(b.to_vec())
    }
}

/// One (timestamp, value) pair within a series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Timestamp in the database's configured precision.
    pub ts: u64,
    /// The value recorded at `ts`.
    pub value: Value,
}

impl Point {
    pub fn new(ts: u64, value: impl Into<Value>) -> Self {
        Point {
            ts,
            value: value.into(),
        }
    }
}

/// The name of a series. Identity of a series is its name.
///
/// Names are byte strings, not necessarily UTF-8. A valid name is non-empty
/// and shorter than [`SERIES_NAME_LEN_MAX`] bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesName(Vec<u8>);

impl SeriesName {
    /// Whether `name` satisfies the series naming rules.
    pub fn is_valid(name: &[u8]) -> bool {
        !name.is_empty() && name.len() < SERIES_NAME_LEN_MAX
    }

    /// Construct a name from raw bytes, returning `None` if the bytes break
    /// the naming rules.
    pub fn new(name: &[u8]) -> Option<Self> {
        Self::is_valid(name).then(|| SeriesName(name.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for SeriesName {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for SeriesName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for SeriesName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeriesName({})", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for SeriesName {
    fn from(s: &str) -> Self {
        SeriesName(s.as_bytes().to_vec())
    }
}
