use crate::bytemap::ByteMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp type (nanoseconds since epoch).
pub type Timestamp = u64;

/// Value type for measured fields.
pub type Value = f64;

/// Dimension map as submitted by producers.
pub type Dims = BTreeMap<String, Scalar>;

/// Value map as submitted by producers.
pub type Vals = BTreeMap<String, Value>;

/// A dimension value or the result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Scalar {
    #[default]
    Null,
    Bool(bool),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, used in type errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "bool",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "string",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Float(v as f64)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Float(v as f64)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// Represents a single point received via the submission API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: Timestamp,
    pub dims: Dims,
    pub vals: Vals,
}

/// Durable position in a stream's append log.
///
/// Offsets name the byte position just past a record, so resuming a reader at a
/// record's offset continues with the following record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct LogOffset(pub u64);

impl fmt::Display for LogOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Timestamp plus measured values for one accepted point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsParams {
    pub timestamp: Timestamp,
    pub values: ByteMap,
}

/// Structured record handed to the row store for every accepted point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRecord {
    pub key: ByteMap,
    pub params: TsParams,
    pub dims: ByteMap,
    pub offset: LogOffset,
}

/// Per-table ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Points emitted to the row store.
    pub inserted_points: u64,
    /// Points rejected by the table's WHERE filter.
    pub filtered_points: u64,
    /// Points older than the table's retention window.
    pub skipped_points: u64,
    /// Points handed to the filter/insert stage.
    pub queued_points: u64,
}
