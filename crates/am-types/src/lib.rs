#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declared type of an array attribute, as named by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    Bool,
    Char,
    Int8,
    Int16,
    Int32,
    Int64,
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "uint32")]
    UInt32,
    #[serde(rename = "uint64")]
    UInt64,
    Float,
    Double,
    String,
    Datetime,
}

impl AttrType {
    pub const ALL: [Self; 14] = [
        Self::Bool,
        Self::Char,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Float,
        Self::Double,
        Self::String,
        Self::Datetime,
    ];

    /// Whether values of this type can become a join dimension as-is,
    /// without building a surrogate index first.
    #[must_use]
    pub fn is_integer_like(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Char => "char",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Datetime => "datetime",
        }
    }

    fn integer_range(self) -> Option<(i128, i128)> {
        let range = match self {
            Self::Int8 => (i128::from(i8::MIN), i128::from(i8::MAX)),
            Self::Int16 => (i128::from(i16::MIN), i128::from(i16::MAX)),
            Self::Int32 => (i128::from(i32::MIN), i128::from(i32::MAX)),
            Self::Int64 | Self::Datetime => (i128::from(i64::MIN), i128::from(i64::MAX)),
            Self::UInt8 => (0, i128::from(u8::MAX)),
            Self::UInt16 => (0, i128::from(u16::MAX)),
            Self::UInt32 => (0, i128::from(u32::MAX)),
            Self::UInt64 => (0, i128::from(i64::MAX)),
            _ => return None,
        };
        Some(range)
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttrType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.name() == lowered)
            .ok_or_else(|| TypeError::UnknownType {
                name: s.trim().to_owned(),
            })
    }
}

/// A single cell value.
///
/// Values carry a total order (null first, floats by `total_cmp`) so that the
/// engine can sort and deduplicate any column, including key columns that are
/// turned into surrogate indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// NaN floats compare equal to themselves in the total order but never
    /// match as join keys.
    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Float64(v) if v.is_nan())
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int64(_) => "int64",
            Self::Float64(_) => "float64",
            Self::Utf8(_) => "utf8",
        }
    }

    /// Check that this value may be stored in a column of `attr_type`.
    pub fn check_conforms(&self, attr_type: AttrType, not_null: bool) -> Result<(), TypeError> {
        let ok = match (self, attr_type) {
            (Self::Null, _) => {
                if not_null {
                    return Err(TypeError::NullInNotNull { attr_type });
                }
                true
            }
            (Self::Bool(_), AttrType::Bool) => true,
            (Self::Int64(v), t) => match t.integer_range() {
                Some((lo, hi)) => {
                    let wide = i128::from(*v);
                    if wide < lo || wide > hi {
                        return Err(TypeError::OutOfRange {
                            value: *v,
                            attr_type,
                        });
                    }
                    true
                }
                None => false,
            },
            (Self::Float64(_), AttrType::Float | AttrType::Double) => true,
            (Self::Utf8(s), AttrType::Char) => s.chars().count() == 1,
            (Self::Utf8(_), AttrType::String) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(TypeError::NonConforming {
                value: self.to_string(),
                attr_type,
            })
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int64(_) => 2,
            Self::Float64(_) => 3,
            Self::Utf8(_) => 4,
        }
    }
}

/// `-0.0` folds onto `0.0`; every other float keeps its bits.
fn canonical_f64(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => {
                canonical_f64(*a).total_cmp(&canonical_f64(*b))
            }
            (Self::Utf8(a), Self::Utf8(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => canonical_f64(*v).to_bits().hash(state),
            Self::Utf8(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown attribute type {name:?}")]
    UnknownType { name: String },
    #[error("value {value} cannot be stored as {attr_type}")]
    NonConforming { value: String, attr_type: AttrType },
    #[error("value {value} is out of range for {attr_type}")]
    OutOfRange { value: i64, attr_type: AttrType },
    #[error("null value in NOT NULL {attr_type} column")]
    NullInNotNull { attr_type: AttrType },
}
