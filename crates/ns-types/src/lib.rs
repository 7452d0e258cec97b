#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Calendar instant stored by timestamp columns. Equality is instant equality.
pub type Timestamp = DateTime<Utc>;

/// The closed set of element types a column may hold.
///
/// The serde names double as the rendering tag vocabulary, so the textual
/// form written by `Type: <tag>` lines and the fixture format never drift
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float64,
    Float32,
    Int64,
    Int32,
    Int16,
    Int8,
    UInt64,
    #[serde(rename = "string")]
    Utf8,
    Timestamp,
}

impl DType {
    pub const ALL: [Self; 9] = [
        Self::Float64,
        Self::Float32,
        Self::Int64,
        Self::Int32,
        Self::Int16,
        Self::Int8,
        Self::UInt64,
        Self::Utf8,
        Self::Timestamp,
    ];

    /// Stable tag written in rendered headers.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Float64 => "float64",
            Self::Float32 => "float32",
            Self::Int64 => "int64",
            Self::Int32 => "int32",
            Self::Int16 => "int16",
            Self::Int8 => "int8",
            Self::UInt64 => "uint64",
            Self::Utf8 => "string",
            Self::Timestamp => "timestamp",
        }
    }

    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float64 | Self::Float32)
    }

    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int64 | Self::Int32 | Self::Int16 | Self::Int8 | Self::UInt64
        )
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.is_float() || self.is_integer()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DType {
    type Err = TypeError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|dtype| dtype.tag() == tag)
            .ok_or_else(|| TypeError::UnknownDType {
                tag: tag.to_owned(),
            })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown dtype tag {tag:?}")]
    UnknownDType { tag: String },
    #[error("unknown time unit duration {unit:?}")]
    UnknownUnit { unit: String },
}

/// A single owned element of one of the nine supported element types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    Float64(f64),
    Float32(f32),
    Int64(i64),
    Int32(i32),
    Int16(i16),
    Int8(i8),
    UInt64(u64),
    #[serde(rename = "string")]
    Utf8(String),
    Timestamp(Timestamp),
}

impl Scalar {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Float64(_) => DType::Float64,
            Self::Float32(_) => DType::Float32,
            Self::Int64(_) => DType::Int64,
            Self::Int32(_) => DType::Int32,
            Self::Int16(_) => DType::Int16,
            Self::Int8(_) => DType::Int8,
            Self::UInt64(_) => DType::UInt64,
            Self::Utf8(_) => DType::Utf8,
            Self::Timestamp(_) => DType::Timestamp,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float64(v) => f.write_str(&format_f64(*v)),
            Self::Float32(v) => f.write_str(&format_f32(*v)),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Utf8(v) => f.write_str(v),
            Self::Timestamp(v) => f.write_str(&format_timestamp(v)),
        }
    }
}

// ── Canonical text forms ───────────────────────────────────────────────

// Magnitudes outside [1e-4, 1e21) switch to exponent notation.
const EXP_LOW: f64 = 1e-4;
const EXP_HIGH: f64 = 1e21;

fn wants_exponent(magnitude: f64) -> bool {
    magnitude != 0.0 && magnitude.is_finite() && !(EXP_LOW..EXP_HIGH).contains(&magnitude)
}

/// Shortest round-trip decimal text for an `f64`.
#[must_use]
pub fn format_f64(value: f64) -> String {
    if wants_exponent(value.abs()) {
        format!("{value:e}")
    } else {
        format!("{value}")
    }
}

/// Shortest round-trip decimal text for an `f32`, judged at `f32` precision.
#[must_use]
pub fn format_f32(value: f32) -> String {
    if wants_exponent(f64::from(value.abs())) {
        format!("{value:e}")
    } else {
        format!("{value}")
    }
}

/// RFC 3339 in UTC with a `Z` suffix; sub-second digits only when present.
#[must_use]
pub fn format_timestamp(value: &Timestamp) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// ── Duration units ─────────────────────────────────────────────────────

const SECONDS_PER_DAY: f64 = 86_400.0;
const NANOS_PER_SECOND: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    Days,
}

impl DurationUnit {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Days => "days",
        }
    }

    fn seconds_per_unit(self) -> f64 {
        match self {
            Self::Days => SECONDS_PER_DAY,
        }
    }

    /// Convert a fractional amount of this unit into a `TimeDelta`, keeping
    /// nanosecond resolution. Returns `None` for non-finite amounts or spans
    /// chrono cannot represent.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_time_delta(self, amount: f64) -> Option<TimeDelta> {
        let seconds = amount * self.seconds_per_unit();
        if !seconds.is_finite() {
            return None;
        }
        let whole = seconds.trunc();
        if whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
            return None;
        }
        let nanos = ((seconds - whole) * NANOS_PER_SECOND).round() as i64;
        TimeDelta::try_seconds(whole as i64)?.checked_add(&TimeDelta::nanoseconds(nanos))
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DurationUnit {
    type Err = TypeError;

    fn from_str(unit: &str) -> Result<Self, Self::Err> {
        match unit {
            "days" => Ok(Self::Days),
            other => Err(TypeError::UnknownUnit {
                unit: other.to_owned(),
            }),
        }
    }
}
