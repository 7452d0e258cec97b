#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::ops::Range;

use log::{debug, trace};
use ns_types::{
    DType, DurationUnit, Scalar, Timestamp, TypeError, format_f32, format_f64, format_timestamp,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColumnError {
    #[error("{operation} is not defined for dtype {dtype}")]
    UnsupportedType {
        dtype: DType,
        operation: &'static str,
    },
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("duration at index {index} does not produce a representable timestamp")]
    TimestampOutOfRange { index: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Format(#[from] fmt::Error),
}

// ── Missing-value mask ─────────────────────────────────────────────────

/// Packed per-element missing flags. A set bit means the value at that
/// position is missing and its stored value carries no meaning.
#[derive(Debug, Clone, Eq)]
pub struct MissingMask {
    words: Vec<u64>,
    len: usize,
}

impl MissingMask {
    #[must_use]
    pub fn from_bools(bits: &[bool]) -> Self {
        let len = bits.len();
        let mut words = vec![0_u64; len.div_ceil(64)];
        for (idx, &missing) in bits.iter().enumerate() {
            if missing {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Self { words, len }
    }

    #[must_use]
    pub fn none_missing(len: usize) -> Self {
        Self {
            words: vec![0_u64; len.div_ceil(64)],
            len,
        }
    }

    /// Flag at `idx`, or `None` past the end of the mask.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<bool> {
        (idx < self.len).then(|| (self.words[idx / 64] >> (idx % 64)) & 1 == 1)
    }

    /// Like [`MissingMask::get`], but positions past the end read as present.
    #[must_use]
    pub fn is_missing(&self, idx: usize) -> bool {
        self.get(idx).unwrap_or(false)
    }

    pub fn set(&mut self, idx: usize, missing: bool) {
        if idx >= self.len {
            return;
        }
        if missing {
            self.words[idx / 64] |= 1_u64 << (idx % 64);
        } else {
            self.words[idx / 64] &= !(1_u64 << (idx % 64));
        }
    }

    #[must_use]
    pub fn count_missing(&self) -> usize {
        // Bits past `len` are never set.
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.is_missing(idx))
    }

    /// Copy of this mask truncated or padded (with present flags) to `len`.
    #[must_use]
    pub fn resized(&self, len: usize) -> Self {
        let mut out = Self::none_missing(len);
        for idx in 0..len.min(self.len) {
            if self.is_missing(idx) {
                out.set(idx, true);
            }
        }
        out
    }
}

impl From<Vec<bool>> for MissingMask {
    fn from(bits: Vec<bool>) -> Self {
        Self::from_bools(&bits)
    }
}

impl From<&[bool]> for MissingMask {
    fn from(bits: &[bool]) -> Self {
        Self::from_bools(bits)
    }
}

impl PartialEq for MissingMask {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.bits().eq(other.bits())
    }
}

impl Serialize for MissingMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.bits())
    }
}

impl<'de> Deserialize<'de> for MissingMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = Vec::<bool>::deserialize(deserializer)?;
        Ok(Self::from(bits))
    }
}

// ── Typed buffers ──────────────────────────────────────────────────────

/// The element buffer of a column: exactly one of the nine supported
/// element types. Every operation matches on this enum, so adding or
/// removing a variant is a compiler-checked change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "data", rename_all = "lowercase")]
pub enum ColumnValues {
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    Int64(Vec<i64>),
    Int32(Vec<i32>),
    Int16(Vec<i16>),
    Int8(Vec<i8>),
    UInt64(Vec<u64>),
    #[serde(rename = "string")]
    Utf8(Vec<String>),
    Timestamp(Vec<Timestamp>),
}

impl ColumnValues {
    /// Empty buffer of `dtype` with room for `capacity` elements.
    #[must_use]
    pub fn with_capacity(dtype: DType, capacity: usize) -> Self {
        match dtype {
            DType::Float64 => Self::Float64(Vec::with_capacity(capacity)),
            DType::Float32 => Self::Float32(Vec::with_capacity(capacity)),
            DType::Int64 => Self::Int64(Vec::with_capacity(capacity)),
            DType::Int32 => Self::Int32(Vec::with_capacity(capacity)),
            DType::Int16 => Self::Int16(Vec::with_capacity(capacity)),
            DType::Int8 => Self::Int8(Vec::with_capacity(capacity)),
            DType::UInt64 => Self::UInt64(Vec::with_capacity(capacity)),
            DType::Utf8 => Self::Utf8(Vec::with_capacity(capacity)),
            DType::Timestamp => Self::Timestamp(Vec::with_capacity(capacity)),
        }
    }

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

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float64(d) => d.len(),
            Self::Float32(d) => d.len(),
            Self::Int64(d) => d.len(),
            Self::Int32(d) => d.len(),
            Self::Int16(d) => d.len(),
            Self::Int8(d) => d.len(),
            Self::UInt64(d) => d.len(),
            Self::Utf8(d) => d.len(),
            Self::Timestamp(d) => d.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a scalar of the matching element type. On a type mismatch the
    /// scalar is handed back untouched.
    pub fn push(&mut self, value: Scalar) -> Result<(), Scalar> {
        match (self, value) {
            (Self::Float64(d), Scalar::Float64(v)) => d.push(v),
            (Self::Float32(d), Scalar::Float32(v)) => d.push(v),
            (Self::Int64(d), Scalar::Int64(v)) => d.push(v),
            (Self::Int32(d), Scalar::Int32(v)) => d.push(v),
            (Self::Int16(d), Scalar::Int16(v)) => d.push(v),
            (Self::Int8(d), Scalar::Int8(v)) => d.push(v),
            (Self::UInt64(d), Scalar::UInt64(v)) => d.push(v),
            (Self::Utf8(d), Scalar::Utf8(v)) => d.push(v),
            (Self::Timestamp(d), Scalar::Timestamp(v)) => d.push(v),
            (_, other) => return Err(other),
        }
        Ok(())
    }

    /// Stored element at `idx` regardless of missing status.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Scalar> {
        match self {
            Self::Float64(d) => d.get(idx).copied().map(Scalar::Float64),
            Self::Float32(d) => d.get(idx).copied().map(Scalar::Float32),
            Self::Int64(d) => d.get(idx).copied().map(Scalar::Int64),
            Self::Int32(d) => d.get(idx).copied().map(Scalar::Int32),
            Self::Int16(d) => d.get(idx).copied().map(Scalar::Int16),
            Self::Int8(d) => d.get(idx).copied().map(Scalar::Int8),
            Self::UInt64(d) => d.get(idx).copied().map(Scalar::UInt64),
            Self::Utf8(d) => d.get(idx).cloned().map(Scalar::Utf8),
            Self::Timestamp(d) => d.get(idx).copied().map(Scalar::Timestamp),
        }
    }

    /// Canonical text of the element at `idx`, without cloning strings.
    fn text_at(&self, idx: usize) -> Option<Cow<'_, str>> {
        let text = match self {
            Self::Float64(d) => Cow::Owned(format_f64(*d.get(idx)?)),
            Self::Float32(d) => Cow::Owned(format_f32(*d.get(idx)?)),
            Self::Int64(d) => Cow::Owned(d.get(idx)?.to_string()),
            Self::Int32(d) => Cow::Owned(d.get(idx)?.to_string()),
            Self::Int16(d) => Cow::Owned(d.get(idx)?.to_string()),
            Self::Int8(d) => Cow::Owned(d.get(idx)?.to_string()),
            Self::UInt64(d) => Cow::Owned(d.get(idx)?.to_string()),
            Self::Utf8(d) => Cow::Borrowed(d.get(idx)?.as_str()),
            Self::Timestamp(d) => Cow::Owned(format_timestamp(d.get(idx)?)),
        };
        Some(text)
    }

    /// Read the buffer as a wide floating sequence. Float64 buffers are
    /// borrowed; other numeric buffers are widened into a fresh allocation.
    #[allow(clippy::cast_precision_loss)]
    pub fn widen_to_f64(&self) -> Result<Cow<'_, [f64]>, ColumnError> {
        let widened: Vec<f64> = match self {
            Self::Float64(d) => return Ok(Cow::Borrowed(d.as_slice())),
            Self::Float32(d) => d.iter().map(|v| f64::from(*v)).collect(),
            Self::Int64(d) => d.iter().map(|v| *v as f64).collect(),
            Self::Int32(d) => d.iter().map(|v| f64::from(*v)).collect(),
            Self::Int16(d) => d.iter().map(|v| f64::from(*v)).collect(),
            Self::Int8(d) => d.iter().map(|v| f64::from(*v)).collect(),
            Self::UInt64(d) => d.iter().map(|v| *v as f64).collect(),
            Self::Utf8(_) | Self::Timestamp(_) => {
                return Err(ColumnError::UnsupportedType {
                    dtype: self.dtype(),
                    operation: "numeric widening",
                });
            }
        };
        Ok(Cow::Owned(widened))
    }
}

/// Element types a column can be built from directly. Implemented for
/// exactly the nine supported types, so any other buffer is rejected at
/// compile time.
pub trait ColumnElement: Sized {
    const DTYPE: DType;

    fn into_values(values: Vec<Self>) -> ColumnValues;
}

macro_rules! impl_column_element {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl ColumnElement for $ty {
                const DTYPE: DType = DType::$variant;

                fn into_values(values: Vec<Self>) -> ColumnValues {
                    ColumnValues::$variant(values)
                }
            }
        )+
    };
}

impl_column_element!(
    f64 => Float64,
    f32 => Float32,
    i64 => Int64,
    i32 => Int32,
    i16 => Int16,
    i8 => Int8,
    u64 => UInt64,
    String => Utf8,
    Timestamp => Timestamp,
);

impl<T: ColumnElement> From<Vec<T>> for ColumnValues {
    fn from(values: Vec<T>) -> Self {
        T::into_values(values)
    }
}

// ── Column ─────────────────────────────────────────────────────────────

/// A named, homogeneously typed, nullable one-dimensional column.
///
/// `len` is authoritative: every operation bounds its iteration by it. When
/// `missing` is `None` no position is missing and mask checks short-circuit.
/// Transforms never mutate the receiver; they either hand it back borrowed
/// or build a new column over freshly allocated storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    name: String,
    #[serde(skip)]
    len: usize,
    values: ColumnValues,
    missing: Option<MissingMask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Missingness {
    BothPresent,
    BothMissing,
    Disagree,
}

impl Column {
    /// Build a column from a homogeneous buffer. The mask is taken as given;
    /// its length is not checked here (see [`Column::validate`]).
    #[must_use]
    pub fn new<T: ColumnElement>(
        name: impl Into<String>,
        values: Vec<T>,
        missing: Option<Vec<bool>>,
    ) -> Self {
        Self::from_values(name, T::into_values(values), missing.map(MissingMask::from))
    }

    #[must_use]
    pub fn from_values(
        name: impl Into<String>,
        values: ColumnValues,
        missing: Option<MissingMask>,
    ) -> Self {
        Self {
            name: name.into(),
            len: values.len(),
            values,
            missing,
        }
    }

    /// Build a column of `dtype` from dynamically typed scalars, as handed
    /// over by external readers. A scalar of any other type makes the buffer
    /// heterogeneous and is rejected.
    pub fn from_scalars(
        name: impl Into<String>,
        dtype: DType,
        scalars: Vec<Scalar>,
        missing: Option<Vec<bool>>,
    ) -> Result<Self, ColumnError> {
        let mut values = ColumnValues::with_capacity(dtype, scalars.len());
        for scalar in scalars {
            values
                .push(scalar)
                .map_err(|rejected| ColumnError::UnsupportedType {
                    dtype: rejected.dtype(),
                    operation: "construction of a heterogeneous buffer",
                })?;
        }
        Ok(Self::from_values(name, values, missing.map(MissingMask::from)))
    }

    /// Check that the mask, when present, covers every position.
    pub fn validate(&self) -> Result<(), ColumnError> {
        match &self.missing {
            Some(mask) if mask.len() < self.len => Err(ColumnError::IndexOutOfRange {
                index: mask.len(),
                len: mask.len(),
            }),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.values.dtype()
    }

    #[must_use]
    pub fn values(&self) -> &ColumnValues {
        &self.values
    }

    #[must_use]
    pub fn missing(&self) -> Option<&MissingMask> {
        self.missing.as_ref()
    }

    /// Whether position `idx` is missing. Without a mask, or past the end
    /// of a short mask, positions are present.
    #[must_use]
    pub fn is_missing(&self, idx: usize) -> bool {
        self.missing
            .as_ref()
            .is_some_and(|mask| mask.is_missing(idx))
    }

    /// Element at `idx`, or `None` when it is missing or out of range.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Scalar> {
        if idx >= self.len || self.is_missing(idx) {
            return None;
        }
        self.values.get(idx)
    }

    #[must_use]
    pub fn count_missing(&self) -> usize {
        self.missing
            .as_ref()
            .map_or(0, |mask| (0..self.len).filter(|&idx| mask.is_missing(idx)).count())
    }

    /// New column with this column's name over a freshly built buffer.
    fn derived(&self, values: ColumnValues, missing: Option<MissingMask>) -> Self {
        Self::from_values(self.name.clone(), values, missing)
    }

    /// Copy of the mask sized to `len`, allocating an all-present mask when
    /// there is none, for transforms that mark new positions missing.
    fn mask_for_update(&self) -> MissingMask {
        match &self.missing {
            Some(mask) => mask.resized(self.len),
            None => MissingMask::none_missing(self.len),
        }
    }

    fn missingness(&self, other: &Self, idx: usize) -> Missingness {
        match (self.is_missing(idx), other.is_missing(idx)) {
            (false, false) => Missingness::BothPresent,
            (true, true) => Missingness::BothMissing,
            _ => Missingness::Disagree,
        }
    }
}

impl<'de> Deserialize<'de> for Column {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            name: String,
            values: ColumnValues,
            #[serde(default)]
            missing: Option<MissingMask>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self::from_values(raw.name, raw.values, raw.missing))
    }
}

// ── Rendering ──────────────────────────────────────────────────────────

impl Column {
    /// Render the whole column. See [`Column::render_range`].
    pub fn render(&self) -> Result<String, ColumnError> {
        self.render_range(0..self.len)
    }

    /// Render `range` as `Name: <name>`, `Type: <tag>`, then one line per
    /// position: `"<j>:  <value>"` when present and `"<j>:"` when missing.
    ///
    /// Fails with `IndexOutOfRange` when the range is reversed, runs past
    /// the column, or the mask does not cover it.
    pub fn render_range(&self, range: Range<usize>) -> Result<String, ColumnError> {
        self.check_range(&range)?;
        trace!(
            "rendering column {:?} rows {}..{}",
            self.name, range.start, range.end
        );
        let mut out = String::new();
        self.render_lines(range, &mut out)?;
        Ok(out)
    }

    fn check_range(&self, range: &Range<usize>) -> Result<(), ColumnError> {
        if range.start > range.end {
            return Err(ColumnError::IndexOutOfRange {
                index: range.start,
                len: self.len,
            });
        }
        if range.end > self.len {
            return Err(ColumnError::IndexOutOfRange {
                index: range.end - 1,
                len: self.len,
            });
        }
        if let Some(mask) = &self.missing
            && mask.len() < range.end
        {
            return Err(ColumnError::IndexOutOfRange {
                index: mask.len(),
                len: mask.len(),
            });
        }
        Ok(())
    }

    fn render_lines(&self, range: Range<usize>, out: &mut impl fmt::Write) -> fmt::Result {
        writeln!(out, "Name: {}", self.name)?;
        writeln!(out, "Type: {}", self.dtype().tag())?;
        for idx in range {
            match self.values.text_at(idx) {
                Some(text) if !self.is_missing(idx) => writeln!(out, "{idx}:  {text}")?,
                _ => writeln!(out, "{idx}:")?,
            }
        }
        Ok(())
    }

    pub fn write<W: io::Write>(&self, writer: &mut W) -> Result<(), ColumnError> {
        self.write_range(writer, 0..self.len)
    }

    pub fn write_range<W: io::Write>(
        &self,
        writer: &mut W,
        range: Range<usize>,
    ) -> Result<(), ColumnError> {
        let text = self.render_range(range)?;
        writer.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn print(&self) -> Result<(), ColumnError> {
        self.write(&mut io::stdout().lock())
    }

    pub fn print_range(&self, range: Range<usize>) -> Result<(), ColumnError> {
        self.write_range(&mut io::stdout().lock(), range)
    }
}

impl fmt::Display for Column {
    /// Full render. A short mask is tolerated here; uncovered positions
    /// render as present.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render_lines(0..self.len, f)
    }
}

// ── Comparison ─────────────────────────────────────────────────────────

/// Result of comparing two columns element by element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum CompareOutcome {
    Equal,
    LengthMismatch,
    TypeMismatch,
    DifferAt(usize),
}

impl CompareOutcome {
    #[must_use]
    pub fn is_equal(self) -> bool {
        matches!(self, Self::Equal)
    }

    #[must_use]
    pub fn differing_index(self) -> Option<usize> {
        match self {
            Self::DifferAt(idx) => Some(idx),
            _ => None,
        }
    }
}

impl Column {
    /// Compare against `other` with an absolute tolerance on float values.
    ///
    /// Order of checks: length, then missingness agreement at every
    /// position (a position missing on one side only differs whatever the
    /// tolerance), then element type, then values at positions present on
    /// both sides. Integer, string and timestamp values must match exactly.
    /// A float pair differs only when `|a - b| > tolerance`, so a NaN, or two
    /// infinities of the same sign, never differ; float32 values are widened
    /// before subtracting. Stops at the first difference.
    #[must_use]
    pub fn all_close(&self, other: &Self, tolerance: f64) -> CompareOutcome {
        use ColumnValues as V;

        if self.len != other.len {
            return CompareOutcome::LengthMismatch;
        }
        if let Some(idx) = self.first_mask_disagreement(other) {
            return CompareOutcome::DifferAt(idx);
        }

        let apart_f64 = |a: &f64, b: &f64| (a - b).abs() > tolerance;
        let apart_f32 = |a: &f32, b: &f32| (f64::from(*a) - f64::from(*b)).abs() > tolerance;

        let first = match (&self.values, &other.values) {
            (V::Float64(l), V::Float64(r)) => self.first_difference(other, l, r, apart_f64),
            (V::Float32(l), V::Float32(r)) => self.first_difference(other, l, r, apart_f32),
            (V::Int64(l), V::Int64(r)) => self.first_difference(other, l, r, |a, b| a != b),
            (V::Int32(l), V::Int32(r)) => self.first_difference(other, l, r, |a, b| a != b),
            (V::Int16(l), V::Int16(r)) => self.first_difference(other, l, r, |a, b| a != b),
            (V::Int8(l), V::Int8(r)) => self.first_difference(other, l, r, |a, b| a != b),
            (V::UInt64(l), V::UInt64(r)) => self.first_difference(other, l, r, |a, b| a != b),
            (V::Utf8(l), V::Utf8(r)) => self.first_difference(other, l, r, |a, b| a != b),
            (V::Timestamp(l), V::Timestamp(r)) => {
                self.first_difference(other, l, r, |a, b| a != b)
            }
            // Every same-variant pair is listed above; anything else mixes
            // variants, and no position can compare equal across them.
            _ => return CompareOutcome::TypeMismatch,
        };

        first.map_or(CompareOutcome::Equal, CompareOutcome::DifferAt)
    }

    /// [`Column::all_close`] with zero tolerance.
    #[must_use]
    pub fn all_equal(&self, other: &Self) -> CompareOutcome {
        self.all_close(other, 0.0)
    }

    fn first_mask_disagreement(&self, other: &Self) -> Option<usize> {
        if self.missing.is_none() && other.missing.is_none() {
            return None;
        }
        (0..self.len).find(|&idx| self.missingness(other, idx) == Missingness::Disagree)
    }

    fn first_difference<T>(
        &self,
        other: &Self,
        left: &[T],
        right: &[T],
        differs: impl Fn(&T, &T) -> bool,
    ) -> Option<usize> {
        left.iter()
            .zip(right)
            .take(self.len)
            .enumerate()
            .find(|&(idx, (a, b))| {
                self.missingness(other, idx) == Missingness::BothPresent && differs(a, b)
            })
            .map(|(idx, _)| idx)
    }
}

// ── Column sets ────────────────────────────────────────────────────────

/// Ordered columns of one dataset. Lengths may differ between columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnSet {
    columns: Vec<Column>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SetOutcome {
    Equal,
    ColumnCountMismatch { left: usize, right: usize },
    Column { index: usize, outcome: CompareOutcome },
}

impl SetOutcome {
    #[must_use]
    pub fn is_equal(self) -> bool {
        matches!(self, Self::Equal)
    }
}

impl ColumnSet {
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn push(&mut self, column: Column) {
        self.columns.push(column);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Column> {
        self.columns.iter()
    }

    /// Pairwise [`Column::all_close`] by position. A differing column count
    /// is reported before any column is compared.
    #[must_use]
    pub fn all_close(&self, other: &Self, tolerance: f64) -> SetOutcome {
        if self.len() != other.len() {
            return SetOutcome::ColumnCountMismatch {
                left: self.len(),
                right: other.len(),
            };
        }
        self.columns
            .iter()
            .zip(&other.columns)
            .enumerate()
            .find_map(|(index, (left, right))| {
                let outcome = left.all_close(right, tolerance);
                (!outcome.is_equal()).then_some(SetOutcome::Column { index, outcome })
            })
            .unwrap_or(SetOutcome::Equal)
    }

    #[must_use]
    pub fn all_equal(&self, other: &Self) -> SetOutcome {
        self.all_close(other, 0.0)
    }
}

impl From<Vec<Column>> for ColumnSet {
    fn from(columns: Vec<Column>) -> Self {
        Self::new(columns)
    }
}

impl FromIterator<Column> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = Column>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ColumnSet {
    type Item = &'a Column;
    type IntoIter = std::slice::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

// ── Type transforms ────────────────────────────────────────────────────

/// Decimal parse used by [`Column::force_numeric`]. Text that overflows to
/// infinity without spelling it out counts as a failure.
fn parse_decimal(text: &str) -> Option<f64> {
    let value: f64 = text.parse().ok()?;
    if value.is_infinite() && !names_infinity(text) {
        return None;
    }
    Some(value)
}

fn names_infinity(text: &str) -> bool {
    let unsigned = text.strip_prefix(&['+', '-'][..]).unwrap_or(text);
    unsigned.eq_ignore_ascii_case("inf") || unsigned.eq_ignore_ascii_case("infinity")
}

impl Column {
    /// Widen any narrower numeric column to float64, copying the mask
    /// verbatim. Float64, string and timestamp columns come back borrowed.
    /// Idempotent; never fails.
    #[must_use]
    pub fn upcast_numeric(&self) -> Cow<'_, Self> {
        match self.values.widen_to_f64() {
            Ok(Cow::Owned(widened)) => {
                debug!("upcast column {:?} from {} to float64", self.name, self.dtype());
                Cow::Owned(self.derived(ColumnValues::Float64(widened), self.missing.clone()))
            }
            // Already float64, or string/timestamp which pass through.
            Ok(Cow::Borrowed(_)) | Err(_) => Cow::Borrowed(self),
        }
    }

    /// Parse a string column into float64. Positions whose text does not
    /// parse become missing and hold 0.0; positions already missing are not
    /// parsed. Non-string columns come back borrowed. The result always
    /// carries a mask.
    #[must_use]
    pub fn force_numeric(&self) -> Cow<'_, Self> {
        let ColumnValues::Utf8(text) = &self.values else {
            return Cow::Borrowed(self);
        };

        let mut missing = self.mask_for_update();
        let mut parsed = vec![0.0; self.len];
        let mut failures = 0_usize;
        for (idx, (slot, raw)) in parsed.iter_mut().zip(text).enumerate() {
            if missing.is_missing(idx) {
                continue;
            }
            match parse_decimal(raw) {
                Some(value) => *slot = value,
                None => {
                    missing.set(idx, true);
                    failures += 1;
                }
            }
        }
        if failures > 0 {
            debug!(
                "force_numeric on {:?}: {failures} of {} values did not parse",
                self.name, self.len
            );
        }

        Cow::Owned(self.derived(ColumnValues::Float64(parsed), Some(missing)))
    }

    /// Apply `f` to every string, missing or not; the mask is carried over
    /// unchanged. Unlike [`Column::force_numeric`], missing positions are
    /// visited so callers can normalize text before coercing it.
    /// Non-string columns come back borrowed.
    #[must_use]
    pub fn map_strings<F>(&self, mut f: F) -> Cow<'_, Self>
    where
        F: FnMut(&str) -> String,
    {
        let ColumnValues::Utf8(text) = &self.values else {
            return Cow::Borrowed(self);
        };
        let mapped = text.iter().map(|s| f(s.as_str())).collect();
        Cow::Owned(self.derived(ColumnValues::Utf8(mapped), self.missing.clone()))
    }

    /// Render a float64 column as strings using the canonical float text.
    /// Missing positions hold `""` and stay missing.
    ///
    /// Only float64 and string columns are accepted: the narrower numeric
    /// types are rejected rather than widened, unlike
    /// [`Column::upcast_numeric`]. Callers wanting text for them upcast
    /// first.
    pub fn to_text(&self) -> Result<Cow<'_, Self>, ColumnError> {
        match &self.values {
            ColumnValues::Utf8(_) => Ok(Cow::Borrowed(self)),
            ColumnValues::Float64(values) => {
                let text = values
                    .iter()
                    .enumerate()
                    .map(|(idx, value)| {
                        if self.is_missing(idx) {
                            String::new()
                        } else {
                            format_f64(*value)
                        }
                    })
                    .collect();
                Ok(Cow::Owned(
                    self.derived(ColumnValues::Utf8(text), self.missing.clone()),
                ))
            }
            ColumnValues::Float32(_)
            | ColumnValues::Int64(_)
            | ColumnValues::Int32(_)
            | ColumnValues::Int16(_)
            | ColumnValues::Int8(_)
            | ColumnValues::UInt64(_)
            | ColumnValues::Timestamp(_) => Err(ColumnError::UnsupportedType {
                dtype: self.dtype(),
                operation: "to_text",
            }),
        }
    }

    /// Mark empty strings missing. Other positions keep their text and
    /// status. The result always carries a mask, even when the input had
    /// none. Non-string columns come back borrowed.
    #[must_use]
    pub fn null_empty_strings(&self) -> Cow<'_, Self> {
        let ColumnValues::Utf8(text) = &self.values else {
            return Cow::Borrowed(self);
        };

        let mut missing = self.mask_for_update();
        let mut nulled = 0_usize;
        for (idx, value) in text.iter().enumerate() {
            if value.is_empty() && !missing.is_missing(idx) {
                missing.set(idx, true);
                nulled += 1;
            }
        }
        if nulled > 0 {
            debug!(
                "null_empty_strings on {:?}: {nulled} empty values marked missing",
                self.name
            );
        }

        Cow::Owned(self.derived(ColumnValues::Utf8(text.clone()), Some(missing)))
    }

    /// Derive timestamps as `base + value * unit` for each present value,
    /// keeping fractional units at nanosecond resolution. Missing positions
    /// stay missing and hold the zero timestamp.
    ///
    /// The unit is checked before any value is read; only `"days"` is
    /// known. Non-numeric columns fail at the widening step.
    pub fn date_from_duration(&self, base: Timestamp, unit: &str) -> Result<Self, ColumnError> {
        let unit: DurationUnit = unit.parse()?;
        let amounts = self.values.widen_to_f64()?;

        let mut stamps = vec![Timestamp::default(); self.len];
        for (idx, (slot, amount)) in stamps.iter_mut().zip(amounts.iter()).enumerate() {
            if self.is_missing(idx) {
                continue;
            }
            *slot = unit
                .to_time_delta(*amount)
                .and_then(|delta| base.checked_add_signed(delta))
                .ok_or(ColumnError::TimestampOutOfRange { index: idx })?;
        }

        Ok(self.derived(ColumnValues::Timestamp(stamps), self.missing.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use chrono::{TimeZone, Utc};
    use ns_types::{DType, Scalar, Timestamp, TypeError};

    use super::{
        Column, ColumnError, ColumnSet, ColumnValues, CompareOutcome, MissingMask, SetOutcome,
    };

    fn ts(y: i32, m: u32, d: u32, h: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_owned()).collect()
    }

    // ── MissingMask ─────────────────────────────────────────────────────

    #[test]
    fn mask_packs_and_reads_back() {
        let mask = MissingMask::from_bools(&[false, true, false]);
        assert_eq!(mask.len(), 3);
        assert_eq!(mask.get(1), Some(true));
        assert_eq!(mask.get(3), None);
        assert!(!mask.is_missing(3));
        assert_eq!(mask.count_missing(), 1);
    }

    #[test]
    fn mask_spans_word_boundary() {
        let bits: Vec<bool> = (0..70).map(|idx| idx % 3 == 0).collect();
        let mask = MissingMask::from_bools(&bits);
        assert_eq!(mask.count_missing(), 24);
        assert!(mask.is_missing(69));
        assert!(!mask.is_missing(68));
        assert_eq!(mask.get(70), None);
        assert_eq!(mask.bits().collect::<Vec<_>>(), bits);
    }

    #[test]
    fn mask_set_ignores_out_of_range() {
        let mut mask = MissingMask::none_missing(65);
        mask.set(64, true);
        mask.set(65, true);
        assert_eq!(mask.count_missing(), 1);
        mask.set(64, false);
        assert_eq!(mask.count_missing(), 0);
    }

    #[test]
    fn mask_resized_pads_with_present() {
        let mask = MissingMask::from_bools(&[true, true]);
        let grown = mask.resized(4);
        assert_eq!(grown.bits().collect::<Vec<_>>(), vec![true, true, false, false]);
        let shrunk = mask.resized(1);
        assert_eq!(shrunk.bits().collect::<Vec<_>>(), vec![true]);
    }

    #[test]
    fn mask_serializes_as_bool_array() {
        let mask = MissingMask::from_bools(&[false, true]);
        let json = serde_json::to_string(&mask).expect("serialize");
        assert_eq!(json, "[false,true]");
        let back: MissingMask = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, mask);
    }

    // ── Construction ────────────────────────────────────────────────────

    #[test]
    fn construction_derives_length_for_every_dtype() {
        let columns = [
            Column::new("a", vec![1.0_f64, 2.0], None),
            Column::new("b", vec![1.0_f32], None),
            Column::new("c", vec![1_i64, 2, 3], None),
            Column::new("d", vec![1_i32], None),
            Column::new("e", vec![1_i16, 2], None),
            Column::new("f", vec![1_i8], None),
            Column::new("g", vec![1_u64, 2], None),
            Column::new("h", strings(&["x", "y", "z"]), None),
            Column::new("i", vec![ts(2020, 1, 1, 0)], None),
        ];
        let lens: Vec<usize> = columns.iter().map(Column::len).collect();
        assert_eq!(lens, vec![2, 1, 3, 1, 2, 1, 2, 3, 1]);
        let dtypes: Vec<DType> = columns.iter().map(Column::dtype).collect();
        assert_eq!(dtypes, DType::ALL.to_vec());
    }

    #[test]
    fn from_scalars_rejects_heterogeneous_buffers() {
        let ok = Column::from_scalars(
            "n",
            DType::Int16,
            vec![Scalar::Int16(1), Scalar::Int16(2)],
            None,
        )
        .expect("homogeneous");
        assert_eq!(ok.values(), &ColumnValues::Int16(vec![1, 2]));

        let err = Column::from_scalars(
            "n",
            DType::Int16,
            vec![Scalar::Int16(1), Scalar::Int64(2)],
            None,
        )
        .expect_err("mixed");
        assert!(matches!(
            err,
            ColumnError::UnsupportedType {
                dtype: DType::Int64,
                ..
            }
        ));
    }

    #[test]
    fn empty_scalar_buffer_keeps_requested_dtype() {
        let column = Column::from_scalars("e", DType::Timestamp, Vec::new(), None).expect("empty");
        assert!(column.is_empty());
        assert_eq!(column.dtype(), DType::Timestamp);
    }

    #[test]
    fn validate_flags_short_mask() {
        let column = Column::new("x", vec![1_i64, 2, 3], Some(vec![false]));
        assert!(matches!(
            column.validate(),
            Err(ColumnError::IndexOutOfRange { index: 1, len: 1 })
        ));
        assert!(Column::new("x", vec![1_i64], None).validate().is_ok());
    }

    #[test]
    fn get_hides_missing_values() {
        let column = Column::new("x", vec![5_i8, 6], Some(vec![false, true]));
        assert_eq!(column.get(0), Some(Scalar::Int8(5)));
        assert_eq!(column.get(1), None);
        assert_eq!(column.get(2), None);
        assert_eq!(column.values().get(1), Some(Scalar::Int8(6)));
    }

    #[test]
    fn count_missing_without_mask_is_zero() {
        assert_eq!(Column::new("x", vec![1_u64], None).count_missing(), 0);
        let masked = Column::new("x", vec![1_u64, 2, 3], Some(vec![true, false, true]));
        assert_eq!(masked.count_missing(), 2);
    }

    #[test]
    fn column_deserialization_recomputes_length() {
        let json = r#"{"name":"x","values":{"dtype":"int32","data":[1,2,3]},"missing":[false,true,false]}"#;
        let column: Column = serde_json::from_str(json).expect("deserialize");
        assert_eq!(column.len(), 3);
        assert_eq!(column.dtype(), DType::Int32);
        assert!(column.is_missing(1));
        let again: Column =
            serde_json::from_str(&serde_json::to_string(&column).expect("serialize"))
                .expect("deserialize");
        assert_eq!(again, column);
    }

    // ── Rendering ───────────────────────────────────────────────────────

    #[test]
    fn render_marks_missing_positions() {
        let column = Column::new("x", vec![1_i64, 2], Some(vec![false, true]));
        assert_eq!(
            column.render().expect("render"),
            "Name: x\nType: int64\n0:  1\n1:\n"
        );
    }

    #[test]
    fn render_uses_canonical_value_text() {
        let floats = Column::new("f", vec![1.0_f64, 0.5, 1e-7], None);
        assert_eq!(
            floats.render().expect("render"),
            "Name: f\nType: float64\n0:  1\n1:  0.5\n2:  1e-7\n"
        );
        let stamps = Column::new("t", vec![ts(2020, 1, 2, 12)], None);
        assert_eq!(
            stamps.render().expect("render"),
            "Name: t\nType: timestamp\n0:  2020-01-02T12:00:00Z\n"
        );
        let text = Column::new("s", strings(&["a b"]), None);
        assert_eq!(text.to_string(), "Name: s\nType: string\n0:  a b\n");
    }

    #[test]
    fn render_range_keeps_absolute_indices() {
        let column = Column::new("u", vec![10_u64, 20, 30, 40], None);
        assert_eq!(
            column.render_range(1..3).expect("render"),
            "Name: u\nType: uint64\n1:  20\n2:  30\n"
        );
        assert_eq!(
            column.render_range(2..2).expect("render"),
            "Name: u\nType: uint64\n"
        );
    }

    #[test]
    fn render_rejects_bad_ranges_and_short_masks() {
        let column = Column::new("u", vec![1_i32, 2], None);
        assert!(matches!(
            column.render_range(0..3),
            Err(ColumnError::IndexOutOfRange { index: 2, len: 2 })
        ));
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = column.render_range(2..1);
        assert!(matches!(reversed, Err(ColumnError::IndexOutOfRange { .. })));

        let short = Column::new("u", vec![1_i32, 2], Some(vec![false]));
        assert!(short.render_range(0..1).is_ok());
        assert!(matches!(
            short.render(),
            Err(ColumnError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn write_emits_rendered_bytes() {
        let column = Column::new("w", vec![3_i16], None);
        let mut out = Vec::new();
        column.write(&mut out).expect("write");
        assert_eq!(String::from_utf8(out).expect("utf8"), "Name: w\nType: int16\n0:  3\n");
    }

    // ── Comparison ──────────────────────────────────────────────────────

    #[test]
    fn all_equal_is_reflexive_with_mask() {
        let column = Column::new("x", vec![1.5_f64, 2.0, 9.0], Some(vec![false, true, false]));
        assert_eq!(column.all_equal(&column), CompareOutcome::Equal);
        let text = Column::new("s", strings(&["a", "b"]), Some(vec![true, false]));
        assert_eq!(text.all_equal(&text), CompareOutcome::Equal);
    }

    #[test]
    fn all_close_reports_length_before_type() {
        let a = Column::new("a", vec![1_i64], None);
        let b = Column::new("b", strings(&["1", "2"]), None);
        assert_eq!(a.all_close(&b, 1.0), CompareOutcome::LengthMismatch);
    }

    #[test]
    fn all_close_reports_type_mismatch() {
        let a = Column::new("a", vec![1_i64], None);
        let b = Column::new("b", vec![1.0_f64], None);
        assert_eq!(a.all_close(&b, 1.0), CompareOutcome::TypeMismatch);
    }

    #[test]
    fn mask_disagreement_dominates_tolerance() {
        let a = Column::new("a", vec![1.0_f64], Some(vec![false]));
        let b = Column::new("b", vec![1.0_f64], Some(vec![true]));
        assert_eq!(a.all_close(&b, 1e9), CompareOutcome::DifferAt(0));
        let unmasked = Column::new("c", vec![1.0_f64], None);
        assert_eq!(unmasked.all_close(&b, 1e9), CompareOutcome::DifferAt(0));
    }

    #[test]
    fn mask_disagreement_is_found_before_value_differences() {
        let a = Column::new("a", vec![1_i64, 2, 3], None);
        let b = Column::new("b", vec![9_i64, 2, 3], Some(vec![false, false, true]));
        assert_eq!(a.all_equal(&b), CompareOutcome::DifferAt(2));
    }

    #[test]
    fn float_tolerance_is_absolute_and_inclusive() {
        let a = Column::new("a", vec![1.0_f64, 100.0], None);
        let b = Column::new("b", vec![1.25_f64, 100.5], None);
        assert_eq!(a.all_close(&b, 0.5), CompareOutcome::Equal);
        assert_eq!(a.all_close(&b, 0.25), CompareOutcome::DifferAt(1));
        assert_eq!(a.all_equal(&b), CompareOutcome::DifferAt(0));
    }

    #[test]
    fn float32_is_widened_before_subtracting() {
        let a = Column::new("a", vec![16_777_216.0_f32], None);
        let b = Column::new("b", vec![16_777_218.0_f32], None);
        assert_eq!(a.all_close(&b, 1.0), CompareOutcome::DifferAt(0));
        assert_eq!(a.all_close(&b, 2.0), CompareOutcome::Equal);
    }

    #[test]
    fn missing_values_are_ignored_when_both_missing() {
        let a = Column::new("a", vec![1_u64, 7], Some(vec![false, true]));
        let b = Column::new("b", vec![1_u64, 8], Some(vec![false, true]));
        assert_eq!(a.all_equal(&b), CompareOutcome::Equal);
    }

    #[test]
    fn timestamps_compare_by_instant() {
        let a = Column::new("a", vec![ts(2020, 1, 1, 0), ts(2020, 1, 2, 0)], None);
        let b = Column::new("b", vec![ts(2020, 1, 1, 0), ts(2020, 1, 2, 1)], None);
        assert_eq!(a.all_equal(&a.clone()), CompareOutcome::Equal);
        assert_eq!(a.all_equal(&b), CompareOutcome::DifferAt(1));
    }

    #[test]
    fn non_finite_floats_equal_themselves() {
        let a = Column::new("a", vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1.0], None);
        assert_eq!(a.all_equal(&a), CompareOutcome::Equal);
        assert_eq!(a.all_equal(&a.clone()), CompareOutcome::Equal);

        let narrow = Column::new("b", vec![f32::NAN, f32::INFINITY], None);
        assert_eq!(narrow.all_equal(&narrow), CompareOutcome::Equal);
    }

    #[test]
    fn nan_is_close_to_any_float_but_infinity_is_not() {
        let nan = Column::new("a", vec![f64::NAN], None);
        let one = Column::new("a", vec![1.0_f64], None);
        assert_eq!(nan.all_equal(&one), CompareOutcome::Equal);

        let inf = Column::new("a", vec![f64::INFINITY], None);
        let neg_inf = Column::new("a", vec![f64::NEG_INFINITY], None);
        assert_eq!(inf.all_close(&one, 1e300), CompareOutcome::DifferAt(0));
        assert_eq!(inf.all_equal(&neg_inf), CompareOutcome::DifferAt(0));
    }

    #[test]
    fn parsed_non_finite_text_compares_equal_to_itself() {
        let column = Column::new("s", strings(&["NaN", "inf", "1"]), None);
        let forced = column.force_numeric();
        assert_eq!(forced.missing().map(MissingMask::count_missing), Some(0));
        assert_eq!(forced.all_equal(&forced), CompareOutcome::Equal);
    }

    #[test]
    fn column_set_reports_count_mismatch_first() {
        let left = ColumnSet::new(vec![Column::new("a", vec![1_i64], None)]);
        let right = ColumnSet::new(vec![
            Column::new("a", vec![2_i64], None),
            Column::new("b", vec![2_i64], None),
        ]);
        assert_eq!(
            left.all_close(&right, 0.0),
            SetOutcome::ColumnCountMismatch { left: 1, right: 2 }
        );
    }

    #[test]
    fn column_set_tags_first_differing_column() {
        let left: ColumnSet = vec![
            Column::new("a", vec![1_i64], None),
            Column::new("b", vec![1.0_f64, 2.0], None),
            Column::new("c", strings(&["x"]), None),
        ]
        .into();
        let right: ColumnSet = vec![
            Column::new("a", vec![1_i64], None),
            Column::new("b", vec![1.0_f64, 2.5], None),
            Column::new("c", vec![1_i64], None),
        ]
        .into();
        assert_eq!(
            left.all_equal(&right),
            SetOutcome::Column {
                index: 1,
                outcome: CompareOutcome::DifferAt(1)
            }
        );
        assert_eq!(
            left.all_close(&right, 0.5),
            SetOutcome::Column {
                index: 2,
                outcome: CompareOutcome::TypeMismatch
            }
        );
        assert_eq!(left.all_equal(&left), SetOutcome::Equal);
    }

    #[test]
    fn column_set_allows_ragged_lengths() {
        let set: ColumnSet = [
            Column::new("a", vec![1_i64], None),
            Column::new("b", vec![1_i64, 2, 3], None),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.all_equal(&set.clone()), SetOutcome::Equal);
    }

    // ── Upcast ──────────────────────────────────────────────────────────

    #[test]
    fn upcast_widens_every_narrow_numeric_type() {
        let mask = Some(vec![false, true]);
        let columns = [
            Column::new("a", vec![1.5_f32, 2.0], mask.clone()),
            Column::new("b", vec![1_i64, 2], mask.clone()),
            Column::new("c", vec![1_i32, 2], mask.clone()),
            Column::new("d", vec![1_i16, 2], mask.clone()),
            Column::new("e", vec![-1_i8, 2], mask.clone()),
            Column::new("f", vec![1_u64, 2], mask.clone()),
        ];
        for column in &columns {
            let up = column.upcast_numeric();
            assert!(matches!(up, Cow::Owned(_)), "{} should widen", column.dtype());
            assert_eq!(up.dtype(), DType::Float64);
            assert_eq!(up.name(), column.name());
            assert_eq!(up.missing(), column.missing());
            assert_eq!(up.len(), 2);
        }
        let widened = columns[4].upcast_numeric();
        assert_eq!(widened.values(), &ColumnValues::Float64(vec![-1.0, 2.0]));
        // Receiver untouched.
        assert_eq!(columns[4].values(), &ColumnValues::Int8(vec![-1, 2]));
    }

    #[test]
    fn upcast_passes_through_wide_and_non_numeric() {
        let wide = Column::new("a", vec![1.0_f64], None);
        let text = Column::new("b", strings(&["1"]), None);
        let stamps = Column::new("c", vec![ts(2020, 1, 1, 0)], None);
        assert!(matches!(wide.upcast_numeric(), Cow::Borrowed(_)));
        assert!(matches!(text.upcast_numeric(), Cow::Borrowed(_)));
        assert!(matches!(stamps.upcast_numeric(), Cow::Borrowed(_)));
    }

    #[test]
    fn upcast_is_idempotent() {
        let column = Column::new("a", vec![3_i32, -4], None);
        let once = column.upcast_numeric().into_owned();
        let twice = once.upcast_numeric().into_owned();
        assert_eq!(once, twice);
    }

    // ── Forced numeric ──────────────────────────────────────────────────

    #[test]
    fn force_numeric_marks_unparseable_missing() {
        let column = Column::new("s", strings(&["3.5", "abc", ""]), None);
        let forced = column.force_numeric();
        assert_eq!(forced.values(), &ColumnValues::Float64(vec![3.5, 0.0, 0.0]));
        assert_eq!(
            forced.missing(),
            Some(&MissingMask::from_bools(&[false, true, true]))
        );
    }

    #[test]
    fn force_numeric_skips_already_missing() {
        let column = Column::new("s", strings(&["1", "2", "x"]), Some(vec![false, true, false]));
        let forced = column.force_numeric();
        assert_eq!(forced.values(), &ColumnValues::Float64(vec![1.0, 0.0, 0.0]));
        assert_eq!(
            forced.missing(),
            Some(&MissingMask::from_bools(&[false, true, true]))
        );
    }

    #[test]
    fn force_numeric_follows_decimal_grammar() {
        let column = Column::new(
            "s",
            strings(&["1e3", "-inf", "NaN", "1e400", " 2", "+.5"]),
            None,
        );
        let forced = column.force_numeric();
        let ColumnValues::Float64(values) = forced.values() else {
            panic!("expected float64");
        };
        assert_eq!(values[0], 1000.0);
        assert_eq!(values[1], f64::NEG_INFINITY);
        assert!(values[2].is_nan());
        assert_eq!(values[5], 0.5);
        let bits: Vec<bool> = forced.missing().expect("mask").bits().collect();
        assert_eq!(bits, vec![false, false, false, true, true, false]);
    }

    #[test]
    fn force_numeric_leaves_non_strings() {
        let column = Column::new("n", vec![1_i64], None);
        assert!(matches!(column.force_numeric(), Cow::Borrowed(_)));
    }

    #[test]
    fn force_numeric_tolerates_short_mask() {
        let column = Column::new("s", strings(&["1", "x"]), Some(vec![true]));
        let forced = column.force_numeric();
        let bits: Vec<bool> = forced.missing().expect("mask").bits().collect();
        assert_eq!(bits, vec![true, true]);
    }

    // ── String transforms ───────────────────────────────────────────────

    #[test]
    fn map_strings_visits_missing_positions() {
        let column = Column::new("s", strings(&[" a ", " b "]), Some(vec![false, true]));
        let mut seen = 0;
        let mapped = column.map_strings(|s| {
            seen += 1;
            s.trim().to_owned()
        });
        assert_eq!(seen, 2);
        assert_eq!(mapped.values(), &ColumnValues::Utf8(strings(&["a", "b"])));
        assert_eq!(mapped.missing(), column.missing());
    }

    #[test]
    fn map_strings_preserves_mask_absence() {
        let column = Column::new("s", strings(&["a"]), None);
        let mapped = column.map_strings(str::to_uppercase);
        assert!(mapped.missing().is_none());
        assert_eq!(mapped.values(), &ColumnValues::Utf8(strings(&["A"])));
        let numbers = Column::new("n", vec![1_i64], None);
        assert!(matches!(numbers.map_strings(str::to_uppercase), Cow::Borrowed(_)));
    }

    #[test]
    fn to_text_renders_float64() {
        let column = Column::new("f", vec![1.0_f64, 2.5, 3.0], Some(vec![false, false, true]));
        let text = column.to_text().expect("float64 stringifies");
        assert_eq!(text.values(), &ColumnValues::Utf8(strings(&["1", "2.5", ""])));
        assert_eq!(text.missing(), column.missing());
    }

    #[test]
    fn to_text_only_accepts_float64_and_strings() {
        let text = Column::new("s", strings(&["a"]), None);
        assert!(matches!(text.to_text(), Ok(Cow::Borrowed(_))));
        for dtype in [DType::Float32, DType::Int64, DType::UInt64, DType::Timestamp] {
            let column = Column::from_scalars("x", dtype, Vec::new(), None).expect("empty");
            assert!(matches!(
                column.to_text(),
                Err(ColumnError::UnsupportedType { dtype: d, .. }) if d == dtype
            ));
        }
    }

    #[test]
    fn null_empty_strings_marks_new_missing() {
        let column = Column::new("s", strings(&["a", "", "b"]), Some(vec![false, false, true]));
        let out = column.null_empty_strings();
        assert_eq!(
            out.missing(),
            Some(&MissingMask::from_bools(&[false, true, true]))
        );
        assert_eq!(out.values(), column.values());
    }

    #[test]
    fn null_empty_strings_without_empties_keeps_status() {
        let column = Column::new("s", strings(&["a", "b"]), Some(vec![true, false]));
        let out = column.null_empty_strings();
        assert_eq!(out.count_missing(), 1);
        assert_eq!(out.missing(), column.missing());
    }

    #[test]
    fn null_empty_strings_always_allocates_mask() {
        let column = Column::new("s", strings(&["a", "b"]), None);
        let out = column.null_empty_strings();
        assert_eq!(out.missing(), Some(&MissingMask::none_missing(2)));
        let numbers = Column::new("n", vec![1_i64], None);
        assert!(matches!(numbers.null_empty_strings(), Cow::Borrowed(_)));
    }

    // ── Duration to date ────────────────────────────────────────────────

    #[test]
    fn date_from_duration_keeps_fractional_days() {
        let column = Column::new("d", vec![1.0_f64, 1.5], None);
        let dates = column
            .date_from_duration(ts(2020, 1, 1, 0), "days")
            .expect("days");
        assert_eq!(
            dates.values(),
            &ColumnValues::Timestamp(vec![ts(2020, 1, 2, 0), ts(2020, 1, 2, 12)])
        );
        assert_eq!(dates.name(), "d");
        assert!(dates.missing().is_none());
    }

    #[test]
    fn date_from_duration_widens_integers_and_keeps_mask() {
        let column = Column::new("d", vec![-1_i16, 99], Some(vec![false, true]));
        let dates = column
            .date_from_duration(ts(2020, 3, 1, 0), "days")
            .expect("days");
        assert_eq!(
            dates.values(),
            &ColumnValues::Timestamp(vec![ts(2020, 2, 29, 0), Timestamp::default()])
        );
        assert_eq!(dates.missing(), column.missing());
    }

    #[test]
    fn date_from_duration_rejects_unknown_unit() {
        let column = Column::new("d", Vec::<f64>::new(), None);
        let err = column
            .date_from_duration(ts(2020, 1, 1, 0), "weeks")
            .expect_err("unknown unit");
        assert!(matches!(
            err,
            ColumnError::Type(TypeError::UnknownUnit { ref unit }) if unit == "weeks"
        ));
    }

    #[test]
    fn date_from_duration_rejects_non_numeric() {
        let column = Column::new("d", strings(&["1"]), None);
        let err = column
            .date_from_duration(ts(2020, 1, 1, 0), "days")
            .expect_err("strings");
        assert!(matches!(
            err,
            ColumnError::UnsupportedType {
                dtype: DType::Utf8,
                ..
            }
        ));
    }

    #[test]
    fn date_from_duration_reports_unrepresentable_values() {
        let column = Column::new("d", vec![0.0_f64, f64::NAN], None);
        let err = column
            .date_from_duration(ts(2020, 1, 1, 0), "days")
            .expect_err("nan");
        assert!(matches!(err, ColumnError::TimestampOutOfRange { index: 1 }));

        let masked = Column::new("d", vec![0.0_f64, f64::NAN], Some(vec![false, true]));
        assert!(masked.date_from_duration(ts(2020, 1, 1, 0), "days").is_ok());
    }
}
