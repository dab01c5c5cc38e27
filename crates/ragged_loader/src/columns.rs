//! Decoded column storage.
//!
//! A [`ColumnSlice`] holds a contiguous range of rows decoded from one input
//! file (or the remainder carried between files). Columns come in three flavours:
//! - labels: one `f32` per row
//! - ragged fields: a variable-length list of `i64` per row ([`RaggedField`])
//! - reserve columns: passthrough values of a configured type ([`DenseArray`])
//!
//! Columns are kept in configured order so that flattening ragged fields into
//! a batch's `feature` pair is deterministic.

use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// A variable-length list column stored as parallel `lengths` and flat `values`.
///
/// `lengths[i]` is the number of values contributed by row `i`, and `values` is
/// the row-wise concatenation. A well-formed field always satisfies
/// `sum(lengths) == values.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaggedField {
    lengths: Vec<i32>,
    values: Vec<i64>,
}

impl RaggedField {
    /// Creates a field after checking the lengths/values invariant.
    pub fn try_new(name: &str, lengths: Vec<i32>, values: Vec<i64>) -> Result<Self> {
        let field = Self { lengths, values };
        field.validate(name)?;
        Ok(field)
    }

    /// Creates a field without validation. Use [`validate`](Self::validate) before
    /// handing it to consumers.
    pub fn from_parts_unchecked(lengths: Vec<i32>, values: Vec<i64>) -> Self {
        Self { lengths, values }
    }

    /// Builds a field from per-row value lists.
    pub fn from_rows<R, I>(rows: I) -> Self
    where
        R: AsRef<[i64]>,
        I: IntoIterator<Item = R>,
    {
        let mut field = Self::default();
        for row in rows {
            let row = row.as_ref();
            field.lengths.push(row.len() as i32);
            field.values.extend_from_slice(row);
        }
        field
    }

    pub fn num_rows(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn lengths(&self) -> &[i32] {
        &self.lengths
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn into_parts(self) -> (Vec<i32>, Vec<i64>) {
        (self.lengths, self.values)
    }

    pub fn lengths_sum(&self) -> i64 {
        self.lengths.iter().map(|&l| l as i64).sum()
    }

    /// Checks that no length is negative and that `sum(lengths) == values.len()`.
    pub fn validate(&self, name: &str) -> Result<()> {
        let lengths_sum = self.lengths_sum();
        if self.lengths.iter().any(|&l| l < 0) || lengths_sum != self.values.len() as i64 {
            return Err(PipelineError::CorruptInput {
                field: name.to_string(),
                lengths_sum,
                values_len: self.values.len(),
            });
        }
        Ok(())
    }

    /// Returns the values of each row in order.
    pub fn rows(&self) -> impl Iterator<Item = &[i64]> + '_ {
        let mut start = 0usize;
        self.lengths.iter().map(move |&len| {
            let end = (start + len.max(0) as usize).min(self.values.len());
            let row = &self.values[start.min(end)..end];
            start = end;
            row
        })
    }

    /// Prefix sums of the row lengths (`num_rows + 1` entries).
    pub(crate) fn row_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.lengths.len() + 1);
        let mut acc = 0usize;
        offsets.push(acc);
        for &len in &self.lengths {
            acc += len.max(0) as usize;
            offsets.push(acc);
        }
        offsets
    }

    /// Copies `rows` out of the field given offsets from [`row_offsets`](Self::row_offsets).
    pub(crate) fn slice_with_offsets(&self, offsets: &[usize], rows: Range<usize>) -> Self {
        let value_start = offsets[rows.start].min(self.values.len());
        let value_end = offsets[rows.end].min(self.values.len());
        Self {
            lengths: self.lengths[rows].to_vec(),
            values: self.values[value_start..value_end].to_vec(),
        }
    }

    /// Appends the rows of `other` after the rows of `self`.
    pub fn append(&mut self, mut other: RaggedField) {
        self.lengths.append(&mut other.lengths);
        self.values.append(&mut other.values);
    }

    /// Splits the field at row `at`: `self` keeps rows `[0, at)` and the
    /// returned field holds rows `[at, num_rows)`. Values are split at the
    /// cumulative length of the first `at` rows.
    pub fn split_off(&mut self, at: usize) -> RaggedField {
        let at = at.min(self.lengths.len());
        let cut: usize = self.lengths[..at].iter().map(|&l| l.max(0) as usize).sum();
        let tail_lengths = self.lengths.split_off(at);
        let tail_values = self.values.split_off(cut.min(self.values.len()));
        RaggedField {
            lengths: tail_lengths,
            values: tail_values,
        }
    }

    /// Concatenates fields: all lengths in order, then all values in order.
    pub fn concat<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = RaggedField>,
    {
        let mut out = Self::default();
        for field in fields {
            out.append(field);
        }
        out
    }

    /// Folds every value into `[0, num_buckets)`.
    pub fn fold_into_buckets(&mut self, num_buckets: u64) {
        let buckets = num_buckets.max(1) as i64;
        for value in &mut self.values {
            *value = value.rem_euclid(buckets);
        }
    }
}

/// Declared type of a reserve (passthrough) column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReserveType {
    Float32,
    Float64,
    Int32,
    Int64,
    #[serde(alias = "string")]
    Utf8,
}

impl FromStr for ReserveType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float32" | "float" => Ok(ReserveType::Float32),
            "float64" | "double" => Ok(ReserveType::Float64),
            "int32" => Ok(ReserveType::Int32),
            "int64" => Ok(ReserveType::Int64),
            "utf8" | "string" => Ok(ReserveType::Utf8),
            other => Err(PipelineError::Config(format!(
                "unknown reserve type '{}' (expected float32, float64, int32, int64 or string)",
                other
            ))),
        }
    }
}

impl fmt::Display for ReserveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReserveType::Float32 => "float32",
            ReserveType::Float64 => "float64",
            ReserveType::Int32 => "int32",
            ReserveType::Int64 => "int64",
            ReserveType::Utf8 => "string",
        };
        f.write_str(name)
    }
}

/// A dense per-row column used for reserve passthrough.
#[derive(Debug, Clone, PartialEq)]
pub enum DenseArray {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Utf8(Vec<String>),
}

macro_rules! dense_dispatch {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            DenseArray::Float32($inner) => $body,
            DenseArray::Float64($inner) => $body,
            DenseArray::Int32($inner) => $body,
            DenseArray::Int64($inner) => $body,
            DenseArray::Utf8($inner) => $body,
        }
    };
}

impl DenseArray {
    pub fn empty(kind: ReserveType) -> Self {
        match kind {
            ReserveType::Float32 => DenseArray::Float32(Vec::new()),
            ReserveType::Float64 => DenseArray::Float64(Vec::new()),
            ReserveType::Int32 => DenseArray::Int32(Vec::new()),
            ReserveType::Int64 => DenseArray::Int64(Vec::new()),
            ReserveType::Utf8 => DenseArray::Utf8(Vec::new()),
        }
    }

    pub fn kind(&self) -> ReserveType {
        match self {
            DenseArray::Float32(_) => ReserveType::Float32,
            DenseArray::Float64(_) => ReserveType::Float64,
            DenseArray::Int32(_) => ReserveType::Int32,
            DenseArray::Int64(_) => ReserveType::Int64,
            DenseArray::Utf8(_) => ReserveType::Utf8,
        }
    }

    pub fn len(&self) -> usize {
        dense_dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slice(&self, rows: Range<usize>) -> Self {
        match self {
            DenseArray::Float32(v) => DenseArray::Float32(v[rows].to_vec()),
            DenseArray::Float64(v) => DenseArray::Float64(v[rows].to_vec()),
            DenseArray::Int32(v) => DenseArray::Int32(v[rows].to_vec()),
            DenseArray::Int64(v) => DenseArray::Int64(v[rows].to_vec()),
            DenseArray::Utf8(v) => DenseArray::Utf8(v[rows].to_vec()),
        }
    }

    fn split_off(&mut self, at: usize) -> Self {
        match self {
            DenseArray::Float32(v) => DenseArray::Float32(v.split_off(at.min(v.len()))),
            DenseArray::Float64(v) => DenseArray::Float64(v.split_off(at.min(v.len()))),
            DenseArray::Int32(v) => DenseArray::Int32(v.split_off(at.min(v.len()))),
            DenseArray::Int64(v) => DenseArray::Int64(v.split_off(at.min(v.len()))),
            DenseArray::Utf8(v) => DenseArray::Utf8(v.split_off(at.min(v.len()))),
        }
    }

    fn append(&mut self, name: &str, other: DenseArray) -> Result<()> {
        match (self, other) {
            (DenseArray::Float32(a), DenseArray::Float32(mut b)) => a.append(&mut b),
            (DenseArray::Float64(a), DenseArray::Float64(mut b)) => a.append(&mut b),
            (DenseArray::Int32(a), DenseArray::Int32(mut b)) => a.append(&mut b),
            (DenseArray::Int64(a), DenseArray::Int64(mut b)) => a.append(&mut b),
            (DenseArray::Utf8(a), DenseArray::Utf8(mut b)) => a.append(&mut b),
            (a, b) => {
                return Err(PipelineError::SchemaMismatch(format!(
                    "reserve column '{}' changed type from {} to {}",
                    name,
                    a.kind(),
                    b.kind()
                )))
            }
        }
        Ok(())
    }
}

/// A contiguous range of decoded rows for the configured columns.
///
/// The default value is the empty slice with no columns, which is what a
/// worker's remainder buffer starts as.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSlice {
    num_rows: usize,
    labels: Vec<(String, Vec<f32>)>,
    ragged: Vec<(String, RaggedField)>,
    reserve: Vec<(String, DenseArray)>,
}

impl ColumnSlice {
    /// Starts an empty slice of `num_rows` rows; columns are added with the
    /// `with_*` methods and must all have exactly `num_rows` rows.
    pub fn new(num_rows: usize) -> Self {
        Self {
            num_rows,
            ..Self::default()
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, values: Vec<f32>) -> Result<Self> {
        let name = name.into();
        self.check_rows(&name, values.len())?;
        self.labels.push((name, values));
        Ok(self)
    }

    pub fn with_ragged(mut self, name: impl Into<String>, field: RaggedField) -> Result<Self> {
        let name = name.into();
        self.check_rows(&name, field.num_rows())?;
        self.ragged.push((name, field));
        Ok(self)
    }

    pub fn with_reserve(mut self, name: impl Into<String>, values: DenseArray) -> Result<Self> {
        let name = name.into();
        self.check_rows(&name, values.len())?;
        self.reserve.push((name, values));
        Ok(self)
    }

    fn check_rows(&self, name: &str, rows: usize) -> Result<()> {
        if rows != self.num_rows {
            return Err(PipelineError::Config(format!(
                "column '{}' has {} rows, expected {}",
                name, rows, self.num_rows
            )));
        }
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn labels(&self) -> &[(String, Vec<f32>)] {
        &self.labels
    }

    pub fn ragged(&self) -> &[(String, RaggedField)] {
        &self.ragged
    }

    pub fn reserve(&self) -> &[(String, DenseArray)] {
        &self.reserve
    }

    fn has_columns(&self) -> bool {
        !(self.labels.is_empty() && self.ragged.is_empty() && self.reserve.is_empty())
    }

    /// Validates every ragged field.
    pub fn validate(&self) -> Result<()> {
        for (name, field) in &self.ragged {
            field.validate(name)?;
        }
        Ok(())
    }

    /// Prepares repeated row-range copies out of this slice.
    pub(crate) fn cutter(&self) -> RowCutter<'_> {
        RowCutter {
            offsets: self.ragged.iter().map(|(_, f)| f.row_offsets()).collect(),
            slice: self,
        }
    }

    /// Appends the rows of `other` after the rows of `self`, column by column.
    ///
    /// An empty slice without columns adopts `other` as-is. Otherwise both
    /// slices must carry the same columns in the same order.
    pub fn append(&mut self, other: ColumnSlice) -> Result<()> {
        if !self.has_columns() && self.num_rows == 0 {
            *self = other;
            return Ok(());
        }
        if !other.has_columns() && other.num_rows == 0 {
            return Ok(());
        }
        self.check_layout(&other)?;

        for ((_, mine), (_, mut theirs)) in self.labels.iter_mut().zip(other.labels) {
            mine.append(&mut theirs);
        }
        for ((_, mine), (_, theirs)) in self.ragged.iter_mut().zip(other.ragged) {
            mine.append(theirs);
        }
        for ((name, mine), (_, theirs)) in self.reserve.iter_mut().zip(other.reserve) {
            mine.append(name, theirs)?;
        }
        self.num_rows += other.num_rows;
        Ok(())
    }

    fn check_layout(&self, other: &ColumnSlice) -> Result<()> {
        let names = |s: &ColumnSlice| -> Vec<String> {
            s.labels
                .iter()
                .map(|(n, _)| n.clone())
                .chain(s.ragged.iter().map(|(n, _)| n.clone()))
                .chain(s.reserve.iter().map(|(n, _)| n.clone()))
                .collect()
        };
        let (mine, theirs) = (names(self), names(other));
        if mine != theirs {
            return Err(PipelineError::SchemaMismatch(format!(
                "column layout mismatch: {:?} vs {:?}",
                mine, theirs
            )));
        }
        Ok(())
    }

    /// Splits the slice at row `at`: `self` keeps rows `[0, at)` and the
    /// returned slice holds rows `[at, num_rows)`.
    pub fn split_off(&mut self, at: usize) -> ColumnSlice {
        let at = at.min(self.num_rows);
        let tail = ColumnSlice {
            num_rows: self.num_rows - at,
            labels: self
                .labels
                .iter_mut()
                .map(|(n, v)| (n.clone(), v.split_off(at)))
                .collect(),
            ragged: self
                .ragged
                .iter_mut()
                .map(|(n, f)| (n.clone(), f.split_off(at)))
                .collect(),
            reserve: self
                .reserve
                .iter_mut()
                .map(|(n, a)| (n.clone(), a.split_off(at)))
                .collect(),
        };
        self.num_rows = at;
        tail
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        usize,
        Vec<(String, Vec<f32>)>,
        Vec<(String, RaggedField)>,
        Vec<(String, DenseArray)>,
    ) {
        (self.num_rows, self.labels, self.ragged, self.reserve)
    }
}

/// Copies row ranges out of a [`ColumnSlice`] using precomputed value offsets,
/// so cutting many batches from one file stays linear in the file size.
pub(crate) struct RowCutter<'a> {
    slice: &'a ColumnSlice,
    offsets: Vec<Vec<usize>>,
}

impl RowCutter<'_> {
    pub(crate) fn cut(&self, rows: Range<usize>) -> ColumnSlice {
        let slice = self.slice;
        ColumnSlice {
            num_rows: rows.len(),
            labels: slice
                .labels
                .iter()
                .map(|(n, v)| (n.clone(), v[rows.clone()].to_vec()))
                .collect(),
            ragged: slice
                .ragged
                .iter()
                .zip(&self.offsets)
                .map(|((n, f), offsets)| (n.clone(), f.slice_with_offsets(offsets, rows.clone())))
                .collect(),
            reserve: slice
                .reserve
                .iter()
                .map(|(n, a)| (n.clone(), a.slice(rows.clone())))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_slice(start: i64, rows: usize) -> ColumnSlice {
        let ids: Vec<i64> = (start..start + rows as i64).collect();
        ColumnSlice::new(rows)
            .with_label("label", ids.iter().map(|&i| i as f32).collect())
            .unwrap()
            .with_ragged(
                "tags",
                RaggedField::from_rows(ids.iter().map(|&i| vec![i; (i % 3) as usize])),
            )
            .unwrap()
            .with_reserve("id", DenseArray::Int64(ids.clone()))
            .unwrap()
    }

    #[test]
    fn test_ragged_validate_detects_mismatch() {
        let ok = RaggedField::try_new("f", vec![1, 2], vec![1, 2, 3]);
        assert!(ok.is_ok());

        let err = RaggedField::try_new("f", vec![1, 2], vec![1, 2]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CorruptInput { lengths_sum: 3, values_len: 2, .. }
        ));

        let negative = RaggedField::from_parts_unchecked(vec![-1, 2], vec![1]);
        assert!(negative.validate("f").is_err());
    }

    #[test]
    fn test_ragged_split_off_uses_cumulative_length() {
        let mut field = RaggedField::from_rows([vec![1, 2], vec![], vec![3], vec![4, 5, 6]]);
        let tail = field.split_off(3);

        assert_eq!(field.lengths(), &[2, 0, 1]);
        assert_eq!(field.values(), &[1, 2, 3]);
        assert_eq!(tail.lengths(), &[3]);
        assert_eq!(tail.values(), &[4, 5, 6]);
    }

    #[test]
    fn test_ragged_rows_and_concat() {
        let a = RaggedField::from_rows([vec![1], vec![2, 3]]);
        let b = RaggedField::from_rows([vec![9, 9, 9]]);
        let joined = RaggedField::concat([a, b]);

        assert_eq!(joined.lengths(), &[1, 2, 3]);
        let rows: Vec<&[i64]> = joined.rows().collect();
        assert_eq!(rows, vec![&[1][..], &[2, 3][..], &[9, 9, 9][..]]);
    }

    #[test]
    fn test_fold_into_buckets_handles_negative_ids() {
        let mut field = RaggedField::from_rows([vec![-3, 7, 10]]);
        field.fold_into_buckets(5);
        assert_eq!(field.values(), &[2, 2, 0]);
    }

    #[test]
    fn test_column_slice_rejects_row_mismatch() {
        let result = ColumnSlice::new(3).with_label("label", vec![1.0, 2.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_append_and_split_preserve_row_order() {
        let mut slice = ColumnSlice::default();
        slice.append(sample_slice(0, 4)).unwrap();
        slice.append(sample_slice(4, 3)).unwrap();
        assert_eq!(slice.num_rows(), 7);

        let tail = slice.split_off(5);
        assert_eq!(slice.num_rows(), 5);
        assert_eq!(tail.num_rows(), 2);
        assert_eq!(tail.labels()[0].1, vec![5.0, 6.0]);
        assert_eq!(tail.reserve()[0].1, DenseArray::Int64(vec![5, 6]));
        slice.validate().unwrap();
        tail.validate().unwrap();

        let tags = &tail.ragged()[0].1;
        assert_eq!(tags.lengths(), &[2, 0]);
        assert_eq!(tags.values(), &[5, 5]);
    }

    #[test]
    fn test_append_rejects_layout_change() {
        let mut slice = sample_slice(0, 2);
        let other = ColumnSlice::new(1).with_label("other", vec![0.0]).unwrap();
        let err = slice.append(other).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch(_)));
        assert!(err.is_corrupt_input());

        let retyped = ColumnSlice::new(1)
            .with_label("label", vec![7.0])
            .unwrap()
            .with_ragged("tags", RaggedField::from_rows([vec![7i64]]))
            .unwrap()
            .with_reserve("id", DenseArray::Utf8(vec!["7".into()]))
            .unwrap();
        let err = slice.append(retyped).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch(ref m) if m.contains("changed type")));
    }

    #[test]
    fn test_cutter_matches_split() {
        let slice = sample_slice(0, 10);
        let cutter = slice.cutter();
        let middle = cutter.cut(3..7);

        assert_eq!(middle.num_rows(), 4);
        assert_eq!(middle.labels()[0].1, vec![3.0, 4.0, 5.0, 6.0]);
        let tags = &middle.ragged()[0].1;
        assert_eq!(tags.lengths(), &[0, 1, 2, 0]);
        assert_eq!(tags.values(), &[4, 5, 5]);
    }

    #[test]
    fn test_reserve_type_parsing() {
        assert_eq!("string".parse::<ReserveType>().unwrap(), ReserveType::Utf8);
        assert_eq!("INT64".parse::<ReserveType>().unwrap(), ReserveType::Int64);
        assert!("bytes".parse::<ReserveType>().is_err());
    }
}
