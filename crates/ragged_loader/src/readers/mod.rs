//! Input file decoders.
//!
//! Workers only see the [`FileDecoder`] trait, so tests can swap in
//! synthetic decoders while production code reads Parquet through
//! [`ParquetReader`].

pub mod parquet;

pub use parquet::ParquetReader;

use crate::columns::{ColumnSlice, ReserveType};
use crate::error::Result;
use std::path::Path;

/// Names (and, for reserve columns, types) of the columns to decode, in the
/// order they should appear in every batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldLayout {
    pub labels: Vec<String>,
    pub ragged: Vec<String>,
    pub reserve: Vec<(String, ReserveType)>,
}

impl FieldLayout {
    pub fn new(labels: Vec<String>, ragged: Vec<String>) -> Self {
        Self {
            labels,
            ragged,
            reserve: Vec::new(),
        }
    }

    pub fn with_reserve(mut self, name: impl Into<String>, kind: ReserveType) -> Self {
        self.reserve.push((name.into(), kind));
        self
    }

    /// All column names to project, labels first.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.labels
            .iter()
            .chain(&self.ragged)
            .map(String::as_str)
            .chain(self.reserve.iter().map(|(n, _)| n.as_str()))
    }
}

/// Decodes one input file into a [`ColumnSlice`] holding every row of the
/// file for the requested columns.
///
/// Implementations must be `Send + Sync`: a single decoder is shared by all
/// workers of a pipeline.
pub trait FileDecoder: Send + Sync {
    fn decode(&self, path: &Path, layout: &FieldLayout) -> Result<ColumnSlice>;
}
