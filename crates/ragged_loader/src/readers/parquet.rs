use super::{FieldLayout, FileDecoder};
use crate::columns::{ColumnSlice, DenseArray, RaggedField, ReserveType};
use crate::error::{PipelineError, Result};
use arrow::array::{Array, ArrayRef, AsArray, GenericListArray, OffsetSizeTrait, UInt64Array};
use arrow::compute::{cast, take};
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};
use arrow::record_batch::RecordBatch;
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ProjectionMask};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Parquet decoder for ragged training data.
///
/// Label columns may be stored as plain numerics or as single-element lists
/// (`list<float>`); the first element of each cell is taken. Feature columns
/// must be `list<int>` or `large_list<int>`; null cells decode as empty lists,
/// while null elements inside a list are rejected. Reserve columns must not
/// contain nulls.
///
/// # Example
/// ```ignore
/// let reader = ParquetReader::new(8192);
/// let layout = FieldLayout::new(vec!["click".into()], vec!["user_ids".into()]);
/// let slice = reader.decode(Path::new("part-0000.parquet"), &layout)?;
/// ```
#[derive(Debug, Clone)]
pub struct ParquetReader {
    read_batch_size: usize,
}

impl Default for ParquetReader {
    fn default() -> Self {
        Self::new(8192)
    }
}

impl ParquetReader {
    /// Creates a reader. `read_batch_size` is the number of rows Arrow decodes
    /// per record batch; it does not affect the training batch size.
    pub fn new(read_batch_size: usize) -> Self {
        Self {
            read_batch_size: read_batch_size.max(1),
        }
    }
}

impl FileDecoder for ParquetReader {
    /// Reads every row of `path` for the columns in `layout`.
    ///
    /// # Errors
    /// 1. Fails if the file does not exist or is not valid Parquet.
    /// 2. Fails if a requested column is missing or has an unsupported type.
    fn decode(&self, path: &Path, layout: &FieldLayout) -> Result<ColumnSlice> {
        let source = Source { path };

        let file = File::open(path)
            .map_err(|e| source.error(format!("failed to open Parquet file: {}", e)))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| source.error(format!("not a valid Parquet file: {}", e)))?
            .with_batch_size(self.read_batch_size);

        // Resolve projected column indices (Parquet needs numeric indices)
        let mut field_indices = Vec::new();
        for column in layout.columns() {
            let index = builder
                .schema()
                .index_of(column)
                .map_err(|_| PipelineError::MissingColumn {
                    path: path.to_path_buf(),
                    column: column.to_string(),
                })?;
            field_indices.push(index);
        }
        field_indices.sort_unstable();
        field_indices.dedup();

        let projection_mask = ProjectionMask::roots(builder.parquet_schema(), field_indices);
        let reader = builder
            .with_projection(projection_mask)
            .build()
            .map_err(|e| source.error(e.to_string()))?;

        let mut slice = source.empty_slice(layout)?;
        for batch in reader {
            let batch = batch.map_err(|e| source.error(e.to_string()))?;
            trace!(path = %path.display(), rows = batch.num_rows(), "decoded record batch");
            slice.append(source.decode_batch(&batch, layout)?)?;
        }
        Ok(slice)
    }
}

/// Per-file decoding helpers; carries the path for error messages.
struct Source<'a> {
    path: &'a Path,
}

impl Source<'_> {
    fn error(&self, message: String) -> PipelineError {
        PipelineError::Decode {
            path: PathBuf::from(self.path),
            message,
        }
    }

    fn empty_slice(&self, layout: &FieldLayout) -> Result<ColumnSlice> {
        let mut slice = ColumnSlice::new(0);
        for name in &layout.labels {
            slice = slice.with_label(name.clone(), Vec::new())?;
        }
        for name in &layout.ragged {
            slice = slice.with_ragged(name.clone(), RaggedField::default())?;
        }
        for (name, kind) in &layout.reserve {
            slice = slice.with_reserve(name.clone(), DenseArray::empty(*kind))?;
        }
        Ok(slice)
    }

    fn decode_batch(&self, batch: &RecordBatch, layout: &FieldLayout) -> Result<ColumnSlice> {
        let mut slice = ColumnSlice::new(batch.num_rows());
        for name in &layout.labels {
            let labels = self.decode_label(name, self.column(batch, name)?)?;
            slice = slice.with_label(name.clone(), labels)?;
        }
        for name in &layout.ragged {
            let field = self.decode_ragged(name, self.column(batch, name)?)?;
            slice = slice.with_ragged(name.clone(), field)?;
        }
        for (name, kind) in &layout.reserve {
            let values = self.decode_dense(name, self.column(batch, name)?, *kind)?;
            slice = slice.with_reserve(name.clone(), values)?;
        }
        Ok(slice)
    }

    fn column<'b>(&self, batch: &'b RecordBatch, name: &str) -> Result<&'b ArrayRef> {
        batch
            .column_by_name(name)
            .ok_or_else(|| PipelineError::MissingColumn {
                path: PathBuf::from(self.path),
                column: name.to_string(),
            })
    }

    fn decode_label(&self, name: &str, column: &ArrayRef) -> Result<Vec<f32>> {
        let scalars = self.unwrap_singletons(name, column)?;
        let values = cast(scalars.as_ref(), &DataType::Float32)
            .map_err(|e| self.error(format!("label column '{}': {}", name, e)))?;
        if values.null_count() > 0 {
            return Err(self.error(format!(
                "label column '{}' has {} null values",
                name,
                values.null_count()
            )));
        }
        Ok(values.as_primitive::<Float32Type>().values().to_vec())
    }

    fn decode_ragged(&self, name: &str, column: &ArrayRef) -> Result<RaggedField> {
        match column.data_type() {
            DataType::List(_) => self.ragged_from_list(name, column.as_list::<i32>()),
            DataType::LargeList(_) => self.ragged_from_list(name, column.as_list::<i64>()),
            other => Err(self.error(format!(
                "feature column '{}' must be a list of integers, found {}",
                name, other
            ))),
        }
    }

    fn ragged_from_list<O: OffsetSizeTrait>(
        &self,
        name: &str,
        list: &GenericListArray<O>,
    ) -> Result<RaggedField> {
        let values = cast(list.values().as_ref(), &DataType::Int64)
            .map_err(|e| self.error(format!("feature column '{}': {}", name, e)))?;
        let values = values.as_primitive::<Int64Type>();
        let offsets = list.value_offsets();

        let mut lengths = Vec::with_capacity(list.len());
        let mut flat = Vec::new();
        for row in 0..list.len() {
            if list.is_null(row) {
                lengths.push(0);
                continue;
            }
            let (start, end) = (offsets[row].as_usize(), offsets[row + 1].as_usize());
            let len = i32::try_from(end - start).map_err(|_| {
                self.error(format!(
                    "feature column '{}' row {} has too many values",
                    name, row
                ))
            })?;
            if let Some(nulls) = values.nulls() {
                if (start..end).any(|i| nulls.is_null(i)) {
                    return Err(self.error(format!(
                        "feature column '{}' has a null value in row {}",
                        name, row
                    )));
                }
            }
            lengths.push(len);
            flat.extend_from_slice(&values.values()[start..end]);
        }

        RaggedField::try_new(name, lengths, flat)
    }

    fn decode_dense(&self, name: &str, column: &ArrayRef, kind: ReserveType) -> Result<DenseArray> {
        let scalars = self.unwrap_singletons(name, column)?;
        let target = match kind {
            ReserveType::Float32 => DataType::Float32,
            ReserveType::Float64 => DataType::Float64,
            ReserveType::Int32 => DataType::Int32,
            ReserveType::Int64 => DataType::Int64,
            ReserveType::Utf8 => DataType::Utf8,
        };
        let values = cast(scalars.as_ref(), &target)
            .map_err(|e| self.error(format!("reserve column '{}' as {}: {}", name, kind, e)))?;
        if values.null_count() > 0 {
            return Err(self.error(format!(
                "reserve column '{}' has {} null values",
                name,
                values.null_count()
            )));
        }

        Ok(match kind {
            ReserveType::Float32 => {
                DenseArray::Float32(values.as_primitive::<Float32Type>().values().to_vec())
            }
            ReserveType::Float64 => {
                DenseArray::Float64(values.as_primitive::<Float64Type>().values().to_vec())
            }
            ReserveType::Int32 => {
                DenseArray::Int32(values.as_primitive::<Int32Type>().values().to_vec())
            }
            ReserveType::Int64 => {
                DenseArray::Int64(values.as_primitive::<Int64Type>().values().to_vec())
            }
            ReserveType::Utf8 => DenseArray::Utf8(
                values
                    .as_string::<i32>()
                    .iter()
                    .map(|v| v.unwrap_or_default().to_string())
                    .collect(),
            ),
        })
    }

    /// Replaces single-element list cells by their element; other types pass through.
    fn unwrap_singletons(&self, name: &str, column: &ArrayRef) -> Result<ArrayRef> {
        match column.data_type() {
            DataType::List(_) => self.first_elements(name, column.as_list::<i32>()),
            DataType::LargeList(_) => self.first_elements(name, column.as_list::<i64>()),
            _ => Ok(column.clone()),
        }
    }

    fn first_elements<O: OffsetSizeTrait>(
        &self,
        name: &str,
        list: &GenericListArray<O>,
    ) -> Result<ArrayRef> {
        let offsets = list.value_offsets();
        let mut indices = Vec::with_capacity(list.len());
        for row in 0..list.len() {
            let (start, end) = (offsets[row].as_usize(), offsets[row + 1].as_usize());
            if list.is_null(row) || start == end {
                return Err(self.error(format!(
                    "column '{}' has an empty cell at row {}",
                    name, row
                )));
            }
            indices.push(start as u64);
        }
        take(list.values().as_ref(), &UInt64Array::from(indices), None)
            .map_err(|e| self.error(format!("column '{}': {}", name, e)))
    }
}
