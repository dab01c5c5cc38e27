pub mod assembler;
pub mod batch;
pub mod columns;
pub mod error;
pub mod pipeline;
pub mod readers;
pub mod record;
pub mod shard;

pub use assembler::BatchAssembler;
pub use batch::{Batch, BatchField};
pub use columns::{ColumnSlice, DenseArray, RaggedField, ReserveType};
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineConfig, PipelineConfigBuilder, PipelineMode};
pub use readers::{FieldLayout, FileDecoder, ParquetReader};
pub use record::InputRecord;
