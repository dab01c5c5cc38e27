use std::path::PathBuf;

/// Errors produced by the batching pipeline.
///
/// Queue conditions that are expected during normal operation (a full or
/// empty queue, end-of-work markers, stop requests) are handled as control
/// flow inside the pipeline and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid input pattern '{pattern}': {message}")]
    InputPattern { pattern: String, message: String },

    #[error("corrupt ragged field '{field}': sum(lengths)={lengths_sum} but {values_len} values")]
    CorruptInput {
        field: String,
        lengths_sum: i64,
        values_len: usize,
    },

    #[error("column '{column}' not found in {}", path.display())]
    MissingColumn { path: PathBuf, column: String },

    #[error("input schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("worker {worker_id} failed: {source}")]
    Worker {
        worker_id: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("{completed} of {expected} workers completed before the data queue closed")]
    WorkersExited { expected: usize, completed: usize },

    #[error("batch stream already consumed; create a new pipeline for another pass")]
    AlreadyConsumed,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Whether this error reports bad input data rather than a lifecycle problem.
    pub fn is_corrupt_input(&self) -> bool {
        match self {
            PipelineError::CorruptInput { .. }
            | PipelineError::MissingColumn { .. }
            | PipelineError::SchemaMismatch(_)
            | PipelineError::Decode { .. }
            | PipelineError::Parquet(_)
            | PipelineError::Arrow(_) => true,
            PipelineError::Worker { source, .. } => source.is_corrupt_input(),
            _ => false,
        }
    }
}
