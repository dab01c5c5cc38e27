//! Configuration for pipeline behaviour
//!
//! The `PipelineConfig` struct stores the parameters that control how input
//! files are sharded, decoded and batched.
//!
//! Example:
//! ```ignore
//! let config = PipelineConfig::builder()
//!     .batch_size(1024)
//!     .label_fields(["click"])
//!     .effective_fields(["user_ids", "item_ids"])
//!     .num_workers(8)
//!     .queue_capacity(32)
//!     .drop_remainder(true)
//!     .build();
//! ```
//!
//! Configurations can also be loaded from JSON; every key is optional and
//! timeouts are given in milliseconds:
//! ```json
//! { "batch_size": 1024, "label_fields": ["click"], "effective_fields": ["ids"],
//!   "poll_timeout_ms": 1000 }
//! ```
//!
//! # Performance considerations:
//! - `num_workers`: More workers decode more files in parallel but each holds a
//!                  decoded file and a remainder in memory
//! - `queue_capacity`: Upper bound on finished batches buffered ahead of the consumer

use crate::columns::ReserveType;
use crate::error::{PipelineError, Result};
use crate::readers::FieldLayout;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Which kind of pass the pipeline feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Labels are read; the shard is repeated `num_epochs` times.
    #[default]
    Train,
    /// Labels are read; a single pass.
    Eval,
    /// Labels are ignored and the trailing partial batch is always kept.
    Predict,
}

/// Configuration for a batching pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rows per batch (must be > 0)
    pub batch_size: usize,
    /// Scalar label columns, in output order (may be empty for inference)
    pub label_fields: Vec<String>,
    /// Ragged feature columns flattened into `feature`, in order (non-empty)
    pub effective_fields: Vec<String>,
    /// Passthrough columns copied into each batch
    pub reserve_fields: Vec<String>,
    /// Types of the passthrough columns, parallel to `reserve_fields`
    pub reserve_types: Vec<ReserveType>,
    /// Whether to discard each worker's final partial batch
    pub drop_remainder: bool,
    /// Number of parallel workers, capped at the number of files in the shard
    pub num_workers: usize,
    /// Maximum number of finished batches buffered ahead of the consumer
    pub queue_capacity: usize,
    /// Index of this task among `task_num` tasks sharing the file list
    pub task_index: usize,
    /// Number of tasks the file list is split across
    pub task_num: usize,
    pub mode: PipelineMode,
    /// Times the shard is repeated in `Train` mode
    pub num_epochs: usize,
    /// How long a worker waits on a full data queue before re-checking
    /// the stop signal.
    #[serde(rename = "put_timeout_ms", deserialize_with = "millis")]
    pub put_timeout: Duration,
    /// How long the consumer waits for a batch before re-checking whether
    /// every worker has finished.
    #[serde(rename = "poll_timeout_ms", deserialize_with = "millis")]
    pub poll_timeout: Duration,
    /// Log consumer progress every this many batches (0 disables)
    pub log_every_n_batches: usize,
    /// Rows per Arrow record batch while decoding a file
    pub read_batch_size: usize,
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            label_fields: Vec::new(),
            effective_fields: Vec::new(),
            reserve_fields: Vec::new(),
            reserve_types: Vec::new(),
            drop_remainder: false,
            num_workers: 8,
            queue_capacity: 32,
            task_index: 0,
            task_num: 1,
            mode: PipelineMode::Train,
            num_epochs: 1,
            put_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(1),
            log_every_n_batches: 200,
            read_batch_size: 8192,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::Config(format!("failed to parse config: {}", e)))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text).map_err(|e| match e {
            PipelineError::Config(msg) => {
                PipelineError::Config(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Checks every option, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Config(msg));

        if self.batch_size == 0 {
            return fail("batch_size must be greater than 0".to_string());
        }
        if self.effective_fields.is_empty() {
            return fail("effective_fields must name at least one ragged column".to_string());
        }
        if self.num_workers == 0 {
            return fail("num_workers must be greater than 0".to_string());
        }
        if self.queue_capacity == 0 {
            return fail(
                "queue_capacity must be greater than 0 to bound memory without deadlock"
                    .to_string(),
            );
        }
        if self.task_num == 0 || self.task_index >= self.task_num {
            return fail(format!(
                "task_index {} out of range for task_num {}",
                self.task_index, self.task_num
            ));
        }
        if self.num_epochs == 0 {
            return fail("num_epochs must be at least 1".to_string());
        }
        if self.reserve_fields.len() != self.reserve_types.len() {
            return fail(format!(
                "reserve_fields has {} entries but reserve_types has {}",
                self.reserve_fields.len(),
                self.reserve_types.len()
            ));
        }
        if self.poll_timeout.is_zero() || self.put_timeout.is_zero() {
            return fail("poll and put timeouts must be non-zero".to_string());
        }

        let mut seen = HashSet::new();
        for name in self
            .active_label_fields()
            .iter()
            .chain(&self.effective_fields)
            .chain(&self.reserve_fields)
        {
            if name == crate::batch::Batch::FEATURE {
                return fail(format!("'{}' is reserved for the flattened features", name));
            }
            if !seen.insert(name.as_str()) {
                return fail(format!("column '{}' is configured more than once", name));
            }
        }
        Ok(())
    }

    /// Label columns actually read in the configured mode.
    pub fn active_label_fields(&self) -> &[String] {
        match self.mode {
            PipelineMode::Predict => &[],
            _ => &self.label_fields,
        }
    }

    /// Whether the final partial batch of each worker is discarded.
    pub fn effective_drop_remainder(&self) -> bool {
        self.drop_remainder && self.mode != PipelineMode::Predict
    }

    /// Number of passes over the shard.
    pub fn effective_epochs(&self) -> usize {
        match self.mode {
            PipelineMode::Train => self.num_epochs,
            _ => 1,
        }
    }

    /// Columns each worker decodes.
    pub fn field_layout(&self) -> FieldLayout {
        FieldLayout {
            labels: self.active_label_fields().to_vec(),
            ragged: self.effective_fields.clone(),
            reserve: self
                .reserve_fields
                .iter()
                .cloned()
                .zip(self.reserve_types.iter().copied())
                .collect(),
        }
    }
}

/// Builder for PipelineConfig with method chaining
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

fn names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

impl PipelineConfigBuilder {
    /// Set the batch size (must be > 0)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn label_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.label_fields = names(fields);
        self
    }

    pub fn effective_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.effective_fields = names(fields);
        self
    }

    /// Add a passthrough column of the given type.
    pub fn reserve_field(mut self, name: impl Into<String>, kind: ReserveType) -> Self {
        self.config.reserve_fields.push(name.into());
        self.config.reserve_types.push(kind);
        self
    }

    pub fn drop_remainder(mut self, drop: bool) -> Self {
        self.config.drop_remainder = drop;
        self
    }

    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    /// Set the data queue capacity (prefetch size).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Select shard `index` out of `num` tasks.
    pub fn task(mut self, index: usize, num: usize) -> Self {
        self.config.task_index = index;
        self.config.task_num = num;
        self
    }

    pub fn mode(mut self, mode: PipelineMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn num_epochs(mut self, epochs: usize) -> Self {
        self.config.num_epochs = epochs;
        self
    }

    /// Set the wait per attempt when the data queue is full.
    ///
    /// - Too low: Workers wake up often while the consumer is slow.
    /// - Too high: Slower reaction to `stop()` when the queue is full.
    pub fn put_timeout(mut self, timeout: Duration) -> Self {
        self.config.put_timeout = timeout;
        self
    }

    /// Set the consumer polling interval.
    ///
    /// Bounds the latency between the last worker finishing and the batch
    /// stream ending.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    pub fn log_every_n_batches(mut self, n: usize) -> Self {
        self.config.log_every_n_batches = n;
        self
    }

    pub fn read_batch_size(mut self, rows: usize) -> Self {
        self.config.read_batch_size = rows;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}
