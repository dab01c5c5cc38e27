//! src/pipeline/mod.rs
//!
//! This module implements the parallel batching `Pipeline`.
//!
//! # Architecture Overview
//!
//! ```text
//!              input_path ("a/*.parquet,b/*.parquet")
//!                         │ resolve + shard (task_index / task_num)
//!                         ↓
//!                  ┌──────────────┐
//!                  │   Pipeline   │ ←───── PipelineConfig
//!                  └──────┬───────┘
//!                         │ paths + one End marker per worker
//!                         ↓
//!                  ┌──────────────┐
//!                  │  FileQueue   │
//!                  └──────┬───────┘
//!             ┌───────────┼───────────┐   start barrier, stop token
//!             ↓           ↓           ↓
//!        [Worker 0]  [Worker 1]  [Worker N-1]   decode → BatchAssembler
//!             │           │           │        (own remainder each)
//!             └───────────┼───────────┘
//!                         ↓ Batch / Done / Failed
//!                  ┌──────────────┐
//!                  │  DataQueue   │ (bounded, queue_capacity)
//!                  └──────┬───────┘
//!                         ↓
//!                  ┌──────────────┐
//!                  │  BatchIter   │ (single pass)
//!                  └──────────────┘
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/pipeline/
//! ├── mod.rs             # Public API exports + module-level architecture docs
//! ├── config.rs          # PipelineConfig, builder, and validation
//! ├── orchestrator.rs    # Pipeline, BatchIter and teardown
//! ├── queues.rs          # FileQueue, data queue, stop token, start barrier
//! └── worker.rs          # Worker state machine
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! let config = PipelineConfig::builder()
//!     .batch_size(1024)
//!     .label_fields(["click"])
//!     .effective_fields(["user_ids", "item_ids"])
//!     .num_workers(8)
//!     .build();
//!
//! let mut pipeline = Pipeline::new("data/part-*.parquet", config)?;
//! for batch in pipeline.iter()? {
//!     let batch = batch?;
//!     // batch.label("click"), batch.feature(), ...
//! }
//! ```
//!
//! # Performance Guidelines
//!
//! ## Memory Usage
//! - Per worker: one decoded file plus a remainder of fewer than `batch_size` rows
//! - Queue: at most `queue_capacity` finished batches
//!
//! ## Notes:
//! - Workers are capped at the number of files in the shard; provide at least
//!   `num_workers` files per task to keep them busy.
//! - Batches of different workers interleave; order is only defined per worker.

mod config;
mod orchestrator;
mod queues;
mod worker;

pub use config::{PipelineConfig, PipelineConfigBuilder, PipelineMode};
pub use orchestrator::{BatchIter, Pipeline, PipelineStats};
pub use queues::{
    data_queue, start_barrier, DataConsumer, DataProducer, DrainPolicy, Emit, Fetch, FileQueue,
    FileTask, StartGate, StartWaiter, StopToken, WorkerMessage,
};
pub use worker::{WorkerState, WorkerSummary};
