//! src/pipeline/orchestrator.rs
//!
//! The `Pipeline`: computes this task's shard, spawns the workers and exposes
//! the single-pass batch stream.
//!
//! # Lifecycle
//! 1. `Pipeline::new` resolves and shards the input, spawns
//!    `min(num_workers, shard files)` workers and fills the file queue with the
//!    shard followed by one end marker per worker. Workers block on the start
//!    barrier.
//! 2. The first `iter()` releases the barrier; the returned [`BatchIter`] polls
//!    the data queue until every worker has sent its completion sentinel.
//! 3. Exhaustion, `stop()` or drop tears everything down. The orchestrator is
//!    the only owner of teardown: workers never close shared queues.

use crate::batch::Batch;
use crate::error::{PipelineError, Result};
use crate::readers::{FileDecoder, ParquetReader};
use crate::shard::{repeat_epochs, resolve_input_paths, shard_files};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::PipelineConfig;
use super::queues::{
    data_queue, start_barrier, DataConsumer, DrainPolicy, Fetch, FileQueue, FileTask, StartGate,
    StopToken, WorkerMessage,
};
use super::worker::{WorkerContext, WorkerProcess, WorkerSummary};

/// Counters kept by the consumer side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub batches: usize,
    pub rows: usize,
    /// Workers that delivered their completion sentinel.
    pub completed_workers: usize,
}

/// Parallel batching pipeline over one task's shard of the input files.
pub struct Pipeline {
    config: PipelineConfig,
    files: Vec<PathBuf>,
    file_queue: FileQueue,
    stop: StopToken,
    start_gate: Option<StartGate>,
    consumer: Option<DataConsumer>,
    workers: Vec<JoinHandle<WorkerSummary>>,
    num_workers: usize,
    summaries: Vec<WorkerSummary>,
    stats: PipelineStats,
    consumed: bool,
    stopped: bool,
}

impl Pipeline {
    /// Creates a pipeline over a comma-separated list of glob patterns.
    pub fn new(input_path: &str, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let files = resolve_input_paths(input_path)?;
        Self::from_files(files, config)
    }

    /// Creates a pipeline over an explicit global file list, decoding Parquet.
    pub fn from_files(files: Vec<PathBuf>, config: PipelineConfig) -> Result<Self> {
        let decoder = Arc::new(ParquetReader::new(config.read_batch_size));
        Self::with_decoder(files, config, decoder)
    }

    /// Creates a pipeline with a custom decoder.
    ///
    /// `files` is the global list shared by every task; this task only reads
    /// its `task_index` shard.
    pub fn with_decoder(
        files: Vec<PathBuf>,
        config: PipelineConfig,
        decoder: Arc<dyn FileDecoder>,
    ) -> Result<Self> {
        config.validate()?;

        let task_index = config.task_index;
        let shard = shard_files(&files, task_index, config.task_num).to_vec();
        info!(
            task_index,
            task_num = config.task_num,
            total_file_num = files.len(),
            task_file_num = shard.len(),
            "sharded input files"
        );

        let epochs = config.effective_epochs();
        if epochs > 1 {
            info!(task_index, epochs, "repeating train data");
        }
        let tasks = repeat_epochs(&shard, epochs);

        let num_workers = config.num_workers.min(shard.len());
        if num_workers < config.num_workers {
            debug!(
                configured = config.num_workers,
                num_workers, "capping workers at the number of files"
            );
        }

        let stop = StopToken::new();
        let file_queue = FileQueue::new();
        let (start_gate, start) = start_barrier(num_workers);
        let (producer, consumer) =
            data_queue(config.queue_capacity, config.put_timeout, stop.clone());

        let mut pipeline = Self {
            config,
            files: shard,
            file_queue,
            stop,
            start_gate: Some(start_gate),
            consumer: Some(consumer),
            workers: Vec::with_capacity(num_workers),
            num_workers,
            summaries: Vec::new(),
            stats: PipelineStats::default(),
            consumed: false,
            stopped: false,
        };

        // The local producer is dropped before a spawn error propagates, so
        // only live workers hold the data queue open during teardown.
        let layout = Arc::new(pipeline.config.field_layout());
        let mut spawned = Ok(());
        for worker_id in 0..num_workers {
            let ctx = WorkerContext {
                worker_id,
                files: pipeline.file_queue.clone(),
                start: start.clone(),
                stop: pipeline.stop.clone(),
                output: producer.clone(),
                decoder: Arc::clone(&decoder),
                layout: Arc::clone(&layout),
                batch_size: pipeline.config.batch_size,
                drop_remainder: pipeline.config.effective_drop_remainder(),
            };
            match WorkerProcess::spawn(ctx) {
                Ok(handle) => pipeline.workers.push(handle),
                Err(e) => {
                    error!(worker_id, error = %e, "failed to spawn worker");
                    spawned = Err(e);
                    break;
                }
            }
        }
        drop(producer);
        drop(start);
        spawned?;

        for path in tasks {
            pipeline.file_queue.put(FileTask::Path(path));
        }
        for _ in 0..num_workers {
            pipeline.file_queue.put(FileTask::End);
        }
        info!(task_index, num_workers, "pipeline ready");

        Ok(pipeline)
    }

    /// Returns the single-pass batch stream and starts the workers.
    ///
    /// # Errors
    /// [`PipelineError::AlreadyConsumed`] on every call after the first.
    pub fn iter(&mut self) -> Result<BatchIter<'_>> {
        if self.consumed {
            return Err(PipelineError::AlreadyConsumed);
        }
        self.consumed = true;

        if let Some(gate) = self.start_gate.take() {
            gate.release();
            info!(
                task_index = self.config.task_index,
                num_workers = self.num_workers,
                "workers started"
            );
        }

        Ok(BatchIter {
            pipeline: self,
            finished: false,
        })
    }

    /// Stops all workers and releases every queue. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!(task_index = self.config.task_index, "stopping pipeline");

        // Raised before closing the file queue so that a worker seeing the
        // closed queue also sees the stop request and aborts.
        self.stop.stop();
        let pending = self.file_queue.close();
        if pending > 0 {
            debug!(pending, "discarded pending files");
        }
        // Waiters abort if the gate was never released.
        self.start_gate.take();

        if let Some(consumer) = self.consumer.take() {
            let workers = &self.workers;
            consumer.close(DrainPolicy::WhileAlive {
                poll: self.config.poll_timeout,
                alive: &|| workers.iter().any(|h| !h.is_finished()),
            });
        }
        self.join_workers();
    }

    /// Teardown after the stream ended normally.
    fn finish(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.join_workers();
        self.file_queue.close();
        if let Some(consumer) = self.consumer.take() {
            consumer.close(DrainPolicy::Discard);
        }
        info!(
            task_index = self.config.task_index,
            batches = self.stats.batches,
            rows = self.stats.rows,
            "pipeline finished"
        );
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            match handle.join() {
                Ok(summary) => self.summaries.push(summary),
                Err(_) => warn!("worker thread panicked"),
            }
        }
    }

    /// Number of workers actually spawned.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// This task's shard of the input files (one epoch).
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Summaries of joined workers, available once the pipeline has stopped.
    pub fn worker_summaries(&self) -> &[WorkerSummary] {
        &self.summaries
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Single-pass stream of batches from a [`Pipeline`].
///
/// Yields `Err` at most once, after which the stream ends and the pipeline
/// has been stopped.
pub struct BatchIter<'a> {
    pipeline: &'a mut Pipeline,
    finished: bool,
}

impl BatchIter<'_> {
    fn end(&mut self) {
        self.finished = true;
        self.pipeline.finish();
    }

    fn fail(&mut self, err: PipelineError) -> Option<Result<(usize, Batch)>> {
        self.finished = true;
        self.pipeline.stop();
        Some(Err(err))
    }

    /// Like [`next`](Iterator::next), also returning the id of the worker
    /// that assembled the batch.
    pub fn next_with_worker(&mut self) -> Option<Result<(usize, Batch)>> {
        if self.finished {
            return None;
        }
        let expected = self.pipeline.num_workers;
        let poll_timeout = self.pipeline.config.poll_timeout;

        loop {
            let Some(consumer) = self.pipeline.consumer.as_ref() else {
                self.finished = true;
                return None;
            };

            match consumer.try_receive(poll_timeout) {
                Fetch::Item(WorkerMessage::Batch { worker_id, batch }) => {
                    let stats = &mut self.pipeline.stats;
                    stats.batches += 1;
                    stats.rows += batch.num_rows();
                    let every = self.pipeline.config.log_every_n_batches;
                    if every > 0 && stats.batches % every == 0 {
                        info!(
                            task_index = self.pipeline.config.task_index,
                            batches = stats.batches,
                            rows = stats.rows,
                            "pipeline progress"
                        );
                    }
                    return Some(Ok((worker_id, batch)));
                }
                Fetch::Item(WorkerMessage::Done { worker_id, summary }) => {
                    self.pipeline.stats.completed_workers += 1;
                    debug!(
                        worker_id,
                        completed = self.pipeline.stats.completed_workers,
                        expected,
                        rows = summary.rows_emitted,
                        "worker completed"
                    );
                }
                Fetch::Item(WorkerMessage::Failed { worker_id, error }) => {
                    error!(worker_id, error = %error, "worker failed, stopping pipeline");
                    return self.fail(PipelineError::Worker {
                        worker_id,
                        source: Box::new(error),
                    });
                }
                Fetch::Empty => {
                    if self.pipeline.stats.completed_workers >= expected {
                        self.end();
                        return None;
                    }
                }
                Fetch::Closed => {
                    let completed = self.pipeline.stats.completed_workers;
                    if completed >= expected {
                        self.end();
                        return None;
                    }
                    error!(
                        completed,
                        expected, "data queue closed before all workers completed"
                    );
                    return self.fail(PipelineError::WorkersExited {
                        expected,
                        completed,
                    });
                }
            }
        }
    }
}

impl Iterator for BatchIter<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_with_worker().map(|item| item.map(|(_, batch)| batch))
    }
}
