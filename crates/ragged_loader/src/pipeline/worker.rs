//! src/pipeline/worker.rs
//!
//! Worker thread: pulls files, decodes them, assembles batches and pushes them
//! to the data queue.
//!
//! # State machine
//! ```text
//!   WaitStart --token--> Running --no more files--> FlushingRemainder --> Done
//!       |                  |  ^                            |
//!       |                  +--+ one file per step          |
//!       |                  |                               |
//!       +------------------+-------------------------------+--> Aborted
//!                          |                               |     (stop raised / queue closed)
//!                          +-------------------------------+--> Failed
//!                                                                (decode or corrupt input)
//! ```
//!
//! Only `Done` delivers a completion sentinel. `Failed` delivers the error
//! instead; `Aborted` delivers nothing.

use crate::assembler::BatchAssembler;
use crate::batch::Batch;
use crate::error::{PipelineError, Result};
use crate::readers::{FieldLayout, FileDecoder};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, trace, warn};

use super::queues::{
    DataProducer, Emit, Fetch, FileQueue, FileTask, StartWaiter, StopToken, WorkerMessage,
};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    WaitStart,
    Running,
    FlushingRemainder,
    Done,
    Aborted,
    Failed,
}

/// Per-worker counters, returned when the worker thread is joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub state: WorkerState,
    pub files: usize,
    pub rows_read: usize,
    pub batches_emitted: usize,
    pub rows_emitted: usize,
    /// Rows of the trailing partial batch discarded because of `drop_remainder`.
    pub rows_dropped: usize,
}

/// Everything a worker needs, handed over when it is spawned.
pub(crate) struct WorkerContext {
    pub worker_id: usize,
    pub files: FileQueue,
    pub start: StartWaiter,
    pub stop: StopToken,
    pub output: DataProducer,
    pub decoder: Arc<dyn FileDecoder>,
    pub layout: Arc<FieldLayout>,
    pub batch_size: usize,
    pub drop_remainder: bool,
}

pub(crate) struct WorkerProcess {
    ctx: WorkerContext,
    assembler: BatchAssembler,
    summary: WorkerSummary,
}

impl WorkerProcess {
    fn new(ctx: WorkerContext) -> Result<Self> {
        let assembler = BatchAssembler::new(ctx.batch_size)?;
        let summary = WorkerSummary {
            worker_id: ctx.worker_id,
            ..WorkerSummary::default()
        };
        Ok(Self {
            ctx,
            assembler,
            summary,
        })
    }

    /// Spawns the worker on a named thread.
    pub(crate) fn spawn(ctx: WorkerContext) -> Result<thread::JoinHandle<WorkerSummary>> {
        let worker_id = ctx.worker_id;
        let worker = Self::new(ctx)?;
        let handle = thread::Builder::new()
            .name(format!("ragged-loader-worker-{}", worker_id))
            .spawn(move || worker.run())?;
        Ok(handle)
    }

    /// Drives the state machine to a terminal state.
    pub(crate) fn run(mut self) -> WorkerSummary {
        let worker_id = self.ctx.worker_id;
        let mut state = WorkerState::WaitStart;
        loop {
            trace!(worker_id, ?state, "worker step");
            state = match state {
                WorkerState::WaitStart => self.wait_start(),
                WorkerState::Running => self.next_file(),
                WorkerState::FlushingRemainder => self.flush_remainder(),
                WorkerState::Done | WorkerState::Aborted | WorkerState::Failed => break,
            };
        }

        self.summary.state = state;
        match state {
            WorkerState::Done => info!(
                worker_id,
                files = self.summary.files,
                batches = self.summary.batches_emitted,
                rows = self.summary.rows_emitted,
                "worker finished"
            ),
            WorkerState::Aborted => info!(
                worker_id,
                files = self.summary.files,
                remainder_rows = self.assembler.remainder_rows(),
                "worker aborted"
            ),
            _ => {}
        }
        // Closing the producer lets the consumer detect that this worker is gone.
        self.ctx.output.close();
        self.summary
    }

    fn wait_start(&mut self) -> WorkerState {
        if self.ctx.start.wait() {
            debug!(worker_id = self.ctx.worker_id, "worker started");
            WorkerState::Running
        } else {
            debug!(
                worker_id = self.ctx.worker_id,
                "start barrier dropped before release"
            );
            WorkerState::Aborted
        }
    }

    fn next_file(&mut self) -> WorkerState {
        if self.ctx.stop.is_stopped() {
            return WorkerState::Aborted;
        }
        match self.ctx.files.get() {
            Fetch::Item(FileTask::Path(path)) => self.process_file(&path),
            Fetch::Item(FileTask::End) | Fetch::Empty | Fetch::Closed => {
                if self.ctx.stop.is_stopped() {
                    WorkerState::Aborted
                } else {
                    WorkerState::FlushingRemainder
                }
            }
        }
    }

    fn process_file(&mut self, path: &Path) -> WorkerState {
        let worker_id = self.ctx.worker_id;
        let slice = match self.ctx.decoder.decode(path, &self.ctx.layout) {
            Ok(slice) => slice,
            Err(err) => return self.fail(path, err),
        };
        let rows = slice.num_rows();
        let batches = match self.assembler.push(slice) {
            Ok(batches) => batches,
            Err(err) => return self.fail(path, err),
        };
        self.summary.files += 1;
        self.summary.rows_read += rows;
        debug!(
            worker_id,
            path = %path.display(),
            rows,
            batches = batches.len(),
            remainder_rows = self.assembler.remainder_rows(),
            "file assembled"
        );

        for batch in batches {
            if let Err(state) = self.emit(batch) {
                return state;
            }
        }
        WorkerState::Running
    }

    fn flush_remainder(&mut self) -> WorkerState {
        let worker_id = self.ctx.worker_id;
        match self.assembler.finish() {
            Some(rest) if self.ctx.drop_remainder => {
                warn!(
                    worker_id,
                    rows = rest.num_rows(),
                    "dropping trailing partial batch"
                );
                self.summary.rows_dropped += rest.num_rows();
            }
            Some(rest) => {
                let batch = match Batch::from_slice(rest) {
                    Ok(batch) => batch,
                    Err(err) => {
                        error!(worker_id, error = %err, "invalid remainder");
                        return self.report_failure(err);
                    }
                };
                if let Err(state) = self.emit(batch) {
                    return state;
                }
            }
            None => {}
        }
        self.complete()
    }

    /// Pushes the completion sentinel.
    fn complete(&mut self) -> WorkerState {
        let mut summary = self.summary.clone();
        summary.state = WorkerState::Done;
        let message = WorkerMessage::Done {
            worker_id: self.ctx.worker_id,
            summary,
        };
        match self.ctx.output.send(message) {
            Emit::Sent => WorkerState::Done,
            Emit::Stopped | Emit::Disconnected => WorkerState::Aborted,
        }
    }

    fn emit(&mut self, batch: Batch) -> std::result::Result<(), WorkerState> {
        let rows = batch.num_rows();
        let message = WorkerMessage::Batch {
            worker_id: self.ctx.worker_id,
            batch,
        };
        match self.ctx.output.send(message) {
            Emit::Sent => {
                self.summary.batches_emitted += 1;
                self.summary.rows_emitted += rows;
                Ok(())
            }
            Emit::Stopped => Err(WorkerState::Aborted),
            Emit::Disconnected => {
                debug!(
                    worker_id = self.ctx.worker_id,
                    "data queue closed while sending"
                );
                Err(WorkerState::Aborted)
            }
        }
    }

    fn fail(&mut self, path: &Path, err: PipelineError) -> WorkerState {
        error!(
            worker_id = self.ctx.worker_id,
            path = %path.display(),
            error = %err,
            "failed to process file"
        );
        self.report_failure(err)
    }

    /// Sends the error to the consumer (best effort).
    fn report_failure(&mut self, err: PipelineError) -> WorkerState {
        let message = WorkerMessage::Failed {
            worker_id: self.ctx.worker_id,
            error: err,
        };
        if self.ctx.output.send(message) != Emit::Sent {
            warn!(
                worker_id = self.ctx.worker_id,
                "could not deliver worker failure"
            );
        }
        WorkerState::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{ColumnSlice, RaggedField};
    use crate::pipeline::queues::{data_queue, start_barrier, DataConsumer, StartGate};
    use std::path::PathBuf;
    use std::time::Duration;

    /// Decodes a path named `<rows>` into that many rows with label = row index.
    struct SizedDecoder;

    impl FileDecoder for SizedDecoder {
        fn decode(&self, path: &Path, _layout: &FieldLayout) -> Result<ColumnSlice> {
            let name = path.to_string_lossy();
            if name == "corrupt" {
                return ColumnSlice::new(1)
                    .with_ragged("ids", RaggedField::from_parts_unchecked(vec![2], vec![1]));
            }
            let rows: usize = name.parse().map_err(|_| PipelineError::Decode {
                path: path.to_path_buf(),
                message: "not a row count".to_string(),
            })?;
            ColumnSlice::new(rows)
                .with_label("label", (0..rows).map(|r| r as f32).collect())?
                .with_ragged(
                    "ids",
                    RaggedField::from_rows((0..rows as i64).map(|r| vec![r; 2])),
                )
        }
    }

    struct Harness {
        gate: StartGate,
        consumer: DataConsumer,
        worker: WorkerProcess,
    }

    fn harness(files: &[&str], batch_size: usize, drop_remainder: bool) -> Harness {
        let queue = FileQueue::new();
        for file in files {
            queue.put(FileTask::Path(PathBuf::from(file)));
        }
        queue.put(FileTask::End);

        let stop = StopToken::new();
        let (gate, start) = start_barrier(1);
        let (output, consumer) = data_queue(64, Duration::from_millis(5), stop.clone());
        let worker = WorkerProcess::new(WorkerContext {
            worker_id: 0,
            files: queue,
            start,
            stop,
            output,
            decoder: Arc::new(SizedDecoder),
            layout: Arc::new(FieldLayout::new(vec!["label".into()], vec!["ids".into()])),
            batch_size,
            drop_remainder,
        })
        .unwrap();
        Harness {
            gate,
            consumer,
            worker,
        }
    }

    fn collect(consumer: &DataConsumer) -> Vec<WorkerMessage> {
        let mut messages = Vec::new();
        while let Fetch::Item(message) = consumer.try_receive(Duration::from_millis(5)) {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_worker_emits_batches_then_sentinel() {
        let h = harness(&["150", "60"], 100, false);
        h.gate.release();
        let summary = h.worker.run();

        assert_eq!(summary.state, WorkerState::Done);
        assert_eq!(summary.files, 2);
        assert_eq!(summary.rows_read, 210);
        assert_eq!(summary.batches_emitted, 3);
        assert_eq!(summary.rows_emitted, 210);

        let messages = collect(&h.consumer);
        let sizes: Vec<usize> = messages
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::Batch { batch, .. } => Some(batch.num_rows()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![100, 100, 10]);
        assert!(matches!(
            messages.last(),
            Some(WorkerMessage::Done { worker_id: 0, summary }) if summary.state == WorkerState::Done
        ));
    }

    #[test]
    fn test_worker_drops_remainder() {
        let h = harness(&["150", "60"], 100, true);
        h.gate.release();
        let summary = h.worker.run();

        assert_eq!(summary.batches_emitted, 2);
        assert_eq!(summary.rows_emitted, 200);
        assert_eq!(summary.rows_dropped, 10);
    }

    #[test]
    fn test_worker_aborts_without_start() {
        let h = harness(&["150"], 100, false);
        drop(h.gate);
        let summary = h.worker.run();

        assert_eq!(summary.state, WorkerState::Aborted);
        assert_eq!(summary.files, 0);
        assert!(collect(&h.consumer).is_empty());
    }

    #[test]
    fn test_worker_aborts_when_stopped() {
        let h = harness(&["150", "60"], 100, false);
        h.worker.ctx.stop.stop();
        h.gate.release();
        let summary = h.worker.run();

        assert_eq!(summary.state, WorkerState::Aborted);
        assert!(collect(&h.consumer).is_empty());
    }

    #[test]
    fn test_worker_reports_corrupt_input() {
        let h = harness(&["100", "corrupt", "100"], 100, false);
        h.gate.release();
        let summary = h.worker.run();

        assert_eq!(summary.state, WorkerState::Failed);
        assert_eq!(summary.files, 1);

        let messages = collect(&h.consumer);
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[1],
            WorkerMessage::Failed { error, .. } if error.is_corrupt_input()
        ));
    }
}
