//! src/pipeline/queues.rs
//!
//! Queue primitives shared between the orchestrator and its workers.
//!
//! - [`FileQueue`]: unbounded work queue of file paths plus end markers.
//! - [`data_queue`]: bounded channel of finished batches and completion messages.
//! - [`StopToken`]: cooperative cancellation flag.
//! - [`start_barrier`]: one start token per worker, released by the orchestrator.
//!
//! All blocking operations take a bounded timeout so that a stop request is
//! observed at every suspension point.

use crate::batch::Batch;
use crate::error::PipelineError;
use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::worker::WorkerSummary;

/// Result of a non-blocking (or timed) receive.
#[derive(Debug)]
pub enum Fetch<T> {
    Item(T),
    /// Nothing available right now.
    Empty,
    /// The queue was closed and will never yield again.
    Closed,
}

/// One entry of the [`FileQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTask {
    Path(PathBuf),
    /// End-of-work marker. One is enqueued per worker after the last path.
    End,
}

/// Work queue of input files.
///
/// Clones share the same queue. Once [`close`](Self::close)d every clone
/// reports [`Fetch::Closed`] and further puts are rejected.
#[derive(Debug, Clone)]
pub struct FileQueue {
    tx: Sender<FileTask>,
    rx: Receiver<FileTask>,
    closed: Arc<AtomicBool>,
}

impl Default for FileQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FileQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueues a task. Returns `false` if the queue is closed.
    pub fn put(&self, task: FileTask) -> bool {
        if self.is_closed() {
            return false;
        }
        // The queue owns a receiver, so the channel cannot be disconnected here.
        self.tx.send(task).is_ok()
    }

    /// Takes the next task without blocking.
    pub fn get(&self) -> Fetch<FileTask> {
        if self.is_closed() {
            return Fetch::Closed;
        }
        match self.rx.try_recv() {
            Ok(task) => Fetch::Item(task),
            Err(TryRecvError::Empty) => Fetch::Empty,
            Err(TryRecvError::Disconnected) => Fetch::Closed,
        }
    }

    /// Closes the queue and discards pending tasks, returning how many were dropped.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.rx.try_iter().count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Shared cancellation flag. Raising it is permanent.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Creates a start barrier for `workers` workers.
///
/// Each worker holds a [`StartWaiter`] and blocks until the [`StartGate`] is
/// released. Dropping the gate without releasing it makes every waiter abort.
pub fn start_barrier(workers: usize) -> (StartGate, StartWaiter) {
    let (tx, rx) = unbounded();
    (StartGate { tx, workers }, StartWaiter { rx })
}

/// Orchestrator side of the start barrier.
#[derive(Debug)]
pub struct StartGate {
    tx: Sender<()>,
    workers: usize,
}

impl StartGate {
    /// Hands out one start token per worker.
    pub fn release(self) {
        for _ in 0..self.workers {
            // Waiters share one receiver which lives as long as any worker does.
            if self.tx.send(()).is_err() {
                break;
            }
        }
    }
}

/// Worker side of the start barrier.
#[derive(Debug, Clone)]
pub struct StartWaiter {
    rx: Receiver<()>,
}

impl StartWaiter {
    /// Blocks for a start token. Returns `false` if the gate was dropped
    /// without releasing one.
    pub fn wait(&self) -> bool {
        self.rx.recv().is_ok()
    }
}

/// Messages carried by the data queue.
#[derive(Debug)]
pub enum WorkerMessage {
    Batch { worker_id: usize, batch: Batch },
    /// Completion sentinel: the worker has no more batches.
    Done {
        worker_id: usize,
        summary: WorkerSummary,
    },
    /// The worker hit a fatal error and exited.
    Failed {
        worker_id: usize,
        error: PipelineError,
    },
}

/// Outcome of a [`DataProducer::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    Sent,
    /// The stop token was raised while the queue was full.
    Stopped,
    /// The consumer side is gone.
    Disconnected,
}

/// How [`DataConsumer::close`] treats messages still in flight.
#[derive(Clone, Copy)]
pub enum DrainPolicy<'a> {
    /// Drop whatever is buffered right now.
    Discard,
    /// Keep receiving and discarding while `alive` reports a running
    /// producer, waiting at most `poll` per receive. Stops early once every
    /// producer has been dropped.
    WhileAlive {
        poll: Duration,
        alive: &'a dyn Fn() -> bool,
    },
}

impl fmt::Debug for DrainPolicy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainPolicy::Discard => f.write_str("Discard"),
            DrainPolicy::WhileAlive { poll, .. } => {
                f.debug_struct("WhileAlive").field("poll", poll).finish_non_exhaustive()
            }
        }
    }
}

/// Creates the bounded data queue.
///
/// `put_timeout` bounds each send attempt; between attempts the producer
/// re-checks `stop`.
pub fn data_queue(
    capacity: usize,
    put_timeout: Duration,
    stop: StopToken,
) -> (DataProducer, DataConsumer) {
    let (tx, rx) = bounded(capacity);
    (
        DataProducer {
            tx,
            put_timeout,
            stop,
        },
        DataConsumer { rx },
    )
}

/// Sending half of the data queue. Each worker owns one clone.
#[derive(Debug, Clone)]
pub struct DataProducer {
    tx: Sender<WorkerMessage>,
    put_timeout: Duration,
    stop: StopToken,
}

impl DataProducer {
    /// Sends a message, retrying while the queue is full.
    ///
    /// Gives up with [`Emit::Stopped`] if the stop token is raised between
    /// attempts, or [`Emit::Disconnected`] once the consumer is closed.
    pub fn send(&self, message: WorkerMessage) -> Emit {
        let mut message = message;
        let mut attempts = 0usize;
        loop {
            match self.tx.send_timeout(message, self.put_timeout) {
                Ok(()) => return Emit::Sent,
                Err(SendTimeoutError::Timeout(returned)) => {
                    attempts += 1;
                    if self.stop.is_stopped() {
                        return Emit::Stopped;
                    }
                    warn!(
                        attempts,
                        capacity = self.tx.capacity().unwrap_or(0),
                        "data queue full, retrying"
                    );
                    message = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Emit::Disconnected,
            }
        }
    }

    /// Closes this producer. The consumer sees [`Fetch::Closed`] once every
    /// producer is closed and the queue is empty.
    pub fn close(self) {
        drop(self);
    }
}

/// Receiving half of the data queue, owned by the orchestrator.
#[derive(Debug)]
pub struct DataConsumer {
    rx: Receiver<WorkerMessage>,
}

impl DataConsumer {
    /// Waits up to `timeout` for the next message.
    pub fn try_receive(&self, timeout: Duration) -> Fetch<WorkerMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Fetch::Item(message),
            Err(RecvTimeoutError::Timeout) => Fetch::Empty,
            Err(RecvTimeoutError::Disconnected) => Fetch::Closed,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Closes the queue, returning the number of discarded messages.
    ///
    /// Producers blocked on a full queue observe [`Emit::Disconnected`]
    /// afterwards.
    pub fn close(self, policy: DrainPolicy<'_>) -> usize {
        let mut discarded = self.rx.try_iter().count();
        if let DrainPolicy::WhileAlive { poll, alive } = policy {
            while alive() {
                match self.rx.recv_timeout(poll) {
                    Ok(_) => discarded += 1,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            // Messages sent just before the last producer finished.
            discarded += self.rx.try_iter().count();
        }
        if discarded > 0 {
            debug!(discarded, "discarded messages while closing data queue");
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{ColumnSlice, RaggedField};
    use std::thread;
    use std::time::Instant;

    fn batch(rows: usize) -> Batch {
        let slice = ColumnSlice::new(rows)
            .with_ragged("ids", RaggedField::from_rows((0..rows as i64).map(|i| [i])))
            .unwrap();
        Batch::from_slice(slice).unwrap()
    }

    fn message(worker_id: usize) -> WorkerMessage {
        WorkerMessage::Batch {
            worker_id,
            batch: batch(1),
        }
    }

    #[test]
    fn test_file_queue_order_and_close() {
        let queue = FileQueue::new();
        assert!(matches!(queue.get(), Fetch::Empty));

        assert!(queue.put(FileTask::Path("a".into())));
        assert!(queue.put(FileTask::Path("b".into())));
        assert!(queue.put(FileTask::End));
        assert_eq!(queue.len(), 3);

        let worker_view = queue.clone();
        assert!(matches!(worker_view.get(), Fetch::Item(FileTask::Path(p)) if p == PathBuf::from("a")));

        assert_eq!(queue.close(), 2);
        assert!(matches!(worker_view.get(), Fetch::Closed));
        assert!(!queue.put(FileTask::End));
    }

    #[test]
    fn test_stop_token_shared() {
        let token = StopToken::new();
        let clone = token.clone();
        assert!(!clone.is_stopped());
        token.stop();
        token.stop();
        assert!(clone.is_stopped());
    }

    #[test]
    fn test_start_barrier_release() {
        let (gate, waiter) = start_barrier(2);
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let waiter = waiter.clone();
                thread::spawn(move || waiter.wait())
            })
            .collect();
        gate.release();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn test_start_barrier_dropped_aborts_waiters() {
        let (gate, waiter) = start_barrier(3);
        let handle = thread::spawn(move || waiter.wait());
        drop(gate);
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn test_send_returns_stopped_when_full() {
        let stop = StopToken::new();
        let (producer, consumer) = data_queue(1, Duration::from_millis(10), stop.clone());

        assert_eq!(producer.send(message(0)), Emit::Sent);
        stop.stop();

        let started = Instant::now();
        assert_eq!(producer.send(message(0)), Emit::Stopped);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(consumer.len(), 1);
    }

    #[test]
    fn test_send_after_consumer_closed() {
        let (producer, consumer) = data_queue(1, Duration::from_millis(10), StopToken::new());
        assert_eq!(producer.send(message(3)), Emit::Sent);
        assert_eq!(consumer.close(DrainPolicy::Discard), 1);
        assert_eq!(producer.send(message(3)), Emit::Disconnected);
    }

    #[test]
    fn test_try_receive_states() {
        let (producer, consumer) = data_queue(2, Duration::from_millis(10), StopToken::new());
        assert!(matches!(
            consumer.try_receive(Duration::from_millis(5)),
            Fetch::Empty
        ));

        producer.send(message(7));
        match consumer.try_receive(Duration::from_millis(5)) {
            Fetch::Item(WorkerMessage::Batch { worker_id, batch }) => {
                assert_eq!(worker_id, 7);
                assert_eq!(batch.num_rows(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        producer.close();
        assert!(matches!(
            consumer.try_receive(Duration::from_millis(5)),
            Fetch::Closed
        ));
    }

    #[test]
    fn test_drain_while_alive_unblocks_producer() {
        let (producer, consumer) = data_queue(1, Duration::from_millis(5), StopToken::new());
        let handle = thread::spawn(move || {
            let mut sent = 0;
            while producer.send(message(1)) == Emit::Sent {
                sent += 1;
                if sent == 10 {
                    break;
                }
            }
            sent
        });

        let discarded = consumer.close(DrainPolicy::WhileAlive {
            poll: Duration::from_millis(5),
            alive: &|| !handle.is_finished(),
        });
        let sent = handle.join().unwrap();
        assert_eq!(sent, 10);
        assert_eq!(discarded, 10);
    }

    #[test]
    fn test_drain_ends_when_no_producer_runs() {
        // A producer handle that outlives every running thread must not
        // keep the drain waiting for a disconnect.
        let (producer, consumer) = data_queue(4, Duration::from_millis(5), StopToken::new());
        assert_eq!(producer.send(message(0)), Emit::Sent);
        assert_eq!(producer.send(message(0)), Emit::Sent);

        let start = Instant::now();
        let discarded = consumer.close(DrainPolicy::WhileAlive {
            poll: Duration::from_millis(5),
            alive: &|| false,
        });
        assert_eq!(discarded, 2);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(producer.send(message(0)), Emit::Disconnected);
    }
}
