//! Ingest pipeline: bounded admission queue + single sequential consumer
//!
//! Producers call [`IngestPipeline::submit`] from any task. Submission never
//! blocks: a full queue rejects the point. One consumer task drains the queue
//! in order and hands each command to a [`PointSink`], which is the only
//! code allowed to touch the durability log and the in-memory table.
//!
//! ```text
//! producers ──try_send──▶ [ bounded queue ] ──recv──▶ consumer ──▶ PointSink
//! ```

use crate::storage::error::{Rejected, StorageError, StorageResult};
use crate::storage::types::Point;
use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Default admission queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Receiver of the consumer's commands, driven strictly sequentially
#[async_trait]
pub trait PointSink: Send + 'static {
    /// Apply one accepted point. Failures are handled (logged, dropped) by
    /// the sink; the producer was already told the point was accepted.
    async fn ingest(&mut self, point: Point);

    /// Flush buffered state on request
    async fn flush(&mut self) -> StorageResult<()>;

    /// Called on every interval tick, when an interval is configured
    async fn tick(&mut self) {}
}

/// Work items carried by the queue
enum Command {
    Point(Point),
    Flush(oneshot::Sender<StorageResult<()>>),
}

/// Pipeline settings
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Maximum number of pending commands
    pub queue_capacity: usize,
    /// Period of [`PointSink::tick`], if any
    pub tick_interval: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tick_interval: None,
        }
    }
}

/// Tally of a batch submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub accepted: usize,
    pub rejected: usize,
}

/// Handle to the admission queue and its consumer task
pub struct IngestPipeline {
    /// `None` once closed
    sender: RwLock<Option<mpsc::Sender<Command>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    capacity: usize,
}

impl IngestPipeline {
    /// Spawn the consumer task on the current Tokio runtime
    pub fn start<S: PointSink>(sink: S, config: PipelineConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(run_consumer(sink, rx, config.tick_interval));

        Self {
            sender: RwLock::new(Some(tx)),
            consumer: Mutex::new(Some(handle)),
            capacity,
        }
    }

    /// Enqueue a point without blocking.
    ///
    /// `Ok` only guarantees the point was queued, not that it is durable.
    pub fn submit(&self, point: Point) -> Result<(), Rejected> {
        let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = sender.as_ref() else {
            return Err(Rejected::ShuttingDown);
        };

        match tx.try_send(Command::Point(point)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Rejected::QueueFull),
            Err(TrySendError::Closed(_)) => Err(Rejected::ShuttingDown),
        }
    }

    /// Submit each point in turn; never fails as a whole
    pub fn submit_batch(&self, points: impl IntoIterator<Item = Point>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for point in points {
            match self.submit(point) {
                Ok(()) => outcome.accepted += 1,
                Err(_) => outcome.rejected += 1,
            }
        }
        outcome
    }

    /// Ask the consumer to flush, after every command queued before this one.
    ///
    /// Unlike [`submit`](Self::submit), this waits for queue space.
    pub async fn flush(&self) -> StorageResult<()> {
        let tx = self
            .sender
            .read()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire queue sender lock: {}", e)))?
            .clone()
            .ok_or(StorageError::ShuttingDown)?;

        let (reply, result) = oneshot::channel();
        tx.send(Command::Flush(reply))
            .await
            .map_err(|_| StorageError::ShuttingDown)?;
        drop(tx);

        result.await.map_err(|_| StorageError::ShuttingDown)?
    }

    /// Stop accepting submissions, let the consumer drain what was already
    /// accepted, and wait for it to exit. Idempotent.
    pub async fn close(&self) {
        let sender = self
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let handle = self.consumer.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Ingest consumer task failed: {}", e);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Commands waiting in the queue
    pub fn pending(&self) -> usize {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |tx| self.capacity - tx.capacity())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

async fn run_consumer<S: PointSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<Command>,
    tick_interval: Option<Duration>,
) {
    let mut ticker = tick_interval.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Point(point)) => sink.ingest(point).await,
                Some(Command::Flush(reply)) => {
                    let _ = reply.send(sink.flush().await);
                }
                None => break,
            },
            _ = next_tick(&mut ticker) => sink.tick().await,
        }
    }

    tracing::info!("Ingest consumer stopped");
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::{Notify, Semaphore};

    #[derive(Default, Clone)]
    struct Recorder {
        seen: Arc<std::sync::Mutex<Vec<i64>>>,
        flushes: Arc<AtomicUsize>,
        ticks: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<i64> {
            self.seen.lock().unwrap().clone()
        }
    }

    struct RecordingSink {
        recorder: Recorder,
        /// When set, the first ingest announces itself and waits for a permit
        gate: Option<(Arc<Notify>, Arc<Semaphore>)>,
    }

    #[async_trait]
    impl PointSink for RecordingSink {
        async fn ingest(&mut self, point: Point) {
            if let Some((started, permits)) = self.gate.take() {
                started.notify_one();
                permits.acquire().await.unwrap().forget();
            }
            self.recorder.seen.lock().unwrap().push(point.timestamp_unix_nano);
        }

        async fn flush(&mut self) -> StorageResult<()> {
            self.recorder.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn tick(&mut self) {
            self.recorder.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn start(capacity: usize) -> (IngestPipeline, Recorder) {
        let recorder = Recorder::default();
        let sink = RecordingSink {
            recorder: recorder.clone(),
            gate: None,
        };
        let config = PipelineConfig {
            queue_capacity: capacity,
            tick_interval: None,
        };
        (IngestPipeline::start(sink, config), recorder)
    }

    #[tokio::test]
    async fn test_single_producer_order_is_preserved() {
        let (pipeline, recorder) = start(100);

        for ts in 0..50 {
            pipeline.submit(Point::new("cpu", ts)).unwrap();
            if ts % 10 == 0 {
                tokio::task::yield_now().await;
            }
        }
        pipeline.close().await;

        assert_eq!(recorder.seen(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_instead_of_blocking() {
        let recorder = Recorder::default();
        let started = Arc::new(Notify::new());
        let permits = Arc::new(Semaphore::new(0));
        let sink = RecordingSink {
            recorder: recorder.clone(),
            gate: Some((started.clone(), permits.clone())),
        };
        let pipeline = IngestPipeline::start(
            sink,
            PipelineConfig {
                queue_capacity: 3,
                tick_interval: None,
            },
        );

        // The consumer takes the first point and stalls on the gate
        pipeline.submit(Point::new("cpu", 0)).unwrap();
        started.notified().await;

        for ts in 1..=3 {
            pipeline.submit(Point::new("cpu", ts)).unwrap();
        }
        assert_eq!(pipeline.pending(), 3);
        assert_eq!(
            pipeline.submit(Point::new("cpu", 99)),
            Err(Rejected::QueueFull)
        );

        permits.add_permits(1);
        pipeline.close().await;
        assert_eq!(recorder.seen(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_batch_tallies_rejections() {
        // Nothing yields, so the consumer cannot drain between submissions
        let (pipeline, recorder) = start(2);

        let outcome = pipeline.submit_batch((0..5).map(|ts| Point::new("cpu", ts)));
        assert_eq!(
            outcome,
            BatchOutcome {
                accepted: 2,
                rejected: 3
            }
        );

        pipeline.close().await;
        assert_eq!(recorder.seen(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_close_rejects_later_submissions() {
        let (pipeline, recorder) = start(10);
        pipeline.submit(Point::new("cpu", 1)).unwrap();

        pipeline.close().await;
        assert!(pipeline.is_closed());
        assert_eq!(recorder.seen(), vec![1]);

        assert_eq!(
            pipeline.submit(Point::new("cpu", 2)),
            Err(Rejected::ShuttingDown)
        );
        assert!(matches!(
            pipeline.flush().await,
            Err(StorageError::ShuttingDown)
        ));

        // A second close is harmless
        pipeline.close().await;
    }

    #[tokio::test]
    async fn test_flush_is_sequenced_after_queued_points() {
        let (pipeline, recorder) = start(10);
        for ts in 0..3 {
            pipeline.submit(Point::new("cpu", ts)).unwrap();
        }

        pipeline.flush().await.unwrap();
        assert_eq!(recorder.seen(), vec![0, 1, 2]);
        assert_eq!(recorder.flushes.load(Ordering::SeqCst), 1);

        pipeline.close().await;
    }

    #[tokio::test]
    async fn test_interval_ticks_reach_sink() {
        let recorder = Recorder::default();
        let sink = RecordingSink {
            recorder: recorder.clone(),
            gate: None,
        };
        let pipeline = IngestPipeline::start(
            sink,
            PipelineConfig {
                queue_capacity: 10,
                tick_interval: Some(Duration::from_millis(10)),
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        pipeline.close().await;

        assert!(recorder.ticks.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_races_concurrent_submissions() {
        let (pipeline, recorder) = start(10_000);
        let pipeline = Arc::new(pipeline);

        let producer = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                let mut accepted = Vec::new();
                let mut closed = false;
                for ts in 0..5_000 {
                    match pipeline.submit(Point::new("cpu", ts)) {
                        Ok(()) => {
                            assert!(!closed, "point {} accepted after shutdown", ts);
                            accepted.push(ts);
                        }
                        Err(Rejected::ShuttingDown) => closed = true,
                        Err(Rejected::QueueFull) => panic!("queue cannot fill at this capacity"),
                    }
                    if ts % 64 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                accepted
            })
        };

        tokio::time::sleep(Duration::from_millis(1)).await;
        pipeline.close().await;
        let accepted = producer.await.unwrap();

        assert_eq!(recorder.seen(), accepted);
        assert_eq!(
            pipeline.submit(Point::new("cpu", -1)),
            Err(Rejected::ShuttingDown)
        );
    }
}
