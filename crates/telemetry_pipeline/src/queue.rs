//! Batch Export Queue - the concurrency boundary between producers and the
//! exporter.
//!
//! Producers call [`BatchQueue::enqueue`], which takes a short mutex, appends
//! to a [`BatchBuffer`] and returns. It never awaits, never waits on the
//! exporter and drops the newest item when the buffer is full.
//!
//! One background task per queue owns the export side:
//!
//! ```text
//! producers ──enqueue──▶ Mutex<BatchBuffer> ──take──▶ flush task ──▶ JoinSet<export>
//!                              │                         ▲
//!                              └──── Notify (wake) ──────┘
//! ```
//!
//! The flush task wakes when a full batch is buffered, when the oldest
//! item's linger deadline passes, on [`BatchQueue::force_flush`] and on
//! shutdown. Exports run in a `JoinSet` bounded by a `Semaphore`; with the
//! default of one concurrent export, batches reach the exporter in the
//! order their items were enqueued.

use crate::batch_processor::{Batch, BatchBuffer, BatchConfig};
use crate::error::{EnqueueError, ShutdownError};
use crate::exporter::{ExportError, ExporterBoxed};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

/// Destination for finished telemetry items.
///
/// Instrumentation only ever offers items; whether they are kept is the
/// sink's business and never reported back to the request path.
pub trait TelemetrySink<T>: Send + Sync {
    fn offer(&self, item: T);
}

/// Thread-safe queue and export counters (uses atomics)
#[derive(Debug, Default)]
pub struct ExportMetrics {
    /// Items accepted by `enqueue`
    pub enqueued: AtomicU64,
    /// Items rejected because the queue was full or closed
    pub dropped: AtomicU64,
    /// Items in successfully exported batches
    pub items_exported: AtomicU64,
    /// Total batches exported
    pub batches_exported: AtomicU64,
    /// Total failed or timed out exports
    pub export_errors: AtomicU64,
    /// Current in-flight exports
    pub inflight_exports: AtomicU64,
}

/// Point-in-time copy of [`ExportMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub items_exported: u64,
    pub batches_exported: u64,
    pub export_errors: u64,
    pub inflight_exports: u64,
}

impl ExportMetrics {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn items_exported(&self) -> u64 {
        self.items_exported.load(Ordering::Relaxed)
    }

    pub fn export_errors(&self) -> u64 {
        self.export_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            items_exported: self.items_exported.load(Ordering::Relaxed),
            batches_exported: self.batches_exported.load(Ordering::Relaxed),
            export_errors: self.export_errors.load(Ordering::Relaxed),
            inflight_exports: self.inflight_exports.load(Ordering::Relaxed),
        }
    }

    fn record_success(&self, item_count: u64) {
        self.items_exported.fetch_add(item_count, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.export_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between producers and the flush task.
struct Shared<T> {
    buffer: Mutex<BatchBuffer<T>>,
    wake: Notify,
    metrics: Arc<ExportMetrics>,
}

impl<T> Shared<T> {
    fn buffer(&self) -> MutexGuard<'_, BatchBuffer<T>> {
        // The buffer holds no invariant a panicking producer could break.
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded, non-blocking queue with a background flush task.
///
/// One queue exists per signal type. `new` must be called from within a
/// Tokio runtime.
pub struct BatchQueue<T> {
    name: String,
    shared: Arc<Shared<T>>,
    flush_tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> BatchQueue<T> {
    /// Creates the queue and spawns its flush task.
    pub fn new(
        name: impl Into<String>,
        config: BatchConfig,
        exporter: Arc<dyn ExporterBoxed<T>>,
    ) -> Self {
        let name = name.into();
        let shared = Arc::new(Shared {
            buffer: Mutex::new(BatchBuffer::new(config.clone())),
            wake: Notify::new(),
            metrics: Arc::new(ExportMetrics::default()),
        });
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = FlushWorker {
            name: name.clone(),
            shared: Arc::clone(&shared),
            exporter,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_exports.max(1))),
            export_timeout: config.export_timeout,
            tasks: JoinSet::new(),
        };
        let handle = tokio::spawn(worker.run(flush_rx, shutdown_rx));

        tracing::debug!(
            queue = %name,
            max_queue_size = config.max_queue_size,
            max_export_batch_size = config.max_export_batch_size,
            scheduled_delay = ?config.scheduled_delay,
            "batch queue started"
        );

        Self {
            name,
            shared,
            flush_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Appends an item without blocking.
    ///
    /// When the queue is full the new item is dropped and counted; after
    /// shutdown every item is dropped.
    pub fn enqueue(&self, item: T) -> Result<(), EnqueueError> {
        let pushed = self.shared.buffer().push(item, Instant::now());
        let metrics = &self.shared.metrics;
        match pushed {
            Ok(wake) => {
                metrics.enqueued.fetch_add(1, Ordering::Relaxed);
                if wake {
                    self.shared.wake.notify_one();
                }
                Ok(())
            }
            Err(e) => {
                metrics.dropped.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Exports everything buffered now and waits for all in-flight exports.
    pub async fn force_flush(&self) -> Result<(), ShutdownError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.flush_tx
            .send(ack_tx)
            .map_err(|_| self.flush_task_gone())?;
        ack_rx.await.map_err(|_| self.flush_task_gone())
    }

    fn flush_task_gone(&self) -> ShutdownError {
        ShutdownError::TaskFailed(format!("{} flush task has exited", self.name))
    }

    /// Stops accepting items, exports what is buffered and waits up to
    /// `timeout` for it to finish.
    ///
    /// On timeout the flush task is aborted and any batch still in flight is
    /// lost. Calling this again after it returned is a no-op.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        self.shared.buffer().close();
        if let Some(tx) = lock(&self.shutdown_tx).take() {
            let _ = tx.send(());
        }

        let Some(mut handle) = lock(&self.worker).take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ShutdownError::TaskFailed(e.to_string())),
            Err(_) => {
                handle.abort();
                tracing::warn!(
                    queue = %self.name,
                    ?timeout,
                    "shutdown deadline passed, abandoning in-flight export"
                );
                Err(ShutdownError::Timeout(timeout))
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        self.shared.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> &Arc<ExportMetrics> {
        &self.shared.metrics
    }
}

impl<T: Send + 'static> TelemetrySink<T> for BatchQueue<T> {
    fn offer(&self, item: T) {
        if let Err(e) = self.enqueue(item) {
            tracing::trace!(queue = %self.name, error = %e, "telemetry item dropped");
        }
    }
}

fn lock<V>(m: &Mutex<V>) -> MutexGuard<'_, V> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The background half of a [`BatchQueue`].
struct FlushWorker<T> {
    name: String,
    shared: Arc<Shared<T>>,
    exporter: Arc<dyn ExporterBoxed<T>>,
    semaphore: Arc<Semaphore>,
    export_timeout: Duration,
    tasks: JoinSet<Result<(), ExportError>>,
}

impl<T: Send + 'static> FlushWorker<T> {
    async fn run(
        mut self,
        mut flush_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            let deadline = self.shared.buffer().deadline();
            let linger = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                // Reap completed export tasks
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.log_result(result);
                }

                () = self.shared.wake.notified() => {
                    // A fresh first item only moves the deadline, which the
                    // next iteration picks up.
                    let ready = self.shared.buffer().batch_ready();
                    if ready {
                        self.dispatch().await;
                    }
                }

                () = linger => {
                    self.dispatch().await;
                }

                Some(ack) = flush_rx.recv() => {
                    self.dispatch().await;
                    self.drain().await;
                    let _ = ack.send(());
                }

                // Also fires when the queue is dropped without a shutdown call
                _ = &mut shutdown_rx => {
                    self.shared.buffer().close();
                    self.dispatch().await;
                    self.drain().await;
                    break;
                }
            }
        }
        tracing::debug!(queue = %self.name, "flush task stopped");
    }

    /// Swaps the buffer out and starts an export per batch.
    async fn dispatch(&mut self) {
        let batches = self.shared.buffer().take_batches();
        for batch in batches {
            // Waiting here keeps the batch order when exports are serialized.
            let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                return;
            };
            self.spawn_export(batch, permit);
        }
    }

    fn spawn_export(&mut self, batch: Batch<T>, permit: tokio::sync::OwnedSemaphorePermit) {
        let exporter = Arc::clone(&self.exporter);
        let metrics = Arc::clone(&self.shared.metrics);
        let timeout = self.export_timeout;
        let item_count = batch.len() as u64;

        metrics.inflight_exports.fetch_add(1, Ordering::Relaxed);
        self.tasks.spawn(async move {
            let result = match tokio::time::timeout(timeout, exporter.export_boxed(batch)).await {
                Ok(result) => result,
                Err(_) => Err(ExportError::Timeout),
            };
            match &result {
                Ok(()) => metrics.record_success(item_count),
                Err(_) => metrics.record_error(),
            }
            metrics.inflight_exports.fetch_sub(1, Ordering::Relaxed);
            drop(permit);
            result
        });
    }

    /// Waits for every in-flight export.
    async fn drain(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            self.log_result(result);
        }
    }

    fn log_result(&self, result: Result<Result<(), ExportError>, tokio::task::JoinError>) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    queue = %self.name,
                    exporter = self.exporter.name(),
                    error = %e,
                    "export failed, batch discarded"
                );
            }
            Err(e) => {
                tracing::warn!(queue = %self.name, error = %e, "export task panicked");
            }
        }
    }
}
