//! Buffered batch writer for request details
//!
//! This module provides non-blocking ingestion with:
//! - An in-memory buffer that producers append to without any I/O
//! - A size trigger (`batch_size` pending events flush immediately)
//! - A time trigger (one cancellable timer per accumulation cycle)
//! - Transactional batch writes that also enforce the retention cap
//!
//! The buffer is swapped out, not copied, when a flush starts. Events that
//! arrive while a batch is being written land in the fresh buffer and are
//! picked up by the next flush.

use crate::config::ObservabilityConfig;
use crate::observability::database::RequestDetailsDb;
use crate::observability::event::TelemetryEvent;
use crate::observability::retention::RetentionPolicy;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// What a call to [`RequestDetailsWriter::flush`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush was in progress, or nothing was pending
    Skipped,
    /// The batch was committed
    Written { count: usize, trimmed: u64 },
    /// The transaction failed; the batch was rolled back and dropped
    Failed { count: usize },
}

/// Writer handle
///
/// Cheap to clone; every clone shares the same buffer, timer and database.
/// Construct it once per process and hand clones to producers.
#[derive(Clone)]
pub struct RequestDetailsWriter {
    inner: Arc<WriterInner>,
}

struct WriterInner {
    db: Arc<RequestDetailsDb>,
    config: ObservabilityConfig,
    retention: RetentionPolicy,
    buffer: Mutex<Vec<TelemetryEvent>>,
    flush_timer: Mutex<Option<FlushTimer>>,
    timer_generation: AtomicU64,
    is_flushing: AtomicBool,
    /// Size of the batch currently being written
    in_flight: AtomicUsize,
    /// Events whose flush was cancelled mid-write
    abandoned: AtomicU64,
    dropped: AtomicU64,
}

/// The pending timer task, tagged so a stale task cannot clear a newer one
struct FlushTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl RequestDetailsWriter {
    /// Create a writer over `db` using the given (already loaded) config
    pub fn new(db: Arc<RequestDetailsDb>, config: ObservabilityConfig) -> Self {
        let retention = RetentionPolicy::new(config.max_records);

        Self {
            inner: Arc::new(WriterInner {
                db,
                retention,
                buffer: Mutex::new(Vec::with_capacity(config.batch_size)),
                flush_timer: Mutex::new(None),
                timer_generation: AtomicU64::new(0),
                is_flushing: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                abandoned: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                config,
            }),
        }
    }

    /// Queue a request detail for persistence (non-blocking)
    ///
    /// Never fails from the caller's point of view: write errors surface in
    /// the logs only. Reaching `batch_size` pending events spawns a flush;
    /// otherwise a flush timer is started if none is pending.
    pub fn submit(&self, event: TelemetryEvent) {
        let pending = {
            let mut buffer = self.inner.lock_buffer();

            let limit = self.inner.config.max_buffer_size;
            if limit > 0 && buffer.len() >= limit {
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    pending = buffer.len(),
                    dropped_total = dropped,
                    "Request detail buffer full, dropping event"
                );
                return;
            }

            buffer.push(event);
            buffer.len()
        };

        if pending >= self.inner.config.batch_size {
            self.inner.cancel_timer();
            self.inner.spawn_flush();
        } else {
            self.inner.schedule_timer();
        }
    }

    /// Write everything currently buffered
    ///
    /// Returns [`FlushOutcome::Skipped`] if another flush holds the
    /// re-entrancy guard or nothing is pending.
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.flush().await
    }

    /// Cancel the pending flush timer, if any
    pub fn cancel_timer(&self) {
        self.inner.cancel_timer();
    }

    /// Number of events waiting for the next flush
    pub fn pending_count(&self) -> usize {
        self.inner.lock_buffer().len()
    }

    /// Events rejected because the buffer was full
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.is_flushing.load(Ordering::Acquire)
    }

    pub fn has_pending_timer(&self) -> bool {
        self.inner
            .lock_timer()
            .as_ref()
            .is_some_and(|timer| !timer.handle.is_finished())
    }

    /// Events in the batch currently being written
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Events lost because their flush was cancelled before it committed
    pub fn abandoned_count(&self) -> u64 {
        self.inner.abandoned.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ObservabilityConfig {
        &self.inner.config
    }

    pub fn db(&self) -> &Arc<RequestDetailsDb> {
        &self.inner.db
    }
}

impl WriterInner {
    fn lock_buffer(&self) -> MutexGuard<'_, Vec<TelemetryEvent>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<FlushTimer>> {
        self.flush_timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.lock_timer().take() {
            timer.handle.abort();
        }
    }

    /// Clear the timer slot only if it still holds timer `generation`
    fn release_timer(&self, generation: u64) {
        let mut timer = self.lock_timer();
        if timer.as_ref().is_some_and(|t| t.generation == generation) {
            timer.take();
        }
    }

    /// Start the flush timer unless one is already pending
    fn schedule_timer(self: &Arc<Self>) {
        // Held across the spawn so the timer task cannot clear its slot
        // before the handle is stored
        let mut timer = self.lock_timer();
        if timer.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let inner = Arc::clone(self);
        let delay = Duration::from_millis(self.config.flush_interval_ms);
        let generation = self.timer_generation.fetch_add(1, Ordering::Relaxed) + 1;

        *timer = spawn_on_runtime(async move {
            tokio::time::sleep(delay).await;
            inner.release_timer(generation);
            inner.flush().await;
        })
        .map(|handle| FlushTimer { generation, handle });
    }

    fn spawn_flush(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        spawn_on_runtime(async move {
            inner.flush().await;
        });
    }

    async fn flush(self: &Arc<Self>) -> FlushOutcome {
        if self
            .is_flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return FlushOutcome::Skipped;
        }

        let outcome = {
            let _guard = FlushGuard(self);

            let batch = std::mem::take(&mut *self.lock_buffer());
            if batch.is_empty() {
                return FlushOutcome::Skipped;
            }

            self.in_flight.store(batch.len(), Ordering::Release);
            let outcome = self.write(batch).await;
            self.in_flight.store(0, Ordering::Release);
            outcome
        };

        // Events submitted during the write had their size trigger skipped
        self.reschedule_pending();

        outcome
    }

    async fn write(&self, batch: Vec<TelemetryEvent>) -> FlushOutcome {
        let count = batch.len();
        let start = Instant::now();

        match self
            .db
            .write_batch(batch, self.config.max_json_size_bytes(), self.retention)
            .await
        {
            Ok(stats) => {
                tracing::debug!(
                    count = stats.written,
                    trimmed = stats.trimmed,
                    duration_ms = start.elapsed().as_millis(),
                    "Flushed request detail batch"
                );
                FlushOutcome::Written {
                    count: stats.written,
                    trimmed: stats.trimmed,
                }
            }
            Err(e) => {
                // Not re-queued: the batch left the buffer before the write
                tracing::error!(
                    error = %e,
                    count = count,
                    "Batch write failed, request details dropped"
                );
                FlushOutcome::Failed { count }
            }
        }
    }

    fn reschedule_pending(self: &Arc<Self>) {
        let pending = self.lock_buffer().len();
        if pending == 0 {
            return;
        }

        if pending >= self.config.batch_size {
            self.cancel_timer();
            self.spawn_flush();
        } else {
            self.schedule_timer();
        }
    }
}

/// Releases the re-entrancy flag even if the flush future is dropped
///
/// A batch still marked in flight at drop time never committed; it is
/// moved to the abandoned count.
struct FlushGuard<'a>(&'a WriterInner);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        let lost = self.0.in_flight.swap(0, Ordering::AcqRel);
        if lost > 0 {
            self.0.abandoned.fetch_add(lost as u64, Ordering::AcqRel);
            tracing::error!(count = lost, "Flush cancelled before commit, request details dropped");
        }
        self.0.is_flushing.store(false, Ordering::Release);
    }
}

fn spawn_on_runtime<F>(task: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(task)),
        Err(_) => {
            tracing::warn!(
                "No tokio runtime available, request details stay buffered until the next flush"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    async fn create_test_db() -> Arc<RequestDetailsDb> {
        Arc::new(RequestDetailsDb::in_memory().await.unwrap())
    }

    fn test_config(batch_size: usize, flush_interval_ms: u64) -> ObservabilityConfig {
        ObservabilityConfig {
            batch_size,
            flush_interval_ms,
            ..Default::default()
        }
    }

    fn event(id: &str, secs: i64) -> TelemetryEvent {
        TelemetryEvent {
            id: Some(id.to_string()),
            model: Some("gpt-4".to_string()),
            timestamp: Some(Utc.timestamp_opt(secs, 0).unwrap()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_size_trigger_flushes_immediately() {
        let db = create_test_db().await;
        let writer = RequestDetailsWriter::new(db.clone(), test_config(3, 60_000));

        writer.submit(event("a", 1));
        writer.submit(event("b", 2));
        assert!(writer.has_pending_timer());

        writer.submit(event("c", 3));
        assert!(!writer.has_pending_timer());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(db.count().await.unwrap(), 3);
        assert_eq!(writer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timer_flushes_partial_batch() {
        let db = create_test_db().await;
        let writer = RequestDetailsWriter::new(db.clone(), test_config(100, 50));

        writer.submit(event("a", 1));
        writer.submit(event("b", 2));
        assert!(writer.has_pending_timer());
        assert_eq!(db.count().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(db.count().await.unwrap(), 2);
        assert!(!writer.has_pending_timer());
    }

    #[tokio::test]
    async fn test_stale_timer_does_not_clear_newer_timer() {
        let db = create_test_db().await;
        let writer = RequestDetailsWriter::new(db, test_config(100, 60_000));

        writer.submit(event("a", 1));
        let first = writer.inner.lock_timer().as_ref().map(|t| t.generation).unwrap();

        writer.cancel_timer();
        writer.submit(event("b", 2));
        let second = writer.inner.lock_timer().as_ref().map(|t| t.generation).unwrap();
        assert_ne!(first, second);

        // An already-woken first timer releasing its slot
        writer.inner.release_timer(first);
        assert!(writer.has_pending_timer());

        writer.inner.release_timer(second);
        assert!(!writer.has_pending_timer());
    }

    #[tokio::test]
    async fn test_flush_empty_buffer_is_noop() {
        let db = create_test_db().await;
        let writer = RequestDetailsWriter::new(db, test_config(10, 60_000));

        assert_eq!(writer.flush().await, FlushOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_flush_guard_skips_reentrant_flush() {
        let db = create_test_db().await;
        let writer = RequestDetailsWriter::new(db.clone(), test_config(10, 60_000));
        writer.submit(event("a", 1));

        writer.inner.is_flushing.store(true, Ordering::Release);
        assert_eq!(writer.flush().await, FlushOutcome::Skipped);
        assert_eq!(writer.pending_count(), 1);

        writer.inner.is_flushing.store(false, Ordering::Release);
        assert_eq!(
            writer.flush().await,
            FlushOutcome::Written { count: 1, trimmed: 0 }
        );
        assert!(!writer.is_flushing());
    }

    #[tokio::test]
    async fn test_events_during_flush_go_to_next_batch() {
        let db = create_test_db().await;
        let writer = RequestDetailsWriter::new(db.clone(), test_config(2, 60_000));

        // Hold the only connection so the first flush stalls mid-write
        let conn = db.pool().acquire().await.unwrap();

        writer.submit(event("a", 1));
        writer.submit(event("b", 2));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(writer.is_flushing());
        assert_eq!(writer.pending_count(), 0);

        writer.submit(event("c", 3));
        writer.submit(event("d", 4));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(writer.pending_count(), 2);

        drop(conn);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(db.count().await.unwrap(), 4);
        assert_eq!(writer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_drops_batch() {
        let db = create_test_db().await;
        let writer = RequestDetailsWriter::new(db.clone(), test_config(10, 60_000));
        writer.submit(event("a", 1));
        writer.submit(event("b", 2));

        db.pool().close().await;

        assert_eq!(writer.flush().await, FlushOutcome::Failed { count: 2 });
        assert_eq!(writer.pending_count(), 0);
        assert!(!writer.is_flushing());
    }

    #[tokio::test]
    async fn test_buffer_bound_drops_new_events() {
        let db = create_test_db().await;
        let config = ObservabilityConfig {
            max_buffer_size: 2,
            ..test_config(10, 60_000)
        };
        let writer = RequestDetailsWriter::new(db, config);

        for i in 0..5 {
            writer.submit(event(&format!("e{}", i), i));
        }

        assert_eq!(writer.pending_count(), 2);
        assert_eq!(writer.dropped_count(), 3);
    }

    #[test]
    fn test_submit_without_runtime_keeps_event() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let db = runtime.block_on(create_test_db());
        let writer = RequestDetailsWriter::new(db.clone(), test_config(1, 60_000));

        // Outside of the runtime: nothing can be spawned
        writer.submit(event("a", 1));
        assert_eq!(writer.pending_count(), 1);

        let outcome = runtime.block_on(writer.flush());
        assert_eq!(outcome, FlushOutcome::Written { count: 1, trimmed: 0 });
    }
}
