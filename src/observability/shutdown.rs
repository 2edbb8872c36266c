//! Final drain of the request detail buffer
//!
//! The hosting process calls [`ShutdownCoordinator::shutdown`] once its
//! signal handling decides to stop. The coordinator cancels the flush timer,
//! waits for an in-flight batch, and writes whatever is still buffered. The
//! whole drain is bounded so a stalled database cannot hold up exit.

use super::writer::{FlushOutcome, RequestDetailsWriter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Poll interval while another flush holds the writer
const IN_FLIGHT_POLL: Duration = Duration::from_millis(10);

/// Summary of one shutdown drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Events committed during the drain
    pub flushed: usize,
    /// Events lost during the drain: failed transactions, plus on timeout
    /// the cancelled batch and anything left unwritten
    pub failed: usize,
    /// The drain hit the shutdown timeout
    pub timed_out: bool,
}

pub struct ShutdownCoordinator {
    writer: RequestDetailsWriter,
    timeout: Duration,
    invocations: AtomicUsize,
}

impl ShutdownCoordinator {
    /// Build the coordinator for `writer`, bounded by its `shutdown_timeout_ms`
    pub fn new(writer: RequestDetailsWriter) -> Self {
        let timeout = Duration::from_millis(writer.config().shutdown_timeout_ms);
        Self {
            writer,
            timeout,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drain the buffer before exit
    ///
    /// Safe to call repeatedly; once the buffer is empty a call does nothing.
    /// Errors and timeouts are logged, never returned.
    pub async fn shutdown(&self) -> ShutdownReport {
        let call = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;

        self.writer.cancel_timer();

        let pending = self.writer.pending_count();
        if pending > 0 {
            tracing::info!(pending = pending, "Flushing request details before shutdown...");
        } else if call > 1 {
            tracing::debug!(call = call, "Request detail buffer already drained");
        }

        let mut report = ShutdownReport::default();
        let abandoned_before = self.writer.abandoned_count();
        let drained = tokio::time::timeout(self.timeout, self.drain(&mut report)).await;

        if drained.is_err() {
            // The drain's own batch was cancelled with the timeout; a spawned
            // flush may still be writing but cannot be waited for any longer
            let cancelled = (self.writer.abandoned_count() - abandoned_before) as usize;
            let in_flight = self.writer.in_flight_count();
            let pending = self.writer.pending_count();

            report.timed_out = true;
            report.failed += cancelled + in_flight + pending;
            tracing::error!(
                timeout_ms = self.timeout.as_millis(),
                cancelled = cancelled,
                in_flight = in_flight,
                pending = pending,
                lost = report.failed,
                "Shutdown flush timed out, remaining request details dropped"
            );
        }

        // A flush finishing during the drain may have armed a new timer
        self.writer.cancel_timer();

        if report.flushed > 0 || report.failed > 0 {
            tracing::info!(
                flushed = report.flushed,
                failed = report.failed,
                "Request detail buffer drained"
            );
        }

        report
    }

    async fn drain(&self, report: &mut ShutdownReport) {
        loop {
            if self.writer.pending_count() == 0 && !self.writer.is_flushing() {
                return;
            }

            match self.writer.flush().await {
                FlushOutcome::Written { count, .. } => report.flushed += count,
                FlushOutcome::Failed { count } => report.failed += count,
                FlushOutcome::Skipped => tokio::time::sleep(IN_FLIGHT_POLL).await,
            }
        }
    }
}
