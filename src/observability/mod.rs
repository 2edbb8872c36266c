//! Request detail store
//!
//! Persists one record per proxied request with bounded growth:
//!
//! ```text
//! submit() ──▶ buffer ──(batch_size | flush timer | shutdown)──▶ flush
//!                                                                  │
//!                     sanitize headers, bound payload sizes ◀──────┘
//!                                                                  │
//!                     SQLite transaction: upsert batch + trim ◀────┘
//!
//! query() / get_by_id() ──▶ SQLite (never the buffer)
//! ```
//!
//! ## Design Principles
//!
//! - **Non-blocking ingestion**: `submit` never waits on I/O
//! - **Atomic batches**: a batch and its retention trim commit together
//! - **Bounded growth**: at most `max_records` rows, newest kept
//! - **No secrets at rest**: credential headers are removed before writing

pub mod database;
pub mod event;
pub mod query;
pub mod retention;
pub mod sanitizer;
pub mod shutdown;
pub mod writer;

// Re-export public types
pub use database::{BatchStats, RequestDetailsDb};
pub use event::{generate_detail_id, Latency, TelemetryEvent, Tokens};
pub use query::{PageResult, Pagination, QueryError, QueryFilter};
pub use retention::{run_retention_now, RetentionPolicy};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use writer::{FlushOutcome, RequestDetailsWriter};
