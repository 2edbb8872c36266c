//! SQLite database layer for request details
//!
//! This module provides async database operations with:
//! - Connection pooling
//! - Automatic migrations
//! - Transactional batch upserts with retention enforcement
//! - WAL mode for concurrent reads/writes

use super::event::{Latency, TelemetryEvent, Tokens};
use super::retention::RetentionPolicy;
use super::sanitizer::{safe_json_stringify, sanitize_request_headers, stringify_payload};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Columns selected for every read, in table order
pub(crate) const DETAIL_COLUMNS: &str = "id, provider, model, connection_id, timestamp, status, \
     latency, tokens, request, provider_request, provider_response, response";

/// Result of one committed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Rows inserted or replaced
    pub written: usize,
    /// Rows removed by the retention trim
    pub trimmed: u64,
}

/// Request details database handle
///
/// Manages SQLite connection pool and provides write/read operations.
pub struct RequestDetailsDb {
    pool: SqlitePool,
}

impl RequestDetailsDb {
    /// Create a new database connection with automatic migration
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite database URL (e.g., "sqlite:./data/request-details.sqlite")
    ///
    /// # Example
    ///
    /// ```ignore
    /// let db = RequestDetailsDb::new("sqlite:./data/request-details.sqlite").await?;
    /// ```
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)  // Write-Ahead Logging for concurrency
            .busy_timeout(Duration::from_secs(30))  // Wait up to 30s for locks
            .pragma("cache_size", "-64000")        // 64MB cache
            .pragma("temp_store", "memory")        // Use memory for temp tables
            .pragma("synchronous", "NORMAL");      // Balance safety/performance

        let pool = SqlitePoolOptions::new()
            .max_connections(5)  // Limited for SQLite (single writer)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .context("Failed to connect to request details database")?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Open a database file, creating its parent directory if needed
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
        }

        Self::new(&format!("sqlite:{}", path.display())).await
    }

    /// Create a private in-memory database
    ///
    /// Uses a single long-lived connection, since every SQLite in-memory
    /// connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .context("Failed to open in-memory request details database")?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .context("Failed to run request details database migrations")?;

        tracing::debug!("Request details database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert a batch of events and apply retention in one transaction
    ///
    /// Each event gets a missing id/timestamp filled, its request headers
    /// sanitized and every payload serialized with the `max_json_size` bound.
    /// Either every row of the batch becomes visible together with the trim,
    /// or nothing does.
    pub async fn write_batch(
        &self,
        events: Vec<TelemetryEvent>,
        max_json_size: usize,
        retention: RetentionPolicy,
    ) -> Result<BatchStats> {
        if events.is_empty() {
            return Ok(BatchStats::default());
        }

        let now = Utc::now();
        let rows: Vec<DetailRow> = events
            .into_iter()
            .map(|event| DetailRow::prepare(event, now, max_json_size))
            .collect();

        let mut tx = self.pool.begin().await?;

        for row in &rows {
            sqlx::query(
                "INSERT OR REPLACE INTO request_details
                 (id, provider, model, connection_id, timestamp, status, latency, tokens,
                  request, provider_request, provider_response, response)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(&row.provider)
            .bind(&row.model)
            .bind(&row.connection_id)
            .bind(row.timestamp)
            .bind(&row.status)
            .bind(&row.latency)
            .bind(&row.tokens)
            .bind(&row.request)
            .bind(&row.provider_request)
            .bind(&row.provider_response)
            .bind(&row.response)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to upsert request detail {}", row.id))?;
        }

        // Once per batch, not per row
        let trimmed = retention
            .enforce(&mut *tx)
            .await
            .context("Failed to apply retention policy")?;

        tx.commit().await?;

        Ok(BatchStats {
            written: rows.len(),
            trimmed,
        })
    }

    /// Total number of stored request details
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM request_details")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Serialized form of one event, ready to bind
struct DetailRow {
    id: String,
    provider: Option<String>,
    model: Option<String>,
    connection_id: Option<String>,
    timestamp: i64,
    status: Option<String>,
    latency: String,
    tokens: String,
    request: String,
    provider_request: String,
    provider_response: String,
    response: String,
}

impl DetailRow {
    fn prepare(mut event: TelemetryEvent, now: DateTime<Utc>, max_json_size: usize) -> Self {
        event.ensure_identity(now);
        sanitize_request_headers(&mut event.request);

        Self {
            id: event.id.unwrap_or_default(),
            timestamp: event.timestamp.unwrap_or(now).timestamp_millis(),
            provider: event.provider,
            model: event.model,
            connection_id: event.connection_id,
            status: event.status,
            latency: safe_json_stringify(&event.latency, usize::MAX),
            tokens: safe_json_stringify(&event.tokens, usize::MAX),
            request: stringify_payload(&event.request, max_json_size),
            provider_request: stringify_payload(&event.provider_request, max_json_size),
            provider_response: stringify_payload(&event.provider_response, max_json_size),
            response: stringify_payload(&event.response, max_json_size),
        }
    }
}

/// Convert a selected row back into an event
pub(crate) fn row_to_event(row: &SqliteRow) -> Result<TelemetryEvent, sqlx::Error> {
    let timestamp: i64 = row.try_get("timestamp")?;
    let latency: Option<String> = row.try_get("latency")?;
    let tokens: Option<String> = row.try_get("tokens")?;

    Ok(TelemetryEvent {
        id: Some(row.try_get("id")?),
        provider: row.try_get("provider")?,
        model: row.try_get("model")?,
        connection_id: row.try_get("connection_id")?,
        timestamp: DateTime::from_timestamp_millis(timestamp),
        status: row.try_get("status")?,
        latency: parse_metric_column::<Latency>("latency", latency),
        tokens: parse_metric_column::<Tokens>("tokens", tokens),
        request: parse_json_column(row.try_get("request")?),
        provider_request: parse_json_column(row.try_get("provider_request")?),
        provider_response: parse_json_column(row.try_get("provider_response")?),
        response: parse_json_column(row.try_get("response")?),
    })
}

/// Parse a stored latency/tokens object, logging rows that no longer fit
fn parse_metric_column<T: DeserializeOwned + Default>(column: &str, raw: Option<String>) -> T {
    let Some(raw) = raw else {
        return T::default();
    };

    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(column = column, error = %e, "Unreadable stored value, using empty default");
        T::default()
    })
}

/// Parse a stored payload; truncated text that no longer parses is returned
/// as a JSON string
fn parse_json_column(raw: Option<String>) -> Value {
    match raw {
        None => Value::Object(Default::default()),
        Some(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::sanitizer::TRUNCATION_MARKER;
    use chrono::TimeZone;
    use serde_json::json;

    async fn create_test_db() -> RequestDetailsDb {
        RequestDetailsDb::in_memory().await.unwrap()
    }

    fn event(id: &str, secs: i64) -> TelemetryEvent {
        TelemetryEvent {
            id: Some(id.to_string()),
            provider: Some("openai".to_string()),
            model: Some("gpt-4".to_string()),
            timestamp: Some(Utc.timestamp_opt(secs, 0).unwrap()),
            status: Some("200".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_write_batch_upserts() {
        let db = create_test_db().await;
        let policy = RetentionPolicy::new(100);

        db.write_batch(vec![event("a", 1), event("b", 2)], 1024, policy)
            .await
            .unwrap();

        let mut replacement = event("a", 3);
        replacement.status = Some("500".to_string());
        let stats = db.write_batch(vec![replacement], 1024, policy).await.unwrap();
        assert_eq!(stats.written, 1);
        assert_eq!(stats.trimmed, 0);

        assert_eq!(db.count().await.unwrap(), 2);
        let stored = db.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(stored.status.as_deref(), Some("500"));
        assert_eq!(stored.timestamp, Some(Utc.timestamp_opt(3, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_write_batch_trims_once_per_batch() {
        let db = create_test_db().await;
        let events = (0..6).map(|i| event(&format!("e{}", i), i)).collect();

        let stats = db.write_batch(events, 1024, RetentionPolicy::new(4)).await.unwrap();
        assert_eq!(stats.written, 6);
        assert_eq!(stats.trimmed, 2);
        assert_eq!(db.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_write_batch_fills_identity_and_sanitizes() {
        let db = create_test_db().await;
        let detail = TelemetryEvent {
            model: Some("claude/3".to_string()),
            request: json!({
                "headers": {"Authorization": "Bearer x", "X-Custom": "ok"},
                "body": {"messages": []}
            }),
            ..Default::default()
        };

        db.write_batch(vec![detail], 1024, RetentionPolicy::new(10))
            .await
            .unwrap();

        let rows = sqlx::query("SELECT id, request FROM request_details")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let id: String = rows[0].get("id");
        assert!(id.ends_with("-claude-3"));

        let request: String = rows[0].get("request");
        let request: Value = serde_json::from_str(&request).unwrap();
        assert_eq!(request["headers"], json!({"X-Custom": "ok"}));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_truncated() {
        let db = create_test_db().await;
        let mut detail = event("big", 1);
        detail.response = json!({"text": "y".repeat(500)});

        db.write_batch(vec![detail], 64, RetentionPolicy::new(10))
            .await
            .unwrap();

        let raw: String =
            sqlx::query_scalar("SELECT response FROM request_details WHERE id = 'big'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(raw.len(), 64 + TRUNCATION_MARKER.len());
        assert!(raw.ends_with(TRUNCATION_MARKER));

        let stored = db.get_by_id("big").await.unwrap().unwrap();
        assert_eq!(stored.response, Value::String(raw));
        // Absent payloads read back as empty objects
        assert_eq!(stored.request, json!({}));
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("request-details.sqlite");

        let db = RequestDetailsDb::open(&path).await.unwrap();
        db.write_batch(vec![event("x", 1)], 1024, RetentionPolicy::new(10))
            .await
            .unwrap();

        assert!(path.exists());
        assert_eq!(db.count().await.unwrap(), 1);
    }
}
