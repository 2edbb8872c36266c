//! Retention policy for request details
//!
//! The table is capped at the `max_records` most recent rows. The cap is
//! applied inside every flush transaction and can also be run on demand.

use super::database::RequestDetailsDb;
use anyhow::Result;
use sqlx::SqliteExecutor;

/// Cap on the number of stored request details
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_records: usize,
}

impl RetentionPolicy {
    /// Create a policy keeping at most `max_records` rows (at least one)
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
        }
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Delete every row outside the `max_records` most recent ones
    ///
    /// Recency is `timestamp` descending; rows sharing a timestamp are ranked
    /// by write order, so the last written survives. Returns rows deleted.
    pub async fn enforce<'c, E>(&self, executor: E) -> Result<u64, sqlx::Error>
    where
        E: SqliteExecutor<'c>,
    {
        let result = sqlx::query(
            "DELETE FROM request_details
             WHERE id NOT IN (
                 SELECT id FROM request_details
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT ?
             )",
        )
        .bind(self.max_records as i64)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Apply the retention policy immediately (outside of a flush)
pub async fn run_retention_now(db: &RequestDetailsDb, policy: RetentionPolicy) -> Result<u64> {
    tracing::info!(max_records = policy.max_records(), "Running manual retention trim");

    let deleted = policy.enforce(db.pool()).await?;

    tracing::info!(deleted = deleted, "Manual retention trim completed");

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::event::TelemetryEvent;
    use chrono::{TimeZone, Utc};

    fn event_at(id: &str, secs: i64) -> TelemetryEvent {
        TelemetryEvent {
            id: Some(id.to_string()),
            timestamp: Some(Utc.timestamp_opt(secs, 0).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_policy_minimum_is_one() {
        assert_eq!(RetentionPolicy::new(0).max_records(), 1);
        assert_eq!(RetentionPolicy::new(25).max_records(), 25);
    }

    #[tokio::test]
    async fn test_run_retention_now_keeps_most_recent() {
        let db = RequestDetailsDb::in_memory().await.unwrap();
        let events = (0..5).map(|i| event_at(&format!("e{}", i), 1_000 + i)).collect();
        db.write_batch(events, 1024 * 1024, RetentionPolicy::new(100))
            .await
            .unwrap();

        let deleted = run_retention_now(&db, RetentionPolicy::new(2)).await.unwrap();
        assert_eq!(deleted, 3);

        assert!(db.get_by_id("e4").await.unwrap().is_some());
        assert!(db.get_by_id("e3").await.unwrap().is_some());
        assert!(db.get_by_id("e2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ties_keep_last_written() {
        let db = RequestDetailsDb::in_memory().await.unwrap();
        let policy = RetentionPolicy::new(100);
        db.write_batch(vec![event_at("first", 10)], 1024, policy).await.unwrap();
        db.write_batch(vec![event_at("second", 10)], 1024, policy).await.unwrap();

        run_retention_now(&db, RetentionPolicy::new(1)).await.unwrap();

        assert!(db.get_by_id("second").await.unwrap().is_some());
        assert!(db.get_by_id("first").await.unwrap().is_none());
    }
}
