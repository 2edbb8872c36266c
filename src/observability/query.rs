//! Query API for request details
//!
//! Filtered, paginated reads straight from the database. Events still
//! waiting in the writer buffer are not visible here until they are flushed.

use super::database::{row_to_event, RequestDetailsDb, DETAIL_COLUMNS};
use super::event::TelemetryEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

/// Largest accepted page size
pub const MAX_PAGE_SIZE: i64 = 100;

/// Page size used when the caller does not pick one
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Errors returned by the read path
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Rejected before the database is touched
    #[error("{0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Filter for request detail queries
///
/// All present fields must match (AND). Date bounds are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub connection_id: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// 1-based page number
    pub page: i64,
    /// Between 1 and [`MAX_PAGE_SIZE`]
    pub page_size: i64,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            connection_id: None,
            status: None,
            start_date: None,
            end_date: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl QueryFilter {
    /// Check paging and date range
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.page < 1 {
            return Err(QueryError::Invalid("Page must be >= 1".to_string()));
        }

        if self.page_size < 1 || self.page_size > MAX_PAGE_SIZE {
            return Err(QueryError::Invalid(format!(
                "PageSize must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(QueryError::Invalid(
                    "startDate must not be after endDate".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    /// Append the WHERE clause shared by the count and the page query
    fn push_predicates(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1=1");

        if let Some(provider) = &self.provider {
            qb.push(" AND provider = ").push_bind(provider.clone());
        }

        if let Some(model) = &self.model {
            qb.push(" AND model = ").push_bind(model.clone());
        }

        if let Some(connection_id) = &self.connection_id {
            qb.push(" AND connection_id = ").push_bind(connection_id.clone());
        }

        if let Some(status) = &self.status {
            qb.push(" AND status = ").push_bind(status.clone());
        }

        if let Some(start) = self.start_date {
            qb.push(" AND timestamp >= ").push_bind(start.timestamp_millis());
        }

        if let Some(end) = self.end_date {
            qb.push(" AND timestamp <= ").push_bind(end.timestamp_millis());
        }
    }
}

/// Pagination metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: i64, page_size: i64, total_items: i64) -> Self {
        let total_pages = if page_size > 0 {
            (total_items + page_size - 1) / page_size
        } else {
            0
        };

        Self {
            page,
            page_size,
            total_items,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

/// One page of request details, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    #[serde(rename = "details")]
    pub items: Vec<TelemetryEvent>,
    pub pagination: Pagination,
}

impl RequestDetailsDb {
    /// Query request details with filtering and pagination
    ///
    /// The count and the page are read inside one transaction, so both see
    /// the same set of committed batches.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let filter = QueryFilter {
    ///     provider: Some("openai".to_string()),
    ///     page: 2,
    ///     page_size: 50,
    ///     ..Default::default()
    /// };
    /// let page = db.query(&filter).await?;
    /// ```
    pub async fn query(&self, filter: &QueryFilter) -> Result<PageResult, QueryError> {
        filter.validate()?;

        let mut tx = self.pool().begin().await?;

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM request_details");
        filter.push_predicates(&mut count_query);
        let total_items: i64 = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&mut *tx)
            .await?;

        let mut page_query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM request_details", DETAIL_COLUMNS));
        filter.push_predicates(&mut page_query);
        page_query
            .push(" ORDER BY timestamp DESC, rowid DESC LIMIT ")
            .push_bind(filter.page_size)
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let rows = page_query.build().fetch_all(&mut *tx).await?;
        tx.commit().await?;

        let items = rows
            .iter()
            .map(row_to_event)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PageResult {
            items,
            pagination: Pagination::new(filter.page, filter.page_size, total_items),
        })
    }

    /// Get a single request detail by id
    pub async fn get_by_id(&self, id: &str) -> Result<Option<TelemetryEvent>, QueryError> {
        let sql = format!("SELECT {} FROM request_details WHERE id = ?", DETAIL_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(self.pool()).await?;

        Ok(row.as_ref().map(row_to_event).transpose()?)
    }

    /// Distinct, non-empty provider values, sorted ascending
    pub async fn distinct_providers(&self) -> Result<Vec<String>, QueryError> {
        let providers = sqlx::query_scalar(
            "SELECT DISTINCT provider
             FROM request_details
             WHERE provider IS NOT NULL AND provider != ''
             ORDER BY provider ASC",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(providers)
    }
}
