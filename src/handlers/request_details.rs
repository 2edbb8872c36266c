//! Request details HTTP API handlers
//!
//! Thin layer over the store: parses query strings into a [`QueryFilter`],
//! forwards submitted events to the writer and shapes JSON responses.

use crate::error::AppError;
use crate::observability::{
    PageResult, QueryFilter, RequestDetailsDb, RequestDetailsWriter, TelemetryEvent,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared state for request details API
#[derive(Clone)]
pub struct RequestDetailsState {
    pub db: Arc<RequestDetailsDb>,
    pub writer: RequestDetailsWriter,
}

impl RequestDetailsState {
    pub fn new(writer: RequestDetailsWriter) -> Self {
        Self {
            db: writer.db().clone(),
            writer,
        }
    }
}

/// Query parameters for the list endpoint
///
/// Numbers and dates arrive as raw strings so malformed values produce a
/// 400 with a useful message instead of a generic extractor rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetailsParams {
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub connection_id: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl RequestDetailsParams {
    /// Convert into a validated filter
    pub fn into_filter(self) -> Result<QueryFilter, AppError> {
        let defaults = QueryFilter::default();

        let filter = QueryFilter {
            page: parse_number("page", self.page)?.unwrap_or(defaults.page),
            page_size: parse_number("pageSize", self.page_size)?.unwrap_or(defaults.page_size),
            provider: non_empty(self.provider),
            model: non_empty(self.model),
            connection_id: non_empty(self.connection_id),
            status: non_empty(self.status),
            start_date: non_empty(self.start_date)
                .map(|s| parse_date("startDate", &s))
                .transpose()?,
            end_date: non_empty(self.end_date)
                .map(|s| parse_date("endDate", &s))
                .transpose()?,
        };

        filter.validate()?;
        Ok(filter)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_number(name: &str, value: Option<String>) -> Result<Option<i64>, AppError> {
    match non_empty(value) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| {
                AppError::BadRequest(format!("{} must be an integer, got '{}'", name, raw))
            }),
    }
}

/// Accepts RFC 3339, a plain `YYYY-MM-DD` (UTC midnight) or epoch milliseconds
fn parse_date(name: &str, raw: &str) -> Result<DateTime<Utc>, AppError> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    if let Some(dt) = raw.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis) {
        return Ok(dt);
    }

    Err(AppError::BadRequest(format!("{} is not a valid date: '{}'", name, raw)))
}

/// GET /api/usage/request-details - List request details
///
/// Example: GET /api/usage/request-details?page=1&pageSize=20&provider=openai
pub async fn list_request_details(
    State(state): State<RequestDetailsState>,
    Query(params): Query<RequestDetailsParams>,
) -> Result<Json<PageResult>, AppError> {
    let filter = params.into_filter()?;
    let result = state.db.query(&filter).await?;
    Ok(Json(result))
}

/// GET /api/usage/request-details/{id} - Get a single request detail
pub async fn get_request_detail(
    State(state): State<RequestDetailsState>,
    Path(id): Path<String>,
) -> Result<Json<TelemetryEvent>, AppError> {
    state
        .db
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Request detail '{}' not found", id)))
}

/// POST /api/usage/request-details - Submit a request detail
///
/// Returns 202 immediately; the event becomes visible after the next flush.
pub async fn submit_request_detail(
    State(state): State<RequestDetailsState>,
    Json(event): Json<TelemetryEvent>,
) -> impl IntoResponse {
    state.writer.submit(event);
    StatusCode::ACCEPTED
}

#[derive(Debug, Serialize)]
pub struct ProviderEntry {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderEntry>,
}

/// GET /api/usage/providers - Distinct providers seen in request details
///
/// Display names are resolved by the dashboard; the id is echoed as name.
pub async fn list_providers(
    State(state): State<RequestDetailsState>,
) -> Result<Json<ProvidersResponse>, AppError> {
    let providers = state
        .db
        .distinct_providers()
        .await?
        .into_iter()
        .map(|id| ProviderEntry {
            name: id.clone(),
            id,
        })
        .collect();

    Ok(Json(ProvidersResponse { providers }))
}
