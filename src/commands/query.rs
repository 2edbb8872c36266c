//! Query command
//!
//! List and inspect request details stored in the SQLite database.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use colored::Colorize;
use request_details::config::ObservabilityConfig;
use request_details::observability::{PageResult, QueryFilter, TelemetryEvent};
use serde_json::Number;

use super::open_store;

/// Query and display request details
#[derive(Debug, Clone, Parser)]
pub struct QueryArgs {
    /// Filter by provider
    #[arg(long)]
    pub provider: Option<String>,

    /// Filter by model
    #[arg(short, long)]
    pub model: Option<String>,

    /// Filter by connection id
    #[arg(short, long)]
    pub connection_id: Option<String>,

    /// Filter by status (e.g. success, error)
    #[arg(long)]
    pub status: Option<String>,

    /// Only details at or after this RFC 3339 time
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Only details at or before this RFC 3339 time
    #[arg(long)]
    pub until: Option<DateTime<Utc>>,

    /// Page number (1-based)
    #[arg(short, long, default_value = "1")]
    pub page: i64,

    /// Results per page (1-100)
    #[arg(long, default_value = "20")]
    pub page_size: i64,

    /// Output format (text, json)
    #[arg(short = 'f', long, default_value = "text")]
    pub format: String,
}

impl QueryArgs {
    pub fn to_filter(&self) -> QueryFilter {
        QueryFilter {
            provider: self.provider.clone(),
            model: self.model.clone(),
            connection_id: self.connection_id.clone(),
            status: self.status.clone(),
            start_date: self.since,
            end_date: self.until,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// Execute the query command
pub async fn execute(args: QueryArgs, config: &ObservabilityConfig) -> Result<()> {
    let db = open_store(config).await?;
    let result = db.query(&args.to_filter()).await?;

    match args.format.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&result)?;
            println!("{}", json);
        }
        _ => display_page_text(&result),
    }

    Ok(())
}

/// Execute the show command
pub async fn show(id: &str, config: &ObservabilityConfig) -> Result<()> {
    let db = open_store(config).await?;

    let Some(detail) = db.get_by_id(id).await? else {
        anyhow::bail!("Request detail '{}' not found", id);
    };

    let json = serde_json::to_string_pretty(&detail).context("Failed to render request detail")?;
    println!("{}", json);
    Ok(())
}

/// Display one page in human-friendly text format
fn display_page_text(result: &PageResult) {
    if result.items.is_empty() {
        println!("{}", "No request details found matching the criteria".yellow());
        return;
    }

    println!(
        "{}",
        format!(
            "{:<23} {:<12} {:<28} {:<8} {:>10} {:>12}  {}",
            "TIME", "PROVIDER", "MODEL", "STATUS", "LATENCY", "TOKENS", "ID"
        )
        .bold()
    );

    for detail in &result.items {
        let timestamp = detail
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_default();

        let status = detail.status.as_deref().unwrap_or("-");
        let status_colored = match status {
            "success" => status.green(),
            "error" => status.red().bold(),
            _ => status.normal(),
        };

        println!(
            "{:<23} {:<12} {:<28} {:<8} {:>10} {:>12}  {}",
            timestamp.dimmed(),
            detail.provider.as_deref().unwrap_or("-").cyan(),
            detail.model.as_deref().unwrap_or("-"),
            status_colored,
            format_latency(detail),
            format_tokens(detail),
            detail.id.as_deref().unwrap_or("-").dimmed(),
        );
    }

    let p = &result.pagination;
    println!();
    println!(
        "{}",
        format!(
            "Page {}/{} ({} total)",
            p.page,
            p.total_pages.max(1),
            p.total_items
        )
        .dimmed()
    );
}

fn format_latency(detail: &TelemetryEvent) -> String {
    match detail.latency.total_ms() {
        Some(ms) if ms >= 1000.0 => format!("{:.2}s", ms / 1000.0),
        Some(ms) => format!("{}ms", ms.round()),
        None => "-".to_string(),
    }
}

fn format_tokens(detail: &TelemetryEvent) -> String {
    match (&detail.tokens.prompt, &detail.tokens.completion) {
        (None, None) => "-".to_string(),
        (prompt, completion) => format!(
            "{}/{}",
            prompt.as_ref().map_or_else(|| "0".to_string(), Number::to_string),
            completion.as_ref().map_or_else(|| "0".to_string(), Number::to_string)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use request_details::observability::{Latency, Tokens};

    #[test]
    fn test_query_args_parsing() {
        let args = QueryArgs::parse_from([
            "query",
            "--provider",
            "openai",
            "--page-size",
            "50",
            "--since",
            "2026-03-01T00:00:00Z",
        ]);

        let filter = args.to_filter();
        assert_eq!(filter.provider.as_deref(), Some("openai"));
        assert_eq!(filter.page, 1);
        assert_eq!(filter.page_size, 50);
        assert_eq!(
            filter.start_date.map(|d| d.timestamp_millis()),
            Some(1_772_323_200_000)
        );
        assert_eq!(args.format, "text");
    }

    #[tokio::test]
    async fn test_show_missing_id_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ObservabilityConfig {
            database_path: dir.path().join("details.sqlite").display().to_string(),
            ..Default::default()
        };

        let err = show("no-such-id", &config).await.unwrap_err();
        assert!(err.to_string().contains("no-such-id"));
    }

    #[test]
    fn test_query_args_reject_bad_date() {
        assert!(QueryArgs::try_parse_from(["query", "--until", "tomorrow"]).is_err());
    }

    #[test]
    fn test_format_latency_and_tokens() {
        let mut detail = TelemetryEvent::default();
        assert_eq!(format_latency(&detail), "-");
        assert_eq!(format_tokens(&detail), "-");

        detail.latency = Latency {
            ttft: Some(Number::from(120u64)),
            total: Some(Number::from(450u64)),
            ..Default::default()
        };
        detail.tokens = Tokens {
            prompt: Some(Number::from(10u64)),
            ..Default::default()
        };
        assert_eq!(format_latency(&detail), "450ms");
        assert_eq!(format_tokens(&detail), "10/0");

        detail.latency.total = Number::from_f64(2500.4);
        assert_eq!(format_latency(&detail), "2.50s");
    }
}
