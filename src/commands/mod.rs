//! Command implementations for the CLI
//!
//! - serve: Run the HTTP API
//! - query: List and show stored request details
//! - store: Provider listing and retention maintenance
//! - config: Display the effective configuration

pub mod config;
pub mod query;
pub mod serve;
pub mod store;

use anyhow::{Context, Result};
use request_details::config::ObservabilityConfig;
use request_details::observability::RequestDetailsDb;
use std::path::Path;

/// Open the configured store for a one-shot command
async fn open_store(config: &ObservabilityConfig) -> Result<RequestDetailsDb> {
    RequestDetailsDb::open(Path::new(&config.database_path))
        .await
        .with_context(|| format!("Failed to open database at {}", config.database_path))
}
