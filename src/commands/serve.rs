use anyhow::Result;
use colored::Colorize;
use request_details::{config::ObservabilityConfig, server};
use tracing::info;

/// Execute the serve command
///
/// Blocks until SIGTERM/SIGINT, then drains buffered request details.
pub async fn execute(host: &str, port: u16, config: ObservabilityConfig) -> Result<()> {
    println!(
        "{}",
        format!("Starting request details API on {}:{}...", host, port).green()
    );
    info!(database = %config.database_path, "Starting request details server");

    server::start_server(host, port, config).await
}
