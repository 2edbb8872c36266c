use serde::{Deserialize, Serialize};
use std::path::Path;

/// Observability configuration (request detail persistence)
///
/// Resolution order for every field: the `[observability]` table of the
/// settings file, then the `OBSERVABILITY_*` environment variable, then the
/// hardcoded default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Maximum number of request details kept in the database (default: 1000)
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Number of buffered events that triggers an immediate flush (default: 20)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Idle time before a partial batch is flushed in milliseconds (default: 5000)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Per-payload size limit in kilobytes (default: 1024)
    #[serde(default = "default_max_json_size_kb")]
    pub max_json_size_kb: usize,

    /// Upper bound on pending events, 0 disables the bound (default: 0)
    #[serde(default)]
    pub max_buffer_size: usize,

    /// How long shutdown waits for the final drain in milliseconds (default: 10000)
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// SQLite database path (default: "./data/request-details.sqlite")
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            max_json_size_kb: default_max_json_size_kb(),
            max_buffer_size: 0,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            database_path: default_database_path(),
        }
    }
}

impl ObservabilityConfig {
    /// Payload size limit in bytes
    pub fn max_json_size_bytes(&self) -> usize {
        self.max_json_size_kb.saturating_mul(1024)
    }

    /// SQLite connection URL for `database_path`
    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.database_path)
    }
}

fn default_max_records() -> usize {
    1000
}

fn default_batch_size() -> usize {
    20
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_max_json_size_kb() -> usize {
    1024
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

fn default_database_path() -> String {
    "./data/request-details.sqlite".to_string()
}

/// Environment variables consulted when the settings file leaves a field unset
const NUMERIC_ENV_FALLBACKS: &[(&str, &str)] = &[
    ("OBSERVABILITY_MAX_RECORDS", "observability.max_records"),
    ("OBSERVABILITY_BATCH_SIZE", "observability.batch_size"),
    ("OBSERVABILITY_FLUSH_INTERVAL_MS", "observability.flush_interval_ms"),
    ("OBSERVABILITY_MAX_JSON_SIZE", "observability.max_json_size_kb"),
    ("OBSERVABILITY_MAX_BUFFER_SIZE", "observability.max_buffer_size"),
    ("OBSERVABILITY_SHUTDOWN_TIMEOUT_MS", "observability.shutdown_timeout_ms"),
];

const DATABASE_PATH_ENV: &str = "OBSERVABILITY_DATABASE_PATH";

/// Load the observability configuration
///
/// Never fails: any error while reading or validating the settings is logged
/// and the hardcoded defaults are returned instead, so ingestion is never
/// blocked by a broken settings file.
pub fn load_observability_config(settings_path: Option<&Path>) -> ObservabilityConfig {
    match try_load_observability_config(settings_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to load observability config, falling back to defaults"
            );
            ObservabilityConfig::default()
        }
    }
}

fn try_load_observability_config(
    settings_path: Option<&Path>,
) -> anyhow::Result<ObservabilityConfig> {
    let defaults = ObservabilityConfig::default();

    let mut builder = config::Config::builder()
        .set_default("observability.max_records", defaults.max_records as i64)?
        .set_default("observability.batch_size", defaults.batch_size as i64)?
        .set_default("observability.flush_interval_ms", defaults.flush_interval_ms as i64)?
        .set_default("observability.max_json_size_kb", defaults.max_json_size_kb as i64)?
        .set_default("observability.max_buffer_size", defaults.max_buffer_size as i64)?
        .set_default("observability.shutdown_timeout_ms", defaults.shutdown_timeout_ms as i64)?
        .set_default("observability.database_path", defaults.database_path.clone())?;

    // Environment values replace the hardcoded defaults but stay below the file
    for (var, key) in NUMERIC_ENV_FALLBACKS {
        if let Ok(raw) = std::env::var(var) {
            match raw.trim().parse::<i64>() {
                Ok(value) => builder = builder.set_default(*key, value)?,
                Err(e) => tracing::warn!(
                    var = %var,
                    value = %raw,
                    error = %e,
                    "Ignoring invalid environment value"
                ),
            }
        }
    }
    if let Ok(path) = std::env::var(DATABASE_PATH_ENV) {
        builder = builder.set_default("observability.database_path", path)?;
    }

    if let Some(path) = settings_path {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    let cfg: ObservabilityConfig = builder.build()?.get("observability")?;
    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &ObservabilityConfig) -> anyhow::Result<()> {
    if cfg.max_records == 0 {
        anyhow::bail!("observability.max_records must be at least 1");
    }

    if cfg.batch_size == 0 {
        anyhow::bail!("observability.batch_size must be at least 1");
    }

    if cfg.max_json_size_kb == 0 {
        anyhow::bail!("observability.max_json_size_kb must be at least 1");
    }

    if cfg.database_path.trim().is_empty() {
        anyhow::bail!("observability.database_path cannot be empty");
    }

    Ok(())
}
