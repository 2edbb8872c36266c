use anyhow::Result;
use colored::Colorize;
use request_details::config::ObservabilityConfig;
use serde::Serialize;
use tracing::info;

/// Settings file layout, so the output can be pasted back as-is
#[derive(Serialize)]
struct SettingsView<'a> {
    observability: &'a ObservabilityConfig,
}

/// Execute the config show command
///
/// Prints the effective configuration (file, environment and defaults merged)
pub fn show(config: &ObservabilityConfig) -> Result<()> {
    info!("Displaying effective configuration");

    println!("{}", "Current Configuration:".green().bold());
    println!();
    println!("{}", render(config)?);

    Ok(())
}

fn render(config: &ObservabilityConfig) -> Result<String> {
    Ok(toml::to_string_pretty(&SettingsView {
        observability: config,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_round_trips_through_settings_layout() {
        let cfg = ObservabilityConfig {
            max_records: 42,
            ..Default::default()
        };

        let rendered = render(&cfg).unwrap();
        assert!(rendered.contains("[observability]"));
        assert!(rendered.contains("max_records = 42"));

        #[derive(serde::Deserialize)]
        struct Settings {
            observability: ObservabilityConfig,
        }
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.observability, cfg);
    }
}
