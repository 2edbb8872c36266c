use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "request-details", version, about = "Request details store and API")]
pub struct Cli {
    /// Settings file path (TOML with an [observability] table)
    #[arg(short, long, global = true, env = "REQUEST_DETAILS_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Log output format (text, json)
    #[arg(long, default_value = "text", value_parser = ["text", "json"], global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP API (default)
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// List stored request details
    Query(crate::commands::query::QueryArgs),

    /// Print one request detail as JSON
    Show {
        /// Request detail id
        id: String,
    },

    /// List providers seen in stored request details
    Providers,

    /// Apply the retention bound now
    Prune,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display the effective configuration
    Show,
}

impl Cli {
    /// Get the command to execute, defaulting to Serve if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve {
            host: "127.0.0.1".to_string(),
            port: 3000,
        })
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_serve() {
        let cli = Cli::try_parse_from(["request-details"]).unwrap();

        match cli.get_command() {
            Commands::Serve { host, port } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 3000);
            }
            _ => panic!("Expected Serve command"),
        }
        assert!(!cli.json_logs());
    }

    #[test]
    fn test_cli_parsing_serve_with_port() {
        let cli = Cli::try_parse_from(["request-details", "serve", "--port", "8080"]).unwrap();

        match cli.get_command() {
            Commands::Serve { port, .. } => assert_eq!(port, 8080),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parsing_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "request-details",
            "providers",
            "--settings",
            "settings.toml",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.settings, Some(PathBuf::from("settings.toml")));
        assert!(cli.json_logs());
        assert!(matches!(cli.get_command(), Commands::Providers));
    }

    #[test]
    fn test_cli_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["request-details", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn test_cli_parsing_show_and_config() {
        let cli = Cli::try_parse_from(["request-details", "show", "abc"]).unwrap();
        match cli.get_command() {
            Commands::Show { id } => assert_eq!(id, "abc"),
            _ => panic!("Expected Show command"),
        }

        let cli = Cli::try_parse_from(["request-details", "config", "show"]).unwrap();
        assert!(matches!(
            cli.get_command(),
            Commands::Config {
                action: ConfigCommands::Show
            }
        ));
    }
}
