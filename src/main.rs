use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use request_details::config::load_observability_config;
use request_details::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = cli::Cli::parse();

    init_tracing(args.json_logs());

    let config = load_observability_config(args.settings.as_deref());

    // Dispatch to appropriate command handler
    match args.get_command() {
        cli::Commands::Serve { host, port } => {
            commands::serve::execute(&host, port, config).await?;
        }
        cli::Commands::Query(query_args) => {
            commands::query::execute(query_args, &config).await?;
        }
        cli::Commands::Show { id } => {
            commands::query::show(&id, &config).await?;
        }
        cli::Commands::Providers => {
            commands::store::providers(&config).await?;
        }
        cli::Commands::Prune => {
            commands::store::prune(&config).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&config)?,
        },
    }

    Ok(())
}
