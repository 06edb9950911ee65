use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use xrates::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    /// Number of days to fetch, 1 to 10, counting today as the first
    #[arg(allow_negative_numbers = true)]
    days: Option<i64>,

    /// Currency codes to report (defaults to the configured currencies)
    currencies: Vec<String>,

    /// Keep serving socket commands after printing the rates
    #[arg(long)]
    serve: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Run the socket command service
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config_path = cli.config_path.as_deref();
    let result = match (cli.command, cli.days) {
        (Some(Commands::Setup), _) => xrates::cli::setup::setup(),
        (Some(Commands::Serve), _) => {
            xrates::run_command(xrates::AppCommand::Serve, config_path).await
        }
        (None, Some(days)) => {
            let command = xrates::AppCommand::Exchange {
                days,
                currencies: cli.currencies,
                serve: cli.serve,
            };
            xrates::run_command(command, config_path).await
        }
        (None, None) if cli.serve => {
            xrates::run_command(xrates::AppCommand::Serve, config_path).await
        }
        (None, None) => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
