pub mod aggregator;
pub mod audit;
pub mod cli;
pub mod core;
pub mod providers;
pub mod server;

use crate::aggregator::RateAggregator;
use crate::audit::FileAuditSink;
use crate::core::config::AppConfig;
use crate::core::rates::CurrencyCode;
use crate::providers::PrivatBankProvider;
use crate::server::{CommandHandler, CommandServer};
use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub enum AppCommand {
    /// One-shot lookup; optionally keeps the command server running alongside.
    Exchange {
        days: i64,
        currencies: Vec<CurrencyCode>,
        serve: bool,
    },
    Serve,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("Exchange rates starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let aggregator = Arc::new(build_aggregator(&config));

    match command {
        AppCommand::Exchange {
            days,
            currencies,
            serve: false,
        } => {
            let currencies = requested_currencies(&config, currencies);
            cli::exchange::run(&aggregator, days, &currencies).await
        }
        AppCommand::Exchange {
            days,
            currencies,
            serve: true,
        } => {
            let servers = bind_servers(&config, Arc::clone(&aggregator)).await?;
            let serving = tokio::spawn(cli::serve::run(servers));

            let currencies = requested_currencies(&config, currencies);
            if let Err(e) = cli::exchange::run(&aggregator, days, &currencies).await {
                eprintln!("{e:#}");
            }

            serving.await?
        }
        AppCommand::Serve => {
            let servers = bind_servers(&config, aggregator).await?;
            cli::serve::run(servers).await
        }
    }
}

pub fn build_aggregator(config: &AppConfig) -> RateAggregator {
    let provider = PrivatBankProvider::from_config(&config.provider());
    RateAggregator::new(Arc::new(provider))
}

pub fn build_handler(config: &AppConfig, aggregator: Arc<RateAggregator>) -> CommandHandler {
    let audit = Arc::new(FileAuditSink::new(&config.audit_log));
    CommandHandler::new(aggregator, audit, config.currency_set())
}

/// WebSocket and line listeners sharing one handler, and so one audit log.
async fn bind_servers(
    config: &AppConfig,
    aggregator: Arc<RateAggregator>,
) -> Result<Vec<CommandServer>> {
    let handler = Arc::new(build_handler(config, aggregator));
    Ok(vec![
        CommandServer::bind_websocket(config.server.address(), Arc::clone(&handler)).await?,
        CommandServer::bind(config.server.line_address(), handler).await?,
    ])
}

/// Currencies named on the command line, or the configured defaults.
fn requested_currencies(config: &AppConfig, currencies: Vec<CurrencyCode>) -> BTreeSet<CurrencyCode> {
    if currencies.is_empty() {
        config.currency_set()
    } else {
        currencies.into_iter().collect()
    }
}
