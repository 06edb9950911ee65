use crate::server::CommandServer;
use anyhow::Result;
use futures::future::try_join_all;

/// Runs the command servers until Ctrl-C.
pub async fn run(servers: Vec<CommandServer>) -> Result<()> {
    let tokens: Vec<_> = servers.iter().map(CommandServer::cancel_token).collect();
    for server in &servers {
        eprintln!(
            "{:?} command server is running on {}",
            server.transport(),
            server.local_addr()?
        );
    }

    // Handle shutdown signals
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received shutdown signal");
        tokens.iter().for_each(|token| token.cancel());
    });

    try_join_all(servers.into_iter().map(CommandServer::run)).await?;
    Ok(())
}
