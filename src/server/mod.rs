//! Socket command service.
//!
//! Two transports share one command handler and one lifecycle: WebSocket
//! clients send one command per text message and get one text message back;
//! line clients send newline-delimited commands over TCP and get one reply per
//! command, terminated by a blank line. Every connection runs in its own task,
//! so a slow fetch for one client never holds up another.

pub mod command;
pub mod handler;
mod lines;
mod websocket;

pub use command::{Command, UNKNOWN_COMMAND};
pub use handler::CommandHandler;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Terminates every line-protocol reply so clients can frame multi-line JSON.
pub const RESPONSE_TERMINATOR: &[u8] = b"\n\n";

/// Longest command accepted on either transport, in bytes.
pub const MAX_COMMAND_LENGTH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Newline-delimited commands over plain TCP.
    Lines,
    /// One command per WebSocket text message.
    WebSocket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Bound and accepting connections.
    Listening,
    /// No longer accepting; waiting for open connections to wind down.
    Draining,
    Stopped,
}

pub struct CommandServer {
    listener: TcpListener,
    transport: Transport,
    handler: Arc<CommandHandler>,
    cancel: CancellationToken,
    state: watch::Sender<ServerState>,
}

impl CommandServer {
    /// Binds a newline-delimited TCP listener.
    pub async fn bind<A: ToSocketAddrs>(addr: A, handler: Arc<CommandHandler>) -> Result<Self> {
        Self::bind_with(addr, Transport::Lines, handler).await
    }

    pub async fn bind_websocket<A: ToSocketAddrs>(
        addr: A,
        handler: Arc<CommandHandler>,
    ) -> Result<Self> {
        Self::bind_with(addr, Transport::WebSocket, handler).await
    }

    pub async fn bind_with<A: ToSocketAddrs>(
        addr: A,
        transport: Transport,
        handler: Arc<CommandHandler>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {transport:?} command server"))?;
        let (state, _) = watch::channel(ServerState::Listening);

        Ok(Self {
            listener,
            transport,
            handler,
            cancel: CancellationToken::new(),
            state,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns a CancellationToken that can be used to trigger shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Accepts connections until cancelled, then drains open connections.
    pub async fn run(self) -> Result<()> {
        let CommandServer {
            listener,
            transport,
            handler,
            cancel,
            state,
        } = self;

        info!(addr = ?listener.local_addr().ok(), ?transport, "Command server listening");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Client connected");
                        let handler = Arc::clone(&handler);
                        let cancel = cancel.child_token();
                        connections.spawn(serve_client(transport, stream, peer, handler, cancel));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        state.send_replace(ServerState::Draining);
        drop(listener);
        info!(open = connections.len(), ?transport, "Command server draining");

        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Connection task failed");
            }
        }

        state.send_replace(ServerState::Stopped);
        info!(?transport, "Command server stopped");
        Ok(())
    }
}

async fn serve_client(
    transport: Transport,
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<CommandHandler>,
    cancel: CancellationToken,
) {
    let result = match transport {
        Transport::Lines => lines::serve_connection(stream, peer, handler, cancel).await,
        Transport::WebSocket => websocket::serve_connection(stream, peer, handler, cancel).await,
    };
    if let Err(e) = result {
        warn!(%peer, error = %format!("{e:#}"), "Connection closed with error");
    }
    debug!(%peer, "Client disconnected");
}
