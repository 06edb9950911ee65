use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CommandHandler, MAX_COMMAND_LENGTH};

pub(super) async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<CommandHandler>,
    cancel: CancellationToken,
) -> Result<()> {
    let config = WebSocketConfig::default()
        .max_message_size(Some(MAX_COMMAND_LENGTH))
        .max_frame_size(Some(MAX_COMMAND_LENGTH));
    let mut socket = tokio_tungstenite::accept_async_with_config(stream, Some(config))
        .await
        .context("WebSocket handshake failed")?;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = socket.next() => message,
        };
        let message = match message {
            None => break,
            Some(message) => message.context("Failed to read command")?,
        };

        let command = match message {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Close(_) => break,
            // Pings are answered by the protocol layer.
            _ => continue,
        };
        debug!(%peer, command = %command.trim(), "Received command");

        if let Some(response) = handler.handle(&command).await {
            socket
                .send(Message::text(response))
                .await
                .context("Failed to send response")?;
        }
    }

    let _ = socket.close(None).await;
    Ok(())
}
