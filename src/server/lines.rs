use anyhow::{Context, Result};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CommandHandler, MAX_COMMAND_LENGTH, RESPONSE_TERMINATOR, UNKNOWN_COMMAND};

pub(super) async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<CommandHandler>,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    // Frames are raw bytes so invalid UTF-8 is just another unknown command.
    let codec =
        AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_COMMAND_LENGTH);
    let mut commands = FramedRead::new(reader, codec);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = commands.next() => frame,
        };
        let bytes = match frame {
            None => break,
            Some(Ok(bytes)) => bytes,
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                warn!(%peer, limit = MAX_COMMAND_LENGTH, "Command too long, closing connection");
                write_response(&mut writer, UNKNOWN_COMMAND).await?;
                break;
            }
            Some(Err(e)) => return Err(e).context("Failed to read command"),
        };

        let line = String::from_utf8_lossy(&bytes);
        debug!(%peer, command = %line.trim(), "Received command");

        if let Some(response) = handler.handle(&line).await {
            write_response(&mut writer, &response).await?;
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &str) -> Result<()> {
    writer
        .write_all(response.as_bytes())
        .await
        .context("Failed to send response")?;
    writer
        .write_all(RESPONSE_TERMINATOR)
        .await
        .context("Failed to send response")
}
