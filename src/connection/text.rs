//! Plain-Text Connection Handler
//!
//! A listener for humans with `ncat`/`nc`: the client writes one command,
//! half-closes its side, and reads a readable answer.
//!
//! ```text
//! $ echo "SETLIST fruits apple pear" | ncat 127.0.0.1 4501
//! $ echo "GETLIST fruits" | ncat 127.0.0.1 4501
//! apple
//! pear
//! ```
//!
//! Strings are written as is, lists one element per line, dictionaries as
//! alternating key and value lines. A missing key prints `not found`, any
//! other failure `Error: <message>`. Writes print nothing.

use crate::commands::{CommandHandler, CommandResult, Reply};
use crate::config::ConnectionLimits;
use crate::connection::handler::{with_idle_timeout, ConnectionError, ConnectionStats};
use bytes::{BufMut, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace};

/// Renders a command result the way the text listener prints it.
pub fn render(result: &CommandResult) -> BytesMut {
    let mut out = BytesMut::new();

    match result {
        Ok(Reply::None) => {}
        Ok(Reply::String(value)) => out.put_slice(value),
        Ok(Reply::List(elements)) => {
            for element in elements {
                out.put_slice(element);
                out.put_u8(b'\n');
            }
        }
        Ok(Reply::Dict(entries)) => {
            for (key, value) in entries {
                out.put_slice(key);
                out.put_u8(b'\n');
                out.put_slice(value);
                out.put_u8(b'\n');
            }
        }
        Err(e) if e.is_not_found() => out.put_slice(b"not found"),
        Err(e) => out.put_slice(format!("Error: {}", e).as_bytes()),
    }

    out
}

/// Reads one command until end of stream, executes it and writes the
/// rendered result.
pub async fn handle_text_connection<S>(
    mut stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    limits: ConnectionLimits,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stats.connection_opened();
    let result = serve_one(&mut stream, &command_handler, &stats, &limits).await;
    stats.connection_closed();

    match &result {
        Ok(()) => trace!(client = %addr, "Text command served"),
        Err(e) => debug!(client = %addr, error = %e, "Text connection failed"),
    }
    result
}

async fn serve_one<S>(
    stream: &mut S,
    command_handler: &CommandHandler,
    stats: &ConnectionStats,
    limits: &ConnectionLimits,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = BytesMut::with_capacity(256);

    loop {
        let n = with_idle_timeout(limits, stream.read_buf(&mut request)).await?;
        if n == 0 {
            break;
        }
        stats.bytes_read(n);

        if request.len() > limits.max_request {
            let message = format!(
                "Error: request exceeds the maximum of {} bytes",
                limits.max_request
            );
            with_idle_timeout(limits, stream.write_all(message.as_bytes())).await?;
            return Ok(());
        }
    }

    let result = command_handler.handle(&request);
    stats.command_processed();

    let out = render(&result);
    with_idle_timeout(limits, async {
        stream.write_all(&out).await?;
        stream.shutdown().await
    })
    .await?;
    stats.bytes_written(out.len());

    Ok(())
}

/// Accepts text connections forever, one task per client.
pub async fn serve_text(
    listener: TcpListener,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    limits: ConnectionLimits,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Text listener ready");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = command_handler.clone();
                let stats = Arc::clone(&stats);
                tokio::spawn(async move {
                    let _ = handle_text_connection(stream, addr, handler, stats, limits).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
