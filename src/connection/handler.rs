//! Binary Connection Handler
//!
//! Serves the framed binary protocol. Each client gets its own handler task
//! that runs in a loop, reading requests and sending responses over a
//! persistent connection.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake, then TLS handshake if enabled)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes (idle limit) │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Unframe 0x11 request    │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Decode + execute        │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send response           │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects, times out, or breaks framing
//! ```
//!
//! ## Buffer Management
//!
//! A BytesMut buffer accumulates incoming data, since a read can end in the
//! middle of a request or carry several of them. The buffer never grows past
//! one maximum-size request plus its header.

use crate::commands::CommandHandler;
use crate::config::ConnectionLimits;
use crate::protocol::wire::{self, Response, WireError, REQUEST_HEADER_LEN};
use bytes::{Buf, Bytes, BytesMut};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Request framing violated
    #[error("Framing error: {0}")]
    Wire(#[from] WireError),

    /// No progress within the idle timeout
    #[error("Connection idle for too long")]
    Timeout,

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial request)
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

impl ConnectionError {
    /// Returns true for the ways a client normally goes away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::ClientDisconnected => true,
            ConnectionError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Runs `future` under the idle timeout.
pub(crate) async fn with_idle_timeout<T, F>(
    limits: &ConnectionLimits,
    future: F,
) -> Result<T, ConnectionError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limits.idle_timeout, future).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ConnectionError::Timeout),
    }
}

/// Handles a single client connection.
///
/// Generic over the stream so the same loop serves plain TCP and TLS.
pub struct ConnectionHandler<S> {
    /// The client stream
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    limits: ConnectionLimits,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        limits: ConnectionLimits,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            stats,
            limits,
        }
    }

    /// Runs the main connection loop until the client disconnects or an
    /// error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) if e.is_disconnect() => debug!(client = %self.addr, "Client disconnected"),
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(request) = self.try_parse_request().await? {
                let response = Response::from(self.command_handler.handle(&request));
                self.stats.command_processed();
                self.send_response(&response).await?;
            }

            self.read_more_data().await?;
        }
    }

    /// Attempts to take one complete request off the buffer.
    ///
    /// An oversized request is answered with an error before the
    /// connection is closed.
    async fn try_parse_request(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        match wire::parse_request_header(&self.buffer, self.limits.max_request) {
            Ok(Some(size)) => {
                // the buffer grows in read_more_data as the body arrives
                if self.buffer.len() < REQUEST_HEADER_LEN + size {
                    return Ok(None);
                }

                self.buffer.advance(REQUEST_HEADER_LEN);
                let request = self.buffer.split_to(size).freeze();
                trace!(
                    client = %self.addr,
                    size = size,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Ok(Some(request))
            }
            Ok(None) => Ok(None),
            Err(e @ WireError::RequestTooLarge { .. }) => {
                warn!(client = %self.addr, error = %e, "Rejecting request");
                self.send_response(&Response::Error(e.to_string())).await?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = with_idle_timeout(
            &self.limits,
            self.stream.get_mut().read_buf(&mut self.buffer),
        )
        .await?;

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Sends a response to the client.
    async fn send_response(&mut self, response: &Response) -> Result<(), ConnectionError> {
        let mut bytes = BytesMut::new();
        wire::encode_response(response, &mut bytes);

        let limits = self.limits;
        with_idle_timeout(&limits, async {
            self.stream.write_all(&bytes).await?;
            self.stream.flush().await
        })
        .await?;

        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent response");
        Ok(())
    }
}

/// Handles a client connection.
///
/// Creates a ConnectionHandler and runs it to completion. Errors are logged
/// by the handler itself.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    limits: ConnectionLimits,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats, limits);
    let _ = handler.run().await;
}

/// Accepts binary-protocol connections forever, one task per client.
///
/// With an acceptor, every connection must complete a mutual TLS handshake
/// before its first request.
pub async fn serve(
    listener: TcpListener,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    limits: ConnectionLimits,
    tls: Option<TlsAcceptor>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, tls = tls.is_some(), "Binary TCP listener ready");
    }

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let handler = command_handler.clone();
        let stats = Arc::clone(&stats);

        match tls.clone() {
            None => {
                tokio::spawn(handle_connection(stream, addr, handler, stats, limits));
            }
            Some(acceptor) => {
                tokio::spawn(async move {
                    match with_idle_timeout(&limits, acceptor.accept(stream)).await {
                        Ok(stream) => handle_connection(stream, addr, handler, stats, limits).await,
                        Err(e) => warn!(client = %addr, error = %e, "TLS handshake failed"),
                    }
                });
            }
        }
    }
}
