//! Binary Protocol Client
//!
//! An async client for the framed TCP listener that keeps a small pool of
//! idle connections:
//!
//! ```text
//!   execute("GET k")
//!        │
//!        ▼
//!   ┌──────────┐  pop newest   ┌────────────┐
//!   │ idle pool│ ────────────► │ connection │ ── request ──► server
//!   │ (max 16) │ ◄──────────── │            │ ◄─ response ──
//!   └──────────┘  push back    └────────────┘
//!        │
//!        └── beyond the limit the oldest idle connection is closed
//! ```
//!
//! A connection that fails during an exchange is dropped, never pooled.
//!
//! # Example
//!
//! ```no_run
//! use shardkv::client::{Client, ClientError};
//!
//! # async fn demo() -> Result<(), ClientError> {
//! let client = Client::new("127.0.0.1:4502");
//! client.execute("SETLIST fruits apple pear").await?;
//! let reply = client.execute("GETLISTELEM fruits 1").await?;
//! # Ok(())
//! # }
//! ```

use crate::commands::Reply;
use crate::protocol::wire::{decode_response, encode_request, Response, WireError};
use crate::config::TlsPaths;
use crate::tls::{self, TlsError};
use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

/// Default number of idle connections kept per client
pub const DEFAULT_MAX_IDLE: usize = 16;

/// Errors returned by [`Client::execute`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The key or element does not exist
    #[error("not found")]
    NotFound,

    /// The server answered with an error message
    #[error("server error: {0}")]
    Server(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server sent a frame that could not be decoded
    #[error("protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("invalid server name '{0}'")]
    InvalidServerName(String),

    /// The server closed the connection mid-response
    #[error("connection closed by server")]
    ConnectionClosed,
}

/// Any byte stream a connection can run over.
trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// One open connection plus its unread response bytes.
struct Connection {
    stream: Box<dyn Transport>,
    buffer: BytesMut,
}

impl Connection {
    fn new(stream: Box<dyn Transport>) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    async fn exchange(&mut self, command: &[u8]) -> Result<Response, ClientError> {
        let mut request = BytesMut::new();
        encode_request(command, &mut request);
        self.stream.write_all(&request).await?;
        self.stream.flush().await?;

        loop {
            if let Some((response, consumed)) = decode_response(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(response);
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}

struct Inner {
    addr: String,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    max_idle: usize,
    idle: Mutex<Vec<Connection>>,
}

/// A cloneable handle; clones share the same pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.inner.addr)
            .field("tls", &self.inner.tls.is_some())
            .field("max_idle", &self.inner.max_idle)
            .field("idle", &self.idle_connections())
            .finish()
    }
}

impl Client {
    /// Creates a plain TCP client. No connection is opened until the first
    /// command.
    pub fn new(addr: impl Into<String>) -> Self {
        Self::build(addr.into(), None, DEFAULT_MAX_IDLE)
    }

    /// Creates a client that wraps every connection in TLS, verifying the
    /// server as `server_name`.
    pub fn with_tls(
        addr: impl Into<String>,
        connector: TlsConnector,
        server_name: &str,
    ) -> Result<Self, ClientError> {
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|_| ClientError::InvalidServerName(server_name.to_owned()))?;
        Ok(Self::build(
            addr.into(),
            Some((connector, name)),
            DEFAULT_MAX_IDLE,
        ))
    }

    /// Loads client certificates from `paths` and creates a TLS client.
    pub fn with_tls_paths(
        addr: impl Into<String>,
        paths: &TlsPaths,
        server_name: &str,
    ) -> Result<Self, ClientError> {
        Self::with_tls(addr, tls::connector(paths)?, server_name)
    }

    fn build(
        addr: String,
        tls: Option<(TlsConnector, ServerName<'static>)>,
        max_idle: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                addr,
                tls,
                max_idle,
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns a client with a different idle pool limit and an empty pool.
    pub fn max_idle(self, max_idle: usize) -> Self {
        Self::build(self.inner.addr.clone(), self.inner.tls.clone(), max_idle)
    }

    /// Number of idle connections currently pooled.
    pub fn idle_connections(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Sends one command and waits for its reply.
    ///
    /// A pooled connection the server has since closed is retried once on a
    /// fresh connection.
    pub async fn execute(&self, command: &str) -> Result<Reply, ClientError> {
        let response = match self.take_idle() {
            Some(mut conn) => match conn.exchange(command.as_bytes()).await {
                Ok(response) => {
                    self.release(conn);
                    response
                }
                Err(ClientError::ConnectionClosed | ClientError::Io(_)) => {
                    debug!(addr = %self.inner.addr, "Pooled connection went stale, reconnecting");
                    self.exchange_fresh(command).await?
                }
                Err(e) => return Err(e),
            },
            None => self.exchange_fresh(command).await?,
        };

        match response {
            Response::Ok(reply) => Ok(reply),
            Response::NotFound => Err(ClientError::NotFound),
            Response::Error(message) => Err(ClientError::Server(message)),
        }
    }

    async fn exchange_fresh(&self, command: &str) -> Result<Response, ClientError> {
        let mut conn = self.connect().await?;
        let response = conn.exchange(command.as_bytes()).await?;
        self.release(conn);
        Ok(response)
    }

    async fn connect(&self) -> Result<Connection, ClientError> {
        let stream = TcpStream::connect(&self.inner.addr).await?;
        stream.set_nodelay(true)?;
        trace!(addr = %self.inner.addr, "Opened connection");

        let stream: Box<dyn Transport> = match &self.inner.tls {
            None => Box::new(stream),
            Some((connector, name)) => Box::new(connector.connect(name.clone(), stream).await?),
        };
        Ok(Connection::new(stream))
    }

    fn take_idle(&self) -> Option<Connection> {
        self.inner.idle.lock().pop()
    }

    fn release(&self, conn: Connection) {
        let mut idle = self.inner.idle.lock();
        idle.push(conn);
        if idle.len() > self.inner.max_idle {
            idle.remove(0);
        }
    }
}
