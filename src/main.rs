//! shardkv - A Sharded In-Memory Key-Value Cache
//!
//! This is the main entry point for the shardkv server.
//! It parses flags, creates the cache engine and runs every enabled listener
//! until Ctrl+C or until one of them stops.

use anyhow::Context;
use clap::{ArgAction, Parser};
use shardkv::commands::CommandHandler;
use shardkv::config::{
    Config, ConnectionLimits, ListenerConfig, TlsPaths, DEFAULT_HOST, DEFAULT_HTTP_PORT,
    DEFAULT_TCP_PORT, DEFAULT_TEXT_PORT,
};
use shardkv::connection::{serve, serve_text, ConnectionStats};
use shardkv::http::{serve_http, serve_https};
use shardkv::protocol::wire::DEFAULT_MAX_REQUEST;
use shardkv::storage::CacheEngine;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// shardkv server
#[derive(Parser, Debug)]
#[command(name = "shardkv")]
#[command(about = "Sharded in-memory key-value cache")]
#[command(version)]
struct Args {
    /// Address the HTTP listener binds to
    #[arg(long, default_value_t = DEFAULT_HOST)]
    http_addr: IpAddr,

    /// HTTP listener port
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    http_port: u16,

    /// Address the binary and text TCP listeners bind to
    #[arg(long, default_value_t = DEFAULT_HOST)]
    tcp_addr: IpAddr,

    /// Binary TCP listener port
    #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
    tcp_port: u16,

    /// Plain-text (ncat) listener port
    #[arg(long, default_value_t = DEFAULT_TEXT_PORT)]
    text_port: u16,

    /// Run the HTTP listener
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    use_http: bool,

    /// Run the binary TCP listener
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    use_tcp: bool,

    /// Run the plain-text listener
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    use_text: bool,

    /// Require mutual TLS on the HTTP and binary TCP listeners
    #[arg(long)]
    secure: bool,

    /// CA bundle used to verify client certificates
    #[arg(long, default_value = "ca.crt")]
    ca_cert: PathBuf,

    /// Server certificate chain
    #[arg(long, default_value = "server.crt")]
    cert: PathBuf,

    /// Server private key
    #[arg(long, default_value = "server.key")]
    key: PathBuf,

    /// Seconds a connection may sit idle before it is closed
    #[arg(long, default_value_t = 60)]
    idle_timeout: u64,

    /// Largest accepted request in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_REQUEST)]
    max_request: usize,
}

impl Args {
    fn into_config(self) -> Config {
        let listener = |enabled, addr, port| ListenerConfig {
            enabled,
            addr: SocketAddr::new(addr, port),
        };

        Config {
            http: listener(self.use_http, self.http_addr, self.http_port),
            tcp: listener(self.use_tcp, self.tcp_addr, self.tcp_port),
            text: listener(self.use_text, self.tcp_addr, self.text_port),
            tls: self.secure.then(|| TlsPaths {
                ca_cert: self.ca_cert,
                cert: self.cert,
                key: self.key,
            }),
            limits: ConnectionLimits {
                idle_timeout: Duration::from_secs(self.idle_timeout),
                max_request: self.max_request,
            },
        }
    }
}

fn print_banner(config: &Config) {
    let describe = |listener: &ListenerConfig| {
        if listener.enabled {
            listener.addr.to_string()
        } else {
            "disabled".to_string()
        }
    };

    println!(
        r#"
shardkv v{} - Sharded In-Memory Key-Value Cache
──────────────────────────────────────────────────────────────
HTTP        {}
Binary TCP  {}
Text        {}
Mutual TLS  {}

Use Ctrl+C to shutdown gracefully.
"#,
        shardkv::VERSION,
        describe(&config.http),
        describe(&config.tcp),
        describe(&config.text),
        if config.tls.is_some() { "on" } else { "off" },
    );
}

async fn bind(name: &str, listener: &ListenerConfig) -> anyhow::Result<TcpListener> {
    TcpListener::bind(listener.addr)
        .await
        .with_context(|| format!("failed to bind the {} listener on {}", name, listener.addr))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if !config.any_listener() {
        anyhow::bail!("every listener is disabled, nothing to serve");
    }

    print_banner(&config);

    // One engine shared by every listener
    let handler = CommandHandler::new(Arc::new(CacheEngine::new()));
    let stats = Arc::new(ConnectionStats::new());
    info!(shards = shardkv::storage::NUM_SHARDS, "Cache engine initialized");

    let acceptor = match &config.tls {
        Some(paths) => Some(
            shardkv::tls::acceptor(paths).context("failed to load TLS certificates")?,
        ),
        None => None,
    };

    let limits = config.limits;
    let mut listeners: JoinSet<std::io::Result<()>> = JoinSet::new();

    if config.tcp.enabled {
        let listener = bind("binary TCP", &config.tcp).await?;
        let (handler, stats, tls) = (handler.clone(), Arc::clone(&stats), acceptor.clone());
        listeners.spawn(async move {
            serve(listener, handler, stats, limits, tls).await;
            Ok(())
        });
    }

    if config.text.enabled {
        let listener = bind("text", &config.text).await?;
        let (handler, stats) = (handler.clone(), Arc::clone(&stats));
        listeners.spawn(async move {
            serve_text(listener, handler, stats, limits).await;
            Ok(())
        });
    }

    if config.http.enabled {
        let listener = bind("HTTP", &config.http).await?;
        let handler = handler.clone();
        match acceptor {
            Some(acceptor) => {
                listeners.spawn(async move {
                    serve_https(listener, handler, acceptor, limits).await;
                    Ok(())
                });
            }
            None => {
                listeners.spawn(serve_http(listener, handler, limits));
            }
        }
    }

    // Run until Ctrl+C or until a listener stops
    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to install Ctrl+C handler")?;
            info!("Shutdown signal received, stopping server...");
        }
        Some(joined) = listeners.join_next() => {
            match joined {
                Ok(Ok(())) => error!("A listener stopped unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "A listener failed"),
                Err(e) => error!(error = %e, "A listener task panicked"),
            }
            listeners.shutdown().await;
            anyhow::bail!("server stopped because a listener exited");
        }
    }

    listeners.shutdown().await;

    let storage = handler.engine().stats();
    info!(
        keys = storage.keys,
        connections = stats.connections_accepted.load(std::sync::atomic::Ordering::Relaxed),
        commands = stats.commands_processed.load(std::sync::atomic::Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}
