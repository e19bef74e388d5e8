//! shardkv CLI Client
//!
//! Sends one command over the binary protocol and prints the reply the same
//! way the plain-text listener does.
//!
//! ```text
//! $ shardkv-cli SETDICT user name:Ariz lang:rust
//! $ shardkv-cli GETDICTELEM user name
//! Ariz
//! ```

use anyhow::Context;
use clap::Parser;
use shardkv::client::{Client, ClientError};
use shardkv::config::{TlsPaths, DEFAULT_TCP_PORT};
use shardkv::connection::text::render;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

/// shardkv CLI
#[derive(Parser, Debug)]
#[command(name = "shardkv-cli")]
#[command(about = "Send a command to a shardkv server")]
#[command(version)]
struct Args {
    /// Server host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Binary TCP port
    #[arg(short, long, default_value_t = DEFAULT_TCP_PORT)]
    port: u16,

    /// Connect with mutual TLS
    #[arg(long)]
    secure: bool,

    /// CA bundle used to verify the server
    #[arg(long, default_value = "ca.crt")]
    ca_cert: PathBuf,

    /// Client certificate chain
    #[arg(long, default_value = "client.crt")]
    cert: PathBuf,

    /// Client private key
    #[arg(long, default_value = "client.key")]
    key: PathBuf,

    /// The command, e.g. `GETLISTELEM fruits 1`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let client = if args.secure {
        let paths = TlsPaths {
            ca_cert: args.ca_cert,
            cert: args.cert,
            key: args.key,
        };
        Client::with_tls_paths(addr, &paths, &args.host)
            .context("failed to set up TLS")?
    } else {
        Client::new(addr)
    };

    let command = args.command.join(" ");
    let (out, code) = match client.execute(&command).await {
        Ok(reply) => (render(&Ok(reply)), ExitCode::SUCCESS),
        Err(ClientError::NotFound) => (bytes::BytesMut::from(&b"not found"[..]), ExitCode::FAILURE),
        Err(ClientError::Server(message)) => (
            bytes::BytesMut::from(format!("Error: {}", message).as_bytes()),
            ExitCode::FAILURE,
        ),
        Err(e) => return Err(e).context("request failed"),
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&out)?;
    if !out.is_empty() && !out.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    Ok(code)
}
