//! Server Configuration
//!
//! Plain data describing which listeners to start and how connections are
//! bounded. The server binary fills it from command-line flags.

use crate::protocol::wire::DEFAULT_MAX_REQUEST;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default HTTP listener port
pub const DEFAULT_HTTP_PORT: u16 = 4500;

/// Default plain-text (ncat) listener port
pub const DEFAULT_TEXT_PORT: u16 = 4501;

/// Default binary TCP listener port
pub const DEFAULT_TCP_PORT: u16 = 4502;

/// Default bind address for every listener
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default per-connection idle timeout
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounds applied to every client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// A read or write that makes no progress for this long closes the connection
    pub idle_timeout: Duration,
    /// Largest accepted request body in bytes
    pub max_request: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_request: DEFAULT_MAX_REQUEST,
        }
    }
}

/// Certificate files for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    /// CA bundle used to verify client certificates
    pub ca_cert: PathBuf,
    /// Server certificate chain (PEM)
    pub cert: PathBuf,
    /// Server private key (PEM)
    pub key: PathBuf,
}

impl Default for TlsPaths {
    fn default() -> Self {
        Self {
            ca_cert: PathBuf::from("ca.crt"),
            cert: PathBuf::from("server.crt"),
            key: PathBuf::from("server.key"),
        }
    }
}

/// One listener: where it binds and whether it runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerConfig {
    pub enabled: bool,
    pub addr: SocketAddr,
}

impl ListenerConfig {
    fn on(port: u16) -> Self {
        Self {
            enabled: true,
            addr: SocketAddr::new(DEFAULT_HOST, port),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// HTTP listener (`POST /`)
    pub http: ListenerConfig,
    /// Binary framed TCP listener
    pub tcp: ListenerConfig,
    /// Plain-text TCP listener for ncat-style clients
    pub text: ListenerConfig,
    /// Mutual TLS for the HTTP and binary listeners, when set
    pub tls: Option<TlsPaths>,
    pub limits: ConnectionLimits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: ListenerConfig::on(DEFAULT_HTTP_PORT),
            tcp: ListenerConfig::on(DEFAULT_TCP_PORT),
            text: ListenerConfig::on(DEFAULT_TEXT_PORT),
            tls: None,
            limits: ConnectionLimits::default(),
        }
    }
}

impl Config {
    /// Returns true if at least one listener is enabled.
    pub fn any_listener(&self) -> bool {
        self.http.enabled || self.tcp.enabled || self.text.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.http.addr, "127.0.0.1:4500".parse().unwrap());
        assert_eq!(config.text.addr, "127.0.0.1:4501".parse().unwrap());
        assert_eq!(config.tcp.addr, "127.0.0.1:4502".parse().unwrap());
        assert!(config.any_listener());
        assert!(config.tls.is_none());
        assert_eq!(config.limits.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.limits.max_request, 16 * 1024 * 1024);
    }

    #[test]
    fn test_tls_paths() {
        let paths = TlsPaths::default();
        assert_eq!(paths.ca_cert, PathBuf::from("ca.crt"));
        assert_eq!(paths.cert, PathBuf::from("server.crt"));
        assert_eq!(paths.key, PathBuf::from("server.key"));
    }

    #[test]
    fn test_no_listener() {
        let mut config = Config::default();
        config.http.enabled = false;
        config.tcp.enabled = false;
        config.text.enabled = false;
        assert!(!config.any_listener());
    }
}
