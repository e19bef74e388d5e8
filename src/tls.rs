//! Mutual TLS setup.
//!
//! Both sides authenticate: the server only accepts clients presenting a
//! certificate signed by the configured CA bundle, and the client verifies
//! the server against the same bundle.

use crate::config::TlsPaths;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Errors raised while loading certificates.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to load {}: {message}", .path.display())]
    Pem { path: PathBuf, message: String },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("invalid CA certificate in {}: {source}", .path.display())]
    InvalidCa {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("failed to build client verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn pem_error(path: &Path, err: impl std::fmt::Display) -> TlsError {
    TlsError::Pem {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Reads every certificate from a PEM file. An empty file is an error.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| pem_error(path, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| pem_error(path, e))?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Reads the first private key from a PEM file.
pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| pem_error(path, e))
}

fn load_roots(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|source| TlsError::InvalidCa {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(roots)
}

/// Builds a server config that requires and verifies client certificates.
pub fn load_server_config(paths: &TlsPaths) -> Result<Arc<ServerConfig>, TlsError> {
    let provider = provider();
    let roots = load_roots(&paths.ca_cert)?;

    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
            .build()?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs(&paths.cert)?, load_key(&paths.key)?)?;

    Ok(Arc::new(config))
}

/// Builds a client config that verifies the server against the CA bundle and
/// authenticates with the given certificate and key.
pub fn load_client_config(paths: &TlsPaths) -> Result<Arc<ClientConfig>, TlsError> {
    let roots = load_roots(&paths.ca_cert)?;

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_client_auth_cert(load_certs(&paths.cert)?, load_key(&paths.key)?)?;

    Ok(Arc::new(config))
}

/// Loads certificates and wraps them in an acceptor for incoming streams.
pub fn acceptor(paths: &TlsPaths) -> Result<TlsAcceptor, TlsError> {
    Ok(TlsAcceptor::from(load_server_config(paths)?))
}

/// Loads certificates and wraps them in a connector for outgoing streams.
pub fn connector(paths: &TlsPaths) -> Result<TlsConnector, TlsError> {
    Ok(TlsConnector::from(load_client_config(paths)?))
}
