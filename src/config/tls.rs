//! TLS client settings shared by the bus and database records.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

/// Errors raised while turning [`TlsConfig`] into a rustls client config.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),
    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] tokio_rustls::rustls::Error),
}

/// Certificate, key and CA file paths for a TLS client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
    pub ca_files: Vec<String>,
    pub enabled: bool,
}

impl TlsConfig {
    /// Build a client config, or `None` when TLS is not enabled.
    pub fn client_config(&self) -> Result<Option<ClientConfig>, TlsError> {
        if !self.enabled {
            return Ok(None);
        }
        self.build_client_config().map(Some)
    }

    /// Build a client config from the configured files regardless of `enabled`.
    ///
    /// Without CA files the platform trust store is used. A client
    /// certificate is presented only when both cert and key are set.
    pub fn build_client_config(&self) -> Result<ClientConfig, TlsError> {
        let roots = if self.ca_files.is_empty() {
            native_roots()
        } else {
            let mut roots = RootCertStore::empty();
            for ca_file in &self.ca_files {
                for cert in load_certs(Path::new(ca_file))? {
                    roots.add(cert)?;
                }
            }
            roots
        };

        let builder = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots);

        let config = if !self.cert_file.is_empty() && !self.key_file.is_empty() {
            let certs = load_certs(Path::new(&self.cert_file))?;
            let key = load_key(Path::new(&self.key_file))?;
            builder.with_client_auth_cert(certs, key)?
        } else {
            builder.with_no_client_auth()
        };

        Ok(config)
    }

    /// Whether TLS should be applied.
    pub fn is_enabled(tls: Option<&TlsConfig>) -> bool {
        tls.is_some_and(|t| t.enabled)
    }
}

fn native_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        if let Err(e) = roots.add(cert) {
            tracing::warn!("Failed to add root cert: {}", e);
        }
    }
    for e in &certs.errors {
        tracing::warn!("Error loading native certs: {}", e);
    }
    roots
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}
