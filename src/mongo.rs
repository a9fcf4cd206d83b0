//! Document database connections.
//!
//! One builder serves both TLS strategies: [`TlsDial::Driver`] hands the TLS
//! settings to the driver, [`TlsDial::Handshake`] also completes a TLS
//! handshake with every host before the driver takes over. Without TLS the
//! two are identical.
//!
//! The driver reads one CA file and one combined certificate/key file. Several
//! CA files, or a key kept apart from its certificate, are concatenated into
//! temporary bundles that live until the client has loaded them.

use mongodb::options::{ClientOptions, ServerAddress, Tls, TlsOptions};
use mongodb::{Client, Database};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;

use crate::config::{TlsConfig, TlsError};
use crate::logging::Logger;

pub const COLLECTION_BLOBS: &str = "blobs";
pub const COLLECTION_RESELLERS: &str = "resellers";
pub const COLLECTION_USERS: &str = "users";
pub const COLLECTION_SUBSCRIPTIONS: &str = "bb_subscriptions";
pub const COLLECTION_SITES: &str = "projects";

const DEFAULT_PORT: u16 = 27017;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid database host {host}: {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: mongodb::error::Error,
    },
    #[error("failed to configure TLS: {0}")]
    Tls(#[source] TlsError),
    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to database: {0}")]
    Connect(#[source] mongodb::error::Error),
}

/// Database connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "tls_conf")]
    pub tls: Option<TlsConfig>,
    pub db: String,
    pub servers: Vec<String>,
    pub replset_name: String,
    /// Connect timeout in seconds. Zero keeps the driver default.
    pub conn_timeout: u64,
}

/// How TLS is applied to database connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsDial {
    /// Driver-native TLS options.
    #[default]
    Driver,
    /// Handshake with each host using the full client configuration first.
    Handshake,
}

/// Build a client for `config` and select its database.
///
/// The driver connects lazily; unreachable hosts surface on first use.
pub async fn connect(config: &Config, logger: &Logger, dial: TlsDial) -> Result<Database, DbError> {
    let hosts = config
        .servers
        .iter()
        .map(|host| {
            ServerAddress::parse(host).map_err(|source| DbError::InvalidHost {
                host: host.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut options = ClientOptions::default();
    options.hosts = hosts;
    if config.conn_timeout > 0 {
        options.connect_timeout = Some(Duration::from_secs(config.conn_timeout));
    }
    if !config.replset_name.is_empty() {
        options.repl_set_name = Some(config.replset_name.clone());
    }

    let mut bundles = Vec::new();
    match config.tls.as_ref() {
        Some(tls) if tls.enabled => {
            logger
                .with_fields([
                    ("cert_file", tls.cert_file.clone()),
                    ("key_file", tls.key_file.clone()),
                    ("ca_files", tls.ca_files.join(",")),
                ])
                .debug("Using TLS config");
            let client_config = tls.build_client_config().map_err(DbError::Tls)?;
            if dial == TlsDial::Handshake {
                handshake_all(&options.hosts, Arc::new(client_config), config.conn_timeout).await?;
            }
            let driver = driver_tls_options(tls)?;
            options.tls = Some(Tls::Enabled(driver.options));
            bundles = driver.bundles;
        }
        _ => logger.debug("Skipping TLS config"),
    }

    logger
        .with_fields([
            ("servers", config.servers.join(",")),
            ("replica_set", config.replset_name.clone()),
        ])
        .debug("Dialing database");

    let client = Client::with_options(options).map_err(DbError::Connect)?;
    drop(bundles);

    logger
        .with_field("db", &config.db)
        .debug(format!("Got session, Using database {}", config.db));
    Ok(client.database(&config.db))
}

/// Driver TLS options and the temporary bundles they point at.
struct DriverTls {
    options: TlsOptions,
    bundles: Vec<NamedTempFile>,
}

/// Map file-based TLS settings onto the driver's options.
fn driver_tls_options(tls: &TlsConfig) -> Result<DriverTls, DbError> {
    let mut options = TlsOptions::default();
    let mut bundles = Vec::new();

    match tls.ca_files.as_slice() {
        [] => {}
        [ca] => options.ca_file_path = Some(PathBuf::from(ca)),
        cas => {
            let bundle = write_bundle(cas)?;
            options.ca_file_path = Some(bundle.path().to_path_buf());
            bundles.push(bundle);
        }
    }

    if !tls.cert_file.is_empty() {
        if tls.key_file.is_empty() || tls.key_file == tls.cert_file {
            options.cert_key_file_path = Some(PathBuf::from(&tls.cert_file));
        } else {
            let bundle = write_bundle(&[tls.cert_file.as_str(), tls.key_file.as_str()])?;
            options.cert_key_file_path = Some(bundle.path().to_path_buf());
            bundles.push(bundle);
        }
    }

    Ok(DriverTls { options, bundles })
}

/// Concatenate PEM files into one temporary file.
fn write_bundle<P: AsRef<Path>>(paths: &[P]) -> Result<NamedTempFile, DbError> {
    let io_error = |path: &Path, source| {
        DbError::Tls(TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
    };

    let mut bundle = NamedTempFile::new().map_err(|e| io_error(&std::env::temp_dir(), e))?;
    for path in paths {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|e| io_error(path, e))?;
        bundle.write_all(&pem).map_err(|e| io_error(bundle.path(), e))?;
        if !pem.ends_with(b"\n") {
            bundle.write_all(b"\n").map_err(|e| io_error(bundle.path(), e))?;
        }
    }
    bundle.flush().map_err(|e| io_error(bundle.path(), e))?;
    Ok(bundle)
}

async fn handshake_all(
    hosts: &[ServerAddress],
    client_config: Arc<ClientConfig>,
    timeout_secs: u64,
) -> Result<(), DbError> {
    let connector = TlsConnector::from(client_config);
    let timeout = if timeout_secs > 0 {
        Duration::from_secs(timeout_secs)
    } else {
        HANDSHAKE_TIMEOUT
    };

    for address in hosts {
        let ServerAddress::Tcp { host, port } = address else {
            continue;
        };
        let port = port.unwrap_or(DEFAULT_PORT);
        let handshake_error = |source| DbError::Handshake {
            host: format!("{host}:{port}"),
            source,
        };

        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| handshake_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let dial = async {
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            connector.connect(server_name, stream).await
        };
        match tokio::time::timeout(timeout, dial).await {
            Ok(Ok(_stream)) => {}
            Ok(Err(e)) => return Err(handshake_error(e)),
            Err(_) => {
                return Err(handshake_error(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "handshake timed out",
                )));
            }
        }
    }
    Ok(())
}
