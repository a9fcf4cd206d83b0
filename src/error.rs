//! Unified error handling.
//!
//! Each module owns its error type; [`Error`] collects them for callers that
//! want a single type, and [`Error::kind`] gives a stable label per failure
//! class for logs and metrics.

use thiserror::Error;

use crate::config::{ConfigError, TlsError};
use crate::discovery::DiscoveryError;
use crate::logging::LogError;
use crate::messaging::BusError;
use crate::mongo::DbError;
use crate::service::BootstrapError;
use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Logging(#[from] LogError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    SiteConfig(#[from] site_config::SiteConfigError),
}

impl Error {
    /// Label for the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(e) => config_kind(e),
            Self::Tls(_) => "tls_config",
            Self::Discovery(_) => "discovery",
            Self::Bus(e) => match e {
                BusError::Discovery(_) => "discovery",
                BusError::Tls(_) => "tls_config",
                BusError::MissingClusterId => "missing_cluster_id",
                BusError::InvalidStartPosition(_) => "invalid_start_position",
                BusError::Connect(_) | BusError::Session { .. } | BusError::Consumer { .. } => {
                    "connect"
                }
            },
            Self::Db(e) => match e {
                DbError::Tls(_) => "tls_config",
                DbError::InvalidHost { .. } => "config_decode",
                DbError::Handshake { .. } | DbError::Connect(_) => "connect",
            },
            Self::Logging(_) => "logging",
            Self::Telemetry(_) => "tracing",
            Self::Bootstrap(e) => match e {
                BootstrapError::EnvFile { source, .. }
                | BootstrapError::LoggingConfig(source)
                | BootstrapError::TracingConfig(source)
                | BootstrapError::ServiceConfig(source) => config_kind(source),
                BootstrapError::Logging(_) => "logging",
                BootstrapError::Tracing(_) => "tracing",
            },
            Self::SiteConfig(e) if e.is_not_found() => "file_not_found",
            Self::SiteConfig(_) => "site_config",
        }
    }
}

fn config_kind(err: &ConfigError) -> &'static str {
    match err {
        ConfigError::FileNotFound(_) => "file_not_found",
        ConfigError::Decode(_) | ConfigError::EnvDecode { .. } | ConfigError::EnvFile { .. } => {
            "config_decode"
        }
    }
}
