//! Configuration loading.
//!
//! This module is split into logical submodules:
//! - [`generic`]: untyped key/value maps decoded onto typed records (GenericConfig)
//! - [`env`]: process environment and env files decoded onto typed records
//! - [`tls`]: TLS settings shared by the bus and database records (TlsConfig)
//!
//! Both loaders are default-preserving: a destination field keeps its prior
//! value unless the source carries a matching key.

pub mod env;
mod generic;
mod tls;

pub use generic::GenericConfig;
pub use tls::{TlsConfig, TlsError};

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to decode env var {var}={value:?}: {reason}")]
    EnvDecode {
        var: String,
        value: String,
        reason: String,
    },
    #[error("env file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("failed to load env file {}: {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Find a key in `map` that names `wanted`, exactly first and then ignoring case.
pub(crate) fn match_key(map: &serde_json::Map<String, serde_json::Value>, wanted: &str) -> Option<String> {
    if map.contains_key(wanted) {
        return Some(wanted.to_string());
    }
    map.keys().find(|k| k.eq_ignore_ascii_case(wanted)).cloned()
}
