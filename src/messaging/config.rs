//! Message bus connection settings.

use async_nats::jetstream::consumer::DeliverPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::BusError;
use crate::config::TlsConfig;
use crate::discovery::{Discovery, endpoint_urls};

const SCHEME: &str = "nats";

/// Settings for a bus connection and, optionally, its durable stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NatsConfig {
    #[serde(rename = "tls_conf")]
    pub tls: Option<TlsConfig>,
    /// When set, `servers` is replaced with the endpoints behind this name.
    pub discovery_name: String,
    pub servers: Vec<String>,

    // for streaming
    pub cluster_id: String,
    pub client_id: String,
    pub start_pos: String,

    pub subject: String,
    pub group: String,
}

impl NatsConfig {
    /// Replace `servers` with the endpoints registered under `discovery_name`.
    ///
    /// No-op when no discovery name is configured.
    pub async fn resolve_servers(&mut self, discovery: &dyn Discovery) -> Result<(), BusError> {
        if self.discovery_name.is_empty() {
            return Ok(());
        }
        let endpoints = discovery
            .discover(&self.discovery_name)
            .await
            .map_err(BusError::Discovery)?;
        self.servers = endpoint_urls(SCHEME, &endpoints);
        Ok(())
    }

    /// The server list as the single comma-separated string the client takes.
    pub fn server_string(&self) -> String {
        self.servers.join(",")
    }

    /// Fields describing this connection, for log entries.
    pub fn log_fields(&self) -> BTreeMap<&'static str, String> {
        let mut fields = BTreeMap::from([
            ("servers", self.server_string()),
            ("group", self.group.clone()),
            ("subject", self.subject.clone()),
        ]);

        if let Some(tls) = &self.tls {
            fields.insert("ca_files", tls.ca_files.join(","));
            fields.insert("key_file", tls.key_file.clone());
            fields.insert("cert_file", tls.cert_file.clone());
        }

        if !self.cluster_id.is_empty() {
            fields.insert("client_id", self.client_id.clone());
            fields.insert("cluster_id", self.cluster_id.clone());
        }

        fields
    }

    pub fn start_position(&self) -> Result<StartPosition, BusError> {
        self.start_pos.parse()
    }
}

/// Where a durable subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Replay everything the stream holds.
    DeliverAll,
    /// Resume with the most recent message.
    LastReceived,
    /// Only messages published from now on.
    NewOnly,
    /// Replay from the first stored message.
    First,
}

impl StartPosition {
    pub fn deliver_policy(self) -> DeliverPolicy {
        match self {
            Self::DeliverAll => DeliverPolicy::All,
            Self::LastReceived => DeliverPolicy::Last,
            Self::NewOnly => DeliverPolicy::New,
            Self::First => DeliverPolicy::ByStartSequence { start_sequence: 1 },
        }
    }
}

impl std::str::FromStr for StartPosition {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::DeliverAll),
            "last" => Ok(Self::LastReceived),
            "new" => Ok(Self::NewOnly),
            "" | "first" => Ok(Self::First),
            _ => Err(BusError::InvalidStartPosition(s.to_string())),
        }
    }
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DeliverAll => "all",
            Self::LastReceived => "last",
            Self::NewOnly => "new",
            Self::First => "first",
        })
    }
}
