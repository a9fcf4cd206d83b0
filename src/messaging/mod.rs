//! Message bus connections.
//!
//! - [`config`]: connection settings (NatsConfig) and durable start positions
//! - [`nats`]: transport connections and the client error handler
//! - [`streaming`]: durable stream sessions layered on a transport
//!
//! # Connection Flow
//! ```text
//! NatsConfig
//!     → resolve_servers (discovery name → server URLs)
//!     → connect_options (error handler, unlimited reconnects, TLS)
//!     → transport Client
//!     → durable stream session (cluster id = stream, client id = consumer)
//! ```

pub mod config;
pub mod nats;
pub mod streaming;

pub use config::{NatsConfig, StartPosition};
pub use nats::{ConnStatus, ErrorHandler, ErrorReport, NatsConnector};
pub use streaming::{StreamConnector, StreamingSession, connect_streaming};

use thiserror::Error;

use crate::config::TlsError;
use crate::discovery::DiscoveryError;

/// Message bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to discover new servers: {0}")]
    Discovery(#[source] DiscoveryError),
    #[error("failed to configure TLS: {0}")]
    Tls(#[source] TlsError),
    #[error("failed to connect to nats: {0}")]
    Connect(#[source] async_nats::ConnectError),
    #[error("must provide a cluster ID to connect to streaming nats")]
    MissingClusterId,
    #[error("unknown start position '{0}', possible values are all, last, new, first and ''")]
    InvalidStartPosition(String),
    #[error("failed to open durable stream {cluster_id}: {source}")]
    Session {
        cluster_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to create durable consumer {name}: {source}")]
    Consumer {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
