//! Transport connections to the message bus.

use async_nats::{Client, ConnectOptions, Event};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::{BusError, NatsConfig};
use crate::discovery::{Discovery, SrvDiscovery};
use crate::logging::Logger;

/// Messages buffered per subscription before the client reports a slow consumer.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 65_536;

/// Opens bus connections for a [`NatsConfig`].
#[derive(Clone)]
pub struct NatsConnector {
    logger: Logger,
    discovery: Arc<dyn Discovery>,
    subscription_capacity: usize,
}

impl NatsConnector {
    pub fn new(logger: &Logger) -> Self {
        Self {
            logger: logger.with_field("component", "nats"),
            discovery: Arc::new(SrvDiscovery::new()),
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity;
        self
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Client options: error logging, unlimited reconnects, and TLS when enabled.
    pub fn connect_options(&self, config: &NatsConfig) -> Result<ConnectOptions, BusError> {
        let handler = ErrorHandler::new(&self.logger, config, self.subscription_capacity);
        let mut options = ConnectOptions::new()
            .max_reconnects(None::<usize>)
            .subscription_capacity(self.subscription_capacity)
            .event_callback(move |event| {
                let handler = handler.clone();
                async move { handler.handle(&event) }
            });

        if let Some(tls) = &config.tls
            && let Some(client_config) = tls.client_config().map_err(BusError::Tls)?
        {
            options = options.tls_client_config(client_config).require_tls(true);
            self.logger.info("Configured TLS connection");
        }

        Ok(options)
    }

    /// Resolve the server list and open a transport connection.
    pub async fn connect(&self, config: &mut NatsConfig) -> Result<Client, BusError> {
        config.resolve_servers(self.discovery.as_ref()).await?;

        self.logger
            .with_fields(config.log_fields())
            .info("Going to connect to nats servers");
        let options = self.connect_options(config)?;
        let servers = config.server_string();
        options
            .connect(servers.as_str())
            .await
            .map_err(BusError::Connect)
    }
}

/// Connection state as last reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Connecting,
    Connected,
    Reconnecting,
    LameDuck,
    Draining,
    Closed,
}

impl fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::LameDuck => "LAME_DUCK",
            Self::Draining => "DRAINING",
            Self::Closed => "CLOSED",
        })
    }
}

#[derive(Debug, Error)]
#[error("failed to read pending messages for subscription {sid}: {reason}")]
pub struct PendingError {
    pub sid: u64,
    pub reason: String,
}

/// Looks up how many messages a subscription has not yet delivered.
pub type PendingLookup = Arc<dyn Fn(u64) -> Result<usize, PendingError> + Send + Sync>;

/// An error event ready to be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
    pub error: String,
    pub fields: BTreeMap<String, String>,
}

/// Logs publish/consume errors reported by the client.
///
/// Runs on the client's own task, so it only formats and emits.
#[derive(Clone)]
pub struct ErrorHandler {
    logger: Logger,
    subject: String,
    group: String,
    status: Arc<Mutex<ConnStatus>>,
    pending: PendingLookup,
}

impl ErrorHandler {
    /// A full subscription buffer holds `capacity` undelivered messages.
    ///
    /// The default pending lookup always answers `capacity` and never fails,
    /// so slow-consumer entries keep the client's own error text. Install a
    /// lookup that can fail with [`ErrorHandler::with_pending_lookup`].
    pub fn new(logger: &Logger, config: &NatsConfig, capacity: usize) -> Self {
        Self {
            logger: logger.with_field("component", "error-logger"),
            subject: config.subject.clone(),
            group: config.group.clone(),
            status: Arc::new(Mutex::new(ConnStatus::Connecting)),
            pending: Arc::new(move |_| Ok(capacity)),
        }
    }

    pub fn with_pending_lookup(mut self, pending: PendingLookup) -> Self {
        self.pending = pending;
        self
    }

    pub fn status(&self) -> ConnStatus {
        *self.status.lock()
    }

    pub fn handle(&self, event: &Event) {
        let status = match event {
            Event::Connected => Some(ConnStatus::Connected),
            Event::Disconnected => Some(ConnStatus::Reconnecting),
            Event::LameDuckMode => Some(ConnStatus::LameDuck),
            Event::Draining => Some(ConnStatus::Draining),
            Event::Closed => Some(ConnStatus::Closed),
            _ => None,
        };
        if let Some(status) = status {
            *self.status.lock() = status;
            self.logger
                .with_field("conn_status", status)
                .debug("Connection status changed");
        }

        if let Some(report) = self.report(event) {
            self.logger
                .with_fields(report.fields)
                .with_field("error", report.error)
                .error(report.message);
        }
    }

    /// Build the log entry for an error event; `None` for non-error events.
    pub fn report(&self, event: &Event) -> Option<ErrorReport> {
        let (mut error, slow_sid) = match event {
            Event::SlowConsumer(sid) => ("slow consumer, messages dropped".to_string(), Some(*sid)),
            Event::ServerError(e) => (e.to_string(), None),
            Event::ClientError(e) => (e.to_string(), None),
            _ => return None,
        };

        let mut fields = BTreeMap::from([
            ("subject".to_string(), self.subject.clone()),
            ("group".to_string(), self.group.clone()),
            ("conn_status".to_string(), self.status().to_string()),
        ]);

        if let Some(sid) = slow_sid {
            match (self.pending)(sid) {
                Ok(pending) => {
                    fields.insert("pending_messages".to_string(), pending.to_string());
                }
                Err(e) => error = e.to_string(),
            }
        }

        Some(ErrorReport {
            message: format!("Error while consuming from {}", self.subject),
            error,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;

    fn config() -> NatsConfig {
        NatsConfig {
            subject: "events".to_string(),
            group: "workers".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn report_ignores_status_events() {
        let handler = ErrorHandler::new(&Logger::silent(), &config(), 10);
        assert!(handler.report(&Event::Connected).is_none());
        assert!(handler.report(&Event::Closed).is_none());
    }

    #[test]
    fn slow_consumer_report_has_pending_count() {
        let handler = ErrorHandler::new(&Logger::silent(), &config(), 10);
        handler.handle(&Event::Connected);

        let report = handler.report(&Event::SlowConsumer(3)).unwrap();
        assert_eq!(report.message, "Error while consuming from events");
        assert_eq!(report.fields["subject"], "events");
        assert_eq!(report.fields["group"], "workers");
        assert_eq!(report.fields["conn_status"], "CONNECTED");
        assert_eq!(report.fields["pending_messages"], "10");
    }

    #[test]
    fn failed_pending_lookup_becomes_the_error() {
        let handler = ErrorHandler::new(&Logger::silent(), &config(), 10).with_pending_lookup(
            Arc::new(|sid| {
                Err(PendingError {
                    sid,
                    reason: "subscription gone".to_string(),
                })
            }),
        );

        let report = handler.report(&Event::SlowConsumer(7)).unwrap();
        assert!(!report.fields.contains_key("pending_messages"));
        assert_eq!(
            report.error,
            "failed to read pending messages for subscription 7: subscription gone"
        );
    }

    #[test]
    fn status_follows_events() {
        let handler = ErrorHandler::new(&Logger::silent(), &config(), 10);
        assert_eq!(handler.status(), ConnStatus::Connecting);
        handler.handle(&Event::Connected);
        assert_eq!(handler.status(), ConnStatus::Connected);
        handler.handle(&Event::Disconnected);
        assert_eq!(handler.status(), ConnStatus::Reconnecting);
        handler.handle(&Event::Closed);
        assert_eq!(handler.status(), ConnStatus::Closed);
    }

    #[test]
    fn connect_options_reject_broken_tls() {
        let connector = NatsConnector::new(&Logger::silent());
        let config = NatsConfig {
            tls: Some(TlsConfig {
                ca_files: vec!["/nonexistent/ca.pem".to_string()],
                enabled: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            connector.connect_options(&config),
            Err(BusError::Tls(_))
        ));
    }

    #[test]
    fn connect_options_skip_disabled_tls() {
        let connector = NatsConnector::new(&Logger::silent());
        let config = NatsConfig {
            tls: Some(TlsConfig {
                ca_files: vec!["/nonexistent/ca.pem".to_string()],
                enabled: false,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(connector.connect_options(&config).is_ok());
    }

    #[tokio::test]
    async fn connect_reports_unreachable_server() {
        let connector = NatsConnector::new(&Logger::silent());
        let mut config = NatsConfig {
            servers: vec!["nats://127.0.0.1:1".to_string()],
            ..Default::default()
        };
        let err = connector.connect(&mut config).await.unwrap_err();
        assert!(matches!(err, BusError::Connect(_)));
    }
}
