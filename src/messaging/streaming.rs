//! Durable stream sessions.
//!
//! A session is layered on a transport connection: the stream named by the
//! cluster id holds the messages, and the client id names this process's
//! durable consumer. If the session cannot be opened the transport is closed
//! before the error is returned.

use async_nats::Client;
use async_nats::jetstream::{self, consumer::PullConsumer, consumer::pull, stream::Stream};
use async_trait::async_trait;
use uuid::Uuid;

use super::{BusError, NatsConfig, NatsConnector, StartPosition};
use crate::logging::Logger;

const GENERATED_PREFIX: &str = "generated-";

/// The two layers a durable stream connection is built from.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    type Transport: Send + Sync;
    type Session: Send;

    async fn connect_transport(&self, config: &mut NatsConfig) -> Result<Self::Transport, BusError>;

    async fn open_session(
        &self,
        transport: &Self::Transport,
        config: &NatsConfig,
    ) -> Result<Self::Session, BusError>;

    async fn close_transport(&self, transport: Self::Transport);
}

/// Random client id for processes that do not configure one.
pub fn generate_client_id() -> String {
    format!("{GENERATED_PREFIX}{}", Uuid::new_v4().simple())
}

/// Open a transport and a durable session on top of it.
///
/// Fills in `config.client_id` when it is empty.
pub async fn connect_streaming<C: StreamConnector>(
    connector: &C,
    config: &mut NatsConfig,
    logger: &Logger,
) -> Result<C::Session, BusError> {
    if config.cluster_id.is_empty() {
        return Err(BusError::MissingClusterId);
    }
    if config.client_id.is_empty() {
        config.client_id = generate_client_id();
        logger
            .with_field("client_id", &config.client_id)
            .info("No client ID specified, generating a random one");
    }

    let transport = connector.connect_transport(config).await?;

    logger
        .with_fields(config.log_fields())
        .info(format!(
            "Connecting to nats streaming cluster {}",
            config.cluster_id
        ));
    match connector.open_session(&transport, config).await {
        Ok(session) => Ok(session),
        Err(e) => {
            connector.close_transport(transport).await;
            Err(e)
        }
    }
}

/// An open durable stream plus the transport it runs on.
#[derive(Clone)]
pub struct StreamingSession {
    client: Client,
    context: jetstream::Context,
    stream: Stream,
    cluster_id: String,
    client_id: String,
    subject: String,
}

impl StreamingSession {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn context(&self) -> &jetstream::Context {
        &self.context
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Get or create the durable consumer for this client, filtered to the
    /// configured subject.
    pub async fn durable_consumer(&self, start: StartPosition) -> Result<PullConsumer, BusError> {
        let config = pull::Config {
            durable_name: Some(self.client_id.clone()),
            deliver_policy: start.deliver_policy(),
            filter_subject: self.subject.clone(),
            ..Default::default()
        };
        self.stream
            .get_or_create_consumer(&self.client_id, config)
            .await
            .map_err(|e| BusError::Consumer {
                name: self.client_id.clone(),
                source: Box::new(e),
            })
    }

    /// Flush pending messages and close the transport.
    pub async fn close(self) -> Result<(), async_nats::client::DrainError> {
        self.client.drain().await
    }
}

#[async_trait]
impl StreamConnector for NatsConnector {
    type Transport = Client;
    type Session = StreamingSession;

    async fn connect_transport(&self, config: &mut NatsConfig) -> Result<Client, BusError> {
        self.connect(config).await
    }

    async fn open_session(
        &self,
        client: &Client,
        config: &NatsConfig,
    ) -> Result<StreamingSession, BusError> {
        let context = jetstream::new(client.clone());
        let stream = context
            .get_stream(&config.cluster_id)
            .await
            .map_err(|e| BusError::Session {
                cluster_id: config.cluster_id.clone(),
                source: Box::new(e),
            })?;

        Ok(StreamingSession {
            client: client.clone(),
            context,
            stream,
            cluster_id: config.cluster_id.clone(),
            client_id: config.client_id.clone(),
            subject: config.subject.clone(),
        })
    }

    async fn close_transport(&self, client: Client) {
        if let Err(e) = client.drain().await {
            self.logger()
                .error_with(&e, "Failed to close transport after session failure");
        }
    }
}

impl NatsConnector {
    /// Connect to the bus and open the durable stream named by `cluster_id`.
    pub async fn connect_streaming(
        &self,
        config: &mut NatsConfig,
    ) -> Result<StreamingSession, BusError> {
        connect_streaming(self, config, self.logger()).await
    }
}
