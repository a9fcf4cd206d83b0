//! Endpoint discovery by logical service name.
//!
//! Resolves a discovery name to the live `(target, port)` pairs behind it
//! using DNS SRV records.

use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("SRV lookup for {name} failed: {source}")]
    Lookup {
        name: String,
        #[source]
        source: hickory_resolver::ResolveError,
    },
    #[error("no endpoints registered for {0}")]
    NoEndpoints(String),
}

/// A single discovered endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub target: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(target: impl Into<String>, port: u16) -> Self {
        Self {
            target: target.into(),
            port,
        }
    }
}

#[async_trait]
pub trait Discovery: Send + Sync {
    /// List the endpoints currently registered under `name`.
    async fn discover(&self, name: &str) -> Result<Vec<Endpoint>, DiscoveryError>;
}

/// DNS SRV based discovery.
#[derive(Clone)]
pub struct SrvDiscovery {
    resolver: TokioResolver,
}

impl SrvDiscovery {
    /// Create a resolver from the system config, falling back to defaults.
    pub fn new() -> Self {
        let resolver = TokioResolver::builder_tokio()
            .map(|b| b.build())
            .unwrap_or_else(|_| {
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            });
        Self { resolver }
    }
}

impl Default for SrvDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Discovery for SrvDiscovery {
    async fn discover(&self, name: &str) -> Result<Vec<Endpoint>, DiscoveryError> {
        let lookup = self
            .resolver
            .srv_lookup(name)
            .await
            .map_err(|source| DiscoveryError::Lookup {
                name: name.to_string(),
                source,
            })?;

        let endpoints: Vec<Endpoint> = lookup
            .iter()
            .map(|srv| {
                let target = srv.target().to_utf8();
                Endpoint::new(target.trim_end_matches('.'), srv.port())
            })
            .collect();
        debug!(name = %name, count = endpoints.len(), "Discovered endpoints");

        if endpoints.is_empty() {
            return Err(DiscoveryError::NoEndpoints(name.to_string()));
        }
        Ok(endpoints)
    }
}

/// Format endpoints as `scheme://host:port` URLs.
pub fn endpoint_urls(scheme: &str, endpoints: &[Endpoint]) -> Vec<String> {
    endpoints
        .iter()
        .map(|e| format!("{scheme}://{}:{}", e.target, e.port))
        .collect()
}
