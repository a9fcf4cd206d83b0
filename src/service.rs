//! Service bootstrap.
//!
//! [`RootArgs::init_service`] runs once at startup, in order:
//! 1. load the env file given with `--config`, if any
//! 2. configure logging from `LOG_*` and bind the `version` field
//! 3. configure the tracer from `TRACING_*`
//! 4. populate the service's own config record (`init_service_with_config`)
//!
//! Every step is fatal; the error names the step that failed.

use clap::Args;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{ConfigError, env};
use crate::logging::{self, LogError, Logger, LoggingConfig};
use crate::telemetry::{self, TelemetryError, Tracer, TracingConfig};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to load configuration from file {}: {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
    #[error("failed to load logging configuration from the environment: {0}")]
    LoggingConfig(#[source] ConfigError),
    #[error("failed to configure logging: {0}")]
    Logging(#[source] LogError),
    #[error("failed to load tracing configuration from the environment: {0}")]
    TracingConfig(#[source] ConfigError),
    #[error("failed to configure tracing: {0}")]
    Tracing(#[source] TelemetryError),
    #[error("failed to load the service configuration: {0}")]
    ServiceConfig(#[source] ConfigError),
}

/// Flags shared by every service entrypoint.
#[derive(Debug, Clone, Default, Args)]
pub struct RootArgs {
    /// An env file to load for config
    #[arg(short = 'c', long = "config", global = true)]
    pub env_file: Option<PathBuf>,
    /// A prefix to use for env vars
    #[arg(short = 'p', long = "prefix", global = true)]
    pub prefix: Option<String>,
}

/// What the bootstrap hands to the rest of the service.
#[derive(Debug)]
pub struct ServiceContext {
    /// Bound with the `version` field.
    pub logger: Logger,
    pub tracer: Tracer,
}

#[derive(Default, Deserialize, Serialize)]
#[serde(default)]
struct LogEnv {
    log: LoggingConfig,
}

#[derive(Default, Deserialize, Serialize)]
#[serde(default)]
struct TracingEnv {
    tracing: TracingConfig,
}

impl RootArgs {
    pub fn new(env_file: Option<PathBuf>, prefix: Option<String>) -> Self {
        Self { env_file, prefix }
    }

    /// Load the env file and configure logging and tracing.
    ///
    /// An enabled tracer needs a running tokio runtime.
    pub fn init_service(&self, name: &str, version: &str) -> Result<ServiceContext, BootstrapError> {
        if let Some(path) = &self.env_file {
            env::load_env_file(path).map_err(|source| BootstrapError::EnvFile {
                path: path.clone(),
                source,
            })?;
        }

        let mut log_env = LogEnv::default();
        env::process(self.prefix(), &mut log_env).map_err(BootstrapError::LoggingConfig)?;
        let logger = logging::configure(&log_env.log)
            .map_err(BootstrapError::Logging)?
            .with_field("version", version);
        logger.debug("Configured logging");

        let mut tracing_env = TracingEnv::default();
        env::process(self.prefix(), &mut tracing_env).map_err(BootstrapError::TracingConfig)?;
        let tracer =
            telemetry::configure(&tracing_env.tracing, name).map_err(BootstrapError::Tracing)?;
        logger.debug("Configured tracing");

        Ok(ServiceContext { logger, tracer })
    }

    /// [`init_service`](Self::init_service), then populate `config` from the
    /// environment under the same prefix.
    pub fn init_service_with_config<T>(
        &self,
        name: &str,
        version: &str,
        config: &mut T,
    ) -> Result<ServiceContext, BootstrapError>
    where
        T: Serialize + DeserializeOwned,
    {
        let ctx = self.init_service(name, version)?;
        env::process(self.prefix(), config).map_err(BootstrapError::ServiceConfig)?;
        ctx.logger.debug(format!("Configured service {name}"));
        Ok(ctx)
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }
}
