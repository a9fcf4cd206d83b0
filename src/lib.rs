//! # service-commons
//!
//! Shared plumbing for backend services:
//!
//! - [`config`]: env var, env file and key/value map loaders for typed records
//! - [`discovery`]: logical service names resolved to endpoints
//! - [`messaging`]: bus transport and durable stream connections
//! - [`mongo`]: document database connections
//! - [`logging`] and [`telemetry`]: process-wide logger and tracer
//! - [`service`]: startup bootstrap tying the above together
//! - [`site_config`]: site configuration files (TOML, JSON, YAML)
//!
//! ```rust,no_run
//! use service_commons::service::RootArgs;
//!
//! #[derive(Default, serde::Serialize, serde::Deserialize)]
//! #[serde(default)]
//! struct Settings {
//!     service_field: u32,
//! }
//!
//! let args = RootArgs::new(None, Some("app".to_string()));
//! let mut settings = Settings::default();
//! let ctx = args.init_service_with_config("svc", "1.0.0", &mut settings)?;
//! ctx.logger.info("started");
//! # Ok::<(), service_commons::Error>(())
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod mongo;
pub mod service;
pub mod telemetry;

pub use error::Error;
pub use site_config;
