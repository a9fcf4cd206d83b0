//! # site-config
//!
//! Reader and writer for site configuration files.
//!
//! A site configuration names the site, lists its redirects, and describes
//! how it is built, with optional per-deploy-context overrides. The same
//! record can be written as TOML, JSON or YAML; all three decode to equal
//! [`SiteConfig`] values.
//!
//! ```rust,no_run
//! let config = site_config::load(".")?;
//! println!("building {} with {:?}", config.settings.id, config.build);
//! # Ok::<(), site_config::SiteConfigError>(())
//! ```

#![deny(clippy::all)]

mod loader;
mod types;

pub use loader::{
    DEFAULT_FILE_NAMES, Format, SiteConfigError, find_only_one_existing_path, load, load_from,
    save_to,
};
pub use types::{BuildConfig, DeployContext, Redirect, Settings, SiteConfig};
