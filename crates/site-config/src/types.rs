use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A site configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    #[serde(alias = "Settings")]
    pub settings: Settings,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub redirects: Vec<Redirect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
    /// Overrides keyed by deploy context name, e.g. `deploy-preview`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, DeployContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Directory the site is built from.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Redirect {
    pub origin: String,
    pub destination: String,
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Shell command that builds the site.
    pub command: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

/// Build settings for one deploy context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeployContext {
    #[serde(flatten)]
    pub build: BuildConfig,
}

impl DeployContext {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            build: BuildConfig {
                command: command.into(),
                environment: BTreeMap::new(),
            },
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build.environment.insert(key.into(), value.into());
        self
    }
}
