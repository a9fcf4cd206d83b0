use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::SiteConfig;

/// File names searched by [`load`], in order.
pub const DEFAULT_FILE_NAMES: [&str; 4] = [
    "netlify.toml",
    "netlify.yml",
    "netlify.yaml",
    "netlify.json",
];

#[derive(Debug, Error)]
pub enum SiteConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no config file found, looked for: {}", display_paths(.0))]
    NoConfigPath(Vec<PathBuf>),
    #[error("more than one config file found: {}", display_paths(.0))]
    MoreThanOneConfigPath(Vec<PathBuf>),
    #[error("invalid TOML in {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid YAML in {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to encode site config: {0}")]
    Encode(#[from] toml::ser::Error),
}

impl SiteConfigError {
    /// True when no config file exists at the requested location(s).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            Self::NoConfigPath(_) => true,
            _ => false,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Serialization format of a site config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
    Yaml,
}

impl Format {
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            "yml" | "yaml" => Some(Self::Yaml),
            _ => None,
        }
    }

    /// Guess the format of extension-less content.
    pub fn sniff(content: &str) -> Self {
        let trimmed = content.trim_start();
        if trimmed.starts_with('{') {
            Self::Json
        } else if trimmed.starts_with('[') || content.lines().any(is_toml_assignment) {
            Self::Toml
        } else {
            Self::Yaml
        }
    }

    fn detect(path: &Path, content: &str) -> Self {
        Self::from_extension(path).unwrap_or_else(|| Self::sniff(content))
    }
}

fn is_toml_assignment(line: &str) -> bool {
    let line = line.trim();
    !line.starts_with('#')
        && line
            .split_once('=')
            .is_some_and(|(key, _)| !key.trim().is_empty() && !key.contains(':'))
}

/// Load the only existing file among `paths`.
///
/// A single path is read directly, so a missing file reports
/// [`SiteConfigError::is_not_found`] through its I/O error.
pub fn load_from<P: AsRef<Path>>(paths: &[P]) -> Result<SiteConfig, SiteConfigError> {
    let path = match paths {
        [single] => single.as_ref().to_path_buf(),
        _ => find_only_one_existing_path(paths)?,
    };
    let content = fs::read_to_string(&path).map_err(|source| SiteConfigError::Io {
        path: path.clone(),
        source,
    })?;
    parse(&path, &content)
}

/// Load the site config in `dir`, whichever of [`DEFAULT_FILE_NAMES`] it uses.
pub fn load(dir: impl AsRef<Path>) -> Result<SiteConfig, SiteConfigError> {
    let dir = dir.as_ref();
    let candidates: Vec<PathBuf> = DEFAULT_FILE_NAMES.iter().map(|n| dir.join(n)).collect();
    let path = find_only_one_existing_path(&candidates)?;
    load_from(&[path])
}

/// Write `config` to `path` as TOML.
pub fn save_to(config: &SiteConfig, path: impl AsRef<Path>) -> Result<(), SiteConfigError> {
    let path = path.as_ref();
    let data = toml::to_string(config)?;
    fs::write(path, data).map_err(|source| SiteConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Pick the one path in `paths` that exists. Empty entries are skipped.
pub fn find_only_one_existing_path<P: AsRef<Path>>(
    paths: &[P],
) -> Result<PathBuf, SiteConfigError> {
    let candidates: Vec<PathBuf> = paths
        .iter()
        .map(|p| p.as_ref())
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .collect();

    let mut found: Vec<PathBuf> = candidates.iter().filter(|p| p.exists()).cloned().collect();
    match found.len() {
        0 => Err(SiteConfigError::NoConfigPath(candidates)),
        1 => Ok(found.remove(0)),
        _ => Err(SiteConfigError::MoreThanOneConfigPath(found)),
    }
}

fn parse(path: &Path, content: &str) -> Result<SiteConfig, SiteConfigError> {
    let path_buf = || path.to_path_buf();
    match Format::detect(path, content) {
        Format::Toml => toml::from_str(content).map_err(|source| SiteConfigError::Toml {
            path: path_buf(),
            source,
        }),
        Format::Json => serde_json::from_str(content).map_err(|source| SiteConfigError::Json {
            path: path_buf(),
            source,
        }),
        Format::Yaml => serde_yaml::from_str(content).map_err(|source| SiteConfigError::Yaml {
            path: path_buf(),
            source,
        }),
    }
}
