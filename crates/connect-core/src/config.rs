//! Configuration.
//!
//! ```toml
//! [channel]
//! url = "connect20.magentocommerce.com/community"
//! layout = "connect20"
//! vendor_alias = "mage-community"
//! min_version = "1.0"
//! fetch_concurrency = 8
//!
//! [channel.framework]
//! name = "magento/core"
//! constraint = ">=1.7"
//!
//! [install]
//! root_dir = "."
//! vendor_dir = "vendor"
//! overwrite = false
//!
//! [install.routes]
//! magelocal = "app/code/local/"
//! ```
//!
//! Every field has a default. `CONNECT_CHANNEL_URL`, `CONNECT_ROOT_DIR`,
//! `CONNECT_VENDOR_DIR` and `CONNECT_OVERWRITE` override the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use connect_schema::{ChannelLayout, NormalizedVersion, VersionError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::io::extract::RoutingTable;
use crate::package::Link;
use crate::repository::{RepositoryOptions, VersionWindow};

static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").unwrap());

pub const DEFAULT_CHANNEL_URL: &str = "http://connect20.magentocommerce.com/community";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[cfg(feature = "parsing")]
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid channel URL '{0}'")]
    InvalidUrl(String),

    #[error("Invalid version bound '{value}': {source}")]
    InvalidVersion {
        value: String,
        source: VersionError,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub channel: ChannelConfig,
    pub install: InstallConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub url: String,
    pub layout: ChannelLayout,
    pub vendor_alias: String,
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    pub fetch_descriptors: bool,
    pub fetch_concurrency: usize,
    pub framework: Option<FrameworkRequirement>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CHANNEL_URL.to_string(),
            layout: ChannelLayout::default(),
            vendor_alias: connect_schema::DEFAULT_VENDOR_ALIAS.to_string(),
            min_version: None,
            max_version: None,
            fetch_descriptors: true,
            fetch_concurrency: 8,
            framework: None,
        }
    }
}

/// Requirement injected into every package, e.g. the host framework's core package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkRequirement {
    pub name: String,
    #[serde(default = "any_version")]
    pub constraint: String,
}

fn any_version() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Project root the target categories are routed under.
    pub root_dir: PathBuf,
    /// Where archives and `install.info` files live, one directory per package.
    pub vendor_dir: PathBuf,
    /// Replace existing files instead of skipping them.
    pub overwrite: bool,
    /// Additional or replacement target routes.
    pub routes: BTreeMap<String, String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            vendor_dir: PathBuf::from("vendor"),
            overwrite: false,
            routes: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Parse and validate a TOML document.
    #[cfg(feature = "parsing")]
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, validate and apply environment overrides.
    #[cfg(feature = "parsing")]
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load `~/.connect/config.toml` when present, defaults otherwise.
    #[cfg(feature = "parsing")]
    pub fn load() -> Result<Self, ConfigError> {
        let path = crate::paths::config_path();
        if path.exists() {
            return Self::from_file(&path);
        }

        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `CONNECT_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("CONNECT_CHANNEL_URL") {
            self.channel.url = url;
        }
        if let Some(dir) = lookup("CONNECT_ROOT_DIR") {
            self.install.root_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("CONNECT_VENDOR_DIR") {
            self.install.vendor_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("CONNECT_OVERWRITE") {
            self.install.overwrite = value == "1" || value.eq_ignore_ascii_case("true");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channel.validate()?;
        self.install.validate()
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        normalize_channel_url(&self.url)?;

        let alias = self.vendor_alias.trim();
        if alias.is_empty() || alias.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "vendor_alias must be a single non-empty segment, got '{}'",
                self.vendor_alias
            )));
        }

        if self.fetch_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "fetch_concurrency must be at least 1".to_string(),
            ));
        }

        let window = self.version_window()?;
        if let (Some(min), Some(max)) = (&window.min, &window.max)
            && min > max
        {
            return Err(ConfigError::Invalid(format!(
                "min_version {min} is greater than max_version {max}"
            )));
        }

        Ok(())
    }

    pub fn version_window(&self) -> Result<VersionWindow, ConfigError> {
        let bound = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| {
                    NormalizedVersion::parse(v).map_err(|source| ConfigError::InvalidVersion {
                        value: v.to_string(),
                        source,
                    })
                })
                .transpose()
        };

        Ok(VersionWindow {
            min: bound(&self.min_version)?,
            max: bound(&self.max_version)?,
        })
    }

    pub fn repository_options(&self) -> Result<RepositoryOptions, ConfigError> {
        Ok(RepositoryOptions {
            vendor_alias: self.vendor_alias.trim().to_lowercase(),
            window: self.version_window()?,
            fetch_descriptors: self.fetch_descriptors,
            framework_requirement: self
                .framework
                .as_ref()
                .map(|f| Link::new(f.name.as_str(), f.constraint.as_str())),
            fetch_concurrency: self.fetch_concurrency.max(1),
        })
    }
}

impl InstallConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (category, dir) in &self.routes {
            let path = Path::new(dir);
            if path.is_absolute()
                || path
                    .components()
                    .any(|c| matches!(c, std::path::Component::ParentDir))
            {
                return Err(ConfigError::Invalid(format!(
                    "route for '{category}' must stay inside the root directory, got '{dir}'"
                )));
            }
        }
        Ok(())
    }

    /// Default routes overlaid with the configured ones.
    pub fn routing_table(&self) -> RoutingTable {
        RoutingTable::default().with_routes(
            self.routes
                .iter()
                .map(|(category, dir)| (category.clone(), dir.clone())),
        )
    }
}

/// Prepend `http://` when no scheme is given, require a host and drop
/// trailing slashes.
pub fn normalize_channel_url(url: &str) -> Result<String, ConfigError> {
    let trimmed = url.trim();
    let with_scheme = if URL_SCHEME.is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let host = with_scheme
        .split_once("://")
        .map(|(_, rest)| rest.split('/').next().unwrap_or(""))
        .unwrap_or("");
    if host.is_empty() {
        return Err(ConfigError::InvalidUrl(url.to_string()));
    }

    Ok(with_scheme.trim_end_matches('/').to_string())
}
