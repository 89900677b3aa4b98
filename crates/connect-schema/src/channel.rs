//! Channel wire formats.
//!
//! A channel exposes a package index and one release index per package. Two
//! layouts exist in the wild: the Connect 2.0 layout (`packages.xml` at the
//! channel root) and the older PEAR-style REST layout used by Connect 1.0
//! channels (`rest/p/packages.xml`). Both carry the same information; this
//! module maps them onto one set of value types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while decoding a channel document.
#[derive(Error, Debug)]
pub enum DocumentError {
    /// The document is not well-formed XML or does not match the expected shape.
    #[error("XML error: {0}")]
    Xml(#[from] serde_xml_rs::Error),
}

/// URL layout of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    /// Connect 2.0: `packages.xml`, `<name>/releases.xml`, `<name>/<version>/package.xml`.
    #[default]
    Connect20,
    /// Connect 1.0 (PEAR REST): `rest/p/packages.xml`, `rest/r/<name>/allreleases.xml`.
    Connect10,
}

impl ChannelLayout {
    /// Path of the package index, relative to the channel URL.
    pub fn packages_path(self) -> String {
        match self {
            Self::Connect20 => "/packages.xml".to_string(),
            Self::Connect10 => "/rest/p/packages.xml".to_string(),
        }
    }

    /// Path of a package's release index.
    pub fn releases_path(self, package: &str) -> String {
        match self {
            Self::Connect20 => format!("/{package}/releases.xml"),
            Self::Connect10 => format!("/rest/r/{}/allreleases.xml", package.to_lowercase()),
        }
    }

    /// Path of the `package.xml` descriptor of one release.
    pub fn descriptor_path(self, package: &str, version: &str) -> String {
        match self {
            Self::Connect20 => format!("/{package}/{version}/package.xml"),
            Self::Connect10 => {
                format!("/rest/r/{}/package.{version}.xml", package.to_lowercase())
            }
        }
    }

    /// Path of the downloadable archive of one release.
    pub fn archive_path(self, package: &str, version: &str) -> String {
        match self {
            Self::Connect20 => format!("/{package}/{version}/{package}-{version}.tgz"),
            Self::Connect10 => format!("/get/{package}-{version}.tgz"),
        }
    }

    /// Parse a package index document into the list of package names.
    ///
    /// Entries with a blank name are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Xml`] if the document cannot be decoded.
    pub fn parse_package_names(self, document: &[u8]) -> Result<Vec<String>, DocumentError> {
        let names: Vec<String> = match self {
            Self::Connect20 => {
                let doc: PackageIndexDocument = serde_xml_rs::from_reader(document)?;
                doc.packages.into_iter().map(|p| p.name).collect()
            }
            Self::Connect10 => {
                let doc: PearPackageIndexDocument = serde_xml_rs::from_reader(document)?;
                doc.packages
            }
        };

        Ok(names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }

    /// Parse a release index document. Both layouts share the `<r><v/><s/></r>` shape.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Xml`] if the document cannot be decoded.
    pub fn parse_releases(self, document: &[u8]) -> Result<Vec<ReleaseEntry>, DocumentError> {
        let doc: ReleaseIndexDocument = serde_xml_rs::from_reader(document)?;
        Ok(doc.releases)
    }
}

/// One `<r>` entry of a release index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReleaseEntry {
    /// Raw version string as published.
    #[serde(rename = "v", default)]
    pub version: String,
    /// Stability tag as published (`stable`, `beta`, ...).
    #[serde(rename = "s", default)]
    pub stability: String,
}

#[derive(Debug, Deserialize)]
struct PackageIndexDocument {
    #[serde(rename = "p", default)]
    packages: Vec<PackageIndexEntry>,
}

#[derive(Debug, Deserialize)]
struct PackageIndexEntry {
    #[serde(rename = "n", default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PearPackageIndexDocument {
    #[serde(rename = "p", default)]
    packages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseIndexDocument {
    #[serde(rename = "r", default)]
    releases: Vec<ReleaseEntry>,
}
