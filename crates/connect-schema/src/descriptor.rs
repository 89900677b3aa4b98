//! The `package.xml` descriptor.
//!
//! Every connect archive carries a `package.xml` at its root. The same
//! document is also served by the channel for each release. Only the parts
//! the installer and repository care about are modelled; everything else in
//! the document is ignored.

use serde::Deserialize;

use crate::channel::DocumentError;

/// Top-level `<package>` document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageDescriptor {
    /// Channel package name.
    #[serde(default)]
    pub name: String,
    /// One-line summary.
    #[serde(default)]
    pub summary: String,
    /// Long description.
    #[serde(default)]
    pub description: String,
    /// Files shipped in the archive, grouped by target category.
    #[serde(default)]
    pub contents: Contents,
    /// Declared dependencies.
    #[serde(default)]
    pub dependencies: Dependencies,
}

impl PackageDescriptor {
    /// Parse a descriptor from raw XML bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Xml`] if the document is not valid XML or
    /// does not have the `<package>` shape.
    pub fn from_xml(document: &[u8]) -> Result<Self, DocumentError> {
        Ok(serde_xml_rs::from_reader(document)?)
    }

    /// Target categories in document order.
    pub fn targets(&self) -> &[Target] {
        &self.contents.targets
    }

    /// Required channel packages.
    pub fn required_packages(&self) -> &[PackageDependency] {
        &self.dependencies.required.packages
    }

    /// The best available human description: the summary, or the long
    /// description when no summary is given.
    pub fn display_description(&self) -> Option<&str> {
        [self.summary.trim(), self.description.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
    }
}

/// `<contents>`: a list of `<target>` trees.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Contents {
    /// Target trees.
    #[serde(rename = "target", default)]
    pub targets: Vec<Target>,
}

/// `<target name="...">`: the root of one routed tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Target {
    /// Target category (`magelocal`, `magecommunity`, ...).
    #[serde(default)]
    pub name: String,
    /// Child directories and files.
    #[serde(rename = "$value", default)]
    pub nodes: Vec<Node>,
}

/// A node in a target tree.
#[derive(Debug, Clone, Deserialize)]
pub enum Node {
    /// `<dir name="...">`
    #[serde(rename = "dir")]
    Dir(DirNode),
    /// `<file name="..." hash="..."/>`
    #[serde(rename = "file")]
    File(FileNode),
}

impl Node {
    /// The node's `name` attribute.
    pub fn name(&self) -> &str {
        match self {
            Self::Dir(dir) => &dir.name,
            Self::File(file) => &file.name,
        }
    }
}

/// A directory node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirNode {
    /// Directory name relative to its parent.
    #[serde(default)]
    pub name: String,
    /// Child directories and files.
    #[serde(rename = "$value", default)]
    pub nodes: Vec<Node>,
}

/// A file node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileNode {
    /// File name relative to its parent.
    #[serde(default)]
    pub name: String,
    /// Digest published by the packager. Informational only.
    #[serde(default)]
    pub hash: String,
}

/// `<dependencies>`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dependencies {
    /// `<required>` block.
    #[serde(default)]
    pub required: Required,
}

/// `<required>`: hard dependencies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Required {
    /// Supported PHP range.
    #[serde(default)]
    pub php: Option<VersionBounds>,
    /// Channel packages.
    #[serde(rename = "package", default)]
    pub packages: Vec<PackageDependency>,
}

/// A `<min>`/`<max>` pair.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionBounds {
    /// Inclusive lower bound.
    #[serde(default)]
    pub min: String,
    /// Inclusive upper bound.
    #[serde(default)]
    pub max: String,
}

impl VersionBounds {
    /// Render as a resolver constraint (`>=min,<=max`, `*` when unbounded).
    ///
    /// ```
    /// use connect_schema::descriptor::VersionBounds;
    ///
    /// let bounds = VersionBounds { min: "1.0.0".into(), max: String::new() };
    /// assert_eq!(bounds.constraint(), ">=1.0.0");
    /// ```
    pub fn constraint(&self) -> String {
        let parts: Vec<String> = [(">=", self.min.trim()), ("<=", self.max.trim())]
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(op, v)| format!("{op}{v}"))
            .collect();

        if parts.is_empty() {
            "*".to_string()
        } else {
            parts.join(",")
        }
    }
}

/// A `<package>` dependency.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageDependency {
    /// Channel package name.
    #[serde(default)]
    pub name: String,
    /// Channel the dependency lives on.
    #[serde(default)]
    pub channel: String,
    /// Inclusive lower bound.
    #[serde(default)]
    pub min: String,
    /// Inclusive upper bound.
    #[serde(default)]
    pub max: String,
}

impl PackageDependency {
    /// Version bounds of this dependency.
    pub fn bounds(&self) -> VersionBounds {
        VersionBounds {
            min: self.min.clone(),
            max: self.max.clone(),
        }
    }
}
