//! The `install.info` side-car document.
//!
//! Written next to every installed package, it lists the files the install
//! created (with their content digests) and the directories it created,
//! newest first. Removal consults it to delete exactly what the install put
//! there and nothing a user has touched since.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Sha256Hash;

/// File name of the side-car document inside a package's install path.
pub const MANIFEST_FILE_NAME: &str = "install.info";

/// Record of what one install created, relative to the install root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallManifest {
    /// Directories created by the install, most recently created first.
    #[serde(default)]
    pub dirs: Vec<String>,
    /// Files created by the install, mapped to their content digest at install time.
    #[serde(default)]
    pub files: BTreeMap<String, Sha256Hash>,
}

impl InstallManifest {
    /// Whether the manifest tracks nothing at all.
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }

    /// Parse a manifest from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error if the document is not a manifest.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the manifest to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_default_to_empty() {
        let manifest = InstallManifest::from_json("{}").unwrap();
        assert!(manifest.is_empty());

        let manifest = InstallManifest::from_json(r#"{"dirs": ["app/code/local/Foo"]}"#).unwrap();
        assert_eq!(manifest.dirs, vec!["app/code/local/Foo"]);
        assert!(manifest.files.is_empty());
    }

    #[test]
    fn json_shape() {
        let mut manifest = InstallManifest::default();
        manifest.dirs.push("lib/Foo".into());
        manifest
            .files
            .insert("lib/Foo/Bar.php".into(), Sha256Hash::compute(b"<?php"));

        let json: serde_json::Value = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(json["dirs"][0], "lib/Foo");
        assert_eq!(
            json["files"]["lib/Foo/Bar.php"],
            Sha256Hash::compute(b"<?php").as_str()
        );
    }
}
