//! Resolver-facing package values.

use connect_schema::{NormalizedVersion, PACKAGE_TYPE, PackageDescriptor, PackageName, Stability};
use serde::Serialize;

use crate::channel::ReleaseInfo;
use crate::paths::filename_from_url;

/// Distribution type of every channel package: a single archive file.
pub const DIST_TYPE: &str = "file";

/// A dependency edge in the resolver's terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Link {
    pub target: PackageName,
    /// Constraint in the resolver's grammar, e.g. `>=1.2.0,<=2.0.0`.
    pub constraint: String,
}

impl Link {
    pub fn new(target: impl Into<PackageName>, constraint: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            constraint: constraint.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageExtra {
    /// The version exactly as the channel published it.
    pub orig_version: String,
}

/// One installable version of one channel package.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvablePackage {
    pub name: PackageName,
    pub version: NormalizedVersion,
    pub pretty_version: String,
    pub package_type: String,
    pub dist_url: String,
    pub dist_type: String,
    pub requires: Vec<Link>,
    pub extra: PackageExtra,
    pub stability: Stability,
    pub description: Option<String>,
}

impl ResolvablePackage {
    pub fn from_release(name: PackageName, release: &ReleaseInfo, dist_url: String) -> Self {
        // Legacy versions pick up the channel tag during normalization.
        let stability = release.version().stability();

        Self {
            name,
            version: release.version().clone(),
            pretty_version: release.raw_version().to_string(),
            package_type: PACKAGE_TYPE.to_string(),
            dist_url,
            dist_type: DIST_TYPE.to_string(),
            requires: Vec::new(),
            extra: PackageExtra {
                orig_version: release.raw_version().to_string(),
            },
            stability,
            description: None,
        }
    }

    /// Take dependencies and description from the release's `package.xml`.
    /// Dependencies are exposed under `vendor_alias`.
    pub fn apply_descriptor(&mut self, descriptor: &PackageDescriptor, vendor_alias: &str) {
        for dep in descriptor.required_packages() {
            let name = dep.name.trim();
            if name.is_empty() {
                continue;
            }
            self.requires.push(Link::new(
                PackageName::qualified(vendor_alias, name),
                dep.bounds().constraint(),
            ));
        }

        if let Some(text) = descriptor.display_description() {
            self.description = Some(text.to_string());
        }
    }

    /// `name-version`, unique within a repository.
    pub fn unique_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// File name the archive is stored under once downloaded.
    pub fn archive_file_name(&self) -> &str {
        filename_from_url(&self.dist_url)
    }
}

impl std::fmt::Display for ResolvablePackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.pretty_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(raw: &str, stability: Stability) -> ReleaseInfo {
        ReleaseInfo::new("Foo_Bar", raw, stability).unwrap()
    }

    #[test]
    fn from_release_keeps_raw_version() {
        let pkg = ResolvablePackage::from_release(
            PackageName::qualified("mage-community", "Foo_Bar"),
            &release("1.2.3.1", Stability::Stable),
            "http://c/Foo_Bar/1.2.3.1/Foo_Bar-1.2.3.1.tgz".to_string(),
        );

        assert_eq!(pkg.name, "mage-community/foo_bar");
        assert_eq!(pkg.version.as_str(), "1.2.3.0");
        assert_eq!(pkg.pretty_version, "1.2.3.1");
        assert_eq!(pkg.extra.orig_version, "1.2.3.1");
        assert_eq!(pkg.package_type, "connect-module");
        assert_eq!(pkg.dist_type, "file");
        assert_eq!(pkg.archive_file_name(), "Foo_Bar-1.2.3.1.tgz");
        assert_eq!(pkg.unique_name(), "mage-community/foo_bar-1.2.3.0");
    }

    #[test]
    fn stability_follows_the_version() {
        let tagged_stable = ResolvablePackage::from_release(
            PackageName::new("mage-community/foo_bar"),
            &release("2.0.0-beta1", Stability::Stable),
            String::new(),
        );
        assert_eq!(tagged_stable.stability, Stability::Beta);

        let tagged_beta = ResolvablePackage::from_release(
            PackageName::new("mage-community/foo_bar"),
            &release("1.0.0", Stability::Beta),
            String::new(),
        );
        assert_eq!(tagged_beta.stability, Stability::Stable);

        // four-part legacy versions carry the tag into the normalized form
        let legacy = ResolvablePackage::from_release(
            PackageName::new("mage-community/foo_bar"),
            &release("1.2.3.1", Stability::Beta),
            String::new(),
        );
        assert_eq!(legacy.stability, Stability::Beta);
    }

    #[test]
    fn unknown_stability_falls_back_to_version() {
        let pkg = ResolvablePackage::from_release(
            PackageName::new("mage-community/foo_bar"),
            &release("1.0.0-beta2", Stability::Unknown),
            String::new(),
        );
        assert_eq!(pkg.stability, Stability::Beta);
    }

    #[test]
    fn descriptor_links() {
        let descriptor = PackageDescriptor::from_xml(
            br"<package>
                <summary>Does things</summary>
                <dependencies><required>
                    <package><name>Baz_Core</name><min>1.0.0</min></package>
                    <package><name></name></package>
                </required></dependencies>
            </package>",
        )
        .unwrap();

        let mut pkg = ResolvablePackage::from_release(
            PackageName::new("mage-community/foo_bar"),
            &release("1.0.0", Stability::Stable),
            String::new(),
        );
        pkg.apply_descriptor(&descriptor, "mage-community");

        assert_eq!(
            pkg.requires,
            vec![Link::new("mage-community/baz_core", ">=1.0.0")]
        );
        assert_eq!(pkg.description.as_deref(), Some("Does things"));
    }
}
