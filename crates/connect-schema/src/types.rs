//! Package names and stability levels.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// A resolver-facing package name (`<vendor-alias>/<channel name>`), always lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name, normalizing the input to lowercase.
    pub fn new(name: &str) -> Self {
        Self(name.to_lowercase())
    }

    /// Build the resolver name for a channel package exposed under `vendor_alias`.
    ///
    /// ```
    /// use connect_schema::PackageName;
    ///
    /// let name = PackageName::qualified("mage-community", "Foo_Bar");
    /// assert_eq!(name.as_str(), "mage-community/foo_bar");
    /// ```
    pub fn qualified(vendor_alias: &str, channel_name: &str) -> Self {
        Self::new(&format!("{vendor_alias}/{channel_name}"))
    }

    /// Return the normalized name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The vendor part (everything before the first `/`), if any.
    pub fn vendor(&self) -> Option<&str> {
        self.0.split_once('/').map(|(vendor, _)| vendor)
    }

    /// The name without its vendor prefix.
    pub fn short_name(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(_, name)| name)
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<std::path::Path> for PackageName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

/// Release stability as advertised by a channel.
///
/// Channels are inconsistent about casing and occasionally publish values
/// outside the known set; those become [`Stability::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    /// Production release.
    Stable,
    /// Release candidate.
    Rc,
    /// Feature complete, not yet hardened.
    Beta,
    /// Early preview.
    Alpha,
    /// Development snapshot.
    Dev,
    /// Missing or unrecognized stability tag.
    #[default]
    Unknown,
}

impl Stability {
    /// Parse a channel stability tag. Never fails.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "rc" => Self::Rc,
            "beta" => Self::Beta,
            "alpha" => Self::Alpha,
            "dev" | "devel" | "snapshot" => Self::Dev,
            _ => Self::Unknown,
        }
    }

    /// Suffix tag appended to legacy versions (`None` for unknown stability).
    pub fn tag(self) -> Option<&'static str> {
        match self {
            Self::Stable => Some("stable"),
            Self::Rc => Some("rc"),
            Self::Beta => Some("beta"),
            Self::Alpha => Some("alpha"),
            Self::Dev => Some("dev"),
            Self::Unknown => None,
        }
    }

    /// Numeric stability rank; higher is more stable.
    ///
    /// Unknown ranks with `dev` so it is only accepted by the most permissive policies.
    pub fn rank(self) -> u8 {
        match self {
            Self::Stable => 4,
            Self::Rc => 3,
            Self::Beta => 2,
            Self::Alpha => 1,
            Self::Dev | Self::Unknown => 0,
        }
    }

    /// Whether `self` is at least as stable as `minimum`.
    pub fn satisfies(self, minimum: Stability) -> bool {
        self.rank() >= minimum.rank()
    }
}

impl std::fmt::Display for Stability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag().unwrap_or("unknown"))
    }
}
