//! Shared types and wire formats for connect channels.
//!
//! Everything in here is a value type: package names, stabilities,
//! normalized versions, the channel XML documents, the `package.xml`
//! descriptor embedded in every archive, and the `install.info` side-car
//! manifest written next to each installed package.

pub mod channel;
pub mod descriptor;
pub mod hash;
pub mod manifest;
pub mod types;
pub mod version;

// Re-exports
pub use channel::{ChannelLayout, DocumentError};
pub use descriptor::PackageDescriptor;
pub use hash::Sha256Hash;
pub use manifest::InstallManifest;
pub use types::*;
pub use version::{NormalizedVersion, VersionError};

/// Package type advertised for every package sourced from a connect channel.
pub const PACKAGE_TYPE: &str = "connect-module";

/// Vendor alias used when a channel configuration does not name one.
pub const DEFAULT_VENDOR_ALIAS: &str = "mage-community";
