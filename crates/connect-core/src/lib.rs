pub mod channel;
pub mod config;
pub mod installer;
pub mod io;
pub mod package;
pub mod paths;
pub mod repository;
pub mod tracker;

pub mod reporter;

#[cfg(test)]
mod testing;

pub use channel::{ChannelError, ChannelReader, PackageInfo, ReleaseInfo};
pub use config::{Config, ConfigError};
pub use installer::{InstallError, InstallSource, PackageInstaller};
pub use io::fetch::{FetchError, RemoteFetcher};
pub use package::{Link, ResolvablePackage};
pub use paths::*;
pub use reporter::{NullReporter, Reporter};
pub use repository::{AcceptancePolicy, ConnectRepository, MinimumStability};
pub use tracker::{InstallTracker, RemovalOutcome, RemovalWarning};

/// User Agent string for channel requests
pub const USER_AGENT: &str = concat!("connect-core/", env!("CARGO_PKG_VERSION"));
