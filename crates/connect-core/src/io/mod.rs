pub mod archive;
pub mod extract;
pub mod fetch;

pub use archive::{ArchiveError, PackageArchive};
pub use extract::{
    ExtractError, ExtractFailure, ExtractOptions, ExtractOutcome, InstallWarning, RoutingTable,
};
#[cfg(feature = "network")]
pub use fetch::HttpFetcher;
pub use fetch::{FetchError, RemoteFetcher};
