//! Channel reader: the package index, per-package release lists and
//! per-release descriptors of one legacy channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use connect_schema::version::{dedup_by_normalized, normalize};
use connect_schema::{ChannelLayout, NormalizedVersion, PackageDescriptor, Stability};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::io::fetch::{FetchError, RemoteFetcher};

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Malformed channel response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl ChannelError {
    /// Whether the failure concerns a single document (malformed or absent)
    /// rather than the channel being unreachable.
    pub fn is_document_error(&self) -> bool {
        matches!(
            self,
            Self::Malformed { .. } | Self::Fetch(FetchError::NotFound { .. })
        )
    }
}

/// Releases of one package keyed by normalized version.
pub type ReleaseSet = BTreeMap<NormalizedVersion, ReleaseInfo>;

/// A package advertised by the channel. Its releases are loaded on first use
/// and kept for the lifetime of the value.
#[derive(Debug)]
pub struct PackageInfo {
    name: String,
    releases: OnceCell<Arc<ReleaseSet>>,
}

impl PackageInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            releases: OnceCell::new(),
        }
    }

    /// Channel name, as published.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One published release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    package: String,
    raw_version: String,
    stability: Stability,
    version: NormalizedVersion,
}

impl ReleaseInfo {
    /// Build a release, normalizing its version. The channel stability tag
    /// only survives in the normalized form of legacy versions.
    ///
    /// # Errors
    ///
    /// Returns [`connect_schema::VersionError`] if the raw version cannot be normalized.
    pub fn new(
        package: impl Into<String>,
        raw_version: impl Into<String>,
        stability: Stability,
    ) -> Result<Self, connect_schema::VersionError> {
        let raw_version = raw_version.into();
        let version = normalize(&raw_version, stability)?;
        Ok(Self {
            package: package.into(),
            raw_version,
            stability,
            version,
        })
    }

    /// Channel name of the owning package.
    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn raw_version(&self) -> &str {
        &self.raw_version
    }

    /// Stability tag as the channel published it.
    pub fn stability(&self) -> Stability {
        self.stability
    }

    pub fn version(&self) -> &NormalizedVersion {
        &self.version
    }
}

/// Reads one channel through an injected fetcher.
pub struct ChannelReader {
    url: String,
    layout: ChannelLayout,
    fetcher: Arc<dyn RemoteFetcher>,
    packages: OnceCell<Vec<Arc<PackageInfo>>>,
}

impl std::fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelReader")
            .field("url", &self.url)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl ChannelReader {
    /// `url` must already be normalized (scheme present, no trailing slash);
    /// see [`crate::config::normalize_channel_url`].
    pub fn new(url: &str, layout: ChannelLayout, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            layout,
            fetcher,
            packages: OnceCell::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// The package index. Fetched once; a failed fetch is retried on the next call.
    pub async fn packages(&self) -> Result<&[Arc<PackageInfo>], ChannelError> {
        let packages = self
            .packages
            .get_or_try_init(|| async {
                let url = self.document_url(&self.layout.packages_path());
                let body = self.fetch(&url).await?;
                let names = self
                    .layout
                    .parse_package_names(&body)
                    .map_err(|e| malformed(&url, &e))?;

                debug!(channel = %self.url, count = names.len(), "loaded package index");
                Ok::<_, ChannelError>(
                    names
                        .into_iter()
                        .map(|name| Arc::new(PackageInfo::new(name)))
                        .collect(),
                )
            })
            .await?;

        Ok(packages)
    }

    /// Case-insensitive lookup by channel name.
    pub async fn find_package(&self, name: &str) -> Result<Option<Arc<PackageInfo>>, ChannelError> {
        Ok(self
            .packages()
            .await?
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    /// Packages whose name contains any whitespace-separated token of `query`
    /// (case-insensitive). An empty query matches everything.
    pub async fn search(&self, query: &str) -> Result<Vec<Arc<PackageInfo>>, ChannelError> {
        let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();

        Ok(self
            .packages()
            .await?
            .iter()
            .filter(|p| {
                let name = p.name.to_lowercase();
                tokens.is_empty() || tokens.iter().any(|t| name.contains(t.as_str()))
            })
            .cloned()
            .collect())
    }

    /// Releases of `package`, loaded once and memoized on the package.
    ///
    /// Blank versions are skipped, versions that cannot be normalized are
    /// dropped with a warning, and releases normalizing to the same version
    /// collapse onto the greater raw version.
    pub async fn load_releases(&self, package: &PackageInfo) -> Result<Arc<ReleaseSet>, ChannelError> {
        let releases = package
            .releases
            .get_or_try_init(|| async {
                let url = self.document_url(&self.layout.releases_path(&package.name));
                let body = self.fetch(&url).await?;
                let entries = self
                    .layout
                    .parse_releases(&body)
                    .map_err(|e| malformed(&url, &e))?;

                let mut parsed = Vec::with_capacity(entries.len());
                for entry in entries {
                    let raw = entry.version.trim();
                    if raw.is_empty() {
                        continue;
                    }

                    match ReleaseInfo::new(&package.name, raw, Stability::parse(&entry.stability)) {
                        Ok(release) => parsed.push((release.version.clone(), release)),
                        Err(e) => {
                            warn!(package = %package.name, version = raw, "skipping release: {e}");
                        }
                    }
                }

                let set = dedup_by_normalized(parsed, |r: &ReleaseInfo| r.raw_version.as_str());
                debug!(package = %package.name, count = set.len(), "loaded releases");
                Ok::<_, ChannelError>(Arc::new(set))
            })
            .await?;

        Ok(Arc::clone(releases))
    }

    /// The `package.xml` of one release. Not cached.
    pub async fn package_descriptor(
        &self,
        release: &ReleaseInfo,
    ) -> Result<PackageDescriptor, ChannelError> {
        let url = self.document_url(
            &self
                .layout
                .descriptor_path(&release.package, &release.raw_version),
        );
        let body = self.fetch(&url).await?;
        PackageDescriptor::from_xml(&body).map_err(|e| malformed(&url, &e))
    }

    /// Download URL of a release's archive.
    pub fn archive_url(&self, release: &ReleaseInfo) -> String {
        self.document_url(
            &self
                .layout
                .archive_path(&release.package, &release.raw_version),
        )
    }

    fn document_url(&self, path: &str) -> String {
        format!("{}{path}", self.url)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ChannelError> {
        Ok(self.fetcher.fetch(&self.url, url).await?)
    }
}

fn malformed(url: &str, err: &impl std::fmt::Display) -> ChannelError {
    ChannelError::Malformed {
        url: url.to_string(),
        reason: err.to_string(),
    }
}
