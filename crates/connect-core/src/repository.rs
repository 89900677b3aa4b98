//! Repository adapter: exposes a channel as resolvable packages.
//!
//! The first enumerating query builds a `name -> version -> package` index
//! from the whole channel: the package list, every package's releases and,
//! when enabled, every release's `package.xml` for its dependencies. The
//! index is built once per repository and never refreshed; every lookup
//! hands out the same `Arc` for the same `(name, version)`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use connect_schema::{NormalizedVersion, PackageName, Stability};
use futures::stream::{self, StreamExt};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, ChannelReader, PackageInfo};
use crate::config::{ChannelConfig, ConfigError, normalize_channel_url};
use crate::io::fetch::RemoteFetcher;
use crate::package::{Link, ResolvablePackage};

/// Decides which stabilities the resolver is willing to consider.
pub trait AcceptancePolicy: Send + Sync {
    fn accepts(&self, name: &PackageName, stability: Stability) -> bool;
}

impl<F> AcceptancePolicy for F
where
    F: Fn(&PackageName, Stability) -> bool + Send + Sync,
{
    fn accepts(&self, name: &PackageName, stability: Stability) -> bool {
        self(name, stability)
    }
}

/// Accept anything at least as stable as a minimum, optionally per package.
#[derive(Debug, Clone, Default)]
pub struct MinimumStability {
    pub default: Stability,
    pub per_package: HashMap<PackageName, Stability>,
}

impl MinimumStability {
    pub fn new(default: Stability) -> Self {
        Self {
            default,
            per_package: HashMap::new(),
        }
    }

    pub fn with_package(mut self, name: impl Into<PackageName>, minimum: Stability) -> Self {
        self.per_package.insert(name.into(), minimum);
        self
    }
}

impl AcceptancePolicy for MinimumStability {
    fn accepts(&self, name: &PackageName, stability: Stability) -> bool {
        let minimum = self.per_package.get(name).copied().unwrap_or(self.default);
        stability.satisfies(minimum)
    }
}

/// Inclusive version bounds applied while building the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionWindow {
    pub min: Option<NormalizedVersion>,
    pub max: Option<NormalizedVersion>,
}

impl VersionWindow {
    pub fn contains(&self, version: &NormalizedVersion) -> bool {
        self.min.as_ref().is_none_or(|min| version >= min)
            && self.max.as_ref().is_none_or(|max| version <= max)
    }
}

#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    /// Vendor prefix every package name is exposed under.
    pub vendor_alias: String,
    pub window: VersionWindow,
    /// Fetch each release's `package.xml` for dependencies and descriptions.
    pub fetch_descriptors: bool,
    /// Requirement added to every package (the host framework).
    pub framework_requirement: Option<Link>,
    /// Maximum packages whose metadata is fetched at once.
    pub fetch_concurrency: usize,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            vendor_alias: connect_schema::DEFAULT_VENDOR_ALIAS.to_string(),
            window: VersionWindow::default(),
            fetch_descriptors: true,
            framework_requirement: None,
            fetch_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub name: PackageName,
    pub description: Option<String>,
}

type VersionMap = BTreeMap<NormalizedVersion, Arc<ResolvablePackage>>;
type Index = BTreeMap<PackageName, VersionMap>;

#[derive(Debug)]
pub struct ConnectRepository {
    reader: ChannelReader,
    options: RepositoryOptions,
    index: OnceCell<Index>,
}

impl ConnectRepository {
    pub fn new(reader: ChannelReader, options: RepositoryOptions) -> Self {
        Self {
            reader,
            options,
            index: OnceCell::new(),
        }
    }

    /// Build a repository from the `[channel]` configuration section.
    pub fn from_config(
        config: &ChannelConfig,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Result<Self, ConfigError> {
        let url = normalize_channel_url(&config.url)?;
        let reader = ChannelReader::new(&url, config.layout, fetcher);
        Ok(Self::new(reader, config.repository_options()?))
    }

    pub fn reader(&self) -> &ChannelReader {
        &self.reader
    }

    pub fn vendor_alias(&self) -> &str {
        &self.options.vendor_alias
    }

    /// Look up one version. `version` may be raw (`1.2.3.1`) or normalized (`1.2.3.0`).
    pub async fn find_package(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<Arc<ResolvablePackage>>, ChannelError> {
        let index = self.index().await?;
        let Some(versions) = index.get(&PackageName::new(name)) else {
            return Ok(None);
        };

        if let Ok(normalized) = NormalizedVersion::parse(version)
            && let Some(pkg) = versions.get(&normalized)
        {
            return Ok(Some(Arc::clone(pkg)));
        }

        // Legacy versions pick up their stability tag during normalization,
        // so a raw beta version only matches by its published text.
        Ok(versions
            .values()
            .find(|pkg| pkg.pretty_version == version.trim())
            .cloned())
    }

    /// All versions of `name`, or just `version` when given.
    pub async fn find_packages(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Vec<Arc<ResolvablePackage>>, ChannelError> {
        if let Some(version) = version {
            return Ok(self.find_package(name, version).await?.into_iter().collect());
        }

        let index = self.index().await?;
        Ok(index
            .get(&PackageName::new(name))
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Every version of `name` the policy accepts. Names outside this
    /// repository's vendor alias are answered without touching the channel.
    pub async fn what_provides(
        &self,
        policy: &dyn AcceptancePolicy,
        name: &str,
    ) -> Result<Vec<Arc<ResolvablePackage>>, ChannelError> {
        let name = PackageName::new(name);
        let prefix = format!("{}/", self.options.vendor_alias.to_lowercase());
        if !name.starts_with(&prefix) {
            return Ok(Vec::new());
        }

        let index = self.index().await?;
        Ok(index
            .get(&name)
            .map(|versions| {
                versions
                    .values()
                    .filter(|pkg| policy.accepts(&pkg.name, pkg.stability))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Search package names. Descriptions are filled in once the index exists.
    pub async fn search(&self, query: &str) -> Result<BTreeMap<PackageName, SearchHit>, ChannelError> {
        let matches = match self.reader.search(query).await {
            Ok(matches) => matches,
            Err(e) if e.is_document_error() => {
                warn!(channel = self.reader.url(), "package index unavailable: {e}");
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e),
        };

        let index = self.index.get();
        Ok(matches
            .iter()
            .map(|info| {
                let name = self.qualified(info.name());
                let description = index
                    .and_then(|index| index.get(&name))
                    .and_then(|versions| versions.values().next_back())
                    .and_then(|pkg| pkg.description.clone());
                (name.clone(), SearchHit { name, description })
            })
            .collect())
    }

    /// Every package in the channel.
    pub async fn packages(&self) -> Result<Vec<Arc<ResolvablePackage>>, ChannelError> {
        let index = self.index().await?;
        Ok(index
            .values()
            .flat_map(|versions| versions.values().cloned())
            .collect())
    }

    fn qualified(&self, channel_name: &str) -> PackageName {
        PackageName::qualified(&self.options.vendor_alias, channel_name)
    }

    async fn index(&self) -> Result<&Index, ChannelError> {
        self.index.get_or_try_init(|| self.build_index()).await
    }

    async fn build_index(&self) -> Result<Index, ChannelError> {
        let packages = match self.reader.packages().await {
            Ok(packages) => packages,
            Err(e) if e.is_document_error() => {
                warn!(channel = self.reader.url(), "package index unavailable: {e}");
                return Ok(Index::new());
            }
            Err(e) => return Err(e),
        };

        let results: Vec<_> = stream::iter(packages.iter().cloned())
            .map(|info| self.index_package(info))
            .buffer_unordered(self.options.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut index = Index::new();
        for result in results {
            if let Some((name, versions)) = result? {
                index.entry(name).or_default().extend(versions);
            }
        }

        info!(
            channel = self.reader.url(),
            packages = index.len(),
            "channel index built"
        );
        Ok(index)
    }

    async fn index_package(
        &self,
        info: Arc<PackageInfo>,
    ) -> Result<Option<(PackageName, VersionMap)>, ChannelError> {
        let releases = match self.reader.load_releases(&info).await {
            Ok(releases) => releases,
            Err(e) if e.is_document_error() => {
                warn!(package = info.name(), "skipping package: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let name = self.qualified(info.name());
        let mut versions = VersionMap::new();

        for (version, release) in releases.iter() {
            if !self.options.window.contains(version) {
                debug!(package = %name, %version, "outside version window");
                continue;
            }

            let mut package =
                ResolvablePackage::from_release(name.clone(), release, self.reader.archive_url(release));

            if self.options.fetch_descriptors {
                match self.reader.package_descriptor(release).await {
                    Ok(descriptor) => package.apply_descriptor(&descriptor, &self.options.vendor_alias),
                    Err(e) if e.is_document_error() => {
                        warn!(package = %name, version = release.raw_version(), "skipping release: {e}");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            if let Some(framework) = &self.options.framework_requirement {
                package.requires.push(framework.clone());
            }

            versions.insert(version.clone(), Arc::new(package));
        }

        Ok(Some((name, versions)))
    }
}
