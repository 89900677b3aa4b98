//! Package installation: download, routed extraction and tracking.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use connect_schema::PACKAGE_TYPE;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, InstallConfig};
use crate::io::extract::{
    ExtractError, ExtractOptions, ExtractOutcome, RoutingTable, extract, install_directory,
};
use crate::io::fetch::{FetchError, RemoteFetcher};
use crate::package::ResolvablePackage;
use crate::reporter::Reporter;
use crate::tracker::{InstallTracker, RemovalOutcome, TrackerError};

/// Package types the installer accepts.
const SUPPORTED_TYPES: &[&str] = &[PACKAGE_TYPE, "magento-connect-module", "mage-connect-module"];

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Download failed: {0}")]
    Download(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("Failed to track install: {0}")]
    Tracking(#[from] TrackerError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("{0}")]
    Other(String),
}

/// Where the files of an install come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// A connect archive with a `package.xml` routing its contents.
    Archive(PathBuf),
    /// A plain directory tree copied 1:1 into the root directory.
    Directory(PathBuf),
}

pub struct PackageInstaller<R> {
    vendor_dir: PathBuf,
    routing: RoutingTable,
    options: ExtractOptions,
    tracker: InstallTracker,
    fetcher: Arc<dyn RemoteFetcher>,
    reporter: R,
}

impl<R: Reporter> PackageInstaller<R> {
    /// A relative `vendor_dir` is taken relative to `root_dir`.
    pub fn new(
        config: &InstallConfig,
        fetcher: Arc<dyn RemoteFetcher>,
        reporter: R,
    ) -> Result<Self, InstallError> {
        config.validate()?;

        let vendor_dir = if config.vendor_dir.is_absolute() {
            config.vendor_dir.clone()
        } else {
            config.root_dir.join(&config.vendor_dir)
        };

        Ok(Self {
            vendor_dir,
            routing: config.routing_table(),
            options: ExtractOptions {
                root_dir: config.root_dir.clone(),
                overwrite: config.overwrite,
            },
            tracker: InstallTracker::new(&config.root_dir),
            fetcher,
            reporter,
        })
    }

    pub fn supports(package_type: &str) -> bool {
        SUPPORTED_TYPES.contains(&package_type)
    }

    pub fn tracker(&self) -> &InstallTracker {
        &self.tracker
    }

    pub fn install_path(&self, pkg: &ResolvablePackage) -> PathBuf {
        self.vendor_dir.join(pkg.name.as_str())
    }

    /// Fetch the package archive into its install path, unless it is already there.
    pub async fn download(&self, pkg: &ResolvablePackage) -> Result<PathBuf, InstallError> {
        let file_name = pkg.archive_file_name();
        if file_name.is_empty() {
            return Err(InstallError::Other(format!(
                "{} has no archive to download",
                pkg.unique_name()
            )));
        }

        let install_path = self.install_path(pkg);
        let archive_path = install_path.join(file_name);
        if archive_path.is_file() {
            debug!(archive = %archive_path.display(), "archive already downloaded");
            return Ok(archive_path);
        }

        self.reporter
            .downloading(&pkg.name, &pkg.pretty_version, 0, None);
        let bytes = self
            .fetcher
            .fetch(origin_of(&pkg.dist_url), &pkg.dist_url)
            .await?;
        let size = bytes.len() as u64;
        self.reporter
            .downloading(&pkg.name, &pkg.pretty_version, size, Some(size));

        tokio::fs::create_dir_all(&install_path)
            .await
            .map_err(io_error(&install_path))?;
        let part_path = archive_path.with_extension("part");
        tokio::fs::write(&part_path, &bytes)
            .await
            .map_err(io_error(&part_path))?;
        tokio::fs::rename(&part_path, &archive_path)
            .await
            .map_err(io_error(&archive_path))?;

        info!(package = %pkg.name, bytes = size, "archive downloaded");
        Ok(archive_path)
    }

    /// Download, extract and track `pkg`.
    pub async fn install(&self, pkg: &ResolvablePackage) -> Result<ExtractOutcome, InstallError> {
        self.reporter.section(&format!("Installing {pkg}"));
        let archive_path = match self.download(pkg).await {
            Ok(path) => path,
            Err(e) => {
                self.reporter
                    .failed(&pkg.name, &pkg.pretty_version, &e.to_string());
                return Err(e);
            }
        };
        self.place(pkg, InstallSource::Archive(archive_path)).await
    }

    /// Extract and track `pkg` from an explicit source.
    ///
    /// On an extraction error whatever was already written is still
    /// recorded, so a later removal can clean it up.
    pub async fn install_from(
        &self,
        pkg: &ResolvablePackage,
        source: InstallSource,
    ) -> Result<ExtractOutcome, InstallError> {
        self.reporter.section(&format!("Installing {pkg}"));
        self.place(pkg, source).await
    }

    async fn place(
        &self,
        pkg: &ResolvablePackage,
        source: InstallSource,
    ) -> Result<ExtractOutcome, InstallError> {
        self.reporter.extracting(&pkg.name, &pkg.pretty_version);

        let routing = self.routing.clone();
        let options = self.options.clone();
        let result = tokio::task::spawn_blocking(move || match source {
            InstallSource::Archive(path) => extract(&path, &routing, &options),
            InstallSource::Directory(path) => install_directory(&path, &options),
        })
        .await
        .map_err(|e| InstallError::Other(format!("Task panic: {e}")))?;

        let install_path = self.install_path(pkg);
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(failure) => {
                if let Err(e) = self.tracker.record(&install_path, &failure.partial) {
                    warn!(package = %pkg.name, "could not record partial install: {e}");
                    self.reporter.error(&format!(
                        "Files written by {pkg} are not tracked and must be removed by hand: {e}"
                    ));
                }
                self.reporter
                    .failed(&pkg.name, &pkg.pretty_version, &failure.to_string());
                return Err(failure.error.into());
            }
        };

        if outcome.repaired {
            self.reporter
                .info(&format!("Repaired invalid archive of {}", pkg.name));
        }
        for warning in &outcome.warnings {
            self.reporter.warning(&warning.to_string());
        }

        self.reporter.installing(&pkg.name, &pkg.pretty_version);
        if let Err(e) = self.tracker.record(&install_path, &outcome.manifest) {
            self.reporter
                .failed(&pkg.name, &pkg.pretty_version, &e.to_string());
            return Err(e.into());
        }

        self.reporter.done(
            &pkg.name,
            &pkg.pretty_version,
            &format!("{} files", outcome.manifest.files.len()),
        );
        Ok(outcome)
    }

    /// Undo the tracked install of `pkg`, then drop its archive and install path.
    pub fn remove(&self, pkg: &ResolvablePackage) -> Result<RemovalOutcome, InstallError> {
        self.reporter.section(&format!("Removing {pkg}"));
        self.reporter.removing(&pkg.name, &pkg.pretty_version);
        let install_path = self.install_path(pkg);

        let outcome = self.tracker.remove(&install_path)?;
        for warning in &outcome.warnings {
            self.reporter.warning(&warning.to_string());
        }

        let file_name = pkg.archive_file_name();
        if !file_name.is_empty() {
            remove_if_exists(&install_path.join(file_name))?;
        }
        if let Err(e) = std::fs::remove_dir(&install_path) {
            debug!(path = %install_path.display(), "keeping install path: {e}");
        }

        self.reporter.done(
            &pkg.name,
            &pkg.pretty_version,
            &format!("removed {} files", outcome.removed_files.len()),
        );
        Ok(outcome)
    }
}

/// `scheme://host[:port]` of `url`, or `url` itself when it has no scheme.
fn origin_of(url: &str) -> &str {
    let Some(scheme_end) = url.find("://") else {
        return url;
    };
    let rest = &url[scheme_end + 3..];
    match rest.find('/') {
        Some(i) => &url[..scheme_end + 3 + i],
        None => url,
    }
}

fn remove_if_exists(path: &Path) -> Result<(), InstallError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(InstallError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
        _ => Ok(()),
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> InstallError {
    let path = path.to_path_buf();
    move |source| InstallError::Io { path, source }
}
