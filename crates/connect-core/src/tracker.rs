//! Install tracking: the `install.info` side-car next to each package and
//! the removal it drives.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use connect_schema::manifest::MANIFEST_FILE_NAME;
use connect_schema::{InstallManifest, Sha256Hash};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::io::extract::is_safe_relative;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Failed to serialize install manifest: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Per-entry problems that do not stop a removal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemovalWarning {
    #[error("Keeping modified file: {path}")]
    ChecksumMismatch { path: String },

    #[error("Ignoring tracked path outside the root directory: {path}")]
    UnsafePath { path: String },

    #[error("Failed to remove {path}: {reason}")]
    RemoveFailed { path: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalOutcome {
    pub removed_files: Vec<String>,
    pub removed_dirs: Vec<String>,
    pub warnings: Vec<RemovalWarning>,
}

/// Reads and writes install manifests for packages installed under `root_dir`.
#[derive(Debug, Clone)]
pub struct InstallTracker {
    root_dir: PathBuf,
}

impl InstallTracker {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn manifest_path(install_path: &Path) -> PathBuf {
        install_path.join(MANIFEST_FILE_NAME)
    }

    /// Atomically persist `manifest` as the package's side-car.
    pub fn record(&self, install_path: &Path, manifest: &InstallManifest) -> Result<(), TrackerError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TrackerError::Io { path, source }
        };

        fs::create_dir_all(install_path).map_err(io_err(install_path))?;

        let content = manifest.to_json()?;
        let path = Self::manifest_path(install_path);
        let temp_path = path.with_extension("info.tmp");
        fs::write(&temp_path, content).map_err(io_err(&temp_path))?;
        fs::rename(&temp_path, &path).map_err(io_err(&path))?;

        debug!(
            path = %path.display(),
            files = manifest.files.len(),
            dirs = manifest.dirs.len(),
            "install manifest written"
        );
        Ok(())
    }

    /// The recorded manifest; empty when absent or unreadable.
    pub fn load(&self, install_path: &Path) -> InstallManifest {
        let path = Self::manifest_path(install_path);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return InstallManifest::default(),
            Err(e) => {
                warn!(path = %path.display(), "cannot read install manifest: {e}");
                return InstallManifest::default();
            }
        };

        InstallManifest::from_json(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring corrupt install manifest: {e}");
            InstallManifest::default()
        })
    }

    /// Remove what the recorded install created.
    ///
    /// Files whose content changed since the install are kept, directories
    /// are only removed once empty. The side-car is deleted last, so a second
    /// call finds nothing to do.
    pub fn remove(&self, install_path: &Path) -> Result<RemovalOutcome, TrackerError> {
        let manifest = self.load(install_path);
        let mut outcome = RemovalOutcome::default();

        for (file, recorded) in &manifest.files {
            if !is_safe_relative(file) {
                push_warning(&mut outcome, RemovalWarning::UnsafePath { path: file.clone() });
                continue;
            }

            let path = self.root_dir.join(file);
            match fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => {}
                Err(_) => continue,
            }

            match Sha256Hash::compute_file(&path) {
                Ok(actual) if actual == *recorded => {}
                Ok(_) => {
                    push_warning(
                        &mut outcome,
                        RemovalWarning::ChecksumMismatch { path: file.clone() },
                    );
                    continue;
                }
                Err(e) => {
                    push_warning(
                        &mut outcome,
                        RemovalWarning::RemoveFailed {
                            path: file.clone(),
                            reason: e.to_string(),
                        },
                    );
                    continue;
                }
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(file, "removed file");
                    outcome.removed_files.push(file.clone());
                }
                Err(e) => push_warning(
                    &mut outcome,
                    RemovalWarning::RemoveFailed {
                        path: file.clone(),
                        reason: e.to_string(),
                    },
                ),
            }
        }

        for dir in &manifest.dirs {
            if !is_safe_relative(dir) {
                push_warning(&mut outcome, RemovalWarning::UnsafePath { path: dir.clone() });
                continue;
            }

            // Non-recursive: directories that still hold foreign files stay.
            match fs::remove_dir(self.root_dir.join(dir)) {
                Ok(()) => outcome.removed_dirs.push(dir.clone()),
                Err(e) => debug!(dir, "keeping directory: {e}"),
            }
        }

        let side_car = Self::manifest_path(install_path);
        match fs::remove_file(&side_car) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(TrackerError::Io {
                    path: side_car,
                    source: e,
                });
            }
            _ => {}
        }

        info!(
            install_path = %install_path.display(),
            files = outcome.removed_files.len(),
            dirs = outcome.removed_dirs.len(),
            kept = outcome.warnings.len(),
            "package files removed"
        );
        Ok(outcome)
    }
}

fn push_warning(outcome: &mut RemovalOutcome, warning: RemovalWarning) {
    warn!("{warning}");
    outcome.warnings.push(warning);
}
