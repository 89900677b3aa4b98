//! Package archive access.
//!
//! Connect archives are small gzip-compressed tarballs. They are read fully
//! into memory so the descriptor walk can look entries up by path in any
//! order. Archives the tar reader rejects get one repair attempt: the
//! system `tar` unpacks whatever it can into a scratch directory and the
//! result is packed into a fresh `.tgz` over the original.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to read archive {path}: {source}")]
    Unreadable { path: PathBuf, source: io::Error },

    #[error("Failed to repair archive {path}: {reason}")]
    RepairFailed { path: PathBuf, reason: String },
}

/// Regular-file entries of an archive, keyed by their normalized path.
#[derive(Debug)]
pub struct PackageArchive {
    path: PathBuf,
    files: HashMap<String, Vec<u8>>,
}

impl PackageArchive {
    /// Read a gzip-compressed (or plain) tar archive.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        Self::read(path).map_err(|source| ArchiveError::Unreadable {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Open `path`, repairing it in place when the tar reader rejects it.
    ///
    /// Returns the archive and whether a repair was needed.
    pub fn open_or_repair(path: &Path) -> Result<(Self, bool), ArchiveError> {
        match Self::open(path) {
            Ok(archive) => Ok((archive, false)),
            Err(e) => {
                warn!(archive = %path.display(), "invalid archive, trying to repair: {e}");
                repair(path)?;
                let archive = Self::open(path).map_err(|e| ArchiveError::RepairFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
                Ok((archive, true))
            }
        }
    }

    fn read(path: &Path) -> io::Result<Self> {
        let mut magic = [0u8; 2];
        let is_gzip = {
            let mut file = File::open(path)?;
            file.read(&mut magic)? == 2 && magic == GZIP_MAGIC
        };

        let reader = BufReader::new(File::open(path)?);
        let files = if is_gzip {
            read_entries(GzDecoder::new(reader))?
        } else {
            read_entries(reader)?
        };

        debug!(archive = %path.display(), entries = files.len(), "archive opened");
        Ok(Self {
            path: path.to_path_buf(),
            files,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Content of the regular file at `name`, if any.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(normalize_entry_path(name)).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(normalize_entry_path(name))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn read_entries<R: Read>(reader: R) -> io::Result<HashMap<String, Vec<u8>>> {
    let mut archive = tar::Archive::new(reader);
    let mut files = HashMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry.path()?.to_string_lossy().replace('\\', "/");
        let name = normalize_entry_path(&name).to_string();
        if name.is_empty() {
            continue;
        }

        let mut content = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry.read_to_end(&mut content)?;
        files.insert(name, content);
    }

    Ok(files)
}

fn normalize_entry_path(name: &str) -> &str {
    let mut name = name;
    while let Some(rest) = name.strip_prefix("./") {
        name = rest;
    }
    name
}

/// Unpack `path` with the system `tar` and re-pack it as a fresh `.tgz` in place.
pub fn repair(path: &Path) -> Result<(), ArchiveError> {
    let failed = |reason: String| ArchiveError::RepairFailed {
        path: path.to_path_buf(),
        reason,
    };

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let scratch = tempfile::Builder::new()
        .prefix(".repair-")
        .tempdir_in(parent)
        .map_err(|e| failed(format!("scratch directory: {e}")))?;

    // `-x` without a compression flag lets GNU and BSD tar detect it.
    let output = Command::new("tar")
        .arg("-xf")
        .arg(path)
        .arg("-C")
        .arg(scratch.path())
        .output()
        .map_err(|e| failed(format!("could not run tar: {e}")))?;

    if !output.status.success() {
        return Err(failed(format!(
            "tar exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let repacked = tempfile::Builder::new()
        .prefix(".repack-")
        .suffix(".tgz")
        .tempfile_in(parent)
        .map_err(|e| failed(e.to_string()))?;

    {
        let encoder = GzEncoder::new(repacked.as_file(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for entry in WalkDir::new(scratch.path()).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| failed(format!("repack: {e}")))?;
            let Ok(name) = entry.path().strip_prefix(scratch.path()) else {
                continue;
            };
            let appended = if entry.file_type().is_dir() {
                builder.append_dir(name, entry.path())
            } else if entry.file_type().is_file() {
                builder.append_path_with_name(entry.path(), name)
            } else {
                continue;
            };
            appended.map_err(|e| failed(format!("repack {}: {e}", name.display())))?;
        }
        builder
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(|e| failed(format!("repack: {e}")))?;
    }

    repacked
        .persist(path)
        .map_err(|e| failed(format!("replace original: {}", e.error)))?;

    debug!(archive = %path.display(), "archive repaired");
    Ok(())
}
