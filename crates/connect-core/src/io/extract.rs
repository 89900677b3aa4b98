//! Routed extraction of connect packages.
//!
//! A connect archive does not mirror the project layout. Its `package.xml`
//! lists the shipped files as trees under target categories (`magelocal`,
//! `mageetc`, ...) and each category is routed to a directory below the
//! project root. Extraction walks those trees, writes every file to its
//! routed destination and records what it created so the install can be
//! undone later without touching anything that was already there.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use connect_schema::descriptor::Node;
use connect_schema::manifest::MANIFEST_FILE_NAME;
use connect_schema::{DocumentError, InstallManifest, PackageDescriptor, Sha256Hash};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::archive::{ArchiveError, PackageArchive};

/// Name of the descriptor inside every archive.
pub const PACKAGE_DESCRIPTOR: &str = "package.xml";

/// Destination of target categories without a route.
pub const UNKNOWN_TARGET_DIR: &str = "unknown_pkg_content/";

const DEFAULT_ROUTES: &[(&str, &str)] = &[
    ("magelocal", "app/code/local/"),
    ("magecommunity", "app/code/community/"),
    ("magecore", "app/code/core/"),
    ("magedesign", "app/design/"),
    ("mageetc", "app/etc/"),
    ("magelib", "lib/"),
    ("magelocale", "app/locale/"),
    ("magemedia", "media/"),
    ("mageskin", "skin/"),
    ("mageweb", ""),
    ("magetest", "tests/"),
    ("mage", ""),
];

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Invalid connect package {path}: could not find package.xml")]
    MissingManifest { path: PathBuf },

    #[error("Invalid connect package {path}: could not load package.xml: {source}")]
    MalformedManifest {
        path: PathBuf,
        source: DocumentError,
    },

    #[error("Failed to repair archive {path}: {reason}")]
    RepairFailed { path: PathBuf, reason: String },

    #[error("Invalid source directory: {path}")]
    InvalidSource { path: PathBuf },

    #[error("IO error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl From<ArchiveError> for ExtractError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Unreadable { path, source } => Self::RepairFailed {
                path,
                reason: source.to_string(),
            },
            ArchiveError::RepairFailed { path, reason } => Self::RepairFailed { path, reason },
        }
    }
}

/// A hard error, together with everything created before it happened.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ExtractFailure {
    #[source]
    pub error: ExtractError,
    pub partial: InstallManifest,
}

impl From<ExtractError> for ExtractFailure {
    fn from(error: ExtractError) -> Self {
        Self {
            error,
            partial: InstallManifest::default(),
        }
    }
}

/// Per-file problems that do not stop the install.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallWarning {
    #[error("Cannot install package file (file exists): {path}")]
    DestinationConflict { path: String },

    #[error("Failed to extract package file: {path}")]
    MissingEntry { path: String },

    #[error("Refusing to install outside the root directory: {path}")]
    UnsafePath { path: String },
}

/// Target category to directory mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    routes: BTreeMap<String, String>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::empty().with_routes(
            DEFAULT_ROUTES
                .iter()
                .map(|(category, dir)| ((*category).to_string(), (*dir).to_string())),
        )
    }
}

impl RoutingTable {
    /// A table that routes everything to [`UNKNOWN_TARGET_DIR`].
    pub fn empty() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    pub fn with_route(mut self, category: impl Into<String>, dir: impl AsRef<str>) -> Self {
        self.routes
            .insert(category.into(), normalize_route(dir.as_ref()));
        self
    }

    pub fn with_routes(self, routes: impl IntoIterator<Item = (String, String)>) -> Self {
        routes
            .into_iter()
            .fold(self, |table, (category, dir)| table.with_route(category, dir))
    }

    /// Directory (relative to the root, `/`-terminated or empty) for `category`.
    pub fn route(&self, category: &str) -> &str {
        self.routes
            .get(category)
            .map_or(UNKNOWN_TARGET_DIR, String::as_str)
    }
}

fn normalize_route(dir: &str) -> String {
    let dir = dir.trim().replace('\\', "/");
    let dir = dir.trim_start_matches("./").trim_matches('/');
    if dir.is_empty() {
        String::new()
    } else {
        format!("{dir}/")
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Project root every route is relative to.
    pub root_dir: PathBuf,
    /// Replace files that already exist. Replaced files are not tracked.
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractOutcome {
    pub manifest: InstallManifest,
    pub warnings: Vec<InstallWarning>,
    /// The archive had to be repaired before it could be read.
    pub repaired: bool,
}

/// Accumulates what one install created.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    dirs: Vec<String>,
    files: BTreeMap<String, Sha256Hash>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dir(&mut self, path: impl Into<String>) {
        self.dirs.push(path.into());
    }

    pub fn record_file(&mut self, path: impl Into<String>, digest: Sha256Hash) {
        self.files.insert(path.into(), digest);
    }

    /// The manifest, directories newest first.
    pub fn finish(self) -> InstallManifest {
        let mut dirs = self.dirs;
        dirs.reverse();
        InstallManifest {
            dirs,
            files: self.files,
        }
    }
}

/// Extract the package at `archive_path` into `options.root_dir`.
pub fn extract(
    archive_path: &Path,
    routing: &RoutingTable,
    options: &ExtractOptions,
) -> Result<ExtractOutcome, ExtractFailure> {
    let (archive, repaired) =
        PackageArchive::open_or_repair(archive_path).map_err(ExtractError::from)?;

    let xml = archive
        .get(PACKAGE_DESCRIPTOR)
        .ok_or_else(|| ExtractError::MissingManifest {
            path: archive_path.to_path_buf(),
        })?;
    let descriptor =
        PackageDescriptor::from_xml(xml).map_err(|source| ExtractError::MalformedManifest {
            path: archive_path.to_path_buf(),
            source,
        })?;

    let mut placer = Placer::new(&options.root_dir, options.overwrite)?;
    for target in descriptor.targets() {
        let base = routing.route(&target.name);
        debug!(category = %target.name, base, "extracting target");

        if let Err(error) = placer.walk(&archive, base, &target.nodes, "") {
            return Err(placer.fail(error));
        }
    }

    Ok(placer.finish(repaired))
}

/// Copy a plain directory tree into `options.root_dir` 1:1, with the same
/// overwrite and tracking rules as archive extraction.
pub fn install_directory(
    source: &Path,
    options: &ExtractOptions,
) -> Result<ExtractOutcome, ExtractFailure> {
    if !source.is_dir() {
        return Err(ExtractError::InvalidSource {
            path: source.to_path_buf(),
        }
        .into());
    }

    let mut placer = Placer::new(&options.root_dir, options.overwrite)?;
    if let Err(error) = placer.copy_tree(source) {
        return Err(placer.fail(error));
    }

    Ok(placer.finish(false))
}

/// Writes files below the root and tracks what it created.
struct Placer<'a> {
    root: &'a Path,
    overwrite: bool,
    manifest: ManifestBuilder,
    warnings: Vec<InstallWarning>,
}

impl<'a> Placer<'a> {
    fn new(root: &'a Path, overwrite: bool) -> Result<Self, ExtractError> {
        fs::create_dir_all(root).map_err(|source| ExtractError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        Ok(Self {
            root,
            overwrite,
            manifest: ManifestBuilder::new(),
            warnings: Vec::new(),
        })
    }

    fn walk(
        &mut self,
        archive: &PackageArchive,
        base: &str,
        nodes: &[Node],
        dir: &str,
    ) -> Result<(), ExtractError> {
        let dirs = nodes.iter().filter_map(|node| match node {
            Node::Dir(d) => Some(d),
            Node::File(_) => None,
        });
        for node in dirs {
            let name = node.name.trim();
            let path = if name.is_empty() {
                dir.to_string()
            } else {
                format!("{dir}{name}/")
            };

            let target_path = format!("{base}{path}");
            if !is_safe_relative(&target_path) {
                self.warn(InstallWarning::UnsafePath { path: target_path });
                continue;
            }

            self.ensure_dir(&target_path)?;
            self.walk(archive, base, &node.nodes, &path)?;
        }

        let files = nodes.iter().filter_map(|node| match node {
            Node::File(f) => Some(f),
            Node::Dir(_) => None,
        });
        for node in files {
            let name = node.name.trim();
            if name.is_empty() {
                continue;
            }

            let path = format!("{dir}{name}");
            let target_path = format!("{base}{path}");
            if !is_safe_relative(&target_path) {
                self.warn(InstallWarning::UnsafePath { path: target_path });
                continue;
            }

            let Some(content) = archive.get(&path).or_else(|| archive.get(&target_path)) else {
                self.warn(InstallWarning::MissingEntry { path });
                continue;
            };

            self.place_file(&target_path, content)?;
        }

        Ok(())
    }

    fn copy_tree(&mut self, source: &Path) -> Result<(), ExtractError> {
        for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| ExtractError::Io {
                path: source.to_path_buf(),
                source: e.into(),
            })?;
            let Ok(relative) = entry.path().strip_prefix(source) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");

            if entry.file_type().is_dir() {
                self.ensure_dir(&relative)?;
            } else if entry.file_type().is_file() {
                if entry.file_name() == MANIFEST_FILE_NAME {
                    continue;
                }
                let content = fs::read(entry.path()).map_err(|source| ExtractError::Io {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
                self.place_file(&relative, &content)?;
            }
        }

        Ok(())
    }

    /// Create `relative` and any missing ancestor, recording each one created.
    fn ensure_dir(&mut self, relative: &str) -> Result<(), ExtractError> {
        let mut current = String::new();

        for part in relative.split('/').filter(|p| !p.is_empty() && *p != ".") {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);

            let path = self.root.join(&current);
            if path.is_dir() {
                continue;
            }

            fs::create_dir(&path).map_err(|source| ExtractError::Io {
                path: path.clone(),
                source,
            })?;
            self.manifest.record_dir(current.clone());
        }

        Ok(())
    }

    fn place_file(&mut self, relative: &str, content: &[u8]) -> Result<(), ExtractError> {
        let dest = self.root.join(relative);
        let existed = dest.exists();

        if existed && !self.overwrite {
            self.warn(InstallWarning::DestinationConflict {
                path: relative.to_string(),
            });
            return Ok(());
        }

        if let Some((parent, _)) = relative.rsplit_once('/') {
            self.ensure_dir(parent)?;
        }

        fs::write(&dest, content).map_err(|source| ExtractError::Io {
            path: dest.clone(),
            source,
        })?;

        if !existed {
            self.manifest
                .record_file(relative, Sha256Hash::compute(content));
        }

        Ok(())
    }

    fn warn(&mut self, warning: InstallWarning) {
        warn!("{warning}");
        self.warnings.push(warning);
    }

    fn fail(self, error: ExtractError) -> ExtractFailure {
        ExtractFailure {
            error,
            partial: self.manifest.finish(),
        }
    }

    fn finish(self, repaired: bool) -> ExtractOutcome {
        ExtractOutcome {
            manifest: self.manifest.finish(),
            warnings: self.warnings,
            repaired,
        }
    }
}

pub(crate) fn is_safe_relative(path: &str) -> bool {
    !path.contains('\\')
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::{TempDir, tempdir};

    const DESCRIPTOR: &str = r#"<?xml version="1.0"?>
<package>
    <name>Foo_Bar</name>
    <contents>
        <target name="magelocal">
            <dir name="Foo">
                <dir name="Bar">
                    <file name="Model.php" hash="x"/>
                </dir>
            </dir>
        </target>
        <target name="mageetc">
            <dir name="modules">
                <file name="Foo_Bar.xml" hash="y"/>
            </dir>
        </target>
    </contents>
</package>"#;

    fn write_archive(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("Foo_Bar-1.0.0.tgz");
        let file = fs::File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    fn sandbox() -> (TempDir, PathBuf, ExtractOptions) {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("root");
        let options = ExtractOptions {
            root_dir: root.clone(),
            overwrite: false,
        };
        (tmp, root, options)
    }

    fn standard_archive(dir: &Path) -> PathBuf {
        write_archive(
            dir,
            &[
                ("package.xml", DESCRIPTOR),
                ("Foo/Bar/Model.php", "<?php // model"),
                // only present under its routed path
                ("app/etc/modules/Foo_Bar.xml", "<config/>"),
            ],
        )
    }

    #[test]
    fn test_extract_routes_and_tracks() {
        let (tmp, root, options) = sandbox();
        let archive = standard_archive(tmp.path());

        let outcome = extract(&archive, &RoutingTable::default(), &options).unwrap();

        assert!(outcome.warnings.is_empty());
        assert!(!outcome.repaired);
        assert_eq!(
            fs::read_to_string(root.join("app/code/local/Foo/Bar/Model.php")).unwrap(),
            "<?php // model"
        );
        assert!(root.join("app/etc/modules/Foo_Bar.xml").is_file());

        assert_eq!(
            outcome.manifest.dirs,
            vec![
                "app/etc/modules",
                "app/etc",
                "app/code/local/Foo/Bar",
                "app/code/local/Foo",
                "app/code/local",
                "app/code",
                "app",
            ]
        );
        assert_eq!(
            outcome.manifest.files["app/code/local/Foo/Bar/Model.php"],
            Sha256Hash::compute(b"<?php // model")
        );
        assert_eq!(outcome.manifest.files.len(), 2);
    }

    #[test]
    fn test_preexisting_dirs_are_not_recorded() {
        let (tmp, root, options) = sandbox();
        fs::create_dir_all(root.join("app/code/local")).unwrap();
        let archive = standard_archive(tmp.path());

        let outcome = extract(&archive, &RoutingTable::default(), &options).unwrap();

        assert!(!outcome.manifest.dirs.contains(&"app".to_string()));
        assert!(!outcome.manifest.dirs.contains(&"app/code/local".to_string()));
        assert!(outcome.manifest.dirs.contains(&"app/code/local/Foo".to_string()));
        assert!(outcome.manifest.dirs.contains(&"app/etc".to_string()));
    }

    #[test]
    fn test_existing_file_is_kept_without_overwrite() {
        let (tmp, root, options) = sandbox();
        let existing = root.join("app/code/local/Foo/Bar/Model.php");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, "mine").unwrap();
        let archive = standard_archive(tmp.path());

        let outcome = extract(&archive, &RoutingTable::default(), &options).unwrap();

        assert_eq!(fs::read_to_string(&existing).unwrap(), "mine");
        assert_eq!(
            outcome.warnings,
            vec![InstallWarning::DestinationConflict {
                path: "app/code/local/Foo/Bar/Model.php".to_string()
            }]
        );
        assert!(!outcome
            .manifest
            .files
            .contains_key("app/code/local/Foo/Bar/Model.php"));
        assert!(outcome.manifest.files.contains_key("app/etc/modules/Foo_Bar.xml"));
    }

    #[test]
    fn test_overwrite_replaces_but_does_not_track() {
        let (tmp, root, mut options) = sandbox();
        options.overwrite = true;
        let existing = root.join("app/code/local/Foo/Bar/Model.php");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, "mine").unwrap();
        let archive = standard_archive(tmp.path());

        let outcome = extract(&archive, &RoutingTable::default(), &options).unwrap();

        assert_eq!(fs::read_to_string(&existing).unwrap(), "<?php // model");
        assert!(outcome.warnings.is_empty());
        assert!(!outcome
            .manifest
            .files
            .contains_key("app/code/local/Foo/Bar/Model.php"));
    }

    #[test]
    fn test_missing_descriptor() {
        let (tmp, _root, options) = sandbox();
        let archive = write_archive(tmp.path(), &[("Foo/Bar/Model.php", "<?php")]);

        let failure = extract(&archive, &RoutingTable::default(), &options).unwrap_err();
        assert!(matches!(failure.error, ExtractError::MissingManifest { .. }));
        assert!(failure.partial.is_empty());
    }

    #[test]
    fn test_malformed_descriptor() {
        let (tmp, _root, options) = sandbox();
        let archive = write_archive(tmp.path(), &[("package.xml", "<package><contents>")]);

        let failure = extract(&archive, &RoutingTable::default(), &options).unwrap_err();
        assert!(matches!(failure.error, ExtractError::MalformedManifest { .. }));
    }

    #[test]
    fn test_missing_entry_and_unknown_target() {
        let (tmp, root, options) = sandbox();
        let descriptor = r#"<package><contents>
            <target name="magelocal"><file name="Gone.php"/><file name=""/></target>
            <target name="weird"><file name="readme.txt"/></target>
        </contents></package>"#;
        let archive = write_archive(
            tmp.path(),
            &[("package.xml", descriptor), ("readme.txt", "hi")],
        );

        let outcome = extract(&archive, &RoutingTable::default(), &options).unwrap();

        assert_eq!(
            outcome.warnings,
            vec![InstallWarning::MissingEntry {
                path: "Gone.php".to_string()
            }]
        );
        assert!(root.join("unknown_pkg_content/readme.txt").is_file());
        assert_eq!(outcome.manifest.dirs, vec!["unknown_pkg_content"]);
    }

    #[test]
    fn test_unsafe_paths_are_rejected() {
        let (tmp, root, options) = sandbox();
        let descriptor = r#"<package><contents>
            <target name="mageweb">
                <dir name=".."><file name="evil.php"/></dir>
                <file name="../escape.php"/>
                <file name="ok.php"/>
            </target>
        </contents></package>"#;
        let archive = write_archive(
            tmp.path(),
            &[
                ("package.xml", descriptor),
                ("ok.php", "ok"),
                ("evil.php", "evil"),
            ],
        );

        let outcome = extract(&archive, &RoutingTable::default(), &options).unwrap();

        assert_eq!(outcome.warnings.len(), 2);
        assert!(outcome
            .warnings
            .iter()
            .all(|w| matches!(w, InstallWarning::UnsafePath { .. })));
        assert!(root.join("ok.php").is_file());
        assert!(!tmp.path().join("escape.php").exists());
        assert!(!tmp.path().join("evil.php").exists());
    }

    #[test]
    fn test_hard_error_returns_partial_manifest() {
        let (tmp, root, options) = sandbox();
        // a file where the magelocal tree needs a directory
        fs::create_dir_all(root.join("app/code/local")).unwrap();
        fs::write(root.join("app/code/local/Foo"), "blocker").unwrap();

        let descriptor = r#"<package><contents>
            <target name="mageetc"><dir name="modules"><file name="Foo_Bar.xml"/></dir></target>
            <target name="magelocal"><dir name="Foo"><file name="x.php"/></dir></target>
        </contents></package>"#;
        let archive = write_archive(
            tmp.path(),
            &[
                ("package.xml", descriptor),
                ("modules/Foo_Bar.xml", "<config/>"),
                ("Foo/x.php", "<?php"),
            ],
        );

        let failure = extract(&archive, &RoutingTable::default(), &options).unwrap_err();
        assert!(matches!(failure.error, ExtractError::Io { .. }));
        assert!(failure.partial.files.contains_key("app/etc/modules/Foo_Bar.xml"));
        assert_eq!(failure.partial.dirs, vec!["app/etc/modules", "app/etc"]);
    }

    #[test]
    fn test_install_directory() {
        let (tmp, root, options) = sandbox();
        let source = tmp.path().join("src");
        fs::create_dir_all(source.join("app/code/local/Foo")).unwrap();
        fs::write(source.join("app/code/local/Foo/a.php"), "a").unwrap();
        fs::write(source.join(MANIFEST_FILE_NAME), "{}").unwrap();
        fs::create_dir_all(root.join("app")).unwrap();

        let outcome = install_directory(&source, &options).unwrap();

        assert!(root.join("app/code/local/Foo/a.php").is_file());
        assert!(!root.join(MANIFEST_FILE_NAME).exists());
        assert_eq!(
            outcome.manifest.dirs,
            vec!["app/code/local/Foo", "app/code/local", "app/code"]
        );
        assert_eq!(
            outcome.manifest.files.keys().collect::<Vec<_>>(),
            vec!["app/code/local/Foo/a.php"]
        );
    }

    #[test]
    fn test_install_directory_requires_directory() {
        let (tmp, _root, options) = sandbox();
        let failure = install_directory(&tmp.path().join("nope"), &options).unwrap_err();
        assert!(matches!(failure.error, ExtractError::InvalidSource { .. }));
    }

    #[test]
    fn test_routing_table() {
        let table = RoutingTable::default().with_route("magelocal", "./src/local");
        assert_eq!(table.route("magelocal"), "src/local/");
        assert_eq!(table.route("mageweb"), "");
        assert_eq!(table.route("mage"), "");
        assert_eq!(table.route("magecommunity"), "app/code/community/");
        assert_eq!(table.route("nope"), UNKNOWN_TARGET_DIR);
        assert_eq!(RoutingTable::empty().route("magelocal"), UNKNOWN_TARGET_DIR);
    }
}
