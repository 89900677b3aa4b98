use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use connect_core::installer::InstallError;
use connect_core::io::{ExtractError, HttpFetcher, InstallWarning};
use connect_core::tracker::RemovalWarning;
use connect_core::{Config, ConnectRepository, NullReporter, PackageInstaller, ResolvablePackage};
use flate2::Compression;
use flate2::write::GzEncoder;
use mockito::{Server, ServerGuard};
use tempfile::TempDir;

const RELEASES: &str = "<releases><r><v>1.0.0</v><s>stable</s></r></releases>";

const DESCRIPTOR: &str = r#"<?xml version="1.0"?>
<package>
    <name>Foo_Bar</name>
    <summary>Foo bar module</summary>
    <contents>
        <target name="magelocal">
            <dir name="Foo">
                <dir name="Bar">
                    <file name="Model.php" hash="x"/>
                    <file name="Helper.php" hash="y"/>
                </dir>
            </dir>
        </target>
        <target name="mageetc">
            <dir name="modules">
                <file name="Foo_Bar.xml" hash="z"/>
            </dir>
        </target>
    </contents>
</package>"#;

/// A project root plus a mock channel serving one package, `Foo_Bar 1.0.0`.
struct TestContext {
    _temp_dir: TempDir,
    root: PathBuf,
    server: ServerGuard,
}

impl TestContext {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let root = temp_dir.path().join("project");
        fs::create_dir_all(&root).expect("failed to create project root");

        let mut server = Server::new_async().await;
        server
            .mock("GET", "/packages.xml")
            .with_body("<data><p><n>Foo_Bar</n></p></data>")
            .create_async()
            .await;
        server
            .mock("GET", "/Foo_Bar/releases.xml")
            .with_body(RELEASES)
            .create_async()
            .await;
        server
            .mock("GET", "/Foo_Bar/1.0.0/package.xml")
            .with_body(DESCRIPTOR)
            .create_async()
            .await;

        Self {
            _temp_dir: temp_dir,
            root,
            server,
        }
    }

    async fn serve_archive(&mut self, entries: &[(&str, &str)]) {
        self.server
            .mock("GET", "/Foo_Bar/1.0.0/Foo_Bar-1.0.0.tgz")
            .with_body(archive(entries))
            .create_async()
            .await;
    }

    fn config(&self) -> Config {
        Config::parse(&format!(
            r#"
[channel]
url = "{}"
vendor_alias = "mage-community"

[install]
root_dir = "{}"
"#,
            self.server.url(),
            self.root.display()
        ))
        .expect("valid config")
    }

    fn installer(&self) -> PackageInstaller<NullReporter> {
        PackageInstaller::new(&self.config().install, Arc::new(HttpFetcher::new()), NullReporter)
            .expect("installer")
    }

    async fn package(&self) -> Arc<ResolvablePackage> {
        let repo = ConnectRepository::from_config(&self.config().channel, Arc::new(HttpFetcher::new()))
            .expect("repository");
        repo.find_package("mage-community/foo_bar", "1.0.0")
            .await
            .expect("channel readable")
            .expect("package listed")
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .expect("append entry");
    }
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .expect("finish archive")
}

fn full_archive() -> Vec<(&'static str, &'static str)> {
    vec![
        ("package.xml", DESCRIPTOR),
        ("Foo/Bar/Model.php", "<?php class Model {}"),
        ("Foo/Bar/Helper.php", "<?php class Helper {}"),
        ("modules/Foo_Bar.xml", "<config/>"),
    ]
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("readable file")
}

#[tokio::test]
async fn test_install_then_remove_leaves_root_clean() {
    let mut ctx = TestContext::new().await;
    ctx.serve_archive(&full_archive()).await;
    let installer = ctx.installer();
    let pkg = ctx.package().await;

    assert_eq!(pkg.pretty_version, "1.0.0");
    assert_eq!(pkg.description.as_deref(), Some("Foo bar module"));

    let outcome = installer.install(&pkg).await.expect("install");
    assert!(outcome.warnings.is_empty());
    assert_eq!(read(&ctx.path("app/code/local/Foo/Bar/Model.php")), "<?php class Model {}");
    assert_eq!(read(&ctx.path("app/etc/modules/Foo_Bar.xml")), "<config/>");
    assert_eq!(outcome.manifest.files.len(), 3);
    assert_eq!(
        outcome.manifest.dirs.last().map(String::as_str),
        Some("app"),
        "directories are tracked newest first"
    );

    let install_path = installer.install_path(&pkg);
    assert!(install_path.join("Foo_Bar-1.0.0.tgz").is_file());
    assert!(install_path.join("install.info").is_file());

    let removal = installer.remove(&pkg).expect("remove");
    assert_eq!(removal.removed_files.len(), 3);
    assert!(removal.warnings.is_empty());
    assert!(!ctx.path("app").exists());
    assert!(!install_path.exists());

    // nothing tracked anymore
    let again = installer.remove(&pkg).expect("second remove");
    assert!(again.removed_files.is_empty());
    assert!(again.removed_dirs.is_empty());
}

#[tokio::test]
async fn test_existing_file_is_neither_replaced_nor_tracked() {
    let mut ctx = TestContext::new().await;
    ctx.serve_archive(&full_archive()).await;
    fs::create_dir_all(ctx.path("app/etc/modules")).expect("create dirs");
    fs::write(ctx.path("app/etc/modules/Foo_Bar.xml"), "<local/>").expect("write");

    let installer = ctx.installer();
    let pkg = ctx.package().await;
    let outcome = installer.install(&pkg).await.expect("install");

    assert_eq!(
        outcome.warnings,
        vec![InstallWarning::DestinationConflict {
            path: "app/etc/modules/Foo_Bar.xml".to_string()
        }]
    );
    assert_eq!(read(&ctx.path("app/etc/modules/Foo_Bar.xml")), "<local/>");
    assert!(!outcome.manifest.files.contains_key("app/etc/modules/Foo_Bar.xml"));
    assert!(!outcome.manifest.dirs.iter().any(|d| d.starts_with("app/etc")));

    installer.remove(&pkg).expect("remove");
    assert_eq!(read(&ctx.path("app/etc/modules/Foo_Bar.xml")), "<local/>");
    assert!(!ctx.path("app/code").exists());
}

#[tokio::test]
async fn test_archive_without_descriptor_is_rejected() {
    let mut ctx = TestContext::new().await;
    ctx.serve_archive(&[("Foo/Bar/Model.php", "<?php")]).await;
    let installer = ctx.installer();
    let pkg = ctx.package().await;

    let err = installer.install(&pkg).await.expect_err("missing package.xml");

    assert!(matches!(
        err,
        InstallError::Extract(ExtractError::MissingManifest { .. })
    ));
    assert!(!ctx.path("app").exists());
}

#[tokio::test]
async fn test_modified_file_survives_removal() {
    let mut ctx = TestContext::new().await;
    ctx.serve_archive(&full_archive()).await;
    let installer = ctx.installer();
    let pkg = ctx.package().await;
    installer.install(&pkg).await.expect("install");

    let edited = ctx.path("app/code/local/Foo/Bar/Helper.php");
    fs::write(&edited, "<?php // patched").expect("edit");

    let removal = installer.remove(&pkg).expect("remove");

    assert_eq!(
        removal.warnings,
        vec![RemovalWarning::ChecksumMismatch {
            path: "app/code/local/Foo/Bar/Helper.php".to_string()
        }]
    );
    assert_eq!(read(&edited), "<?php // patched");
    assert!(!ctx.path("app/code/local/Foo/Bar/Model.php").exists());
    assert!(!ctx.path("app/etc").exists());
    // the directory chain holding the edited file stays
    assert!(ctx.path("app/code/local/Foo/Bar").is_dir());
}

#[tokio::test]
async fn test_unknown_target_lands_in_fallback_directory() {
    let mut ctx = TestContext::new().await;
    ctx.serve_archive(&[
        (
            "package.xml",
            r#"<package><contents><target name="mageodd"><file name="odd.txt" hash=""/></target></contents></package>"#,
        ),
        ("odd.txt", "odd"),
    ])
    .await;
    let installer = ctx.installer();
    let pkg = ctx.package().await;

    let outcome = installer.install(&pkg).await.expect("install");

    assert_eq!(read(&ctx.path("unknown_pkg_content/odd.txt")), "odd");
    assert!(outcome.manifest.files.contains_key("unknown_pkg_content/odd.txt"));
}
