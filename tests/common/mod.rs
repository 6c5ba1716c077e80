// tests/common/mod.rs

//! Shared fixtures for integration tests: real tarballs served over
//! `file://` (or a mock HTTP server) and formulas pointing at them.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use pantry::hash::{hash_bytes, HashAlgorithm};
use pantry::{DependencyProbe, InstallConfig};
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Source tree install script, standing in for `make prefix=... install`
pub const INSTALL_SH: &str = r#"set -e
mkdir -p "$1/bin" "$1/share/demo"
cp demo "$1/bin/demo"
cp README "$1/share/demo/README"
"#;

/// Resource setup script, standing in for `python setup.py install`
pub const SETUP_SH: &str = r#"set -e
mkdir -p "$1/lib"
cp helper.py "$1/lib/helper.py"
"#;

/// Install procedure: stage the helper into vendor, then install the source
pub const DEFAULT_INSTALL: &str = r#"
[[install]]
executable = "sh"
args = ["setup.sh", "%(vendor)s"]
workdir = "%(resource:helper)s"

[[install]]
executable = "sh"
args = ["install.sh", "%(prefix)s"]
"#;

/// Same as [`DEFAULT_INSTALL`] but the second step exits with code 2
pub const FAILING_INSTALL: &str = r#"
[[install]]
executable = "sh"
args = ["setup.sh", "%(vendor)s"]
workdir = "%(resource:helper)s"

[[install]]
executable = "sh"
args = ["-c", "echo 'make: *** [install] Error 2' >&2; exit 2"]
"#;

/// Second step backgrounds a late write into the prefix, then hangs
pub const HANGING_INSTALL: &str = r#"
[[install]]
executable = "sh"
args = ["setup.sh", "%(vendor)s"]
workdir = "%(resource:helper)s"

[[install]]
executable = "sh"
args = ["-c", "(sleep 2; touch \"$PANTRY_PREFIX/late\") & sleep 5"]
"#;

/// Write a gzipped tarball with the given `(path, contents)` entries
pub fn write_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_400_000_000);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

pub fn sha256_hex(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).value
}

pub fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path).unwrap().to_string()
}

/// Source and resource tarballs plus prefix and staging locations
pub struct Fixture {
    pub dir: TempDir,
    pub source_bytes: Vec<u8>,
    pub resource_bytes: Vec<u8>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();

        let source = dir.path().join("demo-1.0.tar.gz");
        write_tar_gz(
            &source,
            &[
                ("demo-1.0/install.sh", INSTALL_SH.as_bytes()),
                ("demo-1.0/demo", b"#!/bin/sh\necho demo\n"),
                ("demo-1.0/README", b"demo 1.0\n"),
            ],
        );

        let resource = dir.path().join("helper-2.0.tar.gz");
        write_tar_gz(
            &resource,
            &[
                ("helper-2.0/setup.sh", SETUP_SH.as_bytes()),
                ("helper-2.0/helper.py", b"def spawn():\n    pass\n"),
            ],
        );

        let source_bytes = fs::read(&source).unwrap();
        let resource_bytes = fs::read(&resource).unwrap();

        Self {
            dir,
            source_bytes,
            resource_bytes,
        }
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.path().join("demo-1.0.tar.gz")
    }

    pub fn resource_path(&self) -> PathBuf {
        self.dir.path().join("helper-2.0.tar.gz")
    }

    pub fn prefix(&self, name: &str) -> PathBuf {
        self.dir.path().join("prefixes").join(name)
    }

    pub fn staging(&self) -> PathBuf {
        self.dir.path().join("staging")
    }

    pub fn recipe_path(&self) -> PathBuf {
        self.dir.path().join("demo.toml")
    }

    /// A formula over the local tarballs with correct digests
    pub fn recipe(&self, depends_on: &[&str], install: &str) -> String {
        self.recipe_with(
            &file_url(&self.source_path()),
            &sha256_hex(&self.source_bytes),
            &file_url(&self.resource_path()),
            &sha256_hex(&self.resource_bytes),
            depends_on,
            install,
        )
    }

    pub fn recipe_with(
        &self,
        source_url: &str,
        source_digest: &str,
        resource_url: &str,
        resource_digest: &str,
        depends_on: &[&str],
        install: &str,
    ) -> String {
        let deps = depends_on
            .iter()
            .map(|d| format!("\"{}\"", d))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            r#"name = "demo"
version = "1.0"
homepage = "https://example.com/demo"
url = "{source_url}"
checksum = {{ algorithm = "sha256", digest = "{source_digest}" }}
depends_on = [{deps}]

[[resource]]
name = "helper"
url = "{resource_url}"
checksum = "sha256:{resource_digest}"
{install}"#
        )
    }

    /// Write `content` as the fixture's formula file
    pub fn write_recipe(&self, content: &str) -> PathBuf {
        let path = self.recipe_path();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn config(&self) -> InstallConfig {
        InstallConfig {
            staging_dir: self.staging(),
            show_progress: false,
            retry_base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(30),
            jobs: 2,
            ..InstallConfig::default()
        }
    }

    /// Entries left in the staging parent
    pub fn staging_entries(&self) -> usize {
        match fs::read_dir(self.staging()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

/// A dependency probe backed by a fixed set of present names
pub struct FixedProbe {
    present: HashSet<String>,
}

impl FixedProbe {
    pub fn new(present: &[&str]) -> Self {
        Self {
            present: present.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DependencyProbe for FixedProbe {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        self.present
            .contains(name)
            .then(|| PathBuf::from("/usr/bin").join(name))
    }
}

/// Every file under `root` with its contents, relative and sorted
pub fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files: Vec<_> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap().to_path_buf();
            (relative, fs::read(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}
