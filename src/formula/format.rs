// src/formula/format.rs

//! Formula file format definitions
//!
//! Formulas are TOML files that describe how to install one package:
//! where its source lives, what it depends on, which auxiliary resources
//! it needs staged, and the ordered install procedure.

use crate::hash::{Hash, HashAlgorithm};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A complete formula for installing a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Formula {
    /// Package name
    pub name: String,

    /// Package version (informational, available as `%(version)s`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Short description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    /// Homepage URL (informational only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    /// Primary source archive URL
    pub url: String,

    /// Build-time dependencies that must be present before installing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Checksum for the source archive
    pub checksum: Checksum,

    /// Auxiliary resources, staged in declaration order
    #[serde(default, rename = "resource", skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,

    /// Install procedure
    #[serde(default)]
    pub install: Vec<InstallStep>,
}

impl Formula {
    /// Source descriptor for the main archive
    pub fn source(&self) -> SourceSpec {
        SourceSpec {
            url: self.url.clone(),
            checksum: self.checksum.clone(),
        }
    }

    /// Look up a resource by name
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Get the archive filename from the URL
    pub fn archive_filename(&self) -> String {
        archive_filename(&self.url, &format!("{}.tar.gz", self.name))
    }

    /// `name-version` when a version is declared, else just the name
    pub fn display_name(&self) -> String {
        match &self.version {
            Some(v) => format!("{}-{}", self.name, v),
            None => self.name.clone(),
        }
    }
}

/// Auxiliary resource staged before the main install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resource {
    /// Resource name, unique within a formula
    pub name: String,

    /// Resource archive URL
    pub url: String,

    /// Checksum for the resource archive
    pub checksum: Checksum,

    /// Setup procedure run inside the extracted resource tree
    ///
    /// Typically installs the resource into `%(vendor)s`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<InstallStep>,
}

impl Resource {
    /// Source descriptor for this resource's archive
    pub fn source(&self) -> SourceSpec {
        SourceSpec {
            url: self.url.clone(),
            checksum: self.checksum.clone(),
        }
    }

    pub fn archive_filename(&self) -> String {
        archive_filename(&self.url, &format!("{}.tar.gz", self.name))
    }
}

/// Where an artifact lives and what its bytes must hash to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub url: String,
    pub checksum: Checksum,
}

/// Declared digest of an artifact
///
/// Accepts either a table `{ algorithm = "sha1", digest = "..." }` or the
/// prefixed shorthand `"sha1:..."`. Always serializes as a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChecksumRepr")]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub digest: String,
}

impl Checksum {
    /// Build a checksum, validating digest length and hex characters
    pub fn new(algorithm: HashAlgorithm, digest: &str) -> Result<Self, String> {
        let hash = Hash::new(algorithm, digest)
            .map_err(|e| format!("malformed {} checksum: {}", algorithm, e))?;
        Ok(Self {
            algorithm,
            digest: hash.value,
        })
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChecksumRepr {
    Prefixed(String),
    Table { algorithm: String, digest: String },
}

impl TryFrom<ChecksumRepr> for Checksum {
    type Error = String;

    fn try_from(repr: ChecksumRepr) -> Result<Self, Self::Error> {
        let (algorithm, digest) = match &repr {
            ChecksumRepr::Prefixed(s) => s.split_once(':').ok_or_else(|| {
                format!("checksum '{}' must be written as <algorithm>:<digest>", s)
            })?,
            ChecksumRepr::Table { algorithm, digest } => (algorithm.as_str(), digest.as_str()),
        };

        let algorithm: HashAlgorithm = algorithm
            .parse()
            .map_err(|e| format!("{} (supported: sha1, sha256, sha512)", e))?;
        Checksum::new(algorithm, digest)
    }
}

/// One external command in an install or setup procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallStep {
    /// Program to run, looked up on `PATH` unless it contains a slash
    pub executable: String,

    /// Arguments; may contain placeholders such as `%(prefix)s`
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory; defaults to the source (or resource) tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,

    /// Extra environment variables for this step
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl InstallStep {
    pub fn new(executable: impl Into<String>, args: &[&str]) -> Self {
        Self {
            executable: executable.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            workdir: None,
            env: BTreeMap::new(),
        }
    }

    /// Every templated string in this step
    pub(crate) fn templates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.executable.as_str())
            .chain(self.args.iter().map(String::as_str))
            .chain(self.workdir.as_deref())
            .chain(self.env.values().map(String::as_str))
    }
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.executable)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn archive_filename(url: &str, fallback: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
