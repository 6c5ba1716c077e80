// src/stage/archive.rs

//! Archive extraction for sources and resources
//!
//! Supports: .tar.gz, .tgz, .tar.xz, .txz, .tar

use crate::error::StageError;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;
use xz2::read::XzDecoder;

/// Archive container formats, detected by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarXz,
    Tar,
}

impl ArchiveFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let filename = path.file_name()?.to_str()?.to_ascii_lowercase();

        if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if filename.ends_with(".tar.xz") || filename.ends_with(".txz") {
            Some(Self::TarXz)
        } else if filename.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

fn open_archive(path: &Path, format: ArchiveFormat) -> Result<Archive<Box<dyn Read>>, StageError> {
    let file = File::open(path).map_err(|e| {
        StageError::Extraction(format!("Failed to open {}: {}", path.display(), e))
    })?;

    let reader: Box<dyn Read> = match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
        ArchiveFormat::TarXz => Box::new(XzDecoder::new(file)),
        ArchiveFormat::Tar => Box::new(file),
    };

    Ok(Archive::new(reader))
}

/// Extract `archive` into `dest` and return the tree root
///
/// `dest` must already exist. Entries with absolute paths or `..`
/// components are rejected. When the archive holds exactly one top-level
/// directory, that directory is returned as the root.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<PathBuf, StageError> {
    let format = ArchiveFormat::from_path(archive).ok_or_else(|| {
        StageError::Extraction(format!(
            "Unknown archive format: {} (supported: .tar.gz, .tgz, .tar.xz, .txz, .tar)",
            archive.display()
        ))
    })?;

    let mut tar = open_archive(archive, format)?;
    let entries = tar
        .entries()
        .map_err(|e| StageError::Extraction(format!("Failed to read {}: {}", archive.display(), e)))?;

    let mut count = 0usize;
    for entry in entries {
        let mut entry = entry.map_err(|e| {
            StageError::Extraction(format!("Corrupt archive {}: {}", archive.display(), e))
        })?;

        let entry_path = entry
            .path()
            .map_err(|e| StageError::Extraction(format!("Invalid entry path: {}", e)))?
            .into_owned();

        if !is_contained(&entry_path) {
            return Err(StageError::Extraction(format!(
                "Entry {} escapes the extraction directory",
                entry_path.display()
            )));
        }

        let unpacked = entry.unpack_in(dest).map_err(|e| {
            StageError::Extraction(format!(
                "Failed to unpack {}: {}",
                entry_path.display(),
                e
            ))
        })?;
        if !unpacked {
            return Err(StageError::Extraction(format!(
                "Entry {} escapes the extraction directory",
                entry_path.display()
            )));
        }
        count += 1;
    }

    debug!(
        "Extracted {} entries from {} into {}",
        count,
        archive.display(),
        dest.display()
    );

    tree_root(dest)
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// The single top-level directory of an extraction, or `dest` itself
fn tree_root(dest: &Path) -> Result<PathBuf, StageError> {
    let entries: Vec<_> = fs::read_dir(dest)
        .map_err(|e| StageError::Extraction(format!("Failed to list {}: {}", dest.display(), e)))?
        .filter_map(|e| e.ok())
        .collect();

    if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
        return Ok(entries[0].path());
    }

    Ok(dest.to_path_buf())
}
