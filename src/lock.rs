// src/lock.rs

//! Exclusive per-prefix install lock
//!
//! Two installs into the same prefix would interleave writes, so callers
//! serialize them with an advisory `flock(LOCK_EX)` on a lock file that
//! sits next to the prefix:
//!
//! ```text
//! /opt/scnmaster            # prefix
//! /opt/.scnmaster.pantry.lock
//! ```
//!
//! The prefix itself is never created or touched by locking. The lock is
//! released when the [`PrefixLock`] is dropped.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive lock on one install prefix
#[derive(Debug)]
pub struct PrefixLock {
    /// Kept open to hold the lock
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl PrefixLock {
    /// Lock file path for `prefix`
    pub fn lock_path(prefix: &Path) -> Result<PathBuf> {
        let name = prefix
            .file_name()
            .ok_or_else(|| {
                Error::Locked(format!("cannot derive a lock file for {}", prefix.display()))
            })?
            .to_string_lossy();
        let parent = match prefix.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(parent.join(format!(".{}.pantry.lock", name)))
    }

    /// Acquire the lock, blocking until it is available
    pub fn acquire(prefix: &Path) -> Result<Self> {
        let (file, path) = open_lock_file(prefix)?;

        file.lock_exclusive().map_err(|e| {
            Error::Locked(format!("failed to lock {}: {}", path.display(), e))
        })?;

        info!("Acquired install lock {}", path.display());
        Ok(Self { file, path })
    }

    /// Try to acquire the lock without blocking
    ///
    /// Returns `Ok(None)` when another process holds it.
    pub fn try_acquire(prefix: &Path) -> Result<Option<Self>> {
        let (file, path) = open_lock_file(prefix)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                info!("Acquired install lock {}", path.display());
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Install lock already held at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(Error::Locked(format!(
                "failed to try-lock {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PrefixLock {
    fn drop(&mut self) {
        debug!("Released install lock {}", self.path.display());
    }
}

fn open_lock_file(prefix: &Path) -> Result<(File, PathBuf)> {
    let path = PrefixLock::lock_path(prefix)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::Locked(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| Error::Locked(format!("failed to open {}: {}", path.display(), e)))?;

    Ok((file, path))
}
