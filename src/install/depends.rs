// src/install/depends.rs

//! Build dependency presence checks

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::debug;

/// Answers whether a named build dependency is present on this system
///
/// Keeps the installer decoupled from how presence is decided, so callers
/// can plug in a package database or a fixed allow-list.
pub trait DependencyProbe: Send + Sync {
    /// Location of the dependency, or `None` if it is absent
    fn locate(&self, name: &str) -> Option<PathBuf>;

    fn is_present(&self, name: &str) -> bool {
        self.locate(name).is_some()
    }
}

/// Looks dependencies up as executables on `PATH`
///
/// Extra directories are searched before `PATH`.
#[derive(Debug, Clone, Default)]
pub struct PathProbe {
    search_paths: Vec<PathBuf>,
}

impl PathProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }
}

impl DependencyProbe for PathProbe {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        if !self.search_paths.is_empty() {
            let mut dirs = self.search_paths.clone();
            if let Some(path) = std::env::var_os("PATH") {
                dirs.extend(std::env::split_paths(&path));
            }
            let paths: OsString = std::env::join_paths(dirs).ok()?;
            let cwd = std::env::current_dir().ok()?;
            return which::which_in(name, Some(paths), cwd).ok();
        }

        which::which(name).ok()
    }
}

/// Check every dependency, failing on the first missing one
pub fn check_dependencies(deps: &[String], probe: &dyn DependencyProbe) -> Result<()> {
    for name in deps {
        match probe.locate(name) {
            Some(path) => debug!("Found dependency {} at {}", name, path.display()),
            None => return Err(Error::MissingDependency { name: name.clone() }),
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;

    /// A probe backed by a fixed set of present names
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

    #[test]
    fn test_first_missing_dependency_wins() {
        let probe = FixedProbe::new(&["make"]);
        let deps = vec!["make".to_string(), "ffmpeg".to_string(), "python".to_string()];

        match check_dependencies(&deps, &probe).unwrap_err() {
            Error::MissingDependency { name } => assert_eq!(name, "ffmpeg"),
            other => panic!("expected MissingDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_no_dependencies() {
        let probe = FixedProbe::new(&[]);
        assert!(check_dependencies(&[], &probe).is_ok());
    }

    #[test]
    fn test_path_probe_finds_shell() {
        assert!(PathProbe::new().is_present("sh"));
        assert!(!PathProbe::new().is_present("pantry-no-such-dependency"));
    }

    #[cfg(unix)]
    #[test]
    fn test_path_probe_search_paths() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let tool = temp.path().join("pantry-fake-tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let probe = PathProbe::with_search_paths(vec![temp.path().to_path_buf()]);
        assert_eq!(probe.locate("pantry-fake-tool"), Some(tool));
        assert!(!PathProbe::new().is_present("pantry-fake-tool"));
    }
}
