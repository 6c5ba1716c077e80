// src/config.rs

//! Configuration for install runs

use crate::error::{Error, Result};
use crate::fetch::{FetchOptions, DEFAULT_FETCH_TIMEOUT, DEFAULT_RETRIES, DEFAULT_RETRY_BASE_DELAY};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Overrides the staging parent directory
pub const ENV_STAGING_DIR: &str = "PANTRY_STAGING_DIR";
/// Overrides the per-step timeout, in seconds
pub const ENV_TIMEOUT: &str = "PANTRY_TIMEOUT";
/// Overrides the number of fetch attempts
pub const ENV_RETRIES: &str = "PANTRY_RETRIES";

/// Caller-configurable knobs for one install run
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Timeout for each install or setup step
    pub timeout: Duration,
    /// Timeout for each HTTP request
    pub fetch_timeout: Duration,
    /// Total fetch attempts per artifact
    pub retries: u32,
    /// Delay before the first fetch retry; doubles on each attempt
    pub retry_base_delay: Duration,
    /// Parallel downloads, also exported to builds as `MAKEFLAGS=-jN`
    pub jobs: usize,
    /// Parent directory for the temporary staging tree
    pub staging_dir: PathBuf,
    /// Extra environment for every step
    pub env: BTreeMap<String, String>,
    pub show_progress: bool,
    /// Plan the install without fetching or running anything
    pub dry_run: bool,
    /// Extra directories searched for build dependencies before `PATH`
    pub search_paths: Vec<PathBuf>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);

        Self {
            timeout: Duration::from_secs(3600), // 1 hour
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            jobs,
            staging_dir: std::env::temp_dir(),
            env: BTreeMap::new(),
            show_progress: true,
            dry_run: false,
            search_paths: Vec::new(),
        }
    }
}

impl InstallConfig {
    /// Defaults overlaid with `PANTRY_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_STAGING_DIR).filter(|v| !v.is_empty()) {
            config.staging_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup(ENV_TIMEOUT) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                Error::ParseError(format!("{} must be a number of seconds, got '{}'", ENV_TIMEOUT, raw))
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup(ENV_RETRIES) {
            config.retries = raw.trim().parse().map_err(|_| {
                Error::ParseError(format!("{} must be a whole number, got '{}'", ENV_RETRIES, raw))
            })?;
        }

        Ok(config)
    }

    /// Settings for the fetcher
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: self.fetch_timeout,
            retries: self.retries,
            retry_base_delay: self.retry_base_delay,
            jobs: self.jobs,
            show_progress: self.show_progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = InstallConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(3600));
        assert_eq!(config.fetch_timeout, Duration::from_secs(300));
        assert_eq!(config.retries, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(500));
        assert!(config.jobs >= 1);
        assert!(config.show_progress);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            (ENV_STAGING_DIR, "/var/tmp/pantry"),
            (ENV_TIMEOUT, "90"),
            (ENV_RETRIES, "5"),
        ]
        .into_iter()
        .collect();

        let config =
            InstallConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.staging_dir, PathBuf::from("/var/tmp/pantry"));
        assert_eq!(config.timeout, Duration::from_secs(90));
        assert_eq!(config.retries, 5);

        let options = config.fetch_options();
        assert_eq!(options.retries, 5);
        assert_eq!(options.jobs, config.jobs);
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        let err = InstallConfig::from_lookup(|key| {
            (key == ENV_TIMEOUT).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains(ENV_TIMEOUT));
    }
}
