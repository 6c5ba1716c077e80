// src/fetch/mod.rs

//! Artifact retrieval with integrity verification
//!
//! A [`Fetcher`] resolves a [`SourceSpec`] to a verified local file:
//!
//! 1. The body is streamed to `<dest>.part` and hashed incrementally
//! 2. The digest is compared against the declared checksum
//! 3. Only a matching file is renamed to `<dest>`; a mismatch removes it
//!
//! Transport failures (connection errors, timeouts, non-success statuses)
//! are retried with exponential backoff. Integrity failures and unsupported
//! schemes are never retried.
//!
//! [`Fetcher::fetch_all`] retrieves several artifacts in parallel on a
//! bounded rayon pool. The first failure cancels the rest.

mod client;
mod progress;

pub use progress::DownloadProgress;

use crate::error::{Error, FetchError, Result};
use crate::formula::{Checksum, SourceSpec};
use crate::hash::digests_match;
use client::{stream_to_file, TransportClient};
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default timeout for a single HTTP request
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of attempts per artifact
pub const DEFAULT_RETRIES: u32 = 3;

/// Default delay before the first retry
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Granularity of cancellation checks while backing off
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// URL schemes with a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    File,
}

impl Scheme {
    pub const SUPPORTED: &'static [&'static str] = &["http", "https", "file"];

    pub fn parse(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// Knobs for retrieval
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Per-request timeout for HTTP transports
    pub timeout: Duration,
    /// Total attempts per artifact (at least one is always made)
    pub retries: u32,
    /// Backoff before retry `n` is `retry_base_delay * 2^(n-1)`
    pub retry_base_delay: Duration,
    /// Maximum parallel downloads in [`Fetcher::fetch_all`]
    pub jobs: usize,
    pub show_progress: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            show_progress: false,
        }
    }
}

/// One artifact to retrieve as part of a batch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Human-readable artifact label, e.g. `source` or `resource pexpect`
    pub artifact: String,
    pub source: SourceSpec,
    pub dest: PathBuf,
}

/// A verified artifact on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArchive {
    pub url: String,
    pub path: PathBuf,
    pub checksum: Checksum,
    pub size: u64,
}

/// Retrieves artifacts and verifies their integrity
pub struct Fetcher {
    client: TransportClient,
    options: FetchOptions,
}

impl Fetcher {
    pub fn new(options: FetchOptions) -> Result<Self> {
        let client = TransportClient::new(options.timeout).map_err(|e| match e {
            FetchError::Io(msg) => Error::IoError(msg),
            other => Error::IoError(other.to_string()),
        })?;
        Ok(Self { client, options })
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Retrieve one artifact into `dest`
    pub fn fetch(&self, source: &SourceSpec, dest: &Path) -> std::result::Result<LocalArchive, FetchError> {
        let cancel = AtomicBool::new(false);
        self.fetch_with(source, dest, &cancel, None)
    }

    /// Retrieve one artifact, observing a shared cancellation flag
    pub fn fetch_with(
        &self,
        source: &SourceSpec,
        dest: &Path,
        cancel: &AtomicBool,
        progress_bar: Option<&ProgressBar>,
    ) -> std::result::Result<LocalArchive, FetchError> {
        let url = Url::parse(&source.url).map_err(|e| FetchError::UnsupportedScheme {
            url: source.url.clone(),
            scheme: format!("<unparseable: {}>", e),
        })?;
        if Scheme::parse(url.scheme()).is_none() {
            return Err(FetchError::UnsupportedScheme {
                url: source.url.clone(),
                scheme: url.scheme().to_string(),
            });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FetchError::Io(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }

        let max_attempts = self.options.retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(source, &url, dest, attempt, cancel, progress_bar) {
                Ok(archive) => return Ok(archive),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "Fetch attempt {}/{} for {} failed: {}, retrying in {:?}",
                        attempt, max_attempts, source.url, e, delay
                    );
                    if !sleep_unless_cancelled(delay, cancel) {
                        return Err(FetchError::Cancelled {
                            url: source.url.clone(),
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delay before the retry that follows `attempt`
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.options.retry_base_delay.saturating_mul(factor)
    }

    fn attempt(
        &self,
        source: &SourceSpec,
        url: &Url,
        dest: &Path,
        attempt: u32,
        cancel: &AtomicBool,
        progress_bar: Option<&ProgressBar>,
    ) -> std::result::Result<LocalArchive, FetchError> {
        info!("Fetching {} (attempt {})", source.url, attempt);

        let part_path = part_path(dest);
        let body = self.client.open(url, attempt)?;

        let streamed = stream_to_file(
            body,
            &part_path,
            source.checksum.algorithm,
            url,
            attempt,
            cancel,
            progress_bar,
        );
        let (actual, size) = match streamed {
            Ok(result) => result,
            Err(e) => {
                let _ = fs::remove_file(&part_path);
                return Err(e);
            }
        };

        if !digests_match(actual.as_str(), &source.checksum.digest) {
            let _ = fs::remove_file(&part_path);
            return Err(FetchError::Integrity {
                url: source.url.clone(),
                algorithm: source.checksum.algorithm.to_string(),
                expected: source.checksum.digest.clone(),
                actual: actual.as_str().to_string(),
            });
        }

        fs::rename(&part_path, dest).map_err(|e| {
            let _ = fs::remove_file(&part_path);
            FetchError::Io(format!(
                "Failed to move {} to {}: {e}",
                part_path.display(),
                dest.display()
            ))
        })?;

        debug!("Verified {} ({})", dest.display(), source.checksum);
        Ok(LocalArchive {
            url: source.url.clone(),
            path: dest.to_path_buf(),
            checksum: source.checksum.clone(),
            size,
        })
    }

    /// Retrieve every request in parallel
    ///
    /// Results are returned in request order. On failure, in-flight fetches
    /// are cancelled, already verified files are removed, and the first
    /// error that is not a cancellation is returned.
    pub fn fetch_all(&self, requests: &[FetchRequest]) -> Result<Vec<LocalArchive>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            "Fetching {} artifact(s) with up to {} parallel job(s)",
            requests.len(),
            self.options.jobs
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
            .map_err(|e| Error::IoError(format!("Failed to create fetch pool: {e}")))?;

        let progress = DownloadProgress::new(self.options.show_progress);
        let bars: Vec<ProgressBar> = requests
            .iter()
            .map(|r| progress.add_download(&r.artifact))
            .collect();
        let cancel = AtomicBool::new(false);

        let results: Vec<std::result::Result<LocalArchive, FetchError>> = pool.install(|| {
            requests
                .par_iter()
                .zip(bars.par_iter())
                .map(|(request, pb)| {
                    if cancel.load(Ordering::Relaxed) {
                        return Err(FetchError::Cancelled {
                            url: request.source.url.clone(),
                        });
                    }
                    match self.fetch_with(&request.source, &request.dest, &cancel, Some(pb)) {
                        Ok(archive) => {
                            DownloadProgress::finish_download(pb, &request.artifact);
                            Ok(archive)
                        }
                        Err(e) => {
                            if !matches!(e, FetchError::Cancelled { .. }) {
                                cancel.store(true, Ordering::Relaxed);
                            }
                            DownloadProgress::fail_download(pb, &request.artifact, &e.to_string());
                            Err(e)
                        }
                    }
                })
                .collect()
        });

        let mut archives = Vec::with_capacity(results.len());
        let mut failure: Option<(String, FetchError)> = None;

        for (request, result) in requests.iter().zip(results) {
            match result {
                Ok(archive) => archives.push(archive),
                Err(e) => {
                    let replace = match &failure {
                        None => true,
                        Some((_, FetchError::Cancelled { .. })) => {
                            !matches!(e, FetchError::Cancelled { .. })
                        }
                        Some(_) => false,
                    };
                    if replace {
                        failure = Some((request.artifact.clone(), e));
                    }
                }
            }
        }

        if let Some((artifact, source)) = failure {
            for archive in &archives {
                let _ = fs::remove_file(&archive.path);
            }
            return Err(Error::Fetch { artifact, source });
        }

        Ok(archives)
    }
}

/// `<dest>.part`, next to the final path
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Sleep for `delay`, returning false early if `cancel` is raised
fn sleep_unless_cancelled(delay: Duration, cancel: &AtomicBool) -> bool {
    let mut remaining = delay;
    while !remaining.is_zero() {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let slice = remaining.min(BACKOFF_SLICE);
        std::thread::sleep(slice);
        remaining -= slice;
    }
    !cancel.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_bytes, HashAlgorithm};
    use tempfile::TempDir;

    fn quick_options() -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(5),
            retries: 3,
            retry_base_delay: Duration::from_millis(1),
            jobs: 2,
            show_progress: false,
        }
    }

    fn file_source(path: &Path, data: &[u8]) -> SourceSpec {
        std::fs::write(path, data).unwrap();
        let digest = hash_bytes(HashAlgorithm::Sha256, data);
        SourceSpec {
            url: Url::from_file_path(path).unwrap().to_string(),
            checksum: Checksum::new(HashAlgorithm::Sha256, digest.as_str()).unwrap(),
        }
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!(Scheme::parse("https"), Some(Scheme::Https));
        assert_eq!(Scheme::parse("HTTP"), Some(Scheme::Http));
        assert_eq!(Scheme::parse("file"), Some(Scheme::File));
        assert_eq!(Scheme::parse("ftp"), None);
    }

    #[test]
    fn test_backoff_doubles() {
        let fetcher = Fetcher::new(FetchOptions {
            retry_base_delay: Duration::from_millis(500),
            ..quick_options()
        })
        .unwrap();
        assert_eq!(fetcher.backoff(1), Duration::from_millis(500));
        assert_eq!(fetcher.backoff(2), Duration::from_millis(1000));
        assert_eq!(fetcher.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/tmp/x/a.tar.gz")),
            PathBuf::from("/tmp/x/a.tar.gz.part")
        );
    }

    #[test]
    fn test_fetch_file_verified() {
        let temp = TempDir::new().unwrap();
        let source = file_source(&temp.path().join("src.tar.gz"), b"archive bytes");
        let dest = temp.path().join("out/a.tar.gz");

        let fetcher = Fetcher::new(quick_options()).unwrap();
        let archive = fetcher.fetch(&source, &dest).unwrap();

        assert_eq!(archive.path, dest);
        assert_eq!(archive.size, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive bytes");
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn test_fetch_integrity_mismatch_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let mut source = file_source(&temp.path().join("src.tar.gz"), b"archive bytes");
        source.checksum = Checksum::new(HashAlgorithm::Sha256, &"0".repeat(64)).unwrap();
        let dest = temp.path().join("a.tar.gz");

        let fetcher = Fetcher::new(quick_options()).unwrap();
        let err = fetcher.fetch(&source, &dest).unwrap_err();

        match err {
            FetchError::Integrity {
                expected, actual, ..
            } => {
                assert_eq!(expected, "0".repeat(64));
                assert_eq!(actual, hash_bytes(HashAlgorithm::Sha256, b"archive bytes").value);
            }
            other => panic!("expected integrity error, got {other:?}"),
        }
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn test_fetch_unsupported_scheme() {
        let temp = TempDir::new().unwrap();
        let source = SourceSpec {
            url: "ftp://example.com/a.tar.gz".to_string(),
            checksum: Checksum::new(HashAlgorithm::Sha1, &"a".repeat(40)).unwrap(),
        };
        let fetcher = Fetcher::new(quick_options()).unwrap();
        let err = fetcher.fetch(&source, &temp.path().join("a")).unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme { ref scheme, .. } if scheme == "ftp"));
    }

    #[test]
    fn test_fetch_all_preserves_order() {
        let temp = TempDir::new().unwrap();
        let requests: Vec<FetchRequest> = (0..4)
            .map(|i| FetchRequest {
                artifact: format!("artifact {i}"),
                source: file_source(
                    &temp.path().join(format!("src{i}")),
                    format!("payload {i}").as_bytes(),
                ),
                dest: temp.path().join(format!("dl/out{i}")),
            })
            .collect();

        let fetcher = Fetcher::new(quick_options()).unwrap();
        let archives = fetcher.fetch_all(&requests).unwrap();

        assert_eq!(archives.len(), 4);
        for (i, archive) in archives.iter().enumerate() {
            assert_eq!(archive.path, temp.path().join(format!("dl/out{i}")));
        }
    }

    #[test]
    fn test_fetch_all_reports_failing_artifact() {
        let temp = TempDir::new().unwrap();
        let good = file_source(&temp.path().join("good"), b"good");
        let mut bad = file_source(&temp.path().join("bad"), b"bad");
        bad.checksum = Checksum::new(HashAlgorithm::Sha256, &"f".repeat(64)).unwrap();

        let requests = vec![
            FetchRequest {
                artifact: "source".into(),
                source: good,
                dest: temp.path().join("dl/good"),
            },
            FetchRequest {
                artifact: "resource bad".into(),
                source: bad,
                dest: temp.path().join("dl/bad"),
            },
        ];

        let fetcher = Fetcher::new(quick_options()).unwrap();
        let err = fetcher.fetch_all(&requests).unwrap_err();

        match err {
            Error::Fetch { artifact, source } => {
                assert_eq!(artifact, "resource bad");
                assert!(matches!(source, FetchError::Integrity { .. }));
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
        assert!(!temp.path().join("dl/good").exists());
        assert!(!temp.path().join("dl/bad").exists());
    }
}
