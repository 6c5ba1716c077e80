// src/fetch/client.rs

//! Transport layer for artifact downloads
//!
//! Opens a byte stream for `http`, `https` and `file` URLs and copies it
//! into a partial file while hashing. The caller decides what to do with
//! the partial file once the digest is known.

use crate::error::FetchError;
use crate::hash::{Hash, HashAlgorithm, Hasher};
use indicatif::ProgressBar;
use reqwest::blocking::{Client, Response};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::Scheme;

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// An open artifact body
pub(crate) enum Body {
    Http(Response),
    File(File),
}

impl Body {
    /// Declared length, if the transport knows it
    pub(crate) fn len(&self) -> Option<u64> {
        match self {
            Self::Http(response) => response.content_length(),
            Self::File(file) => file.metadata().ok().map(|m| m.len()),
        }
    }

    fn is_remote(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Http(response) => response.read(buf),
            Self::File(file) => file.read(buf),
        }
    }
}

/// HTTP client wrapper shared by every fetch in a run
pub(crate) struct TransportClient {
    client: Client,
}

impl TransportClient {
    pub(crate) fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pantry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Io(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Open the artifact at `url`
    ///
    /// Connection failures and non-success statuses are reported as
    /// retryable network errors tagged with `attempt`.
    pub(crate) fn open(&self, url: &Url, attempt: u32) -> Result<Body, FetchError> {
        let scheme = Scheme::parse(url.scheme()).ok_or_else(|| FetchError::UnsupportedScheme {
            url: url.to_string(),
            scheme: url.scheme().to_string(),
        })?;

        match scheme {
            Scheme::Http | Scheme::Https => {
                let response = self.client.get(url.clone()).send().map_err(|e| {
                    FetchError::Network {
                        url: url.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    }
                })?;

                if !response.status().is_success() {
                    return Err(FetchError::Network {
                        url: url.to_string(),
                        attempts: attempt,
                        message: format!("HTTP {}", response.status()),
                    });
                }

                Ok(Body::Http(response))
            }
            Scheme::File => {
                let path = url
                    .to_file_path()
                    .map_err(|_| FetchError::Io(format!("Invalid file URL: {}", url)))?;
                let file = File::open(&path).map_err(|e| {
                    FetchError::Io(format!("Failed to open {}: {}", path.display(), e))
                })?;
                Ok(Body::File(file))
            }
        }
    }
}

/// Stream a body into `part_path`, hashing as it goes
///
/// Never buffers the whole payload. Checks `cancel` between chunks so a
/// failure elsewhere in the batch stops this stream promptly.
pub(crate) fn stream_to_file(
    mut body: Body,
    part_path: &Path,
    algorithm: HashAlgorithm,
    url: &Url,
    attempt: u32,
    cancel: &AtomicBool,
    progress_bar: Option<&ProgressBar>,
) -> Result<(Hash, u64), FetchError> {
    if let (Some(pb), Some(len)) = (progress_bar, body.len()) {
        pb.set_length(len);
    }

    let mut file = File::create(part_path).map_err(|e| {
        FetchError::Io(format!("Failed to create {}: {e}", part_path.display()))
    })?;

    let mut hasher = Hasher::new(algorithm);
    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(FetchError::Cancelled {
                url: url.to_string(),
            });
        }

        let bytes_read = body.read(&mut buffer).map_err(|e| {
            if body.is_remote() {
                FetchError::Network {
                    url: url.to_string(),
                    attempts: attempt,
                    message: format!("Failed to read response: {e}"),
                }
            } else {
                FetchError::Io(format!("Failed to read {}: {e}", url))
            }
        })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
        file.write_all(&buffer[..bytes_read])
            .map_err(|e| FetchError::Io(format!("Failed to write data: {e}")))?;

        downloaded += bytes_read as u64;
        if let Some(pb) = progress_bar {
            pb.set_position(downloaded);
        }
    }

    file.sync_all()
        .map_err(|e| FetchError::Io(format!("Failed to flush {}: {e}", part_path.display())))?;

    debug!("Streamed {} bytes from {}", downloaded, url);
    Ok((hasher.finalize(), downloaded))
}
