// src/error.rs

//! Error types for formula parsing, fetching, staging and installation
//!
//! Every component error carries enough context (which artifact, which
//! resource, which step) to reconstruct a failure without re-running it.
//! [`Error::exit_code`] maps the taxonomy onto the CLI exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while retrieving and verifying an artifact
#[derive(Debug, Error)]
pub enum FetchError {
    /// Unreachable host, timeout, or non-success transport status
    #[error("network error fetching {url} after {attempts} attempt(s): {message}")]
    Network {
        url: String,
        attempts: u32,
        message: String,
    },

    /// Downloaded bytes do not match the declared digest
    #[error("integrity check failed for {url}: {algorithm} expected {expected}, got {actual}")]
    Integrity {
        url: String,
        algorithm: String,
        expected: String,
        actual: String,
    },

    /// The URL scheme has no transport
    #[error("unsupported URL scheme '{scheme}' in {url}")]
    UnsupportedScheme { url: String, scheme: String },

    /// Another fetch in the same batch failed first
    #[error("fetch of {url} cancelled")]
    Cancelled { url: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl FetchError {
    /// Only transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Errors raised while staging a resource
#[derive(Debug, Error)]
pub enum StageError {
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("setup step {step_index} exited with code {exit_code}")]
    SetupFailed {
        step_index: usize,
        exit_code: i32,
        captured_output: String,
    },

    #[error("already staged at {}", .path.display())]
    AlreadyStaged { path: PathBuf },
}

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or invalid formula
    #[error("invalid formula: {0}")]
    ParseError(String),

    #[error("failed to fetch {artifact}")]
    Fetch {
        artifact: String,
        #[source]
        source: FetchError,
    },

    #[error("failed to stage resource {resource}")]
    Stage {
        resource: String,
        #[source]
        source: StageError,
    },

    #[error("missing required dependency: {name}")]
    MissingDependency { name: String },

    #[error("install step {step_index} ({command}) failed with exit code {exit_code}")]
    StepFailed {
        step_index: usize,
        exit_code: i32,
        command: String,
        captured_output: String,
    },

    #[error("install step {step_index} ({command}) timed out after {timeout_secs} seconds")]
    StepTimedOut {
        step_index: usize,
        command: String,
        timeout_secs: u64,
    },

    #[error("invalid install state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("prefix is locked: {0}")]
    Locked(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for this error
    ///
    /// | code | meaning |
    /// |------|---------|
    /// | 1 | parse/validation error |
    /// | 2 | integrity/fetch error |
    /// | 3 | missing dependency |
    /// | 4 | step execution failure |
    /// | 5 | internal/unexpected error |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ParseError(_) => 1,
            Self::Fetch { .. } => 2,
            Self::MissingDependency { .. } => 3,
            Self::StepFailed { .. } | Self::StepTimedOut { .. } => 4,
            Self::Stage {
                source: StageError::SetupFailed { .. },
                ..
            } => 4,
            Self::Stage { .. }
            | Self::InvalidTransition { .. }
            | Self::Locked(_)
            | Self::IoError(_)
            | Self::Io(_) => 5,
        }
    }

    /// Name of the install stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ParseError(_) => "parse",
            Self::MissingDependency { .. } => "dependencies",
            Self::Fetch { .. } => "fetch",
            Self::Stage { .. } => "stage",
            Self::StepFailed { .. } | Self::StepTimedOut { .. } => "build",
            Self::InvalidTransition { .. } | Self::Locked(_) | Self::IoError(_) | Self::Io(_) => {
                "internal"
            }
        }
    }

    /// Output captured from the failing command, if any
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::StepFailed {
                captured_output, ..
            }
            | Self::Stage {
                source: StageError::SetupFailed {
                    captured_output, ..
                },
                ..
            } => Some(captured_output),
            _ => None,
        }
    }
}
