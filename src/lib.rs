// src/lib.rs

//! Pantry: a package formula interpreter and installer
//!
//! Reads a declarative formula naming a source archive, its checksum,
//! build dependencies, auxiliary resources and an ordered install
//! procedure, then verifies, stages and installs it into a prefix.
//!
//! # Architecture
//!
//! - `formula`: parsing and validation, pure and offline
//! - `fetch`: retrieval with integrity checks, retries and parallelism
//! - `stage`: archive extraction and resource setup
//! - `install`: dependency checks, the install state machine, step execution
//! - `orchestrator`: composes the above; the entry point for callers

pub mod config;
mod error;
pub mod fetch;
pub mod formula;
pub mod hash;
pub mod install;
pub mod lock;
pub mod orchestrator;
pub mod stage;

pub use config::InstallConfig;
pub use error::{Error, FetchError, Result, StageError};
pub use fetch::{Fetcher, LocalArchive};
pub use formula::{parse_formula, parse_formula_file, validate_formula, Formula};
pub use hash::{Hash, HashAlgorithm, Hasher};
pub use install::{DependencyProbe, InstallState, PathProbe};
pub use lock::PrefixLock;
pub use orchestrator::{InstallResult, Orchestrator};
