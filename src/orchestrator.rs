// src/orchestrator.rs

//! Orchestrator: the single entry point for installing a formula
//!
//! Composes parsing, dependency checks, fetching, staging and the build
//! into one run:
//!
//! 1. Parse and validate the formula
//! 2. Check build dependencies (before any network or filesystem work)
//! 3. Fetch and verify the source and every resource in parallel
//! 4. Extract the source and stage resources in declaration order
//! 5. Run the install steps against the prefix
//!
//! All intermediate data lives in one temporary staging tree which is
//! removed on every return path:
//!
//! ```text
//! <staging_dir>/pantry-XXXXXX/
//!   downloads/      # verified archives
//!   source/         # extracted main source
//!   resources/      # %(staging)s, one directory per resource
//! ```

use crate::config::InstallConfig;
use crate::error::{Error, Result};
use crate::fetch::{FetchRequest, Fetcher, LocalArchive};
use crate::formula::{parse_formula, parse_formula_file, validate_formula, Formula};
use crate::install::{
    check_dependencies, DependencyProbe, InstallContext, InstallState, Installer, PathProbe,
};
use crate::stage::extract_archive;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Outcome of one orchestrated run
#[derive(Debug, Clone, Serialize)]
pub struct InstallResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub prefix: PathBuf,
    pub state: InstallState,
    pub history: Vec<InstallState>,
    pub dry_run: bool,
    pub warnings: Vec<String>,
    /// Resource names, in staging order
    pub staged_resources: Vec<String>,
    pub steps_run: usize,
    /// Install commands after substitution
    pub planned_commands: Vec<String>,
    /// Files under the prefix, relative and sorted
    pub installed_files: Vec<PathBuf>,
    /// Captured output of setup and install steps
    #[serde(skip_serializing_if = "String::is_empty")]
    pub log: String,
}

/// Runs formulas end to end
pub struct Orchestrator {
    config: InstallConfig,
    probe: Arc<dyn DependencyProbe>,
}

impl Orchestrator {
    /// Orchestrator that checks dependencies on `PATH` plus the configured search paths
    pub fn new(config: InstallConfig) -> Self {
        let probe = Arc::new(PathProbe::with_search_paths(config.search_paths.clone()));
        Self { config, probe }
    }

    pub fn with_probe(config: InstallConfig, probe: Arc<dyn DependencyProbe>) -> Self {
        Self { config, probe }
    }

    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    /// Install the formula in `raw_text` into `prefix`
    pub fn run(&self, raw_text: &str, prefix: &Path) -> Result<InstallResult> {
        let formula = parse_formula(raw_text)?;
        self.run_formula(&formula, prefix)
    }

    /// Install the formula file at `path` into `prefix`
    pub fn run_file(&self, path: &Path, prefix: &Path) -> Result<InstallResult> {
        let formula = parse_formula_file(path)?;
        self.run_formula(&formula, prefix)
    }

    /// Install an already parsed formula
    pub fn run_formula(&self, formula: &Formula, prefix: &Path) -> Result<InstallResult> {
        let warnings = validate_formula(formula)?;
        for warning in &warnings {
            warn!("{}: {}", formula.name, warning);
        }

        let prefix = std::path::absolute(prefix)?;

        if self.config.dry_run {
            return self.plan(formula, &prefix, warnings);
        }

        info!("Installing {} into {}", formula.display_name(), prefix.display());

        // Fail fast before the staging tree exists
        check_dependencies(&formula.depends_on, self.probe.as_ref())?;

        fs::create_dir_all(&self.config.staging_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create staging directory {}: {}",
                self.config.staging_dir.display(),
                e
            ))
        })?;
        let staging = tempfile::Builder::new()
            .prefix("pantry-")
            .tempdir_in(&self.config.staging_dir)
            .map_err(|e| Error::IoError(format!("Failed to create staging tree: {}", e)))?;

        let downloads = staging.path().join("downloads");
        let source_root = staging.path().join("source");
        let resources_root = staging.path().join("resources");

        let context = InstallContext::new(&prefix, &resources_root)
            .with_env(self.config.env.clone())
            .with_jobs(self.config.jobs);
        let mut installer = Installer::new(formula, context, self.probe.as_ref(), self.config.timeout);

        installer.check_dependencies()?;

        let archives = match self.fetch_artifacts(formula, &downloads) {
            Ok(archives) => archives,
            Err(e) => {
                installer.fail(&e);
                return Err(e);
            }
        };
        let (source_archive, resource_archives) = archives
            .split_first()
            .ok_or_else(|| Error::IoError("fetch returned no source archive".to_string()))?;

        let source_dir = match extract_source(&source_archive.path, &source_root) {
            Ok(dir) => dir,
            Err(e) => {
                installer.fail(&e);
                return Err(e);
            }
        };
        installer.set_source_dir(&source_dir);

        let pairs: Vec<_> = formula.resources.iter().zip(resource_archives).collect();
        let staged = installer.stage_resources(&pairs)?;
        let report = installer.build(&source_dir)?;

        let installed_files = list_files(&prefix)?;
        let mut log: String = staged.iter().map(|s| s.log.as_str()).collect();
        log.push_str(&report.log);

        info!(
            "{} installed: {} step(s), {} file(s) under {}",
            formula.display_name(),
            report.steps_run,
            installed_files.len(),
            prefix.display()
        );

        Ok(InstallResult {
            name: formula.name.clone(),
            version: formula.version.clone(),
            prefix,
            state: installer.state().clone(),
            history: installer.history().to_vec(),
            dry_run: false,
            warnings,
            staged_resources: staged.into_iter().map(|s| s.name).collect(),
            steps_run: report.steps_run,
            planned_commands: report.commands,
            installed_files,
            log,
        })
    }

    /// Dry run: check dependencies and report the commands that would run
    fn plan(&self, formula: &Formula, prefix: &Path, warnings: Vec<String>) -> Result<InstallResult> {
        info!("Planning {} into {} (dry run)", formula.display_name(), prefix.display());

        let staging = self.config.staging_dir.join(format!("pantry-{}", formula.name));
        let source_dir = staging.join("source");
        let context = InstallContext::new(prefix, staging.join("resources"))
            .with_env(self.config.env.clone())
            .with_jobs(self.config.jobs);
        let mut installer = Installer::new(formula, context, self.probe.as_ref(), self.config.timeout);

        installer.check_dependencies()?;
        installer.set_source_dir(&source_dir);
        let planned = installer.plan(&source_dir)?;

        Ok(InstallResult {
            name: formula.name.clone(),
            version: formula.version.clone(),
            prefix: prefix.to_path_buf(),
            state: installer.state().clone(),
            history: installer.history().to_vec(),
            dry_run: true,
            warnings,
            staged_resources: Vec::new(),
            steps_run: 0,
            planned_commands: planned.iter().map(|c| c.to_string()).collect(),
            installed_files: Vec::new(),
            log: String::new(),
        })
    }

    /// Fetch and verify every artifact of a formula into `dest_dir`
    ///
    /// Nothing is staged or installed. Artifacts keep their archive file
    /// names; a resource whose name collides is prefixed with its name.
    pub fn fetch_only(&self, raw_text: &str, dest_dir: &Path) -> Result<Vec<LocalArchive>> {
        let formula = parse_formula(raw_text)?;
        let fetcher = Fetcher::new(self.config.fetch_options())?;

        let mut seen = HashSet::new();
        let mut requests = Vec::with_capacity(formula.resources.len() + 1);

        let source_file = formula.archive_filename();
        seen.insert(source_file.clone());
        requests.push(FetchRequest {
            artifact: "source".to_string(),
            source: formula.source(),
            dest: dest_dir.join(source_file),
        });

        for resource in &formula.resources {
            let mut file = resource.archive_filename();
            if !seen.insert(file.clone()) {
                file = format!("{}-{}", resource.name, file);
                seen.insert(file.clone());
            }
            requests.push(FetchRequest {
                artifact: format!("resource {}", resource.name),
                source: resource.source(),
                dest: dest_dir.join(file),
            });
        }

        fetcher.fetch_all(&requests)
    }

    /// Source first, then resources in declaration order
    fn fetch_artifacts(&self, formula: &Formula, downloads: &Path) -> Result<Vec<LocalArchive>> {
        let fetcher = Fetcher::new(self.config.fetch_options())?;

        let mut requests = vec![FetchRequest {
            artifact: "source".to_string(),
            source: formula.source(),
            dest: downloads.join("source").join(formula.archive_filename()),
        }];
        requests.extend(formula.resources.iter().map(|r| FetchRequest {
            artifact: format!("resource {}", r.name),
            source: r.source(),
            dest: downloads.join(format!("resource-{}", r.name)).join(r.archive_filename()),
        }));

        fetcher.fetch_all(&requests)
    }
}

fn extract_source(archive: &Path, dest: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest)?;
    let root = extract_archive(archive, dest).map_err(|source| Error::Stage {
        resource: "source".to_string(),
        source,
    })?;
    info!("Extracted source to {}", root.display());
    Ok(root)
}

/// Every non-directory entry under `root`, relative and sorted
fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::IoError(format!("Failed to walk {}: {}", root.display(), e)))?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}
