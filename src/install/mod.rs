// src/install/mod.rs

//! Installer: dependency checks, resource staging and the install steps
//!
//! The [`Installer`] owns the lifecycle of one install and enforces its
//! ordering through [`StateMachine`]:
//!
//! 1. [`Installer::check_dependencies`] runs before any filesystem mutation
//! 2. [`Installer::stage_resources`] creates the prefix layout and stages
//!    every resource in declaration order
//! 3. [`Installer::build`] runs the install steps; it is rejected unless
//!    every resource has been staged
//!
//! # Prefix layout
//!
//! ```text
//! <prefix>/
//!   libexec/
//!     vendor/     # private home for staged resources
//! ```

pub mod depends;
pub mod state;
pub mod steps;

pub use depends::{check_dependencies, DependencyProbe, PathProbe};
pub use state::{InstallState, StateMachine};
pub use steps::{PreparedCommand, StepOutput, StepRunner, StepStatus};

use crate::error::{Error, Result};
use crate::fetch::LocalArchive;
use crate::formula::{Formula, Resource, Substitutions};
use crate::stage::{ResourceStager, StagedResource};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Locations and environment for one install run
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub prefix: PathBuf,
    pub libexec: PathBuf,
    pub vendor: PathBuf,
    /// Root of the staging tree; resources land in `<staging_root>/<name>`
    pub staging_root: PathBuf,
    /// Extra environment for every step, applied after the builtin variables
    pub env: BTreeMap<String, String>,
    /// Parallelism hint passed to builds through `MAKEFLAGS`
    pub jobs: usize,
}

impl InstallContext {
    pub fn new(prefix: impl Into<PathBuf>, staging_root: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        let libexec = prefix.join("libexec");
        let vendor = libexec.join("vendor");
        Self {
            prefix,
            libexec,
            vendor,
            staging_root: staging_root.into(),
            env: BTreeMap::new(),
            jobs: 1,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Placeholder values for a formula whose source is at `source_dir`
    pub fn substitutions(&self, formula: &Formula, source_dir: &Path) -> Substitutions {
        let mut subs = Substitutions::new();
        subs.set("prefix", self.prefix.to_string_lossy())
            .set("libexec", self.libexec.to_string_lossy())
            .set("vendor", self.vendor.to_string_lossy())
            .set("name", formula.name.as_str())
            .set("version", formula.version.clone().unwrap_or_default())
            .set("source", source_dir.to_string_lossy())
            .set("staging", self.staging_root.to_string_lossy());
        subs
    }

    /// Environment applied to every step
    pub fn step_env(&self, formula: &Formula) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PANTRY_PREFIX".to_string(), self.prefix.to_string_lossy().into_owned());
        env.insert("PANTRY_VENDOR".to_string(), self.vendor.to_string_lossy().into_owned());
        env.insert("PANTRY_NAME".to_string(), formula.name.clone());
        env.insert("MAKEFLAGS".to_string(), format!("-j{}", self.jobs));
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Create the prefix, libexec and vendor directories
    pub fn prepare_prefix(&self) -> Result<()> {
        fs::create_dir_all(&self.vendor).map_err(|e| {
            Error::IoError(format!("Failed to create {}: {}", self.vendor.display(), e))
        })?;
        Ok(())
    }
}

/// Output of a completed build
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub steps_run: usize,
    pub commands: Vec<String>,
    pub log: String,
}

/// Drives one formula through the install lifecycle
pub struct Installer<'a> {
    formula: &'a Formula,
    context: InstallContext,
    probe: &'a dyn DependencyProbe,
    runner: StepRunner,
    machine: StateMachine,
    subs: Substitutions,
}

impl<'a> Installer<'a> {
    pub fn new(
        formula: &'a Formula,
        context: InstallContext,
        probe: &'a dyn DependencyProbe,
        timeout: Duration,
    ) -> Self {
        let runner = StepRunner::new(timeout, context.step_env(formula));
        let subs = context.substitutions(formula, &context.staging_root);
        Self {
            formula,
            context,
            probe,
            runner,
            machine: StateMachine::new(),
            subs,
        }
    }

    pub fn context(&self) -> &InstallContext {
        &self.context
    }

    pub fn state(&self) -> &InstallState {
        self.machine.current()
    }

    pub fn history(&self) -> &[InstallState] {
        self.machine.history()
    }

    /// Record a failure raised outside the installer (fetch, extraction)
    pub fn fail(&mut self, err: &Error) {
        self.machine.fail(format!("{}: {}", err.stage(), err));
    }

    /// Verify every build dependency is present
    pub fn check_dependencies(&mut self) -> Result<()> {
        info!("Checking {} build dependencies", self.formula.depends_on.len());
        if let Err(e) = check_dependencies(&self.formula.depends_on, self.probe) {
            self.fail(&e);
            return Err(e);
        }
        self.machine.advance(InstallState::DependenciesChecked)
    }

    /// Point `%(source)s` and step working directories at the extracted source
    pub fn set_source_dir(&mut self, source_dir: &Path) {
        self.subs = self.context.substitutions(self.formula, source_dir);
    }

    /// Commands the install steps would run, without running them
    ///
    /// Resources not yet staged are assumed at `<staging_root>/<name>`.
    pub fn plan(&self, source_dir: &Path) -> Result<Vec<PreparedCommand>> {
        let mut subs = self.subs.clone();
        for resource in &self.formula.resources {
            let key = format!("resource:{}", resource.name);
            if subs.get(&key).is_none() {
                subs.set_resource(
                    &resource.name,
                    self.context.staging_root.join(&resource.name).to_string_lossy(),
                );
            }
        }

        self.formula
            .install
            .iter()
            .map(|step| PreparedCommand::prepare(step, &subs, source_dir))
            .collect()
    }

    /// Create the prefix layout and stage resources in declaration order
    ///
    /// `archives` must pair each declared resource with its verified archive.
    pub fn stage_resources(
        &mut self,
        archives: &[(&Resource, &LocalArchive)],
    ) -> Result<Vec<StagedResource>> {
        match self.stage_resources_inner(archives) {
            Ok(staged) => {
                self.machine.advance(InstallState::ResourcesStaged)?;
                Ok(staged)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn stage_resources_inner(
        &mut self,
        archives: &[(&Resource, &LocalArchive)],
    ) -> Result<Vec<StagedResource>> {
        if !matches!(self.machine.current(), InstallState::DependenciesChecked) {
            return Err(Error::InvalidTransition {
                from: self.machine.current().name().to_string(),
                to: InstallState::ResourcesStaged.name().to_string(),
            });
        }

        self.context.prepare_prefix()?;

        let stager = ResourceStager::new(&self.runner);
        let mut staged = Vec::with_capacity(archives.len());

        for (resource, archive) in archives {
            let resource_staged = stager
                .stage(resource, archive, &self.context.staging_root, &self.subs)
                .map_err(|source| Error::Stage {
                    resource: resource.name.clone(),
                    source,
                })?;
            self.subs
                .set_resource(&resource.name, resource_staged.root.to_string_lossy());
            staged.push(resource_staged);
        }

        Ok(staged)
    }

    /// Run the install steps against the prefix
    ///
    /// Working directories default to `source_dir`. The first failing step
    /// aborts the rest.
    pub fn build(&mut self, source_dir: &Path) -> Result<BuildReport> {
        self.machine.advance(InstallState::Building)?;

        match self.run_steps(source_dir) {
            Ok(report) => {
                self.machine.advance(InstallState::Installed)?;
                info!(
                    "Installed {} into {}",
                    self.formula.display_name(),
                    self.context.prefix.display()
                );
                Ok(report)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn run_steps(&self, source_dir: &Path) -> Result<BuildReport> {
        let mut report = BuildReport::default();
        let total = self.formula.install.len();

        for (index, step) in self.formula.install.iter().enumerate() {
            let command = PreparedCommand::prepare(step, &self.subs, source_dir)?;
            info!("Step {}/{}: {}", index + 1, total, command);

            let output = self.runner.run(&command)?;
            report.log.push_str(&output.output);
            report.commands.push(output.command.clone());

            if let Err(e) = output.into_step_result(index, self.runner.timeout()) {
                if let Some(captured) = e.captured_output() {
                    debug!("Output of failed step {}:\n{}", index, captured);
                }
                return Err(e);
            }
            report.steps_run += 1;
        }

        Ok(report)
    }
}
