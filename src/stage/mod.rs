// src/stage/mod.rs

//! Resource staging
//!
//! A resource is a verified auxiliary archive (a helper library, a
//! runtime module) that must be unpacked and set up before the main
//! install runs. Each one gets its own directory under the staging root:
//!
//! ```text
//! <staging>/
//!   pexpect/            # staging_root/<resource name>
//!     pexpect-3.3/      # tree root when the tarball has one top-level dir
//! ```
//!
//! The stager never overwrites: staging into an occupied directory fails
//! with [`StageError::AlreadyStaged`].

mod archive;

pub use archive::{extract_archive, ArchiveFormat};

use crate::error::StageError;
use crate::fetch::LocalArchive;
use crate::formula::{Resource, Substitutions};
use crate::install::steps::{
    PreparedCommand, StepRunner, StepStatus, RUNNER_ERROR_EXIT_CODE, TIMEOUT_EXIT_CODE,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A resource unpacked and set up in the staging tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedResource {
    pub name: String,
    /// `staging_root/<name>`
    pub dir: PathBuf,
    /// Directory setup steps ran in, and what `%(resource:NAME)s` expands to
    pub root: PathBuf,
    /// Number of setup steps executed
    pub setup_steps: usize,
    /// Captured output of every setup step
    pub log: String,
}

/// Extracts resources and runs their setup procedures
pub struct ResourceStager<'a> {
    runner: &'a StepRunner,
}

impl<'a> ResourceStager<'a> {
    pub fn new(runner: &'a StepRunner) -> Self {
        Self { runner }
    }

    /// Stage one resource under `staging_root`
    ///
    /// `subs` supplies the install locations and previously staged
    /// resources; this resource's own root is added before setup runs.
    pub fn stage(
        &self,
        resource: &Resource,
        archive: &LocalArchive,
        staging_root: &Path,
        subs: &Substitutions,
    ) -> Result<StagedResource, StageError> {
        let dir = staging_root.join(&resource.name);
        if dir.exists() {
            return Err(StageError::AlreadyStaged { path: dir });
        }

        fs::create_dir_all(&dir).map_err(|e| {
            StageError::Extraction(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let root = match extract_archive(&archive.path, &dir) {
            Ok(root) => root,
            Err(e) => {
                let _ = fs::remove_dir_all(&dir);
                return Err(e);
            }
        };
        info!("Staged resource {} at {}", resource.name, root.display());

        let mut subs = subs.clone();
        subs.set_resource(&resource.name, root.to_string_lossy());

        let mut log = String::new();
        for (step_index, step) in resource.setup.iter().enumerate() {
            let setup_failed = |exit_code: i32, captured_output: String| StageError::SetupFailed {
                step_index,
                exit_code,
                captured_output,
            };

            let command = PreparedCommand::prepare(step, &subs, &root)
                .map_err(|e| setup_failed(RUNNER_ERROR_EXIT_CODE, e.to_string()))?;
            info!("Setting up {} ({}/{}): {}", resource.name, step_index + 1, resource.setup.len(), command);

            let output = self
                .runner
                .run(&command)
                .map_err(|e| setup_failed(RUNNER_ERROR_EXIT_CODE, e.to_string()))?;
            log.push_str(&output.output);

            match output.status {
                StepStatus::Success => {}
                StepStatus::Failed(code) => return Err(setup_failed(code, output.output)),
                StepStatus::TimedOut => {
                    warn!(
                        "Setup of {} timed out after {} seconds",
                        resource.name,
                        self.runner.timeout().as_secs()
                    );
                    return Err(setup_failed(TIMEOUT_EXIT_CODE, output.output));
                }
            }
        }

        debug!(
            "Resource {} ready after {} setup step(s)",
            resource.name,
            resource.setup.len()
        );

        Ok(StagedResource {
            name: resource.name.clone(),
            dir,
            root,
            setup_steps: resource.setup.len(),
            log,
        })
    }
}
