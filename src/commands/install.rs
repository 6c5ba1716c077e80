// src/commands/install.rs

//! Install command - run a formula into a prefix

use anyhow::{Context, Result};
use pantry::{InstallConfig, InstallResult, Orchestrator, PrefixLock};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Install a formula
///
/// Flags override `PANTRY_*` environment variables, which override the
/// built-in defaults. Installs into the same prefix are serialized with
/// a [`PrefixLock`]; dry runs skip the lock since they mutate nothing.
#[allow(clippy::too_many_arguments)]
pub fn cmd_install(
    recipe: &Path,
    prefix: &Path,
    timeout: Option<u64>,
    fetch_timeout: Option<u64>,
    dry_run: bool,
    staging_dir: Option<PathBuf>,
    retries: Option<u32>,
    jobs: Option<usize>,
    env: Vec<(String, String)>,
    search_paths: Vec<PathBuf>,
    json: bool,
    no_progress: bool,
) -> Result<()> {
    let mut config = InstallConfig::from_env()?;

    if let Some(secs) = timeout {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = fetch_timeout {
        config.fetch_timeout = Duration::from_secs(secs);
    }
    if let Some(dir) = staging_dir {
        config.staging_dir = dir;
    }
    if let Some(n) = retries {
        config.retries = n;
    }
    if let Some(j) = jobs {
        config.jobs = j.max(1);
    }
    config.env.extend(env);
    config.search_paths.extend(search_paths);
    config.dry_run = dry_run;
    config.show_progress = !no_progress && !json;

    let _lock = if dry_run {
        None
    } else {
        Some(lock_prefix(prefix)?)
    };

    let orchestrator = Orchestrator::new(config);
    let result = orchestrator.run_file(recipe, prefix)?;

    if json {
        let rendered = serde_json::to_string_pretty(&result)
            .context("Failed to serialize install result")?;
        println!("{}", rendered);
    } else {
        print_summary(&result);
    }

    Ok(())
}

fn lock_prefix(prefix: &Path) -> Result<PrefixLock> {
    if let Some(lock) = PrefixLock::try_acquire(prefix)? {
        return Ok(lock);
    }

    info!(
        "Another install holds {}, waiting for it to finish",
        PrefixLock::lock_path(prefix)?.display()
    );
    Ok(PrefixLock::acquire(prefix)?)
}

fn print_summary(result: &InstallResult) {
    let label = match &result.version {
        Some(v) => format!("{} {}", result.name, v),
        None => result.name.clone(),
    };

    for warning in &result.warnings {
        println!("Warning: {}", warning);
    }

    if result.dry_run {
        println!("Would install {} into {}", label, result.prefix.display());
        for (index, command) in result.planned_commands.iter().enumerate() {
            println!("  [{}] {}", index, command);
        }
        return;
    }

    println!("Installed {} into {}", label, result.prefix.display());
    if !result.staged_resources.is_empty() {
        println!("  Resources: {}", result.staged_resources.join(", "));
    }
    println!("  Steps run: {}", result.steps_run);
    println!("  Files: {}", result.installed_files.len());
}
