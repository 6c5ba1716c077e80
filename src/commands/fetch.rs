// src/commands/fetch.rs

//! Fetch command - download and verify artifacts only

use anyhow::{Context, Result};
use pantry::{InstallConfig, Orchestrator};
use std::path::Path;
use std::time::Duration;

pub fn cmd_fetch(
    recipe: &Path,
    dest: &Path,
    timeout: Option<u64>,
    retries: Option<u32>,
    no_progress: bool,
) -> Result<()> {
    let mut config = InstallConfig::from_env()?;
    if let Some(secs) = timeout {
        config.fetch_timeout = Duration::from_secs(secs);
    }
    if let Some(n) = retries {
        config.retries = n;
    }
    config.show_progress = !no_progress;

    let content = std::fs::read_to_string(recipe)
        .with_context(|| format!("Failed to read formula {}", recipe.display()))?;

    let archives = Orchestrator::new(config).fetch_only(&content, dest)?;

    for archive in &archives {
        println!(
            "{}  {} ({} bytes)",
            archive.checksum,
            archive.path.display(),
            archive.size
        );
    }
    println!("[OK] {} artifact(s) verified", archives.len());
    Ok(())
}
