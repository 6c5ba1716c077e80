// src/cli.rs
//! CLI definitions for pantry
//!
//! The command implementations live in the `commands` module.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pantry")]
#[command(version)]
#[command(about = "Install packages from declarative formulas", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch, verify, stage and install a formula into a prefix
    Install {
        /// Path to the formula file
        recipe: PathBuf,

        /// Installation prefix
        #[arg(short, long)]
        prefix: PathBuf,

        /// Per-step timeout in seconds (install and setup steps)
        #[arg(long)]
        timeout: Option<u64>,

        /// Per-request download timeout in seconds
        #[arg(long, value_name = "SECS")]
        fetch_timeout: Option<u64>,

        /// Check dependencies and print the planned commands without installing
        #[arg(long)]
        dry_run: bool,

        /// Parent directory for the temporary staging tree
        #[arg(long)]
        staging_dir: Option<PathBuf>,

        /// Total fetch attempts per artifact
        #[arg(long)]
        retries: Option<u32>,

        /// Parallel downloads and build jobs
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Extra environment for install steps (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Extra directory to search for build dependencies (repeatable)
        #[arg(long = "search-path", value_name = "DIR")]
        search_paths: Vec<PathBuf>,

        /// Print the install result as JSON
        #[arg(long)]
        json: bool,

        /// Disable download progress bars
        #[arg(long)]
        no_progress: bool,
    },

    /// Parse and validate a formula, printing any warnings
    Validate {
        /// Path to the formula file
        recipe: PathBuf,
    },

    /// Fetch and verify every artifact of a formula without installing
    Fetch {
        /// Path to the formula file
        recipe: PathBuf,

        /// Directory to place verified archives in
        #[arg(short, long)]
        dest: PathBuf,

        /// Per-request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Total fetch attempts per artifact
        #[arg(long)]
        retries: Option<u32>,

        /// Disable download progress bars
        #[arg(long)]
        no_progress: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("CFLAGS=-O2 -g").unwrap(),
            ("CFLAGS".to_string(), "-O2 -g".to_string())
        );
        assert_eq!(parse_env_pair("EMPTY=").unwrap().1, "");
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=x").is_err());
    }

    #[test]
    fn test_install_flags() {
        let cli = Cli::try_parse_from([
            "pantry",
            "install",
            "scnmaster.toml",
            "--prefix",
            "/opt/scn",
            "--dry-run",
            "--env",
            "A=1",
            "--env",
            "B=2",
            "--retries",
            "5",
        ])
        .unwrap();

        match cli.command {
            Commands::Install {
                prefix,
                dry_run,
                env,
                retries,
                ..
            } => {
                assert_eq!(prefix, PathBuf::from("/opt/scn"));
                assert!(dry_run);
                assert_eq!(env.len(), 2);
                assert_eq!(retries, Some(5));
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_install_timeouts_are_separate() {
        let cli = Cli::try_parse_from([
            "pantry",
            "install",
            "scnmaster.toml",
            "--prefix",
            "/opt/scn",
            "--timeout",
            "600",
            "--fetch-timeout",
            "30",
        ])
        .unwrap();

        match cli.command {
            Commands::Install {
                timeout,
                fetch_timeout,
                ..
            } => {
                assert_eq!(timeout, Some(600));
                assert_eq!(fetch_timeout, Some(30));
            }
            _ => panic!("expected install"),
        }
    }
}
