// src/main.rs

mod cli;
mod commands;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use std::process::ExitCode;
use tracing::debug;

/// Exit code for failures that carry no library error
const INTERNAL_EXIT_CODE: u8 = 5;

fn main() -> ExitCode {
    // Logs go to stderr so `--json` output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Install {
            recipe,
            prefix,
            timeout,
            fetch_timeout,
            dry_run,
            staging_dir,
            retries,
            jobs,
            env,
            search_paths,
            json,
            no_progress,
        } => commands::cmd_install(
            &recipe,
            &prefix,
            timeout,
            fetch_timeout,
            dry_run,
            staging_dir,
            retries,
            jobs,
            env,
            search_paths,
            json,
            no_progress,
        ),
        Commands::Validate { recipe } => commands::cmd_validate(&recipe),
        Commands::Fetch {
            recipe,
            dest,
            timeout,
            retries,
            no_progress,
        } => commands::cmd_fetch(&recipe, &dest, timeout, retries, no_progress),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pantry", &mut std::io::stdout());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let library_error = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<pantry::Error>());

            let (stage, code) = match library_error {
                Some(e) => {
                    if let Some(output) = e.captured_output() {
                        debug!("Captured output:\n{}", output);
                    }
                    (e.stage(), u8::try_from(e.exit_code()).unwrap_or(INTERNAL_EXIT_CODE))
                }
                None => ("internal", INTERNAL_EXIT_CODE),
            };

            eprintln!("error: [{}] {:#}", stage, err);
            ExitCode::from(code)
        }
    }
}
