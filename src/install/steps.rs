// src/install/steps.rs

//! External command execution for install and setup steps
//!
//! Every step runs with stdin closed and stdout/stderr captured, in a
//! process group of its own. Pipes are drained on background threads so a
//! chatty build cannot deadlock against a full pipe while the runner waits
//! on the timeout.
//!
//! When the step's main process exits, or the timeout expires, the whole
//! group is killed. Backgrounded descendants can neither hold the pipes
//! open past the deadline nor write into the prefix after the step has
//! been reported.

use crate::error::{Error, Result};
use crate::formula::{InstallStep, Substitutions};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Exit code reported when a step's executable cannot be spawned
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Exit code reported for a step killed by the timeout
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Exit code reported when a step could not be prepared or the runner failed
pub const RUNNER_ERROR_EXIT_CODE: i32 = -2;

/// Signal-terminated steps report `128 + signal`, as shells do
pub const SIGNAL_EXIT_BASE: i32 = 128;

/// How long pipe readers get once the step's process group is gone
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// A step with every placeholder substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl PreparedCommand {
    /// Substitute placeholders in `step`
    ///
    /// A relative `workdir` is resolved against `default_workdir`.
    pub fn prepare(step: &InstallStep, subs: &Substitutions, default_workdir: &Path) -> Result<Self> {
        let program = subs.apply(&step.executable)?;
        let args = step
            .args
            .iter()
            .map(|arg| subs.apply(arg))
            .collect::<Result<Vec<_>>>()?;

        let workdir = match &step.workdir {
            Some(dir) => {
                let dir = PathBuf::from(subs.apply(dir)?);
                if dir.is_absolute() {
                    dir
                } else {
                    default_workdir.join(dir)
                }
            }
            None => default_workdir.to_path_buf(),
        };

        let mut env = BTreeMap::new();
        for (key, value) in &step.env {
            env.insert(key.clone(), subs.apply(value)?);
        }

        Ok(Self {
            program,
            args,
            workdir,
            env,
        })
    }
}

impl fmt::Display for PreparedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Failed(i32),
    TimedOut,
}

impl StepStatus {
    /// Exit code, with sentinels for timeouts
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failed(code) => *code,
            Self::TimedOut => TIMEOUT_EXIT_CODE,
        }
    }
}

/// Result of running one command
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub command: String,
    pub status: StepStatus,
    /// Captured stdout followed by stderr
    pub output: String,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// Convert a failed install step into the matching error
    pub fn into_step_result(self, step_index: usize, timeout: Duration) -> Result<StepOutput> {
        match self.status {
            StepStatus::Success => Ok(self),
            StepStatus::Failed(exit_code) => Err(Error::StepFailed {
                step_index,
                exit_code,
                command: self.command,
                captured_output: self.output,
            }),
            StepStatus::TimedOut => Err(Error::StepTimedOut {
                step_index,
                command: self.command,
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

/// Runs prepared commands under a timeout and a shared environment
#[derive(Debug, Clone)]
pub struct StepRunner {
    timeout: Duration,
    env: BTreeMap<String, String>,
}

impl StepRunner {
    pub fn new(timeout: Duration, env: BTreeMap<String, String>) -> Self {
        Self { timeout, env }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a command to completion or until the timeout expires
    ///
    /// Only I/O failures of the runner itself are errors. A command that
    /// cannot be spawned is reported as failed with exit code 127.
    pub fn run(&self, command: &PreparedCommand) -> Result<StepOutput> {
        let rendered = command.to_string();
        debug!("Executing in {}: {}", command.workdir.display(), rendered);
        let deadline = Instant::now() + self.timeout;

        let spawned = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.workdir)
            .envs(&self.env)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn '{}': {}", command.program, e);
                return Ok(StepOutput {
                    command: rendered,
                    status: StepStatus::Failed(SPAWN_FAILURE_EXIT_CODE),
                    output: format!(
                        "failed to spawn '{}' in {}: {}",
                        command.program,
                        command.workdir.display(),
                        e
                    ),
                });
            }
        };

        let (tx, rx) = mpsc::channel();
        if let Some(pipe) = child.stdout.take() {
            drain(Pipe::Stdout, pipe, tx.clone());
        }
        if let Some(pipe) = child.stderr.take() {
            drain(Pipe::Stderr, pipe, tx.clone());
        }
        drop(tx);

        // process_group(0) makes the child the leader of a group with its own pid
        let group = Pid::from_raw(child.id() as i32);

        let waited = child.wait_timeout(self.timeout);
        kill_group(group);

        let waited = match waited {
            Ok(waited) => waited,
            Err(e) => {
                let _ = child.wait();
                return Err(e.into());
            }
        };

        match waited {
            Some(status) => {
                let mut output = collect(&rx, deadline.max(Instant::now() + OUTPUT_GRACE));

                for line in output.lines() {
                    debug!("[{}] {}", command.program, line);
                }

                let status = if status.success() {
                    StepStatus::Success
                } else if let Some(code) = status.code() {
                    StepStatus::Failed(code)
                } else {
                    let signal = status.signal().unwrap_or(0);
                    output.push_str(&format!("terminated by signal {}\n", signal));
                    StepStatus::Failed(SIGNAL_EXIT_BASE + signal)
                };

                Ok(StepOutput {
                    command: rendered,
                    status,
                    output,
                })
            }
            None => {
                let _ = child.wait();
                warn!(
                    "'{}' timed out after {} seconds",
                    rendered,
                    self.timeout.as_secs()
                );

                let mut output = collect(&rx, Instant::now() + OUTPUT_GRACE);
                output.push_str(&format!(
                    "timed out after {} seconds\n",
                    self.timeout.as_secs()
                ));
                Ok(StepOutput {
                    command: rendered,
                    status: StepStatus::TimedOut,
                    output,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

fn drain<R: Read + Send + 'static>(pipe: Pipe, mut reader: R, tx: Sender<(Pipe, Vec<u8>)>) {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send((pipe, buf));
    });
}

/// Gather what the readers produced, giving up at `deadline`
///
/// A reader still blocked at the deadline belongs to a process that left
/// the step's group; its output is dropped.
fn collect(rx: &Receiver<(Pipe, Vec<u8>)>, deadline: Instant) -> String {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((Pipe::Stdout, bytes)) => stdout = bytes,
            Ok((Pipe::Stderr, bytes)) => stderr = bytes,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                debug!("Step output still open at deadline, dropping the rest");
                break;
            }
        }
    }

    let mut output = String::from_utf8_lossy(&stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(&stderr));
    output
}

fn kill_group(group: Pid) {
    match killpg(group, Signal::SIGKILL) {
        Ok(()) => debug!("Killed remaining processes in group {}", group),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", group, e),
    }
}
