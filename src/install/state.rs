// src/install/state.rs

//! Install lifecycle state machine
//!
//! ```text
//! Pending -> DependenciesChecked -> ResourcesStaged -> Building -> Installed
//!    \              \                     \               \
//!     +--------------+---------------------+---------------+--> Failed
//! ```
//!
//! States only move forward. `Installed` and `Failed` are terminal.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Where an install run currently is
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstallState {
    Pending,
    DependenciesChecked,
    ResourcesStaged,
    Building,
    Installed,
    Failed { reason: String },
}

impl InstallState {
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::DependenciesChecked => 1,
            Self::ResourcesStaged => 2,
            Self::Building => 3,
            Self::Installed => 4,
            Self::Failed { .. } => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Installed | Self::Failed { .. })
    }

    /// Whether moving from `self` to `next` is legal
    pub fn can_transition_to(&self, next: &InstallState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed { .. } => true,
            _ => next.rank() == self.rank() + 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::DependenciesChecked => "dependencies_checked",
            Self::ResourcesStaged => "resources_staged",
            Self::Building => "building",
            Self::Installed => "installed",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "failed ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// The current state plus every state visited so far
#[derive(Debug, Clone, Serialize)]
pub struct StateMachine {
    current: InstallState,
    history: Vec<InstallState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: InstallState::Pending,
            history: vec![InstallState::Pending],
        }
    }

    pub fn current(&self) -> &InstallState {
        &self.current
    }

    pub fn history(&self) -> &[InstallState] {
        &self.history
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: InstallState) -> Result<()> {
        if !self.current.can_transition_to(&next) {
            return Err(Error::InvalidTransition {
                from: self.current.name().to_string(),
                to: next.name().to_string(),
            });
        }
        debug!("Install state: {} -> {}", self.current, next);
        self.current = next.clone();
        self.history.push(next);
        Ok(())
    }

    /// Record a failure unless the run already reached a terminal state
    pub fn fail(&mut self, reason: impl Into<String>) {
        let failed = InstallState::Failed {
            reason: reason.into(),
        };
        if self.current.can_transition_to(&failed) {
            self.current = failed.clone();
            self.history.push(failed);
        }
    }
}
