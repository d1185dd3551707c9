// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resetting simulators and logs so that stale state doesn't leak into the next attempt.

use crate::{
    errors::ResetError,
    helpers::{display_command, split_program},
    lanes::ExecutionTarget,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use tracing::debug;

/// When a reset happens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResetPhase {
    /// Once, before the first attempt.
    Preparation,

    /// After an attempt, before the retry that follows it.
    BetweenAttempts,

    /// After the final attempt.
    Exit,
}

impl fmt::Display for ResetPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparation => write!(f, "preparation"),
            Self::BetweenAttempts => write!(f, "between attempts"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

/// What a reset gets to see of the run.
#[derive(Clone, Copy, Debug)]
pub struct ResetContext<'a> {
    /// When the reset happens.
    pub phase: ResetPhase,

    /// The attempt that just finished, if any.
    pub completed_attempt: Option<usize>,

    /// The targets lanes run against.
    pub targets: &'a [ExecutionTarget],
}

/// Disposes of stale simulator processes and logs.
///
/// Resets are best effort: errors are logged by the caller and never fail the run.
pub trait EnvironmentReset {
    /// Resets the environment.
    fn reset(&self, cx: &ResetContext<'_>) -> Result<(), ResetError>;
}

/// An [`EnvironmentReset`] that runs the configured reset commands and removes stale logs.
#[derive(Clone, Debug, Default)]
pub struct CommandReset {
    commands: Vec<Vec<String>>,
    log_directory: Option<Utf8PathBuf>,
}

impl CommandReset {
    /// Creates a new reset.
    ///
    /// Each command runs in order, and its exit status is ignored. Stale `*.log` files below
    /// `log_directory` are removed afterwards.
    pub fn new(commands: Vec<Vec<String>>, log_directory: Option<Utf8PathBuf>) -> Self {
        Self {
            commands,
            log_directory,
        }
    }

    fn remove_logs(dir: &Utf8Path) -> Result<usize, ResetError> {
        let mut removed = 0;
        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
        {
            let Ok(path) = Utf8PathBuf::try_from(entry.into_path()) else {
                continue;
            };
            if path.extension() != Some("log") {
                continue;
            }
            std::fs::remove_file(&path).map_err(|error| ResetError::RemoveLog {
                path: path.clone(),
                error,
            })?;
            removed += 1;
        }
        Ok(removed)
    }
}

impl EnvironmentReset for CommandReset {
    fn reset(&self, cx: &ResetContext<'_>) -> Result<(), ResetError> {
        let mut first_error = None;

        for argv in &self.commands {
            let Some((program, args)) = split_program(argv) else {
                continue;
            };
            let command = display_command(argv);
            debug!(phase = %cx.phase, %command, "running reset command");
            let result = duct::cmd(program, args)
                .stdin_null()
                .stdout_null()
                .stderr_null()
                .unchecked()
                .run();
            if let Err(error) = result {
                first_error.get_or_insert(ResetError::Command { command, error });
            }
        }

        if let Some(dir) = &self.log_directory {
            match Self::remove_logs(dir) {
                Ok(removed) => debug!(phase = %cx.phase, %dir, removed, "removed stale logs"),
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
