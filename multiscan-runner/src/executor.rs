// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running the test command for a lane.

use crate::{
    errors::{ConfigurationError, LaneExecutionError},
    helpers::display_command,
    lanes::LaneAssignment,
    retry::TestSubset,
};
use futures::future::{BoxFuture, FutureExt};
use std::process::Stdio;
use tracing::debug;

/// Runs the tests of one lane.
///
/// Implementations return `Ok(false)` if tests failed, and an error only if the lane itself
/// couldn't complete. Dropping the returned future must cancel the execution.
pub trait TestExecutor: Sync {
    /// Executes the tests in `lane`, writing report artifacts to `lane.output_dir`.
    fn execute<'a>(&'a self, lane: &'a LaneAssignment)
    -> BoxFuture<'a, Result<bool, LaneExecutionError>>;
}

/// Environment variables exported to the test command and to command hooks.
pub(crate) fn lane_env(lane: &LaneAssignment) -> [(&'static str, String); 4] {
    [
        ("MULTISCAN_TARGET", lane.target.name().to_owned()),
        ("MULTISCAN_OUTPUT_DIR", lane.output_dir.to_string()),
        ("MULTISCAN_ATTEMPT", lane.attempt_index.to_string()),
        ("MULTISCAN_LANE", lane.lane_number().to_string()),
    ]
}

/// Expands lane placeholders in a command line.
///
/// `{target}`, `{output-dir}`, `{attempt}` and `{lane}` are replaced anywhere in an argument. An
/// argument that is exactly `{tests}` becomes one `-only-testing:<id>` argument per test, and is
/// dropped when all tests run.
pub(crate) fn expand_placeholders(argv: &[String], lane: &LaneAssignment) -> Vec<String> {
    let mut expanded = Vec::with_capacity(argv.len());
    for arg in argv {
        if arg == "{tests}" {
            if let TestSubset::Only(tests) = &lane.tests {
                expanded.extend(tests.iter().map(|id| format!("-only-testing:{id}")));
            }
            continue;
        }
        expanded.push(
            arg.replace("{target}", lane.target.name())
                .replace("{output-dir}", lane.output_dir.as_str())
                .replace("{attempt}", &lane.attempt_index.to_string())
                .replace("{lane}", &lane.lane_number().to_string()),
        );
    }
    expanded
}

/// A [`TestExecutor`] that spawns the configured test command.
///
/// The command's standard output and error are written to `output.log` in the lane directory.
#[derive(Clone, Debug)]
pub struct CommandExecutor {
    argv: Vec<String>,
}

impl CommandExecutor {
    /// The name of the file a lane's command output is written to.
    pub const OUTPUT_LOG: &'static str = "output.log";

    /// Creates a new executor for the given command line.
    pub fn new(argv: Vec<String>) -> Result<Self, ConfigurationError> {
        if argv.is_empty() {
            return Err(ConfigurationError::EmptyCommand {
                name: "test-command",
            });
        }
        Ok(Self { argv })
    }

    async fn run(&self, lane: &LaneAssignment) -> Result<bool, LaneExecutionError> {
        let argv = expand_placeholders(&self.argv, lane);
        let Some((program, args)) = argv.split_first() else {
            return Err(LaneExecutionError::Crashed {
                message: "test command expanded to nothing".to_owned(),
            });
        };
        debug!(
            attempt = lane.attempt_index,
            lane = lane.lane_number(),
            target = %lane.target,
            command = %display_command(&argv),
            "running test command"
        );

        let spawn_error = |error| LaneExecutionError::Spawn {
            program: program.clone(),
            error,
        };
        let log_path = lane.output_dir.join(Self::OUTPUT_LOG);
        let stdout = std::fs::File::create(&log_path).map_err(spawn_error)?;
        let stderr = stdout.try_clone().map_err(spawn_error)?;

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .envs(lane_env(lane))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            // A lane timeout drops this future, which must take the process down with it.
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let status = child.wait().await.map_err(spawn_error)?;
        match status.code() {
            Some(_) => Ok(status.success()),
            None => Err(LaneExecutionError::Crashed {
                message: format!("`{program}` was terminated: {status}"),
            }),
        }
    }
}

impl TestExecutor for CommandExecutor {
    fn execute<'a>(
        &'a self,
        lane: &'a LaneAssignment,
    ) -> BoxFuture<'a, Result<bool, LaneExecutionError>> {
        self.run(lane).boxed()
    }
}
