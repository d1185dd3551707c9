// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building the test target and resolving the initial test plan.

use crate::{
    config::ResolvedConfig,
    errors::{BuildError, ConfigurationError, RunError},
    helpers::{display_command, split_program},
    retry::TestSubset,
};
use camino::Utf8Path;
use multiscan_metadata::TestIdentifier;
use tracing::{debug, info};

/// What a builder gets to see of the run.
#[derive(Clone, Copy, Debug)]
pub struct BuildContext<'a> {
    /// The base directory for artifacts.
    pub output_directory: &'a Utf8Path,

    /// The tests the run is restricted to, if any.
    pub only_testing: &'a [TestIdentifier],
}

/// Builds the app and its test target, and optionally lists the tests it contains.
pub trait TestBuilder {
    /// Builds the test target. Returns `Ok(false)` if the build failed.
    fn build(&self, cx: &BuildContext<'_>) -> Result<bool, BuildError>;

    /// Lists the tests in the built target, or returns `None` if they can't be enumerated.
    fn list_tests(&self, _cx: &BuildContext<'_>) -> Result<Option<Vec<TestIdentifier>>, BuildError> {
        Ok(None)
    }
}

/// A [`TestBuilder`] that runs the configured build and list commands.
#[derive(Clone, Debug)]
pub struct CommandBuilder {
    build: Vec<String>,
    list: Option<Vec<String>>,
}

impl CommandBuilder {
    /// Creates a new builder.
    ///
    /// `list` prints one test identifier per line.
    pub fn new(build: Vec<String>, list: Option<Vec<String>>) -> Result<Self, ConfigurationError> {
        if build.is_empty() {
            return Err(ConfigurationError::EmptyCommand {
                name: "build-command",
            });
        }
        if list.as_ref().is_some_and(|list| list.is_empty()) {
            return Err(ConfigurationError::EmptyCommand {
                name: "list-command",
            });
        }
        Ok(Self { build, list })
    }

    fn expression(argv: &[String], cx: &BuildContext<'_>) -> Option<duct::Expression> {
        let (program, args) = split_program(argv)?;
        Some(
            duct::cmd(program, args)
                .env("MULTISCAN_OUTPUT_DIR", cx.output_directory.as_str())
                .stdin_null()
                .unchecked(),
        )
    }
}

impl TestBuilder for CommandBuilder {
    fn build(&self, cx: &BuildContext<'_>) -> Result<bool, BuildError> {
        let command = display_command(&self.build);
        let Some(expression) = Self::expression(&self.build, cx) else {
            return Ok(false);
        };
        info!(%command, "building test target");
        let output = expression
            .run()
            .map_err(|error| BuildError::Spawn { command, error })?;
        Ok(output.status.success())
    }

    fn list_tests(&self, cx: &BuildContext<'_>) -> Result<Option<Vec<TestIdentifier>>, BuildError> {
        let Some(list) = &self.list else {
            return Ok(None);
        };
        let Some(expression) = Self::expression(list, cx) else {
            return Ok(None);
        };
        let command = display_command(list);
        let output = expression
            .stdout_capture()
            .run()
            .map_err(|error| BuildError::Spawn { command: command.clone(), error })?;
        if !output.status.success() {
            debug!(%command, status = %output.status, "listing tests failed, running all tests");
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Some(
            stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(TestIdentifier::new)
                .collect(),
        ))
    }
}

/// The outcome of preparing a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PreparedRun {
    /// Whether the builder was invoked.
    pub built: bool,

    /// The tests the first attempt covers.
    pub initial_subset: TestSubset,
}

/// Builds the test target at most once, then resolves the first attempt's test plan.
///
/// Unless the run is in already-built mode, the builder is invoked exactly once and a failed build
/// is an error. The plan is `only-testing` if set. Otherwise, unless tests are discovered by
/// invocation, the builder is asked to list them. If the tests can't be listed, the first attempt
/// runs all tests.
pub fn prepare(config: &ResolvedConfig, builder: &dyn TestBuilder) -> Result<PreparedRun, RunError> {
    let cx = BuildContext {
        output_directory: &config.output_directory,
        only_testing: &config.only_testing,
    };

    let built = !config.test_without_building;
    if built {
        if !builder.build(&cx)? {
            return Err(RunError::BuildFailed);
        }
        remove_stray_reports(config);
    } else {
        debug!("test-without-building set, skipping build");
    }

    let initial_subset = if !config.only_testing.is_empty() {
        TestSubset::Only(config.only_testing.iter().cloned().collect())
    } else if config.invocation_based_tests {
        TestSubset::All
    } else {
        match builder.list_tests(&cx)? {
            Some(tests) if !tests.is_empty() => TestSubset::Only(tests.into_iter().collect()),
            _ => TestSubset::All,
        }
    };
    debug!(subset = %initial_subset, "resolved initial test plan");

    Ok(PreparedRun {
        built,
        initial_subset,
    })
}

// The build step may leave reports at the top of the output directory, where they would be
// mistaken for results.
fn remove_stray_reports(config: &ResolvedConfig) {
    for spec in &config.outputs {
        let path = config.output_directory.join(spec.file_name());
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else if path.exists() {
            std::fs::remove_file(&path)
        } else {
            continue;
        };
        match result {
            Ok(()) => debug!(%path, "removed stray report"),
            Err(error) => debug!(%path, "failed to remove stray report: {error}"),
        }
    }
}
