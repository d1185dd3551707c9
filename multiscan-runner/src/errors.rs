// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by multiscan.

use camino::Utf8PathBuf;
use config::ConfigError;
use multiscan_metadata::{MultiscanExitCode, RunSummary};
use std::{borrow::Cow, error::Error, fmt, time::Duration};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse multiscan config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// A self-contradictory or invalid configuration, detected before any attempt is made.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Two options can't be used together.
    #[error("can't use '{first}' and '{second}' options in one run, because {reason}")]
    IncompatibleOptions {
        /// The first option.
        first: &'static str,

        /// The second option.
        second: &'static str,

        /// Why the options are incompatible.
        reason: &'static str,
    },

    /// An option had an invalid value.
    #[error("invalid value for '{name}': {value} ({reason})")]
    InvalidValue {
        /// The option name.
        name: &'static str,

        /// The value that was provided.
        value: String,

        /// Why the value is invalid.
        reason: &'static str,
    },

    /// An output type isn't known.
    #[error("unknown output type '{name}' (known types: {})", .known.join(", "))]
    UnknownOutputType {
        /// The unrecognized output type.
        name: String,

        /// The known output types.
        known: Vec<&'static str>,
    },

    /// The number of output files doesn't match the number of output types.
    #[error(
        "'output-files' has {files} entries but 'output-types' has {types}: \
         each output type needs exactly one file name"
    )]
    OutputFilesMismatch {
        /// The number of output types.
        types: usize,

        /// The number of output files.
        files: usize,
    },

    /// A hook value was of the wrong type.
    #[error("'{name}' value must be a command array! Found {found} instead.")]
    HookType {
        /// The option name.
        name: &'static str,

        /// A description of the type that was found.
        found: &'static str,
    },

    /// There aren't enough execution targets for the configured number of lanes.
    #[error(
        "{lane_count} parallel lanes need at least {lane_count} distinct targets, \
         but {target_count} were configured"
    )]
    TargetCount {
        /// The number of lanes.
        lane_count: usize,

        /// The number of configured targets.
        target_count: usize,
    },

    /// The same execution target was listed more than once.
    #[error("target '{name}' is listed more than once: lanes can't share a target")]
    DuplicateTarget {
        /// The repeated target.
        name: String,
    },

    /// A command was configured but empty.
    #[error("'{name}' must contain at least the program to run")]
    EmptyCommand {
        /// The option name.
        name: &'static str,
    },
}

/// An error that occurs while parsing a [`LanePartition`](crate::partition::LanePartition) input.
#[derive(Clone, Debug, Error)]
pub struct PartitionParseError {
    message: Cow<'static, str>,
}

impl PartitionParseError {
    pub(crate) fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for PartitionParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// An error that occurred while decoding a single report artifact.
///
/// Decode errors are never fatal: the artifact contributes no records.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The artifact couldn't be read.
    #[error("failed to read report `{path}`")]
    Read {
        /// The artifact path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The artifact isn't well-formed XML.
    #[error("failed to parse XML report `{path}`")]
    Xml {
        /// The artifact path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_xml::Error,
    },

    /// The summary of a result bundle couldn't be parsed.
    #[error("failed to parse result bundle summary for `{path}`")]
    Json {
        /// The artifact path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The tool used to summarize a result bundle failed.
    #[error("failed to summarize result bundle `{path}` with `{tool}`")]
    Tool {
        /// The artifact path.
        path: Utf8PathBuf,

        /// The tool that was invoked.
        tool: &'static str,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that occurred while executing a single lane.
///
/// Lane errors are never fatal: the lane contributes no reports.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaneExecutionError {
    /// The lane's output directory couldn't be created.
    #[error("failed to create lane output directory `{path}`")]
    CreateOutputDir {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The test process couldn't be spawned or waited on.
    #[error("failed to run `{program}`")]
    Spawn {
        /// The program that was run.
        program: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The lane didn't finish within its timeout.
    #[error("lane timed out after {}", display_duration(.timeout))]
    TimedOut {
        /// The timeout that fired.
        timeout: Duration,
    },

    /// The lane crashed for a reason reported by the executor.
    #[error("lane crashed: {message}")]
    Crashed {
        /// A description of the crash.
        message: String,
    },

    /// No execution target was free for the lane.
    #[error("no execution target available for lane {slice}")]
    NoTarget {
        /// The slice that couldn't be scheduled.
        slice: usize,
    },
}

/// An error that occurred while invoking the builder.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// The build or list command couldn't be run.
    #[error("failed to run `{command}`")]
    Spawn {
        /// The command that was run.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that occurred while resetting the environment.
///
/// Reset errors are logged and never fatal.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResetError {
    /// A reset command couldn't be run.
    #[error("failed to run reset command `{command}`")]
    Command {
        /// The command that was run.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A stale log file couldn't be removed.
    #[error("failed to remove stale log `{path}`")]
    RemoveLog {
        /// The log file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that occurred while writing the collated report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CollateError {
    /// An error occurred while creating the report file or its parent directory.
    #[error("failed to write collated report to `{file}`")]
    Fs {
        /// The file that couldn't be written.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while serializing the report.
    #[error("failed to serialize collated JUnit report to `{file}`")]
    Junit {
        /// The file that couldn't be written.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },
}

/// An error returned by [`RunOrchestrator::run`](crate::orchestrator::RunOrchestrator::run) and
/// [`RunOrchestratorBuilder::build`](crate::orchestrator::RunOrchestratorBuilder::build).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// The config file couldn't be parsed.
    #[error(transparent)]
    ConfigParse(#[from] ConfigParseError),

    /// The configuration is self-contradictory. No attempt was made.
    #[error("invalid configuration")]
    Configuration(#[from] ConfigurationError),

    /// The builder couldn't be invoked.
    #[error("error invoking builder")]
    Build(#[from] BuildError),

    /// The builder reported a failed build.
    #[error("building the test target failed")]
    BuildFailed,

    /// The tokio runtime couldn't be created.
    #[error("error creating Tokio runtime")]
    RuntimeCreate(#[source] std::io::Error),

    /// Tests failed, and the run was configured to fail the build.
    #[error("Tests have failed: {failed_count} failed {}", plural_tests(.failed_count))]
    TestsFailed {
        /// The number of failures.
        failed_count: usize,

        /// The summary of the run.
        summary: Box<RunSummary>,
    },
}

impl RunError {
    /// Returns true if this is the policy-level failure raised when tests failed.
    pub fn is_test_failure(&self) -> bool {
        matches!(self, Self::TestsFailed { .. })
    }

    /// Returns true if this error was raised before any attempt because of the configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::ConfigParse(_))
    }

    /// Returns the run summary, if tests failed.
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::TestsFailed { summary, .. } => Some(summary),
            _ => None,
        }
    }

    /// Returns the exit code a command-line tool should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigParse(_) | Self::RuntimeCreate(_) => MultiscanExitCode::SETUP_ERROR,
            Self::Configuration(_) => MultiscanExitCode::CONFIGURATION_ERROR,
            Self::Build(_) | Self::BuildFailed => MultiscanExitCode::BUILD_FAILED,
            Self::TestsFailed { .. } => MultiscanExitCode::TEST_RUN_FAILED,
        }
    }
}

fn plural_tests(count: &usize) -> &'static str {
    crate::helpers::plural::tests_str(*count)
}

fn display_duration(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

/// Displays an error along with its chain of sources, one per line.
pub struct DisplayErrorChain<E>(E);

impl<E: Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, "\n  caused by: {error}")?;
            source = error.source();
        }
        Ok(())
    }
}
