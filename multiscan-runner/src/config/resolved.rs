// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{MultiscanConfig, RawHookValue, ResultPolicy, StructuredMerge};
use crate::{
    errors::ConfigurationError,
    hook::LaneStartedHook,
    lanes::ExecutionTarget,
    partition::LanePartition,
    report::{ReportFormat, ReportSpec},
};
use camino::{Utf8Path, Utf8PathBuf};
use multiscan_metadata::TestIdentifier;
use std::{collections::HashSet, time::Duration};
use tracing::debug;

/// Values that override the config file for a single run.
///
/// Every field left as `None` falls back to the config file, and from there to the default
/// config.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub(crate) try_count: Option<usize>,
    pub(crate) lane_count: Option<usize>,
    pub(crate) batch_count: Option<usize>,
    pub(crate) invocation_based_tests: Option<bool>,
    pub(crate) output_types: Option<String>,
    pub(crate) output_files: Option<String>,
    pub(crate) output_directory: Option<Utf8PathBuf>,
    pub(crate) result_bundle: Option<bool>,
    pub(crate) fail_build: Option<bool>,
    pub(crate) result_policy: Option<ResultPolicy>,
    pub(crate) structured_merge: Option<StructuredMerge>,
    pub(crate) quit_simulators: Option<bool>,
    pub(crate) reset_on_exit: Option<bool>,
    pub(crate) lane_timeout: Option<Duration>,
    pub(crate) lane_partition: Option<LanePartition>,
    pub(crate) test_without_building: Option<bool>,
    pub(crate) only_testing: Option<Vec<TestIdentifier>>,
    pub(crate) targets: Option<Vec<String>>,
    pub(crate) collate_reports: Option<bool>,
    pub(crate) lane_started_hook: Option<LaneStartedHook>,
}

/// A configuration that has passed validation, with overrides applied.
///
/// Produced by [`MultiscanConfig::validate`], which runs exactly once per run, before the build.
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    pub(crate) try_count: usize,
    pub(crate) lane_count: usize,
    pub(crate) batch_count: Option<usize>,
    pub(crate) invocation_based_tests: bool,
    pub(crate) outputs: Vec<ReportSpec>,
    pub(crate) output_directory: Utf8PathBuf,
    pub(crate) result_bundle: bool,
    pub(crate) fail_build: bool,
    pub(crate) result_policy: ResultPolicy,
    pub(crate) structured_merge: StructuredMerge,
    pub(crate) quit_simulators: bool,
    pub(crate) reset_on_exit: bool,
    pub(crate) lane_timeout: Option<Duration>,
    pub(crate) lane_partition: LanePartition,
    pub(crate) test_without_building: bool,
    pub(crate) only_testing: Vec<TestIdentifier>,
    pub(crate) targets: Vec<ExecutionTarget>,
    pub(crate) collated_report: Option<Utf8PathBuf>,
    pub(crate) lane_started_hook: Option<LaneStartedHook>,
}

impl ResolvedConfig {
    /// Returns the maximum number of attempts.
    pub fn try_count(&self) -> usize {
        self.try_count
    }

    /// Returns the number of lanes that run concurrently.
    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// Returns the number of slices a concrete test plan is split into.
    ///
    /// This is the batch count if one was configured, and the lane count otherwise.
    pub fn slice_count(&self) -> usize {
        self.batch_count.unwrap_or(self.lane_count)
    }

    /// Returns the requested report formats, paired with their output file names.
    pub fn outputs(&self) -> &[ReportSpec] {
        &self.outputs
    }

    /// Returns the base directory for artifacts.
    pub fn output_directory(&self) -> &Utf8Path {
        &self.output_directory
    }

    /// Returns true if a failing run should produce an error.
    pub fn fail_build(&self) -> bool {
        self.fail_build
    }

    /// Returns the execution targets lanes draw from.
    pub fn targets(&self) -> &[ExecutionTarget] {
        &self.targets
    }

    /// Returns the path of the collated report, if one should be written.
    pub fn collated_report(&self) -> Option<&Utf8Path> {
        self.collated_report.as_deref()
    }
}

impl MultiscanConfig {
    /// Applies `overrides` and checks the configuration for contradictions.
    ///
    /// This is the only validation pass. It doesn't touch the filesystem or run anything.
    pub fn validate(
        &self,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfig, ConfigurationError> {
        let inner = &self.inner;

        let try_count = at_least_one("try-count", overrides.try_count.unwrap_or(inner.try_count))?;
        let lane_count = at_least_one(
            "parallel-testrun-count",
            overrides.lane_count.unwrap_or(inner.parallel_testrun_count),
        )?;
        let batch_count = overrides
            .batch_count
            .or(inner.batch_count)
            .map(|count| at_least_one("batch-count", count))
            .transpose()?;
        let invocation_based_tests = overrides
            .invocation_based_tests
            .unwrap_or(inner.invocation_based_tests);

        if invocation_based_tests && batch_count.is_some() {
            return Err(ConfigurationError::IncompatibleOptions {
                first: "invocation-based-tests",
                second: "batch-count",
                reason: "the number of tests is unknown",
            });
        }

        let output_types = overrides
            .output_types
            .as_deref()
            .unwrap_or(&inner.output_types);
        let output_files = overrides
            .output_files
            .as_deref()
            .or(inner.output_files.as_deref());
        let outputs = parse_outputs(output_types, output_files)?;

        let lane_started_hook = match &overrides.lane_started_hook {
            Some(hook) => Some(hook.clone()),
            None => match &inner.lane_started_hook {
                None => None,
                Some(RawHookValue::Command(argv)) => Some(LaneStartedHook::Command(argv.clone())),
                Some(RawHookValue::Invalid { found }) => {
                    return Err(ConfigurationError::HookType {
                        name: "lane-started-hook",
                        found: *found,
                    });
                }
            },
        };
        if let Some(LaneStartedHook::Command(argv)) = &lane_started_hook {
            if argv.is_empty() {
                return Err(ConfigurationError::EmptyCommand {
                    name: "lane-started-hook",
                });
            }
        }

        let target_names = overrides.targets.as_ref().unwrap_or(&inner.targets);
        let targets = resolve_targets(target_names, lane_count)?;

        let output_directory = overrides
            .output_directory
            .as_ref()
            .unwrap_or(&inner.output_directory);
        let output_directory = self.root().join(output_directory);

        let collated_report = overrides
            .collate_reports
            .unwrap_or(inner.collate_reports)
            .then(|| output_directory.join(&inner.collated_report_file));

        let only_testing = match &overrides.only_testing {
            Some(tests) => tests.clone(),
            None => inner
                .only_testing
                .iter()
                .map(|id| TestIdentifier::new(id))
                .collect(),
        };

        let resolved = ResolvedConfig {
            try_count,
            lane_count,
            batch_count,
            invocation_based_tests,
            outputs,
            output_directory,
            result_bundle: overrides.result_bundle.unwrap_or(inner.result_bundle),
            fail_build: overrides.fail_build.unwrap_or(inner.fail_build),
            result_policy: overrides.result_policy.unwrap_or(inner.result_policy),
            structured_merge: overrides.structured_merge.unwrap_or(inner.structured_merge),
            quit_simulators: overrides.quit_simulators.unwrap_or(inner.quit_simulators),
            reset_on_exit: overrides.reset_on_exit.unwrap_or(inner.reset_on_exit),
            lane_timeout: overrides.lane_timeout.or(inner.lane_timeout),
            lane_partition: overrides.lane_partition.unwrap_or(inner.lane_partition),
            test_without_building: overrides
                .test_without_building
                .unwrap_or(inner.test_without_building),
            only_testing,
            targets,
            collated_report,
            lane_started_hook,
        };

        debug!(
            try_count = resolved.try_count,
            lane_count = resolved.lane_count,
            batch_count = ?resolved.batch_count,
            output_directory = %resolved.output_directory,
            "validated configuration"
        );

        Ok(resolved)
    }
}

fn at_least_one(name: &'static str, value: usize) -> Result<usize, ConfigurationError> {
    if value == 0 {
        Err(ConfigurationError::InvalidValue {
            name,
            value: value.to_string(),
            reason: "must be at least 1",
        })
    } else {
        Ok(value)
    }
}

fn split_list(input: &str) -> impl Iterator<Item = &str> {
    input.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_outputs(
    output_types: &str,
    output_files: Option<&str>,
) -> Result<Vec<ReportSpec>, ConfigurationError> {
    let formats = split_list(output_types)
        .map(|name| {
            ReportFormat::from_output_type(name).ok_or_else(|| {
                ConfigurationError::UnknownOutputType {
                    name: name.to_owned(),
                    known: ReportFormat::OUTPUT_TYPES.to_vec(),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if formats.is_empty() {
        return Err(ConfigurationError::InvalidValue {
            name: "output-types",
            value: format!("{output_types:?}"),
            reason: "must name at least one report format",
        });
    }

    match output_files {
        Some(files) => {
            let files: Vec<_> = split_list(files).collect();
            if files.len() != formats.len() {
                return Err(ConfigurationError::OutputFilesMismatch {
                    types: formats.len(),
                    files: files.len(),
                });
            }
            Ok(formats
                .into_iter()
                .zip(files)
                .map(|(format, file)| ReportSpec::new(format, file))
                .collect())
        }
        None => Ok(formats
            .into_iter()
            .map(|format| ReportSpec::new(format, format.default_file()))
            .collect()),
    }
}

fn resolve_targets(
    names: &[String],
    lane_count: usize,
) -> Result<Vec<ExecutionTarget>, ConfigurationError> {
    if names.is_empty() || names.len() < lane_count {
        return Err(ConfigurationError::TargetCount {
            lane_count,
            target_count: names.len(),
        });
    }

    let mut seen = HashSet::new();
    names
        .iter()
        .map(|name| {
            if seen.insert(name.as_str()) {
                Ok(ExecutionTarget::new(name.as_str()))
            } else {
                Err(ConfigurationError::DuplicateTarget { name: name.clone() })
            }
        })
        .collect()
}
