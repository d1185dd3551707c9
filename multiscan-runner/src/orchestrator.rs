// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run loop: build once, then execute, decode, merge and retry until the planner stops.

use crate::{
    aggregator,
    build::{CommandBuilder, TestBuilder, prepare},
    collate::ReportCollator,
    config::{ConfigOverrides, MultiscanConfig, ResolvedConfig, ResultPolicy, StructuredMerge},
    environment::{CommandReset, EnvironmentReset, ResetContext, ResetPhase},
    errors::{ConfigurationError, DisplayErrorChain, RunError},
    executor::{CommandExecutor, TestExecutor},
    helpers::plural,
    hook::LaneStartedHook,
    lanes::{LaneScheduler, LaneStatus},
    partition::LanePartition,
    report::{AttemptResult, decode_lane},
    retry::{RetryPlanner, RetryState},
};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use multiscan_metadata::{RunSummary, TestIdentifier};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The collaborators a run delegates building, executing and resetting to.
#[derive(Debug)]
pub struct Collaborators<'a> {
    /// Builds the test target and lists its tests.
    pub builder: DebugIgnore<Box<dyn TestBuilder + 'a>>,

    /// Runs the tests of one lane.
    pub executor: DebugIgnore<Box<dyn TestExecutor + 'a>>,

    /// Resets simulators and logs.
    pub reset: DebugIgnore<Box<dyn EnvironmentReset + 'a>>,
}

impl<'a> Collaborators<'a> {
    /// Creates a new set of collaborators.
    pub fn new(
        builder: impl TestBuilder + 'a,
        executor: impl TestExecutor + 'a,
        reset: impl EnvironmentReset + 'a,
    ) -> Self {
        Self {
            builder: DebugIgnore(Box::new(builder)),
            executor: DebugIgnore(Box::new(executor)),
            reset: DebugIgnore(Box::new(reset)),
        }
    }

    /// Creates the process-backed collaborators described by the config's commands.
    pub fn from_config(config: &MultiscanConfig) -> Result<Collaborators<'static>, ConfigurationError> {
        let commands = config.commands();
        Ok(Collaborators::new(
            CommandBuilder::new(commands.build.to_vec(), commands.list.map(<[String]>::to_vec))?,
            CommandExecutor::new(commands.test.to_vec())?,
            CommandReset::new(commands.reset.to_vec(), commands.simulator_log_directory),
        ))
    }
}

/// Options for a run that override the config file.
#[derive(Debug, Default)]
pub struct RunOrchestratorBuilder {
    overrides: ConfigOverrides,
}

impl RunOrchestratorBuilder {
    /// Sets the maximum number of attempts.
    pub fn set_try_count(&mut self, try_count: usize) -> &mut Self {
        self.overrides.try_count = Some(try_count);
        self
    }

    /// Sets the number of lanes that run concurrently.
    pub fn set_lane_count(&mut self, lane_count: usize) -> &mut Self {
        self.overrides.lane_count = Some(lane_count);
        self
    }

    /// Sets the number of slices a concrete test plan is split into.
    pub fn set_batch_count(&mut self, batch_count: usize) -> &mut Self {
        self.overrides.batch_count = Some(batch_count);
        self
    }

    /// Sets whether tests are only discovered by invoking the test command.
    pub fn set_invocation_based_tests(&mut self, invocation_based: bool) -> &mut Self {
        self.overrides.invocation_based_tests = Some(invocation_based);
        self
    }

    /// Sets the report formats, as a comma-separated list.
    pub fn set_output_types(&mut self, output_types: impl Into<String>) -> &mut Self {
        self.overrides.output_types = Some(output_types.into());
        self
    }

    /// Sets the report file names, as a comma-separated list paired with the output types.
    pub fn set_output_files(&mut self, output_files: impl Into<String>) -> &mut Self {
        self.overrides.output_files = Some(output_files.into());
        self
    }

    /// Sets the base directory for artifacts. Relative paths are relative to the project root.
    pub fn set_output_directory(&mut self, dir: impl Into<Utf8PathBuf>) -> &mut Self {
        self.overrides.output_directory = Some(dir.into());
        self
    }

    /// Sets whether legacy `*.test_result` bundles are tracked.
    pub fn set_result_bundle(&mut self, result_bundle: bool) -> &mut Self {
        self.overrides.result_bundle = Some(result_bundle);
        self
    }

    /// Sets whether a failing run is returned as [`RunError::TestsFailed`].
    pub fn set_fail_build(&mut self, fail_build: bool) -> &mut Self {
        self.overrides.fail_build = Some(fail_build);
        self
    }

    /// Sets how the summary's `result` is computed.
    pub fn set_result_policy(&mut self, policy: ResultPolicy) -> &mut Self {
        self.overrides.result_policy = Some(policy);
        self
    }

    /// Sets how two structured report formats from one attempt are combined.
    pub fn set_structured_merge(&mut self, merge: StructuredMerge) -> &mut Self {
        self.overrides.structured_merge = Some(merge);
        self
    }

    /// Sets whether the environment is reset before the run and between attempts.
    pub fn set_quit_simulators(&mut self, quit_simulators: bool) -> &mut Self {
        self.overrides.quit_simulators = Some(quit_simulators);
        self
    }

    /// Sets whether the environment is also reset after the final attempt.
    pub fn set_reset_on_exit(&mut self, reset_on_exit: bool) -> &mut Self {
        self.overrides.reset_on_exit = Some(reset_on_exit);
        self
    }

    /// Sets a per-lane timeout.
    pub fn set_lane_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.overrides.lane_timeout = Some(timeout);
        self
    }

    /// Sets how test plans are split into slices.
    pub fn set_lane_partition(&mut self, partition: LanePartition) -> &mut Self {
        self.overrides.lane_partition = Some(partition);
        self
    }

    /// Sets whether the build step is skipped because the target is already built.
    pub fn set_test_without_building(&mut self, already_built: bool) -> &mut Self {
        self.overrides.test_without_building = Some(already_built);
        self
    }

    /// Restricts the first attempt to these tests.
    pub fn set_only_testing(
        &mut self,
        tests: impl IntoIterator<Item = impl Into<TestIdentifier>>,
    ) -> &mut Self {
        self.overrides.only_testing = Some(tests.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the execution targets lanes draw from.
    pub fn set_targets(&mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.overrides.targets = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    /// Sets whether a collated JUnit report is written.
    pub fn set_collate_reports(&mut self, collate: bool) -> &mut Self {
        self.overrides.collate_reports = Some(collate);
        self
    }

    /// Sets a hook that runs right before each lane starts.
    pub fn set_lane_started_hook(&mut self, hook: LaneStartedHook) -> &mut Self {
        self.overrides.lane_started_hook = Some(hook);
        self
    }

    /// Validates the configuration and creates the orchestrator.
    ///
    /// This is the only validation pass, and it happens before anything is built or run.
    pub fn build<'a>(
        self,
        config: &MultiscanConfig,
        collaborators: Collaborators<'a>,
    ) -> Result<RunOrchestrator<'a>, RunError> {
        let config = config.validate(&self.overrides)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("multiscan-runner-worker")
            .build()
            .map_err(RunError::RuntimeCreate)?;

        Ok(RunOrchestrator {
            config,
            collaborators,
            runtime,
        })
    }
}

/// Drives a run from the build to the final summary.
///
/// Created using [`RunOrchestratorBuilder::build`].
#[derive(Debug)]
pub struct RunOrchestrator<'a> {
    config: ResolvedConfig,
    collaborators: Collaborators<'a>,
    runtime: tokio::runtime::Runtime,
}

impl RunOrchestrator<'_> {
    /// Returns the validated configuration.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Runs the tests, retrying failures until they pass or the try count is used up.
    ///
    /// Returns the cumulative summary. If the run is configured to fail the build and `result` is
    /// false, returns [`RunError::TestsFailed`] carrying the summary instead.
    pub fn run(self) -> Result<RunSummary, RunError> {
        let Self {
            config,
            collaborators,
            runtime,
        } = self;

        let prepared = prepare(&config, &**collaborators.builder)?;
        if config.quit_simulators {
            reset(&config, &**collaborators.reset, ResetPhase::Preparation, None);
        }

        let mut scheduler =
            LaneScheduler::new(&**collaborators.executor, config.lane_count, &config.targets);
        scheduler
            .set_slice_count(config.slice_count())
            .set_partition(config.lane_partition)
            .set_lane_timeout(config.lane_timeout)
            .set_hook(config.lane_started_hook.as_ref());

        let planner = RetryPlanner::new(config.try_count);
        let mut collator = config
            .collated_report
            .as_ref()
            .map(|_| ReportCollator::new("multiscan"));
        let mut summary = RunSummary::new();
        let mut subset = prepared.initial_subset;
        let mut attempt_index = 1;

        let final_attempt = loop {
            info!(
                attempt = attempt_index,
                max = planner.max_try_count(),
                "starting attempt with {subset}"
            );
            let attempt_dir = attempt_dir(&config.output_directory, attempt_index);
            clear_attempt_dir(&attempt_dir);

            let lanes = runtime.block_on(scheduler.execute(attempt_index, &attempt_dir, &subset));
            let decoded: Vec<_> = lanes
                .iter()
                .filter(|lane| lane.status.has_reports())
                .map(|lane| {
                    let decode =
                        decode_lane(&lane.output_dir, &config.outputs, config.result_bundle);
                    if matches!(lane.status, LaneStatus::Completed { success: false })
                        && decode.records.iter().all(|(_, records)| records.is_empty())
                    {
                        warn!(
                            attempt = attempt_index,
                            lane = lane.lane_index + 1,
                            path = %lane.output_dir,
                            "test command failed but no test results were decoded"
                        );
                    }
                    (lane.lane_index, decode)
                })
                .collect();

            let attempt = AttemptResult::from_lanes(
                attempt_index,
                &decoded,
                lanes.len() - decoded.len(),
                subset.tests(),
                config.structured_merge,
            );
            info!(
                attempt = attempt_index,
                passed = attempt.passing().len(),
                failed = attempt.failed().len(),
                "attempt finished"
            );

            summary = aggregator::merge(summary, &attempt);
            if let Some(collator) = &mut collator {
                collator.add_attempt(&attempt);
            }

            let plan = planner.plan(attempt_index, &attempt);
            match plan.state {
                RetryState::Continuing => {
                    let retried = plan.next_test_subset.tests().map_or(0, |tests| tests.len());
                    info!(
                        attempt = attempt_index,
                        "retrying {retried} failed {}",
                        plural::tests_str(retried),
                    );
                }
                RetryState::NoFailures => {
                    debug!(attempt = attempt_index, "no failures, stopping");
                }
                RetryState::BudgetExhausted => {
                    info!(
                        attempt = attempt_index,
                        "failures remain after {attempt_index} {}, stopping",
                        plural::attempts_str(attempt_index),
                    );
                }
            }
            if !plan.should_continue {
                if !attempt.is_complete() {
                    warn!(
                        attempt = attempt_index,
                        failed_lanes = attempt.failed_lanes(),
                        missing = attempt.missing().len(),
                        "final attempt didn't report a result for every planned test"
                    );
                }
                break attempt;
            }

            if config.quit_simulators {
                reset(
                    &config,
                    &**collaborators.reset,
                    ResetPhase::BetweenAttempts,
                    Some(attempt_index),
                );
            }
            subset = plan.next_test_subset;
            attempt_index = plan.next_attempt_index;
        };

        // Lane processes are gone by now, so the runtime can go without waiting on anything.
        runtime.shutdown_background();

        let mut summary = aggregator::finalize(summary, config.result_policy, &final_attempt);

        if config.reset_on_exit {
            reset(
                &config,
                &**collaborators.reset,
                ResetPhase::Exit,
                Some(attempt_index),
            );
        }

        if let (Some(collator), Some(path)) = (&collator, &config.collated_report) {
            match collator.write(path) {
                Ok(()) => {
                    summary.report_files.insert(path.clone());
                }
                Err(error) => warn!("{}", DisplayErrorChain::new(error)),
            }
        }

        info!(
            result = summary.result,
            total = summary.total_tests,
            passed = summary.passing_testcount,
            failed = summary.failed_testcount,
            retries = summary.total_retry_count,
            "run finished"
        );

        if config.fail_build && !summary.result {
            return Err(RunError::TestsFailed {
                failed_count: summary.failed_testcount,
                summary: Box::new(summary),
            });
        }
        Ok(summary)
    }
}

fn attempt_dir(output_directory: &Utf8Path, attempt_index: usize) -> Utf8PathBuf {
    output_directory.join(format!("attempt-{attempt_index}"))
}

// Reports left over from an earlier run would otherwise be decoded as this attempt's.
fn clear_attempt_dir(dir: &Utf8Path) {
    if !dir.exists() {
        return;
    }
    match std::fs::remove_dir_all(dir) {
        Ok(()) => debug!(path = %dir, "removed stale attempt directory"),
        Err(error) => warn!(path = %dir, "failed to remove stale attempt directory: {error}"),
    }
}

fn reset(
    config: &ResolvedConfig,
    reset: &dyn EnvironmentReset,
    phase: ResetPhase,
    completed_attempt: Option<usize>,
) {
    let cx = ResetContext {
        phase,
        completed_attempt,
        targets: &config.targets,
    };
    debug!(%phase, "resetting environment");
    if let Err(error) = reset.reset(&cx) {
        warn!(%phase, "environment reset failed: {}", DisplayErrorChain::new(error));
    }
}
