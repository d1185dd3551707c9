// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fanning an attempt out across parallel lanes.
//!
//! An attempt's test subset is split into slices by a deterministic [`LanePartition`]. Each slice
//! runs as a lane against an execution target that no other running lane holds, with at most
//! `lane_count` lanes running at a time. A failed lane never affects its siblings.

use crate::{
    errors::{DisplayErrorChain, LaneExecutionError},
    executor::TestExecutor,
    hook::LaneStartedHook,
    partition::LanePartition,
    retry::TestSubset,
};
use camino::{Utf8Path, Utf8PathBuf};
use futures::prelude::*;
use std::{collections::VecDeque, fmt, sync::Mutex, time::Duration};
use tracing::{debug, warn};

/// An addressable device or simulator identity that a lane runs against.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ExecutionTarget {
    name: String,
}

impl ExecutionTarget {
    /// Creates a new target.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the target's name, as passed to the test command.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One slice of an attempt's test subset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaneSlice {
    /// The 0-based slice index.
    pub index: usize,

    /// The tests in this slice.
    pub tests: TestSubset,
}

/// A slice bound to a target and an artifact directory, for the duration of one lane.
#[derive(Clone, Debug)]
pub struct LaneAssignment {
    /// The 1-based attempt index.
    pub attempt_index: usize,

    /// The 0-based slice index.
    pub lane_index: usize,

    /// The target this lane holds exclusively while it runs.
    pub target: ExecutionTarget,

    /// The directory this lane writes its artifacts to. No other lane writes here.
    pub output_dir: Utf8PathBuf,

    /// The tests to run.
    pub tests: TestSubset,
}

impl LaneAssignment {
    /// Returns the 1-based lane number used in directory names and logs.
    pub fn lane_number(&self) -> usize {
        self.lane_index + 1
    }
}

/// How a lane finished.
#[derive(Debug)]
pub enum LaneStatus {
    /// The test command ran to completion. `success` is false if tests failed.
    Completed {
        /// Whether the test command reported success.
        success: bool,
    },

    /// The lane couldn't complete. It contributes no reports.
    Failed(LaneExecutionError),
}

impl LaneStatus {
    /// Returns true if the lane's reports should be decoded.
    pub fn has_reports(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// The outcome of one lane.
#[derive(Debug)]
pub struct LaneReport {
    /// The 0-based slice index.
    pub lane_index: usize,

    /// The target the lane ran against, if one was free.
    pub target: Option<ExecutionTarget>,

    /// The lane's artifact directory.
    pub output_dir: Utf8PathBuf,

    /// How the lane finished.
    pub status: LaneStatus,
}

/// Runs the lanes of one attempt.
pub struct LaneScheduler<'a> {
    executor: &'a dyn TestExecutor,
    hook: Option<&'a LaneStartedHook>,
    lane_count: usize,
    slice_count: usize,
    partition: LanePartition,
    lane_timeout: Option<Duration>,
    targets: &'a [ExecutionTarget],
}

impl fmt::Debug for LaneScheduler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaneScheduler")
            .field("lane_count", &self.lane_count)
            .field("slice_count", &self.slice_count)
            .field("partition", &self.partition)
            .field("lane_timeout", &self.lane_timeout)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

impl<'a> LaneScheduler<'a> {
    /// Creates a scheduler that runs at most `lane_count` lanes at a time.
    ///
    /// `targets` must hold at least `lane_count` entries.
    pub fn new(
        executor: &'a dyn TestExecutor,
        lane_count: usize,
        targets: &'a [ExecutionTarget],
    ) -> Self {
        let lane_count = lane_count.max(1);
        Self {
            executor,
            hook: None,
            lane_count,
            slice_count: lane_count,
            partition: LanePartition::default(),
            lane_timeout: None,
            targets,
        }
    }

    /// Splits concrete test plans into `slice_count` slices instead of one per lane.
    pub fn set_slice_count(&mut self, slice_count: usize) -> &mut Self {
        self.slice_count = slice_count.max(1);
        self
    }

    /// Sets the partition function.
    pub fn set_partition(&mut self, partition: LanePartition) -> &mut Self {
        self.partition = partition;
        self
    }

    /// Sets a timeout after which a lane is cancelled and treated as failed.
    pub fn set_lane_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.lane_timeout = timeout;
        self
    }

    /// Sets a hook that runs right before each lane's test command.
    pub fn set_hook(&mut self, hook: Option<&'a LaneStartedHook>) -> &mut Self {
        self.hook = hook;
        self
    }

    /// Splits `subset` into slices.
    ///
    /// Running all tests is a single slice, since the tests can't be enumerated.
    pub fn slices(&self, subset: &TestSubset) -> Vec<LaneSlice> {
        match subset {
            TestSubset::All => vec![LaneSlice {
                index: 0,
                tests: TestSubset::All,
            }],
            TestSubset::Only(tests) => {
                let tests: Vec<_> = tests.iter().cloned().collect();
                self.partition
                    .partition(&tests, self.slice_count)
                    .into_iter()
                    .enumerate()
                    .map(|(index, slice)| LaneSlice {
                        index,
                        tests: TestSubset::Only(slice.into_iter().collect()),
                    })
                    .collect()
            }
        }
    }

    /// Runs every slice of `subset`, writing artifacts below `attempt_dir`.
    ///
    /// Returns one report per slice, ordered by slice index regardless of completion order.
    pub async fn execute(
        &self,
        attempt_index: usize,
        attempt_dir: &Utf8Path,
        subset: &TestSubset,
    ) -> Vec<LaneReport> {
        let slices = self.slices(subset);
        debug!(
            attempt = attempt_index,
            slices = slices.len(),
            lanes = self.lane_count,
            "scheduling lanes"
        );

        let pool = TargetPool::new(self.targets);
        let mut reports: Vec<_> = stream::iter(slices)
            .map(|slice| self.run_lane(attempt_index, attempt_dir, slice, &pool))
            .buffer_unordered(self.lane_count)
            .collect()
            .await;

        reports.sort_by_key(|report| report.lane_index);
        reports
    }

    async fn run_lane(
        &self,
        attempt_index: usize,
        attempt_dir: &Utf8Path,
        slice: LaneSlice,
        pool: &TargetPool,
    ) -> LaneReport {
        let output_dir = attempt_dir.join(format!("lane-{}", slice.index + 1));

        let Some(target) = pool.take() else {
            let error = LaneExecutionError::NoTarget { slice: slice.index };
            warn!(
                attempt = attempt_index,
                lane = slice.index + 1,
                "{}",
                DisplayErrorChain::new(&error)
            );
            return LaneReport {
                lane_index: slice.index,
                target: None,
                output_dir,
                status: LaneStatus::Failed(error),
            };
        };

        let assignment = LaneAssignment {
            attempt_index,
            lane_index: slice.index,
            target,
            output_dir,
            tests: slice.tests,
        };
        let status = self.run_assignment(&assignment).await;
        pool.release(assignment.target.clone());

        match &status {
            LaneStatus::Completed { success } => debug!(
                attempt = attempt_index,
                lane = assignment.lane_number(),
                target = %assignment.target,
                success,
                "lane completed"
            ),
            LaneStatus::Failed(error) => warn!(
                attempt = attempt_index,
                lane = assignment.lane_number(),
                target = %assignment.target,
                "lane failed, its reports are ignored: {}",
                DisplayErrorChain::new(error)
            ),
        }

        LaneReport {
            lane_index: assignment.lane_index,
            target: Some(assignment.target),
            output_dir: assignment.output_dir,
            status,
        }
    }

    async fn run_assignment(&self, assignment: &LaneAssignment) -> LaneStatus {
        if let Err(error) = tokio::fs::create_dir_all(&assignment.output_dir).await {
            return LaneStatus::Failed(LaneExecutionError::CreateOutputDir {
                path: assignment.output_dir.clone(),
                error,
            });
        }

        if let Some(hook) = self.hook {
            // Hooks block, and every lane of an attempt is polled by the same task.
            let hook = hook.clone();
            let lane = assignment.clone();
            if let Err(error) = tokio::task::spawn_blocking(move || hook.invoke(&lane)).await {
                warn!(
                    attempt = assignment.attempt_index,
                    lane = assignment.lane_number(),
                    "lane-started hook didn't finish: {error}"
                );
            }
        }

        let execution = self.executor.execute(assignment);
        let result = match self.lane_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, execution).await {
                Ok(result) => result,
                Err(_) => Err(LaneExecutionError::TimedOut { timeout }),
            },
            None => execution.await,
        };

        match result {
            Ok(success) => LaneStatus::Completed { success },
            Err(error) => LaneStatus::Failed(error),
        }
    }
}

/// Targets not currently held by a running lane.
#[derive(Debug)]
struct TargetPool {
    free: Mutex<VecDeque<ExecutionTarget>>,
}

impl TargetPool {
    fn new(targets: &[ExecutionTarget]) -> Self {
        Self {
            free: Mutex::new(targets.iter().cloned().collect()),
        }
    }

    fn take(&self) -> Option<ExecutionTarget> {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    fn release(&self, target: ExecutionTarget) {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(target);
    }
}
