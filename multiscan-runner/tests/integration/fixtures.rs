// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8Path;
use futures::future::{BoxFuture, FutureExt};
use multiscan_metadata::TestIdentifier;
use multiscan_runner::{
    build::{BuildContext, TestBuilder},
    environment::{EnvironmentReset, ResetContext, ResetPhase},
    errors::{BuildError, LaneExecutionError, ResetError},
    executor::TestExecutor,
    lanes::LaneAssignment,
    orchestrator::Collaborators,
    retry::TestSubset,
};
use std::{
    fmt::Write as _,
    sync::{
        Arc, Mutex, Once,
        atomic::{AtomicUsize, Ordering},
    },
};

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = color_eyre::install();
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub(crate) fn ids(names: &[&str]) -> Vec<TestIdentifier> {
    names.iter().map(TestIdentifier::new).collect()
}

/// What a fake test does when it runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Behavior {
    Pass,
    Fail,
    /// Fails in the given attempt and every earlier one, then passes.
    FailUntil(usize),
}

/// Shared bookkeeping for the fake collaborators.
#[derive(Debug, Default)]
pub(crate) struct Calls {
    pub(crate) builds: AtomicUsize,
    pub(crate) lists: AtomicUsize,
    pub(crate) lanes: Mutex<Vec<LaneCall>>,
    pub(crate) resets: Mutex<Vec<ResetPhase>>,
}

#[derive(Clone, Debug)]
pub(crate) struct LaneCall {
    pub(crate) attempt_index: usize,
    pub(crate) lane_number: usize,
    pub(crate) target: String,
    pub(crate) tests: Vec<TestIdentifier>,
}

impl Calls {
    pub(crate) fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub(crate) fn lanes(&self) -> Vec<LaneCall> {
        self.lanes.lock().unwrap().clone()
    }

    pub(crate) fn resets(&self) -> Vec<ResetPhase> {
        self.resets.lock().unwrap().clone()
    }

    /// The tests each attempt ran, in plan order.
    pub(crate) fn tests_in_attempt(&self, attempt_index: usize) -> Vec<TestIdentifier> {
        let mut lanes: Vec<_> = self
            .lanes()
            .into_iter()
            .filter(|lane| lane.attempt_index == attempt_index)
            .collect();
        lanes.sort_by_key(|lane| lane.lane_number);
        lanes.into_iter().flat_map(|lane| lane.tests).collect()
    }
}

/// A fake test suite: a list of tests with scripted behavior.
#[derive(Clone, Debug)]
pub(crate) struct FakeSuite {
    tests: Vec<(TestIdentifier, Behavior)>,
    listable: bool,
    build_succeeds: bool,
    failing_lanes: Vec<usize>,
    failing_attempts: Vec<usize>,
    extra_artifacts: Vec<String>,
    corrupt_report: bool,
}

impl FakeSuite {
    pub(crate) fn new(tests: &[(&str, Behavior)]) -> Self {
        Self {
            tests: tests
                .iter()
                .map(|(name, behavior)| (TestIdentifier::new(name), *behavior))
                .collect(),
            listable: true,
            build_succeeds: true,
            failing_lanes: Vec::new(),
            failing_attempts: Vec::new(),
            extra_artifacts: Vec::new(),
            corrupt_report: false,
        }
    }

    /// The builder can't enumerate the tests.
    pub(crate) fn unlisted(mut self) -> Self {
        self.listable = false;
        self
    }

    pub(crate) fn with_failed_build(mut self) -> Self {
        self.build_succeeds = false;
        self
    }

    /// The executor crashes for this 1-based lane number in every attempt.
    pub(crate) fn with_crashing_lane(mut self, lane_number: usize) -> Self {
        self.failing_lanes.push(lane_number);
        self
    }

    /// Every lane of the given 1-based attempt crashes.
    pub(crate) fn with_crashing_attempt(mut self, attempt_index: usize) -> Self {
        self.failing_attempts.push(attempt_index);
        self
    }

    /// Each lane also writes these artifacts. Bundles are written as directories.
    pub(crate) fn with_artifacts(mut self, names: &[&str]) -> Self {
        self.extra_artifacts
            .extend(names.iter().map(|name| (*name).to_owned()));
        self
    }

    /// Each lane also writes a `report-2.xml` that isn't valid XML.
    pub(crate) fn with_corrupt_report(mut self) -> Self {
        self.corrupt_report = true;
        self
    }

    pub(crate) fn collaborators(&self, calls: &Arc<Calls>) -> Collaborators<'static> {
        let suite = Arc::new(self.clone());
        Collaborators::new(
            FakeBuilder {
                suite: suite.clone(),
                calls: calls.clone(),
            },
            FakeExecutor {
                suite,
                calls: calls.clone(),
            },
            FakeReset {
                calls: calls.clone(),
            },
        )
    }

    fn behavior(&self, id: &TestIdentifier) -> Option<Behavior> {
        self.tests
            .iter()
            .find(|(test, _)| test == id)
            .map(|(_, behavior)| *behavior)
    }
}

struct FakeBuilder {
    suite: Arc<FakeSuite>,
    calls: Arc<Calls>,
}

impl TestBuilder for FakeBuilder {
    fn build(&self, _cx: &BuildContext<'_>) -> Result<bool, BuildError> {
        self.calls.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.suite.build_succeeds)
    }

    fn list_tests(&self, _cx: &BuildContext<'_>) -> Result<Option<Vec<TestIdentifier>>, BuildError> {
        self.calls.lists.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .suite
            .listable
            .then(|| self.suite.tests.iter().map(|(id, _)| id.clone()).collect()))
    }
}

struct FakeExecutor {
    suite: Arc<FakeSuite>,
    calls: Arc<Calls>,
}

impl FakeExecutor {
    fn run(&self, lane: &LaneAssignment) -> Result<bool, LaneExecutionError> {
        let tests: Vec<_> = match &lane.tests {
            TestSubset::All => self.suite.tests.iter().map(|(id, _)| id.clone()).collect(),
            TestSubset::Only(tests) => tests.iter().cloned().collect(),
        };
        self.calls.lanes.lock().unwrap().push(LaneCall {
            attempt_index: lane.attempt_index,
            lane_number: lane.lane_number(),
            target: lane.target.name().to_owned(),
            tests: tests.clone(),
        });

        if self.suite.failing_lanes.contains(&lane.lane_number())
            || self.suite.failing_attempts.contains(&lane.attempt_index)
        {
            return Err(LaneExecutionError::Crashed {
                message: "simulator crashed".to_owned(),
            });
        }

        let results: Vec<_> = tests
            .into_iter()
            .map(|id| {
                let passed = match self.suite.behavior(&id) {
                    Some(Behavior::Pass) => true,
                    Some(Behavior::Fail) | None => false,
                    Some(Behavior::FailUntil(attempt)) => lane.attempt_index > attempt,
                };
                (id, passed)
            })
            .collect();
        write_junit(
            &lane.output_dir.join("report.xml"),
            lane.attempt_index,
            &results,
        );
        for name in &self.suite.extra_artifacts {
            let path = lane.output_dir.join(name);
            if name.ends_with(".xcresult") || name.ends_with(".test_result") {
                std::fs::create_dir_all(&path).unwrap();
            } else {
                std::fs::write(&path, "").unwrap();
            }
        }
        if self.suite.corrupt_report {
            std::fs::write(
                lane.output_dir.join("report-2.xml"),
                "<testsuites><testsuite name=\"cut\"><testcase name=\"x\"></testsuite>",
            )
            .unwrap();
        }
        Ok(results.iter().all(|(_, passed)| *passed))
    }
}

impl TestExecutor for FakeExecutor {
    fn execute<'a>(
        &'a self,
        lane: &'a LaneAssignment,
    ) -> BoxFuture<'a, Result<bool, LaneExecutionError>> {
        futures::future::ready(self.run(lane)).boxed()
    }
}

struct FakeReset {
    calls: Arc<Calls>,
}

impl EnvironmentReset for FakeReset {
    fn reset(&self, cx: &ResetContext<'_>) -> Result<(), ResetError> {
        self.calls.resets.lock().unwrap().push(cx.phase);
        Ok(())
    }
}

/// Writes a JUnit report the way xcodebuild's formatters do.
pub(crate) fn write_junit(path: &Utf8Path, attempt_index: usize, results: &[(TestIdentifier, bool)]) {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testsuites>\n");
    xml.push_str("  <testsuite name=\"fake\">\n");
    for (id, passed) in results {
        let (class, name) = id.split_last();
        let classname = class.replace('/', ".");
        if *passed {
            writeln!(xml, "    <testcase classname=\"{classname}\" name=\"{name}\"/>").unwrap();
        } else {
            writeln!(
                xml,
                "    <testcase classname=\"{classname}\" name=\"{name}\">\n      \
                 <failure message=\"{name} failed in attempt {attempt_index}\">{name}.swift:{attempt_index}</failure>\n    \
                 </testcase>"
            )
            .unwrap();
        }
    }
    xml.push_str("  </testsuite>\n</testsuites>\n");
    std::fs::write(path, xml).unwrap();
}
