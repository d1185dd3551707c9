// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collating the results of every attempt into a single JUnit report.
//!
//! Each test becomes one test case, whose status is its outcome in the last attempt it ran in.
//! Failures in earlier attempts are recorded as reruns, so a test that failed and then passed
//! shows up as flaky.

use crate::{errors::CollateError, report::AttemptResult};
use camino::Utf8Path;
use multiscan_metadata::{FailureDetail, TestIdentifier};
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestRerun, TestSuite};
use std::{collections::BTreeMap, fs::File};
use tracing::debug;

/// Collects attempts and writes them out as a JUnit report.
#[derive(Clone, Debug)]
pub struct ReportCollator {
    name: String,
    tests: BTreeMap<TestIdentifier, Vec<Occurrence>>,
}

#[derive(Clone, Debug)]
struct Occurrence {
    attempt_index: usize,
    outcome: Outcome,
}

#[derive(Clone, Debug)]
enum Outcome {
    Passed,
    Failed(Option<FailureDetail>),
}

impl ReportCollator {
    /// Creates a new collator for a report with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: BTreeMap::new(),
        }
    }

    /// Records the results of an attempt. Attempts must be added in order.
    pub fn add_attempt(&mut self, attempt: &AttemptResult) {
        let attempt_index = attempt.attempt_index();
        for id in attempt.failed() {
            let detail = attempt.failure_details().get(id).cloned();
            self.tests.entry(id.clone()).or_default().push(Occurrence {
                attempt_index,
                outcome: Outcome::Failed(detail),
            });
        }
        // A pass recorded after a failure in the same attempt is the final word for it.
        for id in attempt.passing() {
            self.tests.entry(id.clone()).or_default().push(Occurrence {
                attempt_index,
                outcome: Outcome::Passed,
            });
        }
    }

    /// Returns the number of distinct tests recorded so far.
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Builds the report.
    pub fn to_report(&self) -> Report {
        let mut suites: BTreeMap<&str, TestSuite> = BTreeMap::new();

        for (id, occurrences) in &self.tests {
            let Some((last, earlier)) = occurrences.split_last() else {
                continue;
            };
            let (suite_name, test_name) = id.split_last();

            let mut status = match &last.outcome {
                Outcome::Passed => TestCaseStatus::success(),
                Outcome::Failed(detail) => {
                    // The first reported detail is the one the summary keeps too.
                    let (attempt_index, detail) = occurrences
                        .iter()
                        .find_map(|occurrence| match &occurrence.outcome {
                            Outcome::Failed(Some(detail)) => {
                                Some((occurrence.attempt_index, Some(detail)))
                            }
                            _ => None,
                        })
                        .unwrap_or((last.attempt_index, detail.as_ref()));
                    let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                    status.set_type("test failure");
                    set_detail(&mut status, attempt_index, detail);
                    status
                }
            };

            for occurrence in earlier {
                let Outcome::Failed(detail) = &occurrence.outcome else {
                    continue;
                };
                let mut rerun = TestRerun::new(NonSuccessKind::Failure);
                rerun
                    .set_type("test failure")
                    .set_message(failure_message(occurrence.attempt_index, detail.as_ref()));
                if let Some(detail) = detail.as_ref().filter(|detail| !detail.location.is_empty()) {
                    rerun.set_description(detail.location.as_str());
                }
                status.add_rerun(rerun);
            }

            let mut testcase = TestCase::new(test_name, status);
            testcase.set_classname(suite_name);
            suites
                .entry(suite_name)
                .or_insert_with(|| TestSuite::new(suite_name))
                .add_test_case(testcase);
        }

        let mut report = Report::new(self.name.as_str());
        report.add_test_suites(suites.into_values());
        report
    }

    /// Writes the report to `path`, creating its parent directory if necessary.
    pub fn write(&self, path: &Utf8Path) -> Result<(), CollateError> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|error| CollateError::Fs {
                file: dir.to_path_buf(),
                error,
            })?;
        }

        let f = File::create(path).map_err(|error| CollateError::Fs {
            file: path.to_path_buf(),
            error,
        })?;
        self.to_report()
            .serialize(f)
            .map_err(|error| CollateError::Junit {
                file: path.to_path_buf(),
                error,
            })?;

        debug!(%path, tests = self.tests.len(), "wrote collated report");
        Ok(())
    }
}

fn set_detail(status: &mut TestCaseStatus, attempt_index: usize, detail: Option<&FailureDetail>) {
    status.set_message(failure_message(attempt_index, detail));
    if let Some(detail) = detail.filter(|detail| !detail.location.is_empty()) {
        status.set_description(detail.location.as_str());
    }
}

fn failure_message(attempt_index: usize, detail: Option<&FailureDetail>) -> String {
    match detail {
        Some(detail) if !detail.message.is_empty() => detail.message.clone(),
        _ => format!("failed in attempt {attempt_index}"),
    }
}
