// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{LaneDecode, ReportFormat, TestOutcome};
use crate::config::StructuredMerge;
use camino::Utf8PathBuf;
use indexmap::IndexSet;
use multiscan_metadata::{FailureDetail, TestIdentifier};
use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
};

/// The decoded outcome of one attempt, across all of its lanes.
///
/// An `AttemptResult` is immutable once built, and is consumed by
/// [`aggregator::merge`](crate::aggregator::merge).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttemptResult {
    attempt_index: usize,
    passing: BTreeSet<TestIdentifier>,
    failed: Vec<TestIdentifier>,
    failure_details: BTreeMap<TestIdentifier, FailureDetail>,
    report_files: Vec<Utf8PathBuf>,
    failed_lanes: usize,
    missing: BTreeSet<TestIdentifier>,
}

impl AttemptResult {
    /// Creates a new `AttemptResult` from already-decoded data.
    ///
    /// `attempt_index` is 1-based.
    pub fn new(
        attempt_index: usize,
        passing: impl IntoIterator<Item = TestIdentifier>,
        failed: impl IntoIterator<Item = TestIdentifier>,
        failure_details: BTreeMap<TestIdentifier, FailureDetail>,
        report_files: impl IntoIterator<Item = Utf8PathBuf>,
    ) -> Self {
        Self {
            attempt_index,
            passing: passing.into_iter().collect(),
            failed: failed.into_iter().collect(),
            failure_details,
            report_files: report_files.into_iter().collect(),
            failed_lanes: 0,
            missing: BTreeSet::new(),
        }
    }

    /// Builds the result of an attempt from its decoded lanes.
    ///
    /// `lanes` pairs each lane's index with what was decoded from it. Failed tests are ordered by
    /// their position in `plan` (tests outside the plan come last), then by lane, then by the
    /// order they were reported in. This makes the result independent of how many lanes the plan
    /// was split across and of the order lanes finished in.
    ///
    /// When several formats report a failure detail for the same test, the more detailed format
    /// wins.
    ///
    /// `failed_lanes` is the number of lanes that ran for this attempt but produced nothing to
    /// decode.
    pub fn from_lanes(
        attempt_index: usize,
        lanes: &[(usize, LaneDecode)],
        failed_lanes: usize,
        plan: Option<&IndexSet<TestIdentifier>>,
        merge: StructuredMerge,
    ) -> Self {
        let position = |id: &TestIdentifier| {
            plan.and_then(|plan| plan.get_index_of(id))
                .unwrap_or(usize::MAX)
        };

        let mut passing = BTreeSet::new();
        let mut failed = Vec::new();
        let mut details: BTreeMap<TestIdentifier, (DetailKey, FailureDetail)> = BTreeMap::new();
        let mut report_files = BTreeSet::new();

        for (lane, decode) in lanes {
            report_files.extend(decode.report_files.iter().cloned());

            for (seq, (format, record)) in decode.counted_records(merge).into_iter().enumerate() {
                match record.outcome {
                    TestOutcome::Passing => {
                        passing.insert(record.id.clone());
                    }
                    TestOutcome::Failed => {
                        let order = (position(&record.id), *lane, seq);
                        failed.push((order, record.id.clone()));
                        if let Some(detail) = &record.detail {
                            let key = DetailKey::new(format, order);
                            match details.get(&record.id) {
                                Some((existing, _)) if *existing <= key => {}
                                _ => {
                                    details.insert(record.id.clone(), (key, detail.clone()));
                                }
                            }
                        }
                    }
                }
            }
        }

        failed.sort_by(|(a, _), (b, _)| a.cmp(b));

        let reported: BTreeSet<&TestIdentifier> =
            passing.iter().chain(failed.iter().map(|(_, id)| id)).collect();
        let missing = plan
            .into_iter()
            .flatten()
            .filter(|id| !reported.contains(id))
            .cloned()
            .collect();

        Self {
            attempt_index,
            passing,
            failed: failed.into_iter().map(|(_, id)| id).collect(),
            failure_details: details
                .into_iter()
                .map(|(id, (_, detail))| (id, detail))
                .collect(),
            report_files: report_files.into_iter().collect(),
            failed_lanes,
            missing,
        }
    }

    /// Returns the 1-based index of this attempt.
    pub fn attempt_index(&self) -> usize {
        self.attempt_index
    }

    /// Returns the tests that passed in this attempt.
    pub fn passing(&self) -> &BTreeSet<TestIdentifier> {
        &self.passing
    }

    /// Returns failure events in report order. A test may appear more than once.
    pub fn failed(&self) -> &[TestIdentifier] {
        &self.failed
    }

    /// Returns failure details reported in this attempt.
    pub fn failure_details(&self) -> &BTreeMap<TestIdentifier, FailureDetail> {
        &self.failure_details
    }

    /// Returns the report artifacts this attempt produced.
    pub fn report_files(&self) -> &[Utf8PathBuf] {
        &self.report_files
    }

    /// Returns true if any test failed.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Returns the failed tests without duplicates, in order of first failure.
    pub fn unique_failed(&self) -> IndexSet<TestIdentifier> {
        self.failed.iter().cloned().collect()
    }

    /// Returns the number of lanes that produced nothing to decode.
    pub fn failed_lanes(&self) -> usize {
        self.failed_lanes
    }

    /// Returns the planned tests that no report accounted for.
    pub fn missing(&self) -> &BTreeSet<TestIdentifier> {
        &self.missing
    }

    /// Returns true if every lane was decoded and every planned test has a result.
    pub fn is_complete(&self) -> bool {
        self.failed_lanes == 0 && self.missing.is_empty()
    }

    /// Returns the number of results in this attempt.
    pub fn total_tests(&self) -> usize {
        self.passing.len() + self.failed.len()
    }
}

// Richer formats sort first, then earlier reports.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct DetailKey {
    rank: Reverse<u8>,
    order: (usize, usize, usize),
}

impl DetailKey {
    fn new(format: ReportFormat, order: (usize, usize, usize)) -> Self {
        Self {
            rank: Reverse(format.detail_rank().unwrap_or_default()),
            order,
        }
    }
}
