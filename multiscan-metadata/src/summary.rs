// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::MultiscanExitCode;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Deserializer, Serialize};
use smol_str::SmolStr;
use std::{
    borrow::Borrow,
    collections::{BTreeMap, BTreeSet},
    fmt,
};

/// Uniquely names a test case within a suite, for example `Suite/Class/method`.
///
/// Identifiers are stable across attempts and are used as the merge key for results.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestIdentifier(SmolStr);

impl TestIdentifier {
    /// Creates a new identifier.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Splits the identifier into its prefix (everything up to the last `/`) and the final
    /// component.
    ///
    /// Identifiers without a `/` have an empty prefix.
    pub fn split_last(&self) -> (&str, &str) {
        match self.0.rsplit_once('/') {
            Some((prefix, last)) => (prefix, last),
            None => ("", self.0.as_str()),
        }
    }
}

impl fmt::Display for TestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestIdentifier {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TestIdentifier {
    fn from(s: String) -> Self {
        Self(SmolStr::from(s))
    }
}

impl Borrow<str> for TestIdentifier {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

#[cfg(feature = "proptest1")]
impl proptest::arbitrary::Arbitrary for TestIdentifier {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;

        "[A-Z][a-z]{1,6}/[A-Z][a-z]{1,6}/test[A-Z][a-z]{1,6}"
            .prop_map(TestIdentifier::from)
            .boxed()
    }
}

/// Details about a single test failure.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// The failure message reported by the test tooling.
    pub message: String,

    /// Where the failure happened, as `file:line`.
    pub location: String,
}

impl FailureDetail {
    /// Creates a new failure detail.
    pub fn new(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: location.into(),
        }
    }
}

/// The set of report files produced over a run.
///
/// Order is not significant. Membership checks are insensitive to the path separator style, so
/// `a\b\report.xml` and `a/b/report.xml` name the same file.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReportFiles {
    files: BTreeSet<Utf8PathBuf>,
}

impl ReportFiles {
    /// Creates an empty set of report files.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file to the set. Returns true if it wasn't already present.
    pub fn insert(&mut self, path: impl Into<Utf8PathBuf>) -> bool {
        let path = path.into();
        if self.contains(&path) {
            return false;
        }
        self.files.insert(path)
    }

    /// Returns true if the given file is present among the reported files.
    pub fn contains(&self, path: impl AsRef<Utf8Path>) -> bool {
        let needle = normalize_separators(path.as_ref().as_str());
        self.files
            .iter()
            .any(|file| normalize_separators(file.as_str()) == needle)
    }

    /// Returns true if any reported file has the given file name.
    pub fn contains_file_name(&self, file_name: &str) -> bool {
        self.files.iter().any(|file| {
            let normalized = normalize_separators(file.as_str());
            normalized.rsplit('/').next() == Some(file_name)
        })
    }

    /// Iterates over the reported files in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Utf8Path> + '_ {
        self.files.iter().map(|file| file.as_path())
    }

    /// Returns the number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if no files were reported.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl<P: Into<Utf8PathBuf>> Extend<P> for ReportFiles {
    fn extend<T: IntoIterator<Item = P>>(&mut self, iter: T) {
        for path in iter {
            self.insert(path);
        }
    }
}

// Goes through `insert` so that parsed paths are deduplicated like inserted ones.
impl<'de> Deserialize<'de> for ReportFiles {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let files = Vec::<Utf8PathBuf>::deserialize(deserializer)?;
        Ok(files.into_iter().collect())
    }
}

impl<P: Into<Utf8PathBuf>> FromIterator<P> for ReportFiles {
    fn from_iter<T: IntoIterator<Item = P>>(iter: T) -> Self {
        let mut files = Self::new();
        files.extend(iter);
        files
    }
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// The cumulative summary of a run across all of its attempts.
///
/// This is the only externally visible output of the orchestrator. Its field names are a wire
/// contract.
///
/// Invariants maintained by the orchestrator:
///
/// * `total_tests == passing_testcount + failed_testcount`
/// * `total_retry_count == number of attempts - 1`
/// * `failed_testcount == failed_tests.len()`: failures are counted per event, so a test that
///   failed in two attempts is counted twice.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Whether the run is considered a success.
    pub result: bool,

    /// The total number of test results, passing and failing.
    pub total_tests: usize,

    /// The number of passing results.
    pub passing_testcount: usize,

    /// The number of failure events.
    pub failed_testcount: usize,

    /// Failed tests in the order they were reported, one entry per attempt in which the test
    /// failed.
    pub failed_tests: Vec<TestIdentifier>,

    /// Failure details keyed by test. The earliest reported detail for a test is kept.
    pub failure_details: BTreeMap<TestIdentifier, FailureDetail>,

    /// The number of attempts made after the first one.
    pub total_retry_count: usize,

    /// Every report file produced over the run.
    pub report_files: ReportFiles,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSummary {
    /// Creates a summary for a run that hasn't made any attempts yet.
    pub fn new() -> Self {
        Self {
            result: true,
            total_tests: 0,
            passing_testcount: 0,
            failed_testcount: 0,
            failed_tests: Vec::new(),
            failure_details: BTreeMap::new(),
            total_retry_count: 0,
            report_files: ReportFiles::new(),
        }
    }

    /// Parses a summary from its JSON representation.
    pub fn parse_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes the summary to pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Returns true if the count fields agree with each other.
    pub fn counts_consistent(&self) -> bool {
        self.total_tests == self.passing_testcount + self.failed_testcount
            && self.failed_testcount == self.failed_tests.len()
    }

    /// Returns the unique failing tests, in order of first failure.
    pub fn unique_failed_tests(&self) -> Vec<&TestIdentifier> {
        let mut seen = BTreeSet::new();
        self.failed_tests
            .iter()
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Returns the exit code a command-line tool should use for this summary.
    pub fn exit_code(&self) -> i32 {
        if self.result {
            MultiscanExitCode::OK
        } else {
            MultiscanExitCode::TEST_RUN_FAILED
        }
    }
}
