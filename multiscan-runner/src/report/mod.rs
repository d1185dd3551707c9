// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating and decoding the report artifacts a lane produces.
//!
//! Each [`ReportFormat`] is a closed variant with its own decode operation. Decoding never fails
//! an attempt: unreadable artifacts are logged and contribute no records.

mod attempt;
mod glob;
mod junit;
mod result_bundle;

pub use attempt::*;
pub use glob::*;
pub use junit::parse_junit;
pub use result_bundle::parse_test_results;

use crate::{config::StructuredMerge, errors::DisplayErrorChain};
use camino::{Utf8Path, Utf8PathBuf};
use multiscan_metadata::{FailureDetail, TestIdentifier};
use std::fmt;
use tracing::{debug, warn};

/// The outcome of a single test in a single report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestOutcome {
    /// The test passed.
    Passing,

    /// The test failed.
    Failed,
}

/// A normalized record decoded from a report artifact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestRecord {
    /// The test.
    pub id: TestIdentifier,

    /// Whether the test passed.
    pub outcome: TestOutcome,

    /// Details about the failure, if the format provides any.
    pub detail: Option<FailureDetail>,
}

impl TestRecord {
    /// Creates a record for a passing test.
    pub fn passing(id: impl Into<TestIdentifier>) -> Self {
        Self {
            id: id.into(),
            outcome: TestOutcome::Passing,
            detail: None,
        }
    }

    /// Creates a record for a failed test.
    pub fn failed(id: impl Into<TestIdentifier>, detail: Option<FailureDetail>) -> Self {
        Self {
            id: id.into(),
            outcome: TestOutcome::Failed,
            detail,
        }
    }
}

/// A report format produced by the test command.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ReportFormat {
    /// A JUnit XML log. Carries failure messages and locations.
    Junit,

    /// A result bundle. Carries pass/fail results, and only occasionally failure details.
    ResultBundle,

    /// An HTML report. Tracked, not decoded.
    Html,

    /// A JSON report. Tracked, not decoded.
    Json,

    /// A legacy `*.test_result` bundle. Tracked, not decoded.
    LegacyBundle,
}

impl ReportFormat {
    /// The names accepted in `output-types`.
    pub const OUTPUT_TYPES: &'static [&'static str] = &["junit", "xcresult", "html", "json"];

    /// Looks up a format by its `output-types` name.
    pub fn from_output_type(name: &str) -> Option<Self> {
        match name {
            "junit" => Some(Self::Junit),
            "xcresult" => Some(Self::ResultBundle),
            "html" => Some(Self::Html),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Returns the name of this format.
    pub fn name(self) -> &'static str {
        match self {
            Self::Junit => "junit",
            Self::ResultBundle => "xcresult",
            Self::Html => "html",
            Self::Json => "json",
            Self::LegacyBundle => "test_result",
        }
    }

    /// Returns the output file name used when `output-files` isn't set.
    pub fn default_file(self) -> &'static str {
        match self {
            Self::Junit => "report.xml",
            Self::ResultBundle => "report.xcresult",
            Self::Html => "report.html",
            Self::Json => "report.json",
            Self::LegacyBundle => "report.test_result",
        }
    }

    /// Returns true if artifacts of this format are decoded into records.
    pub fn is_structured(self) -> bool {
        self.detail_rank().is_some()
    }

    /// Ranks structured formats by how much failure detail they carry. Higher is richer.
    pub fn detail_rank(self) -> Option<u8> {
        match self {
            Self::Junit => Some(2),
            Self::ResultBundle => Some(1),
            Self::Html | Self::Json | Self::LegacyBundle => None,
        }
    }

    /// Decodes every artifact in `paths`.
    ///
    /// Artifacts that can't be decoded are logged and skipped. Pass-through formats always
    /// produce no records.
    pub fn decode(self, paths: &[Utf8PathBuf]) -> Vec<TestRecord> {
        let mut records = Vec::new();
        for path in paths {
            let decoded = match self {
                Self::Junit => parse_junit(path),
                Self::ResultBundle => parse_test_results(path),
                Self::Html | Self::Json | Self::LegacyBundle => continue,
            };
            match decoded {
                Ok(decoded) => {
                    debug!(%path, format = self.name(), records = decoded.len(), "decoded report");
                    records.extend(decoded);
                }
                Err(error) => {
                    warn!(
                        %path,
                        format = self.name(),
                        "skipping undecodable report: {}",
                        DisplayErrorChain::new(error),
                    );
                }
            }
        }
        records
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A requested report format, paired with the file name the test command writes it to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReportSpec {
    format: ReportFormat,
    file_name: String,
}

impl ReportSpec {
    /// Creates a new `ReportSpec`.
    pub fn new(format: ReportFormat, file_name: impl Into<String>) -> Self {
        Self {
            format,
            file_name: file_name.into(),
        }
    }

    /// Returns the report format.
    pub fn format(&self) -> ReportFormat {
        self.format
    }

    /// Returns the output file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns the glob pattern matching this report below a lane directory.
    ///
    /// For `report.xml`, this is `**/report*.xml`, so that numbered or suffixed variants written
    /// by the test command are also picked up.
    pub fn glob_pattern(&self) -> String {
        if self.format == ReportFormat::LegacyBundle {
            return "**/*.test_result".to_owned();
        }
        match self.file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("**/{stem}*.{ext}"),
            _ => format!("**/{}*", self.file_name),
        }
    }
}

/// The records and artifacts found in one lane directory.
#[derive(Clone, Debug, Default)]
pub struct LaneDecode {
    /// Records per structured format, in `output-types` order.
    pub records: Vec<(ReportFormat, Vec<TestRecord>)>,

    /// Every artifact found, decoded or not.
    pub report_files: Vec<Utf8PathBuf>,
}

impl LaneDecode {
    /// Returns the records that count towards totals, according to `merge`.
    ///
    /// With [`StructuredMerge::PreferDetailed`], records from less detailed formats are dropped
    /// when the most detailed format present produced any records.
    pub fn counted_records(&self, merge: StructuredMerge) -> Vec<(ReportFormat, &TestRecord)> {
        let richest = match merge {
            StructuredMerge::Append => None,
            StructuredMerge::PreferDetailed => self
                .records
                .iter()
                .filter(|(_, records)| !records.is_empty())
                .filter_map(|(format, _)| format.detail_rank())
                .max(),
        };

        self.records
            .iter()
            .filter(|(format, _)| richest.is_none() || format.detail_rank() == richest)
            .flat_map(|(format, records)| records.iter().map(move |record| (*format, record)))
            .collect()
    }
}

/// Finds and decodes every requested report below `lane_dir`.
///
/// If `track_legacy_bundles` is set, legacy `*.test_result` bundles are also tracked.
pub fn decode_lane(
    lane_dir: &Utf8Path,
    specs: &[ReportSpec],
    track_legacy_bundles: bool,
) -> LaneDecode {
    let legacy = ReportSpec::new(ReportFormat::LegacyBundle, "");
    let specs = specs
        .iter()
        .chain(track_legacy_bundles.then_some(&legacy));

    let mut decode = LaneDecode::default();
    for spec in specs {
        let paths = match ArtifactGlob::new(spec) {
            Ok(glob) => glob.find(lane_dir),
            Err(error) => {
                warn!(
                    pattern = %spec.glob_pattern(),
                    "invalid report pattern: {}",
                    DisplayErrorChain::new(error),
                );
                continue;
            }
        };

        if spec.format().is_structured() {
            decode
                .records
                .push((spec.format(), spec.format().decode(&paths)));
        }
        decode.report_files.extend(paths);
    }
    decode
}
