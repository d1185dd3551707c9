// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging attempt results into the cumulative run summary.
//!
//! Merging is a pure function: the summary is threaded through the attempt loop by value and
//! rebuilt after every attempt.

use crate::{config::ResultPolicy, report::AttemptResult};
use multiscan_metadata::RunSummary;

/// Merges one attempt into the cumulative summary.
///
/// * Passing counts grow by the number of tests that passed in the attempt.
/// * Every failure event is appended to `failed_tests`, so a test that fails again on retry is
///   counted again.
/// * The first failure detail reported for a test is kept.
/// * Report files are unioned.
pub fn merge(mut summary: RunSummary, attempt: &AttemptResult) -> RunSummary {
    summary.passing_testcount += attempt.passing().len();
    summary
        .failed_tests
        .extend(attempt.failed().iter().cloned());
    summary.failed_testcount = summary.failed_tests.len();

    for (id, detail) in attempt.failure_details() {
        summary
            .failure_details
            .entry(id.clone())
            .or_insert_with(|| detail.clone());
    }

    summary
        .report_files
        .extend(attempt.report_files().iter().cloned());

    summary.total_tests = summary.passing_testcount + summary.failed_testcount;
    summary.total_retry_count = summary
        .total_retry_count
        .max(attempt.attempt_index().saturating_sub(1));
    summary.result = summary.failed_testcount == 0;
    summary
}

/// Applies the result policy once no more attempts will be made.
///
/// `final_attempt` is the last attempt that ran. Under [`ResultPolicy::FinalAttempt`] it only
/// counts as passed if it had no failures and accounted for every test it was meant to run.
pub fn finalize(
    mut summary: RunSummary,
    policy: ResultPolicy,
    final_attempt: &AttemptResult,
) -> RunSummary {
    summary.result = match policy {
        ResultPolicy::FromTests => summary.failed_testcount == 0,
        ResultPolicy::FinalAttempt => !final_attempt.has_failures() && final_attempt.is_complete(),
        ResultPolicy::AlwaysSuccess => true,
        ResultPolicy::AlwaysFailure => false,
    };
    summary
}
