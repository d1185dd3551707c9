// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Basic tests for the run loop.

use crate::fixtures::*;
use camino::Utf8Path;
use color_eyre::eyre::{Result, ensure};
use indoc::indoc;
use multiscan_metadata::{FailureDetail, MultiscanExitCode, RunSummary, TestIdentifier};
use multiscan_runner::{
    config::{MultiscanConfig, ResultPolicy},
    environment::ResetPhase,
    errors::{ConfigurationError, RunError},
    hook::LaneStartedHook,
    orchestrator::RunOrchestratorBuilder,
};
use pretty_assertions::assert_eq;
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};
use test_case::test_case;

const A: &str = "App/Suite/testA";
const B: &str = "App/Suite/testB";
const C: &str = "App/Suite/testC";
const D: &str = "App/Suite/testD";

const SIMULATORS: [&str; 4] = ["sim-1", "sim-2", "sim-3", "sim-4"];

fn run_with(
    root: &Utf8Path,
    suite: &FakeSuite,
    calls: &Arc<Calls>,
    configure: impl FnOnce(&mut RunOrchestratorBuilder),
) -> Result<RunSummary, RunError> {
    let config = MultiscanConfig::default_config(root);
    let mut builder = RunOrchestratorBuilder::default();
    // The fake executor writes JUnit reports.
    builder.set_targets(SIMULATORS).set_output_types("junit");
    configure(&mut builder);
    builder
        .build(&config, suite.collaborators(calls))?
        .run()
}

#[test]
fn two_pass_two_fail() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[
        (A, Behavior::Pass),
        (B, Behavior::Pass),
        (C, Behavior::Fail),
        (D, Behavior::Fail),
    ]);

    let summary = run_with(dir.path(), &suite, &calls, |builder| {
        builder.set_fail_build(false);
    })?;

    assert!(!summary.result);
    assert_eq!(summary.total_tests, 4);
    assert_eq!(summary.passing_testcount, 2);
    assert_eq!(summary.failed_testcount, 2);
    assert_eq!(summary.failed_tests, ids(&[C, D]));
    assert_eq!(summary.total_retry_count, 0);
    assert_eq!(
        summary.failure_details.get(C),
        Some(&FailureDetail::new(
            "testC failed in attempt 1",
            "testC.swift:1"
        ))
    );
    ensure!(summary.counts_consistent(), "counts are consistent");
    ensure!(
        summary.report_files.contains_file_name("report.xml"),
        "lane report is tracked"
    );
    ensure!(
        summary
            .report_files
            .contains_file_name("collated-report.xml"),
        "collated report is tracked"
    );
    assert_eq!(calls.builds(), 1);
    assert_eq!(summary.exit_code(), MultiscanExitCode::TEST_RUN_FAILED);

    Ok(())
}

#[test]
fn repeated_failures_are_counted_per_attempt() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::Fail), (B, Behavior::Fail)]);

    let summary = run_with(dir.path(), &suite, &calls, |builder| {
        builder.set_try_count(2).set_fail_build(false);
    })?;

    assert_eq!(summary.failed_tests, ids(&[A, B, A, B]));
    assert_eq!(summary.failed_testcount, 4);
    assert_eq!(summary.total_tests, 4);
    assert_eq!(summary.total_retry_count, 1);
    assert_eq!(summary.unique_failed_tests().len(), 2);
    // The first attempt's detail is kept.
    assert_eq!(
        summary.failure_details.get(A).map(|d| d.message.as_str()),
        Some("testA failed in attempt 1")
    );
    // The build happens once, however many attempts there are.
    assert_eq!(calls.builds(), 1);
    assert_eq!(calls.tests_in_attempt(2), ids(&[A, B]));

    Ok(())
}

#[test_case(ResultPolicy::FromTests, false ; "from tests")]
#[test_case(ResultPolicy::FinalAttempt, true ; "final attempt")]
#[test_case(ResultPolicy::AlwaysSuccess, true ; "always success")]
#[test_case(ResultPolicy::AlwaysFailure, false ; "always failure")]
fn flaky_test_result(policy: ResultPolicy, expected: bool) -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::FailUntil(1)), (B, Behavior::Pass)]);

    let summary = run_with(dir.path(), &suite, &calls, |builder| {
        builder
            .set_try_count(3)
            .set_result_policy(policy)
            .set_fail_build(false);
    })?;

    assert_eq!(summary.result, expected);
    assert_eq!(summary.passing_testcount, 2);
    assert_eq!(summary.failed_testcount, 1);
    assert_eq!(summary.total_tests, 3);
    assert_eq!(summary.total_retry_count, 1);

    // The retry covered only the failed test, and no third attempt was made.
    assert_eq!(calls.tests_in_attempt(2), ids(&[A]));
    assert_eq!(calls.tests_in_attempt(3), Vec::<TestIdentifier>::new());

    Ok(())
}

#[test]
fn incompatible_options_fail_before_build() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::Pass)]);

    let error = run_with(dir.path(), &suite, &calls, |builder| {
        builder.set_batch_count(2).set_invocation_based_tests(true);
    })
    .unwrap_err();

    ensure!(error.is_configuration_error(), "{error}");
    ensure!(!error.is_test_failure(), "{error}");
    match &error {
        RunError::Configuration(ConfigurationError::IncompatibleOptions { first, second, .. }) => {
            assert_eq!(*first, "invocation-based-tests");
            assert_eq!(*second, "batch-count");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(error.exit_code(), MultiscanExitCode::CONFIGURATION_ERROR);
    assert_eq!(calls.builds(), 0);
    ensure!(calls.lanes().is_empty(), "no lane ran");

    Ok(())
}

#[test]
fn summary_is_independent_of_lane_count() -> Result<()> {
    test_init();
    let suite = FakeSuite::new(&[
        ("App/Login/testA", Behavior::Pass),
        ("App/Login/testB", Behavior::Fail),
        ("App/Login/testC", Behavior::FailUntil(1)),
        ("App/Cart/testD", Behavior::Pass),
        ("App/Cart/testE", Behavior::Fail),
        ("App/Cart/testF", Behavior::Pass),
        ("App/Feed/testG", Behavior::FailUntil(1)),
        ("App/Feed/testH", Behavior::Pass),
    ]);

    let mut summaries = Vec::new();
    for lane_count in [1, 4] {
        let dir = camino_tempfile::tempdir()?;
        let calls = Arc::new(Calls::default());
        let mut summary = run_with(dir.path(), &suite, &calls, |builder| {
            builder
                .set_lane_count(lane_count)
                .set_try_count(2)
                .set_fail_build(false);
        })?;

        let first_attempt_lanes = calls
            .lanes()
            .iter()
            .filter(|lane| lane.attempt_index == 1)
            .count();
        assert_eq!(first_attempt_lanes, lane_count);

        // Artifact paths name lane directories, so they differ by construction.
        summary.report_files = Default::default();
        summaries.push(summary);
    }

    assert_eq!(summaries[0], summaries[1]);
    Ok(())
}

#[test]
fn lanes_hold_distinct_targets() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[
        (A, Behavior::Pass),
        (B, Behavior::Pass),
        (C, Behavior::Pass),
        (D, Behavior::Pass),
    ]);

    run_with(dir.path(), &suite, &calls, |builder| {
        builder
            .set_lane_count(2)
            .set_targets(["iPhone 16 (1)", "iPhone 16 (2)"]);
    })?;

    let targets: BTreeSet<_> = calls.lanes().into_iter().map(|lane| lane.target).collect();
    assert_eq!(
        targets,
        BTreeSet::from(["iPhone 16 (1)".to_owned(), "iPhone 16 (2)".to_owned()])
    );
    Ok(())
}

#[test]
fn formats_without_artifacts_contribute_nothing() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::Pass), (B, Behavior::Fail)]);

    let summary = run_with(dir.path(), &suite, &calls, |builder| {
        builder.set_output_types("junit,html").set_fail_build(false);
    })?;
    assert_eq!(summary.total_tests, 2);
    assert_eq!(summary.failed_tests, ids(&[B]));

    // Only a format nothing was written for.
    let dir = camino_tempfile::tempdir()?;
    let summary = run_with(dir.path(), &suite, &calls, |builder| {
        builder.set_output_types("json").set_collate_reports(false);
    })?;
    assert_eq!(summary.total_tests, 0);
    ensure!(summary.report_files.is_empty(), "no artifacts were found");

    Ok(())
}

#[test]
fn failing_run_fails_the_build() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::Pass), (C, Behavior::Fail)]);

    let error = run_with(dir.path(), &suite, &calls, |_| {}).unwrap_err();

    ensure!(error.is_test_failure(), "{error}");
    ensure!(!error.is_configuration_error(), "{error}");
    ensure!(
        error.to_string().contains("Tests have failed"),
        "message: {error}"
    );
    let summary = error.summary().expect("summary is attached");
    assert_eq!(summary.failed_testcount, 1);
    assert_eq!(error.exit_code(), MultiscanExitCode::TEST_RUN_FAILED);

    Ok(())
}

#[test]
fn failed_build_stops_the_run() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::Pass)]).with_failed_build();

    let error = run_with(dir.path(), &suite, &calls, |_| {}).unwrap_err();
    ensure!(matches!(error, RunError::BuildFailed), "{error:?}");
    assert_eq!(error.exit_code(), MultiscanExitCode::BUILD_FAILED);
    ensure!(calls.lanes().is_empty(), "no lane ran");

    Ok(())
}

#[test]
fn already_built_and_only_testing() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::Pass), (B, Behavior::Pass)]);

    let summary = run_with(dir.path(), &suite, &calls, |builder| {
        builder.set_test_without_building(true).set_only_testing([B]);
    })?;

    assert_eq!(calls.builds(), 0);
    assert_eq!(calls.lists.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(calls.tests_in_attempt(1), ids(&[B]));
    assert_eq!(summary.total_tests, 1);

    Ok(())
}

#[test]
fn unlisted_tests_run_as_one_slice() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[
        (A, Behavior::Pass),
        (B, Behavior::FailUntil(1)),
        (C, Behavior::FailUntil(1)),
    ])
    .unlisted();

    let summary = run_with(dir.path(), &suite, &calls, |builder| {
        builder
            .set_lane_count(2)
            .set_try_count(2)
            .set_fail_build(false);
    })?;

    let lanes = calls.lanes();
    assert_eq!(
        lanes.iter().filter(|lane| lane.attempt_index == 1).count(),
        1,
        "all tests run in a single lane"
    );
    // The retry has a concrete plan, so it is split across both lanes.
    assert_eq!(
        lanes.iter().filter(|lane| lane.attempt_index == 2).count(),
        2
    );
    assert_eq!(calls.tests_in_attempt(2), ids(&[B, C]));
    assert_eq!(summary.passing_testcount, 3);

    Ok(())
}

#[test]
fn crashed_lane_contributes_nothing() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[
        (A, Behavior::Pass),
        (B, Behavior::Pass),
        (C, Behavior::Fail),
        (D, Behavior::Fail),
    ])
    .with_crashing_lane(2);

    let summary = run_with(dir.path(), &suite, &calls, |builder| {
        builder.set_lane_count(2);
    })?;

    // The contiguous split puts C and D in the crashed lane.
    assert_eq!(summary.total_tests, 2);
    assert_eq!(summary.passing_testcount, 2);
    ensure!(summary.result, "sibling lane's results stand");

    Ok(())
}

#[test_case(false, false, 2, &[] ; "no reset")]
#[test_case(true, false, 2, &[ResetPhase::Preparation, ResetPhase::BetweenAttempts] ; "between attempts")]
#[test_case(true, false, 1, &[ResetPhase::Preparation] ; "single attempt")]
#[test_case(
    true,
    true,
    2,
    &[ResetPhase::Preparation, ResetPhase::BetweenAttempts, ResetPhase::Exit]
    ; "reset on exit"
)]
fn environment_resets(
    quit_simulators: bool,
    reset_on_exit: bool,
    try_count: usize,
    expected: &[ResetPhase],
) -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::Fail)]);

    run_with(dir.path(), &suite, &calls, |builder| {
        builder
            .set_quit_simulators(quit_simulators)
            .set_reset_on_exit(reset_on_exit)
            .set_try_count(try_count)
            .set_fail_build(false);
    })?;

    assert_eq!(calls.resets(), expected);
    Ok(())
}

#[test]
fn lane_started_hook_sees_each_lane() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[
        (A, Behavior::Pass),
        (B, Behavior::Pass),
        (C, Behavior::Pass),
        (D, Behavior::Pass),
    ]);

    let started = Arc::new(Mutex::new(Vec::new()));
    let hook = {
        let started = started.clone();
        LaneStartedHook::with_context(move |lane| {
            started
                .lock()
                .unwrap()
                .push((lane.attempt_index, lane.lane_number()));
        })
    };

    run_with(dir.path(), &suite, &calls, |builder| {
        builder.set_lane_count(2).set_lane_started_hook(hook);
    })?;

    let mut started = started.lock().unwrap().clone();
    started.sort();
    assert_eq!(started, vec![(1, 1), (1, 2)]);
    Ok(())
}

#[test]
fn hook_of_wrong_type_is_rejected() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    std::fs::create_dir_all(dir.path().join(".config"))?;
    std::fs::write(
        dir.path().join(MultiscanConfig::CONFIG_PATH),
        indoc! {r#"
            lane-started-hook = "boot-simulator.sh"
        "#},
    )?;
    let config = MultiscanConfig::from_sources(dir.path(), None)?;

    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::Pass)]);
    let error = RunOrchestratorBuilder::default()
        .build(&config, suite.collaborators(&calls))
        .unwrap_err();

    assert_eq!(
        error.to_string(),
        "invalid configuration",
        "top-level message"
    );
    match error {
        RunError::Configuration(error) => assert_eq!(
            error.to_string(),
            "'lane-started-hook' value must be a command array! Found string instead."
        ),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.builds(), 0);

    Ok(())
}

#[test]
fn collated_report_records_flaky_tests() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[
        (A, Behavior::FailUntil(1)),
        (B, Behavior::Fail),
        (C, Behavior::Pass),
    ]);

    run_with(dir.path(), &suite, &calls, |builder| {
        builder.set_try_count(2).set_fail_build(false);
    })?;

    let collated =
        std::fs::read_to_string(dir.path().join("test_output/collated-report.xml"))?;
    ensure!(collated.contains(r#"name="testA""#), "{collated}");
    ensure!(collated.contains("flakyFailure"), "{collated}");
    ensure!(collated.contains("rerunFailure"), "{collated}");
    ensure!(
        collated.contains("testB failed in attempt 1"),
        "first failure message is reported: {collated}"
    );

    Ok(())
}

#[test_case(true ; "with legacy bundles")]
#[test_case(false ; "without legacy bundles")]
fn all_report_types_are_tracked(result_bundle: bool) -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::Pass), (B, Behavior::Fail)]).with_artifacts(&[
        "report.html",
        "report.json",
        "report.xcresult",
        "App.test_result",
    ]);

    let summary = run_with(dir.path(), &suite, &calls, |builder| {
        builder
            .set_output_types("junit,xcresult,html,json")
            .set_result_bundle(result_bundle)
            .set_fail_build(false);
    })?;

    // Only the JUnit report could be decoded here.
    assert_eq!(summary.total_tests, 2);
    assert_eq!(summary.failed_tests, ids(&[B]));
    for file_name in ["report.xml", "report.html", "report.json", "report.xcresult"] {
        ensure!(
            summary.report_files.contains_file_name(file_name),
            "{file_name} is tracked: {:?}",
            summary.report_files
        );
    }
    assert_eq!(
        summary.report_files.contains_file_name("App.test_result"),
        result_bundle
    );

    Ok(())
}

#[test]
fn undecodable_report_is_skipped() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite =
        FakeSuite::new(&[(A, Behavior::Pass), (B, Behavior::Fail)]).with_corrupt_report();

    let summary = run_with(dir.path(), &suite, &calls, |builder| {
        builder.set_fail_build(false);
    })?;

    // The valid report beside it still counts.
    assert_eq!(summary.total_tests, 2);
    assert_eq!(summary.passing_testcount, 1);
    assert_eq!(summary.failed_tests, ids(&[B]));
    ensure!(
        summary.report_files.contains_file_name("report-2.xml"),
        "the undecodable report is still an artifact"
    );

    Ok(())
}

#[test]
fn parallel_lanes_cannot_share_the_default_target() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::Pass), (B, Behavior::Pass)]);

    let config = MultiscanConfig::default_config(dir.path());
    let mut builder = RunOrchestratorBuilder::default();
    builder.set_lane_count(2);
    let error = builder
        .build(&config, suite.collaborators(&calls))
        .unwrap_err();

    match error {
        RunError::Configuration(ConfigurationError::TargetCount {
            lane_count,
            target_count,
        }) => {
            assert_eq!(lane_count, 2);
            assert_eq!(target_count, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.builds(), 0);

    Ok(())
}

#[test]
fn final_attempt_policy_needs_results() -> Result<()> {
    test_init();
    let dir = camino_tempfile::tempdir()?;
    let calls = Arc::new(Calls::default());
    let suite = FakeSuite::new(&[(A, Behavior::Pass), (B, Behavior::Fail)]).with_crashing_attempt(2);

    let error = run_with(dir.path(), &suite, &calls, |builder| {
        builder
            .set_try_count(3)
            .set_result_policy(ResultPolicy::FinalAttempt);
    })
    .unwrap_err();

    ensure!(error.is_test_failure(), "{error}");
    let summary = error.summary().expect("summary is attached");
    ensure!(!summary.result, "the retry of testB never reported");
    assert_eq!(summary.failed_tests, ids(&[B]));
    assert_eq!(summary.total_retry_count, 1);
    // Nothing was decoded from the crashed retry, so there was nothing left to retry.
    assert_eq!(calls.tests_in_attempt(3), Vec::<TestIdentifier>::new());

    Ok(())
}
