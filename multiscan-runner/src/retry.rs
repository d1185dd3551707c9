// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deciding whether to make another attempt, and which tests it covers.

use crate::report::AttemptResult;
use indexmap::IndexSet;
use multiscan_metadata::TestIdentifier;
use std::fmt;

/// The tests an attempt covers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestSubset {
    /// Every test. The test command decides what that means.
    All,

    /// Only these tests, in plan order.
    Only(IndexSet<TestIdentifier>),
}

impl TestSubset {
    /// Returns the tests in this subset, or `None` for all tests.
    pub fn tests(&self) -> Option<&IndexSet<TestIdentifier>> {
        match self {
            Self::All => None,
            Self::Only(tests) => Some(tests),
        }
    }
}

impl fmt::Display for TestSubset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all tests"),
            Self::Only(tests) => write!(
                f,
                "{} {}",
                tests.len(),
                crate::helpers::plural::tests_str(tests.len())
            ),
        }
    }
}

/// Why the planner stopped or continued.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryState {
    /// The attempt had no failures. No more attempts are needed.
    NoFailures,

    /// Failures remain but the try count has been used up.
    BudgetExhausted,

    /// Another attempt will be made with the failed tests.
    Continuing,
}

/// The planner's decision after an attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPlan {
    /// The tests the next attempt should cover.
    ///
    /// When the planner stops with failures remaining, these are the tests that still fail.
    pub next_test_subset: TestSubset,

    /// The 1-based index of the next attempt.
    pub next_attempt_index: usize,

    /// Whether another attempt should be made.
    pub should_continue: bool,

    /// Why the planner stopped or continued.
    pub state: RetryState,
}

/// Plans retries: each retry covers only what failed in the attempt just before it.
#[derive(Clone, Copy, Debug)]
pub struct RetryPlanner {
    max_try_count: usize,
}

impl RetryPlanner {
    /// Creates a planner that makes at most `max_try_count` attempts.
    pub fn new(max_try_count: usize) -> Self {
        Self { max_try_count }
    }

    /// Returns the maximum number of attempts.
    pub fn max_try_count(&self) -> usize {
        self.max_try_count
    }

    /// Plans what happens after attempt `attempt_index` produced `attempt`.
    pub fn plan(&self, attempt_index: usize, attempt: &AttemptResult) -> RetryPlan {
        let failed = attempt.unique_failed();
        let state = if failed.is_empty() {
            RetryState::NoFailures
        } else if attempt_index >= self.max_try_count {
            RetryState::BudgetExhausted
        } else {
            RetryState::Continuing
        };

        RetryPlan {
            next_test_subset: TestSubset::Only(failed),
            next_attempt_index: attempt_index + 1,
            should_continue: state == RetryState::Continuing,
            state,
        }
    }
}
