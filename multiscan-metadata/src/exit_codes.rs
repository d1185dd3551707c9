// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for multiscan failures.
///
/// Runs may fail for a variety of reasons. This structure documents the exit codes that may occur
/// in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum MultiscanExitCode {}

impl MultiscanExitCode {
    /// No errors occurred and the run succeeded.
    pub const OK: i32 = 0;

    /// One or more tests failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Building the app or its test target produced an error.
    pub const BUILD_FAILED: i32 = 101;

    /// A user issue happened while setting up a run, for example an unreadable config file.
    pub const SETUP_ERROR: i32 = 96;

    /// The configuration was self-contradictory and no attempt was made.
    pub const CONFIGURATION_ERROR: i32 = 94;
}
