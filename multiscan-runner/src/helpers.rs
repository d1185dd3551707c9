// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for multiscan-runner.

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "attempt" if `count` is 1, otherwise "attempts".
    pub fn attempts_str(count: usize) -> &'static str {
        if count == 1 { "attempt" } else { "attempts" }
    }
}

/// Joins a command line for display, quoting arguments as a shell would.
pub(crate) fn display_command<S: AsRef<str>>(argv: &[S]) -> String {
    shell_words::join(argv.iter().map(|arg| arg.as_ref()))
}

/// Splits a command line into its program and arguments.
///
/// Returns `None` if the command line is empty.
pub(crate) fn split_program(argv: &[String]) -> Option<(&str, &[String])> {
    argv.split_first()
        .map(|(program, args)| (program.as_str(), args))
}
