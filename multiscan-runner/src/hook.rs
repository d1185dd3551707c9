// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hooks invoked right before a lane starts.

use crate::{
    errors::DisplayErrorChain,
    executor::{expand_placeholders, lane_env},
    helpers::{display_command, split_program},
    lanes::LaneAssignment,
};
use std::{fmt, sync::Arc};
use tracing::{debug, warn};

/// A hook invoked right before each lane's test command starts.
///
/// The lane waits for its hook to return. Hooks run on a blocking thread, so a slow hook holds up
/// only its own lane. Hook failures are logged and never stop the lane.
#[derive(Clone)]
pub enum LaneStartedHook {
    /// A command line, with the same placeholders and environment as the test command.
    Command(Vec<String>),

    /// A function that takes no arguments.
    NoArgs(Arc<dyn Fn() + Send + Sync>),

    /// A function that receives the lane about to start.
    WithContext(Arc<dyn Fn(&LaneAssignment) + Send + Sync>),
}

impl LaneStartedHook {
    /// Creates a hook from a function that takes no arguments.
    pub fn no_args(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self::NoArgs(Arc::new(f))
    }

    /// Creates a hook from a function that receives the lane about to start.
    pub fn with_context(f: impl Fn(&LaneAssignment) + Send + Sync + 'static) -> Self {
        Self::WithContext(Arc::new(f))
    }

    pub(crate) fn invoke(&self, lane: &LaneAssignment) {
        match self {
            Self::Command(argv) => run_command(argv, lane),
            Self::NoArgs(f) => f(),
            Self::WithContext(f) => f(lane),
        }
    }
}

impl fmt::Debug for LaneStartedHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(argv) => f.debug_tuple("Command").field(argv).finish(),
            Self::NoArgs(_) => f.write_str("NoArgs(..)"),
            Self::WithContext(_) => f.write_str("WithContext(..)"),
        }
    }
}

fn run_command(argv: &[String], lane: &LaneAssignment) {
    let argv = expand_placeholders(argv, lane);
    let Some((program, args)) = split_program(&argv) else {
        return;
    };
    debug!(
        lane = lane.lane_number(),
        command = %display_command(&argv),
        "running lane-started hook"
    );

    let mut expression = duct::cmd(program, args).stdin_null().unchecked();
    for (key, value) in lane_env(lane) {
        expression = expression.env(key, value);
    }

    match expression.run() {
        Ok(output) if output.status.success() => {}
        Ok(output) => warn!(
            lane = lane.lane_number(),
            "lane-started hook `{}` failed with {}",
            display_command(&argv),
            output.status,
        ),
        Err(error) => warn!(
            lane = lane.lane_number(),
            "lane-started hook `{}` couldn't be run: {}",
            display_command(&argv),
            DisplayErrorChain::new(error),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lanes::ExecutionTarget, retry::TestSubset};
    use camino::Utf8PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn assignment() -> LaneAssignment {
        LaneAssignment {
            attempt_index: 1,
            lane_index: 2,
            target: ExecutionTarget::new("sim"),
            output_dir: Utf8PathBuf::from("out/attempt-1/lane-3"),
            tests: TestSubset::All,
        }
    }

    #[test]
    fn closures_are_invoked() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = {
            let count = count.clone();
            LaneStartedHook::no_args(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        hook.invoke(&assignment());

        let lanes = Arc::new(AtomicUsize::new(0));
        let context_hook = {
            let lanes = lanes.clone();
            LaneStartedHook::with_context(move |lane| {
                lanes.store(lane.lane_number(), Ordering::SeqCst);
            })
        };
        context_hook.invoke(&assignment());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(lanes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn missing_hook_program_is_not_fatal() {
        LaneStartedHook::Command(vec!["multiscan-test-does-not-exist".to_owned()])
            .invoke(&assignment());
    }

    #[test]
    fn debug_output() {
        assert_eq!(
            format!("{:?}", LaneStartedHook::Command(vec!["boot".to_owned()])),
            r#"Command(["boot"])"#
        );
        assert_eq!(format!("{:?}", LaneStartedHook::no_args(|| {})), "NoArgs(..)");
    }
}
