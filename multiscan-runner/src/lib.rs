// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for multiscan: running UI and unit test suites across parallel lanes,
//! retrying failures, and aggregating every attempt's reports into one [`RunSummary`].
//!
//! The entry point is [`RunOrchestratorBuilder`](orchestrator::RunOrchestratorBuilder). A run
//! builds the test target once, then loops over attempts: each attempt is fanned out across
//! lanes, its reports are decoded and merged into the cumulative summary, and the retry planner
//! decides whether the tests that failed get another attempt.
//!
//! [`RunSummary`]: multiscan_metadata::RunSummary

pub mod aggregator;
pub mod build;
pub mod collate;
pub mod config;
pub mod environment;
pub mod errors;
pub mod executor;
mod helpers;
pub mod hook;
pub mod lanes;
pub mod orchestrator;
pub mod partition;
pub mod report;
pub mod retry;
