// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to the run summaries produced by multiscan.
//!
//! The types in this crate form the wire contract between the multiscan orchestrator and
//! downstream tooling: field names of [`RunSummary`] are stable and are serialized as-is.

mod exit_codes;
mod summary;

pub use exit_codes::*;
pub use summary::*;
