// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the run loop, driven by in-memory collaborators.

mod basic;
mod fixtures;
