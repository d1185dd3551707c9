// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multiscan configuration.
//!
//! Configuration is read from `.config/multiscan.toml` in the project root, layered over the
//! defaults in [`MultiscanConfig::DEFAULT_CONFIG`], and validated once into a
//! [`ResolvedConfig`].

mod elements;
mod imp;
mod resolved;

pub(crate) use elements::RawHookValue;
pub use elements::{ResultPolicy, StructuredMerge};
pub use imp::*;
pub use resolved::*;
