// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for partitioning an attempt's test plan across parallel lanes.
//!
//! Partitioning is deterministic: the same tests and slice count always produce the same slices,
//! which keeps retries reproducible.

use crate::errors::PartitionParseError;
use multiscan_metadata::TestIdentifier;
use serde::Deserialize;
use std::{fmt, str::FromStr};

/// How tests are distributed across slices.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LanePartition {
    /// Contiguous, order-preserving chunks. Earlier slices get one extra test when the tests don't
    /// divide evenly.
    #[default]
    Contiguous,

    /// Tests are dealt out one at a time, like cards.
    RoundRobin,
}

/// Decides which slice each test of a plan belongs to.
pub trait Partitioner: fmt::Debug {
    /// Returns the zero-based slice for the next test, given its position in the plan.
    fn slice_for(&mut self, position: usize) -> usize;
}

impl LanePartition {
    /// Creates a new `Partitioner` for a plan of `total_tests` tests split into `slices` slices.
    pub fn build(self, total_tests: usize, slices: usize) -> Box<dyn Partitioner> {
        let slices = slices.max(1);
        match self {
            LanePartition::Contiguous => Box::new(ChunkPartitioner::new(total_tests, slices)),
            LanePartition::RoundRobin => Box::new(CountPartitioner::new(slices)),
        }
    }

    /// Splits `tests` into at most `slices` disjoint, order-preserving slices.
    ///
    /// Empty slices are dropped, so fewer slices than requested are returned when there are fewer
    /// tests than slices.
    pub fn partition(self, tests: &[TestIdentifier], slices: usize) -> Vec<Vec<TestIdentifier>> {
        let slices = slices.max(1);
        let mut partitioner = self.build(tests.len(), slices);
        let mut out = vec![Vec::new(); slices];
        for (position, test) in tests.iter().enumerate() {
            out[partitioner.slice_for(position)].push(test.clone());
        }
        out.retain(|slice| !slice.is_empty());
        out
    }

    /// The names accepted by [`FromStr`].
    pub fn variants() -> &'static [&'static str] {
        &["contiguous", "round-robin"]
    }
}

impl FromStr for LanePartition {
    type Err = PartitionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contiguous" => Ok(LanePartition::Contiguous),
            "round-robin" => Ok(LanePartition::RoundRobin),
            other => Err(PartitionParseError::new(format!(
                "lane partition '{other}' must be one of: {}",
                Self::variants().join(", ")
            ))),
        }
    }
}

impl fmt::Display for LanePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LanePartition::Contiguous => write!(f, "contiguous"),
            LanePartition::RoundRobin => write!(f, "round-robin"),
        }
    }
}

impl<'de> Deserialize<'de> for LanePartition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = LanePartition;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "one of \"contiguous\" or \"round-robin\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(V)
    }
}

#[derive(Clone, Debug)]
struct CountPartitioner {
    total_slices: usize,
    curr: usize,
}

impl CountPartitioner {
    fn new(total_slices: usize) -> Self {
        Self {
            total_slices,
            curr: 0,
        }
    }
}

impl Partitioner for CountPartitioner {
    fn slice_for(&mut self, _position: usize) -> usize {
        let slice = self.curr;
        self.curr = (self.curr + 1) % self.total_slices;
        slice
    }
}

#[derive(Clone, Debug)]
struct ChunkPartitioner {
    base: usize,
    remainder: usize,
}

impl ChunkPartitioner {
    fn new(total_tests: usize, total_slices: usize) -> Self {
        Self {
            base: total_tests / total_slices,
            remainder: total_tests % total_slices,
        }
    }
}

impl Partitioner for ChunkPartitioner {
    fn slice_for(&mut self, position: usize) -> usize {
        // The first `remainder` slices have `base + 1` tests each.
        let big = self.base + 1;
        let big_total = big * self.remainder;
        if position < big_total {
            position / big
        } else {
            self.remainder + (position - big_total) / self.base
        }
    }
}
