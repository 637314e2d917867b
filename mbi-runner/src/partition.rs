// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splitting a corpus across independent runner instances.
//!
//! Instances never communicate: each one lists the corpus, sorts it, and keeps the contiguous
//! slice that belongs to its batch. The slices for `1/M` through `M/M` cover the sorted corpus
//! exactly once.

use crate::errors::BatchParseError;
use serde::{Deserialize, Deserializer, de::Error as _};
use std::{fmt, ops::Range, str::FromStr};

/// A batch specification of the form `N/M`: this instance runs batch `N` out of `M`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchSpec {
    position: u64,
    total: u64,
}

impl BatchSpec {
    /// A batch covering the whole corpus.
    pub const ALL: Self = Self {
        position: 1,
        total: 1,
    };

    /// Creates a new batch spec, checking that `1 <= position <= total`.
    pub fn new(position: u64, total: u64) -> Result<Self, BatchParseError> {
        if !(1..=total).contains(&position) {
            return Err(BatchParseError::new(format!(
                "batch {position} must be a number between 1 and total batches {total}, inclusive"
            )));
        }
        Ok(Self { position, total })
    }

    /// Returns the 1-based position of this batch.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the total number of batches.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Returns the range of sorted corpus ranks owned by this batch.
    pub fn range_for(&self, file_count: usize) -> BatchRange {
        let file_count = file_count as u64;
        let batch_size = file_count.div_ceil(self.total);
        let min_rank = (batch_size * (self.position - 1)).min(file_count);
        let end = (batch_size * self.position).min(file_count);
        BatchRange {
            min_rank: min_rank as usize,
            len: (end - min_rank) as usize,
        }
    }
}

impl Default for BatchSpec {
    fn default() -> Self {
        Self::ALL
    }
}

impl fmt::Display for BatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.position, self.total)
    }
}

impl FromStr for BatchSpec {
    type Err = BatchParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (position_str, total_str) = input.split_once('/').ok_or_else(|| {
            BatchParseError::new(format!("expected input '{input}' to be in the format N/M"))
        })?;

        let position: u64 = position_str.parse().map_err(|err| {
            BatchParseError::new(format!(
                "failed to parse batch '{position_str}' as u64: {err}"
            ))
        })?;
        let total: u64 = total_str.parse().map_err(|err| {
            BatchParseError::new(format!(
                "failed to parse total batches '{total_str}' as u64: {err}"
            ))
        })?;

        Self::new(position, total)
    }
}

impl<'de> Deserialize<'de> for BatchSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// The contiguous slice of sorted corpus ranks owned by one batch.
///
/// A range may be empty when there are fewer files than batches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchRange {
    min_rank: usize,
    len: usize,
}

impl BatchRange {
    /// Returns the first rank owned by this batch.
    pub fn min_rank(&self) -> usize {
        self.min_rank
    }

    /// Returns the last rank owned by this batch, or `None` if the range is empty.
    pub fn max_rank(&self) -> Option<usize> {
        (self.len > 0).then(|| self.min_rank + self.len - 1)
    }

    /// Returns the number of files in this batch.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if this batch owns no files.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the ranks as a half-open range, suitable for slicing.
    pub fn as_range(&self) -> Range<usize> {
        self.min_rank..self.min_rank + self.len
    }

    /// Returns the items of `sorted` owned by this batch.
    pub fn select<'a, T>(&self, sorted: &'a [T]) -> &'a [T] {
        &sorted[self.as_range()]
    }
}
