/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Running statistics kept by the subscriber.

use crate::reading::Reading;

/// Sum and count of every reading received so far.
///
/// Owned by the subscriber loop; there is exactly one writer, so no locking.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Aggregate {
    sum: f64,
    count: u64,
}

/// Point-in-time view used for the periodic report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub sum: f64,
    pub count: u64,
    pub mean: f64,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one reading in.  Call once per acknowledged delivery.
    pub fn record(&mut self, reading: Reading) {
        self.sum += reading.value();
        self.count += 1;
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Arithmetic mean; `0.0` before the first reading.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn summary(&self) -> Summary {
        Summary {
            sum: self.sum,
            count: self.count,
            mean: self.mean(),
        }
    }
}
