/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! A single sensor reading and how it travels over the wire.
//!
//! The body of every message is the UTF-8 decimal text of an `f64` with six
//! fractional digits, e.g. `"42.125000"`.  Decoding is lenient about
//! surrounding whitespace and strict about everything else.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

// ── Reading ───────────────────────────────────────────────────────────────────

/// One temperature sample.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Reading(pub f64);

impl Reading {
    pub fn value(self) -> f64 {
        self.0
    }

    /// Encodes the reading as a message body.
    pub fn encode(self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Decodes a message body.
    ///
    /// # Errors
    /// [`ReadingError::Malformed`] when the body is not UTF-8 decimal text,
    /// [`ReadingError::NotFinite`] for `inf` / `NaN` spellings.
    pub fn decode(body: &[u8]) -> Result<Self, ReadingError> {
        let text = std::str::from_utf8(body).map_err(|_| ReadingError::Malformed {
            body: String::from_utf8_lossy(body).into_owned(),
        })?;
        let value: f64 = text
            .trim()
            .parse()
            .map_err(|_| ReadingError::Malformed {
                body: text.to_string(),
            })?;
        if !value.is_finite() {
            return Err(ReadingError::NotFinite {
                body: text.to_string(),
            });
        }
        Ok(Reading(value))
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReadingError {
    #[error("message body '{body}' is not a decimal number")]
    Malformed { body: String },

    #[error("message body '{body}' is not a finite number")]
    NotFinite { body: String },

    #[error("reading range [{min}, {max}) is empty")]
    EmptyRange { min: f64, max: f64 },
}

// ── Sources ───────────────────────────────────────────────────────────────────

/// Produces the value published on each timer tick.
pub trait ReadingSource: Send {
    fn next_reading(&mut self) -> Reading;
}

/// Readings drawn uniformly from a half-open range.
pub struct UniformSource {
    rng: StdRng,
    range: Range<f64>,
}

impl UniformSource {
    /// Creates a source over `range`.  With `seed` the sequence is
    /// reproducible; without it the generator is seeded from the OS.
    pub fn new(range: Range<f64>, seed: Option<u64>) -> Result<Self, ReadingError> {
        if range.is_empty() {
            return Err(ReadingError::EmptyRange {
                min: range.start,
                max: range.end,
            });
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self { rng, range })
    }
}

impl ReadingSource for UniformSource {
    fn next_reading(&mut self) -> Reading {
        Reading(self.rng.gen_range(self.range.clone()))
    }
}

/// Replays a fixed list of values, then repeats the last one.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct ScriptedSource {
    values: Vec<f64>,
    next: usize,
}

#[cfg(test)]
impl ScriptedSource {
    pub(crate) fn new(values: impl Into<Vec<f64>>) -> Self {
        Self {
            values: values.into(),
            next: 0,
        }
    }
}

#[cfg(test)]
impl ReadingSource for ScriptedSource {
    fn next_reading(&mut self) -> Reading {
        let idx = self.next.min(self.values.len().saturating_sub(1));
        self.next += 1;
        Reading(self.values.get(idx).copied().unwrap_or_default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
