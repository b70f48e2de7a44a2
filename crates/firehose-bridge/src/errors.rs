// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;

/// Per-envelope errors surfaced by the hot path.
///
/// None of these terminate the process; the dispatch loop counts them and
/// moves on.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The metric buffer is at its hard cap; the records were dropped.
    #[error("metric buffer full")]
    BufferFull,
    /// The envelope carried a type tag this build does not understand.
    #[error("unknown event type")]
    UnknownEventType,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Aggregate of per-series errors from one flush.
///
/// The adapter collects every classified failure it saw while posting a
/// batch and surfaces them as one error so the caller can bucket by class in
/// a single pass.
#[derive(Debug, Default)]
pub struct PostMetricError {
    pub errors: Vec<BackendError>,
}

impl PostMetricError {
    #[must_use]
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn push(&mut self, err: BackendError) {
        self.errors.push(err);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consume the accumulator: `Ok` when no series failed.
    pub fn into_result(self) -> Result<(), PostMetricError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for PostMetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{} series write(s) failed: {joined}", self.errors.len())
    }
}

impl std::error::Error for PostMetricError {}
