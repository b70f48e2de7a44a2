// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backend write interfaces and error classification.
//!
//! The bridge never speaks HTTP itself; the embedder supplies clients that
//! implement [`MonitoringClient`] and [`LoggingClient`]. Everything the
//! pipeline needs to know about a failed call is captured by
//! [`BackendError`], which buckets failures into auth, transient, and
//! permanent classes so the retry and accounting layers can act on the class
//! alone.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::labels::LabelMap;
use crate::metrics::record::Descriptor;

/// Classified failure from a backend call.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Credentials rejected. Sustained auth failure terminates the bridge.
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// Network failure, 5xx, timeout, or rate limit. Safe to retry.
    #[error("transient backend error: {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },
    /// Schema mismatch, oversized payload, or other 4xx. Never retried.
    #[error("permanent backend error: {message}")]
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

impl BackendError {
    /// Classify an HTTP status code into an error class.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => BackendError::Auth(message),
            408 | 429 => BackendError::Transient {
                status: Some(status),
                message,
            },
            s if s >= 500 => BackendError::Transient {
                status: Some(status),
                message,
            },
            _ => BackendError::Permanent {
                status: Some(status),
                message,
            },
        }
    }

    /// A call that exceeded its deadline; always retryable.
    #[must_use]
    pub fn timed_out() -> Self {
        BackendError::Transient {
            status: None,
            message: "backend call exceeded deadline".to_string(),
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient { .. })
    }

    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, BackendError::Auth(_))
    }
}

/// Log severity understood by the logging backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Severity {
    #[default]
    Default,
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Default => "DEFAULT",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

/// One entry submitted to the logging backend.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub labels: LabelMap,
    pub severity: Severity,
    /// Nanoseconds since the epoch.
    pub timestamp: i64,
    pub payload: Value,
}

/// A single measured value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub value: f64,
    /// Nanoseconds since the epoch.
    pub event_time: i64,
}

/// One `(descriptor, labels)` pair carrying one point.
#[derive(Clone, Debug)]
pub struct TimeSeries {
    pub descriptor: Descriptor,
    pub labels: LabelMap,
    pub point: Point,
}

/// Monitoring backend write surface.
#[async_trait]
pub trait MonitoringClient: Send + Sync {
    /// Create the descriptor if the backend does not have it yet.
    async fn ensure_descriptor(&self, descriptor: &Descriptor) -> Result<(), BackendError>;

    /// Write a batch of series, one point each.
    async fn create_time_series(&self, series: &[TimeSeries]) -> Result<(), BackendError>;
}

/// Logging backend write surface.
#[async_trait]
pub trait LoggingClient: Send + Sync {
    async fn write(&self, entry: LogEntry) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_auth() {
        assert!(BackendError::from_status(401, "denied").is_auth());
        assert!(BackendError::from_status(403, "denied").is_auth());
    }

    #[test]
    fn test_from_status_transient() {
        for status in [408, 429, 500, 503, 599] {
            assert!(
                BackendError::from_status(status, "try later").is_transient(),
                "status {status} should be transient"
            );
        }
    }

    #[test]
    fn test_from_status_permanent() {
        for status in [400, 404, 413, 422] {
            let err = BackendError::from_status(status, "bad payload");
            assert!(!err.is_transient(), "status {status} should be permanent");
            assert!(!err.is_auth());
        }
    }

    #[test]
    fn test_timeout_is_transient() {
        assert!(BackendError::timed_out().is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = BackendError::from_status(503, "upstream unavailable");
        assert_eq!(
            err.to_string(),
            "transient backend error: upstream unavailable"
        );
    }
}
