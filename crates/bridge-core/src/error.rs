// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the service layer.
#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("backend authentication failed: {0}")]
    Auth(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("shutdown grace period exceeded")]
    ShutdownTimeout,
}

impl ServicesError {
    /// Process exit code the launcher should report for this error.
    ///
    /// Graceful shutdown exits `0`; configuration errors exit `1`; fatal
    /// backend authentication failures exit `2`.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            ServicesError::Auth(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            ServicesError::InvalidConfig("missing foundation".to_string()).exit_code(),
            1
        );
        assert_eq!(
            ServicesError::Auth("token rejected".to_string()).exit_code(),
            2
        );
        assert_eq!(ServicesError::ShutdownTimeout.exit_code(), 1);
    }

    #[test]
    fn test_error_display() {
        let err = ServicesError::InvalidConfig("missing foundation".to_string());
        assert_eq!(err.to_string(), "invalid configuration: missing foundation");
    }
}
