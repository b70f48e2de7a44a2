// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing_subscriber::EnvFilter;

use crate::error::ServicesError;

/// Install the global tracing subscriber for the bridge process.
///
/// `log_level` comes from [`crate::config::BridgeConfig::log_level`]. Noisy
/// transport crates are silenced regardless of the configured level.
pub fn init(log_level: &str) -> Result<(), ServicesError> {
    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter)
                .map_err(|err| ServicesError::InvalidConfig(format!("bad log level: {err}")))?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| ServicesError::Runtime(format!("failed to install subscriber: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_rejects_bad_directive() {
        let result = init("in[valid");
        assert!(matches!(result, Err(ServicesError::InvalidConfig(_))));
    }

    #[test]
    fn test_init_installs_once() {
        // first call may fail if another test installed a subscriber already
        let _ = init("info");
        // second call must fail: the global subscriber is already set
        let result = init("info");
        assert!(matches!(result, Err(ServicesError::Runtime(_))));
    }
}
