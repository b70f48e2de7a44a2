// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use firehose_bridge::constants;
use firehose_bridge::envelope::EventType;

use crate::error::ServicesError;

/// Configuration for the telemetry bridge, read once at startup.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Label identifying the platform instance. Required.
    pub foundation: String,
    /// Subscription id presented to the firehose.
    pub firehose_subscription_id: String,
    /// Firehose endpoint URL; informational for the embedder's client.
    pub firehose_endpoint: String,
    /// Dispatch workers pulling from the firehose channel.
    pub firehose_workers: usize,
    /// Buffer flush threshold in records.
    pub metric_batch_size: usize,
    /// Buffer flush interval.
    pub metric_batch_interval: Duration,
    /// Records the buffer holds before rejecting posts.
    pub metric_buffer_hard_cap: usize,
    /// Adapter workers draining the flush channel.
    pub adapter_concurrency: usize,
    /// Deadline for every backend call.
    pub backend_call_timeout: Duration,
    /// App metadata cache TTL in seconds; `0` disables, negative caches forever.
    pub app_metadata_cache_period: i64,
    /// Interval between self-metric snapshots.
    pub heartbeat_interval: Duration,
    /// Best-effort drain window on shutdown.
    pub shutdown_grace: Duration,
    /// Tolerated span of continuous auth failures before shutdown.
    pub auth_failure_grace: Duration,
    /// Event types forwarded on the log path.
    pub selected_log_events: HashSet<EventType>,
    /// Event types expanded on the metric path.
    pub selected_metric_events: HashSet<EventType>,
    /// Log level for the embedder's subscriber (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            foundation: String::new(),
            firehose_subscription_id: "telemetry-bridge".to_string(),
            firehose_endpoint: String::new(),
            firehose_workers: constants::DEFAULT_FIREHOSE_WORKERS,
            metric_batch_size: constants::DEFAULT_METRIC_BATCH_SIZE,
            metric_batch_interval: constants::DEFAULT_METRIC_BATCH_INTERVAL,
            metric_buffer_hard_cap: constants::DEFAULT_METRIC_BUFFER_HARD_CAP,
            adapter_concurrency: constants::DEFAULT_ADAPTER_CONCURRENCY,
            backend_call_timeout: constants::DEFAULT_BACKEND_CALL_TIMEOUT,
            app_metadata_cache_period: constants::DEFAULT_APP_METADATA_CACHE_PERIOD,
            heartbeat_interval: constants::DEFAULT_HEARTBEAT_INTERVAL,
            shutdown_grace: constants::DEFAULT_SHUTDOWN_GRACE,
            auth_failure_grace: constants::DEFAULT_AUTH_FAILURE_GRACE,
            selected_log_events: HashSet::from([EventType::LogMessage, EventType::Error]),
            selected_metric_events: HashSet::from([
                EventType::ValueMetric,
                EventType::CounterEvent,
                EventType::ContainerMetric,
                EventType::HttpStartStop,
            ]),
            log_level: "info".to_string(),
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_secs)
}

fn parse_event_list(list: &str) -> Result<HashSet<EventType>, ServicesError> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<EventType>()
                .map_err(ServicesError::InvalidConfig)
        })
        .collect()
}

impl BridgeConfig {
    /// Build the configuration from `BRIDGE_*` environment variables.
    pub fn from_env() -> Result<Self, ServicesError> {
        let defaults = Self::default();

        let selected_log_events = match env::var("BRIDGE_SELECTED_LOG_EVENTS") {
            Ok(list) => parse_event_list(&list)?,
            Err(_) => defaults.selected_log_events,
        };
        let selected_metric_events = match env::var("BRIDGE_SELECTED_METRIC_EVENTS") {
            Ok(list) => parse_event_list(&list)?,
            Err(_) => defaults.selected_metric_events,
        };

        let config = Self {
            foundation: env::var("BRIDGE_FOUNDATION").unwrap_or_default(),
            firehose_subscription_id: env::var("BRIDGE_FIREHOSE_SUBSCRIPTION_ID")
                .unwrap_or(defaults.firehose_subscription_id),
            firehose_endpoint: env::var("BRIDGE_FIREHOSE_ENDPOINT").unwrap_or_default(),
            firehose_workers: env_usize("BRIDGE_FIREHOSE_WORKERS")
                .unwrap_or(defaults.firehose_workers),
            metric_batch_size: env_usize("BRIDGE_METRIC_BATCH_SIZE")
                .unwrap_or(defaults.metric_batch_size),
            metric_batch_interval: env_secs("BRIDGE_METRIC_BATCH_INTERVAL_SECS")
                .unwrap_or(defaults.metric_batch_interval),
            metric_buffer_hard_cap: env_usize("BRIDGE_METRIC_BUFFER_HARD_CAP")
                .unwrap_or(defaults.metric_buffer_hard_cap),
            adapter_concurrency: env_usize("BRIDGE_ADAPTER_CONCURRENCY")
                .unwrap_or(defaults.adapter_concurrency),
            backend_call_timeout: env_secs("BRIDGE_BACKEND_CALL_TIMEOUT_SECS")
                .unwrap_or(defaults.backend_call_timeout),
            app_metadata_cache_period: env::var("BRIDGE_APP_METADATA_CACHE_PERIOD")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.app_metadata_cache_period),
            heartbeat_interval: env_secs("BRIDGE_HEARTBEAT_INTERVAL_SECS")
                .unwrap_or(defaults.heartbeat_interval),
            shutdown_grace: env_secs("BRIDGE_SHUTDOWN_GRACE_SECS")
                .unwrap_or(defaults.shutdown_grace),
            auth_failure_grace: env_secs("BRIDGE_AUTH_FAILURE_GRACE_SECS")
                .unwrap_or(defaults.auth_failure_grace),
            selected_log_events,
            selected_metric_events,
            log_level: env::var("BRIDGE_LOG_LEVEL")
                .map(|value| value.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ServicesError> {
        if self.foundation.trim().is_empty() {
            return Err(ServicesError::InvalidConfig(
                "BRIDGE_FOUNDATION must be set".to_string(),
            ));
        }
        if self.firehose_workers == 0 {
            return Err(ServicesError::InvalidConfig(
                "firehose worker count must be greater than 0".to_string(),
            ));
        }
        if self.adapter_concurrency == 0 {
            return Err(ServicesError::InvalidConfig(
                "adapter concurrency must be greater than 0".to_string(),
            ));
        }
        if self.metric_batch_size == 0 {
            return Err(ServicesError::InvalidConfig(
                "metric batch size must be greater than 0".to_string(),
            ));
        }
        if self.metric_batch_size > self.metric_buffer_hard_cap {
            return Err(ServicesError::InvalidConfig(format!(
                "metric batch size {} exceeds buffer hard cap {}",
                self.metric_batch_size, self.metric_buffer_hard_cap
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ServicesError::InvalidConfig(format!(
                "invalid log level '{}'; must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
