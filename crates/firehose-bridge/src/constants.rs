// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline defaults and backend request limits.

use std::time::Duration;

/// Firehose dispatch workers.
pub const DEFAULT_FIREHOSE_WORKERS: usize = 4;

/// Records accumulated before the buffer asks for an early flush.
pub const DEFAULT_METRIC_BATCH_SIZE: usize = 200;

/// Interval of the buffer flush ticker.
pub const DEFAULT_METRIC_BATCH_INTERVAL: Duration = Duration::from_secs(30);

/// Records the buffer will hold before rejecting posts.
pub const DEFAULT_METRIC_BUFFER_HARD_CAP: usize = 10_000;

/// Adapter workers draining the flush channel.
pub const DEFAULT_ADAPTER_CONCURRENCY: usize = 10;

/// Deadline applied to every backend call.
pub const DEFAULT_BACKEND_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// App metadata cache TTL in seconds. `0` disables, negative caches forever.
pub const DEFAULT_APP_METADATA_CACHE_PERIOD: i64 = 600;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Best-effort drain window after the cancellation signal fires.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long steady-state auth failures are tolerated before they turn fatal.
pub const DEFAULT_AUTH_FAILURE_GRACE: Duration = Duration::from_secs(300);

/// The monitoring backend rejects requests above these limits.
pub const MAX_SERIES_PER_REQUEST: usize = 200;
pub const MAX_POINTS_PER_REQUEST: usize = 200;

/// Distinct descriptors allowed in one flush batch.
pub const MAX_DESCRIPTORS_PER_BATCH: usize = 100;

/// Entries the log sink queues before evicting the oldest.
pub const LOG_SINK_QUEUE_CAPACITY: usize = 1_000;

/// Attempts for transient backend failures, first try included.
pub const RETRY_ATTEMPTS: u32 = 3;

/// Base of the exponential retry backoff.
pub const RETRY_BASE_MS: u64 = 100;
