// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline self-accounting.
//!
//! Every stage of the pipeline increments named counters on a shared
//! [`Heartbeater`]; one atomic per counter, no locks. A ticker task
//! periodically snapshots the counters, publishes them as `heartbeat.*`
//! gauge records, and resets. The snapshot is written through the metric
//! adapter directly, never through the buffer, so a saturated flush path
//! cannot starve the bridge's own health signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ustr::Ustr;

use crate::labels::{self, LabelMap};
use crate::metrics::adapter::MetricAdapter;
use crate::metrics::record::{MetricKind, MetricRecord};

/// Named counters maintained by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    EventsReceived,
    EventsDropped,
    EventsFiltered,
    EventsUnknown,
    MetricsEmitted,
    MetricsNonMonotonic,
    BatchesSent,
    BackendErrorsTransient,
    BackendErrorsPermanent,
    BackendErrorsAuth,
    AppInfoMisses,
    AppInfoErrors,
    LogsDropped,
}

impl Counter {
    pub const ALL: [Counter; 13] = [
        Counter::EventsReceived,
        Counter::EventsDropped,
        Counter::EventsFiltered,
        Counter::EventsUnknown,
        Counter::MetricsEmitted,
        Counter::MetricsNonMonotonic,
        Counter::BatchesSent,
        Counter::BackendErrorsTransient,
        Counter::BackendErrorsPermanent,
        Counter::BackendErrorsAuth,
        Counter::AppInfoMisses,
        Counter::AppInfoErrors,
        Counter::LogsDropped,
    ];

    /// Metric name suffix published for this counter.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Counter::EventsReceived => "events.received",
            Counter::EventsDropped => "events.dropped",
            Counter::EventsFiltered => "events.filtered",
            Counter::EventsUnknown => "events.unknown",
            Counter::MetricsEmitted => "metrics.emitted",
            Counter::MetricsNonMonotonic => "metrics.nonmonotonic",
            Counter::BatchesSent => "batches.sent",
            Counter::BackendErrorsTransient => "backend.errors.transient",
            Counter::BackendErrorsPermanent => "backend.errors.permanent",
            Counter::BackendErrorsAuth => "backend.errors.auth",
            Counter::AppInfoMisses => "app_info.misses",
            Counter::AppInfoErrors => "app_info.errors",
            Counter::LogsDropped => "logs.dropped",
        }
    }
}

/// Lock-free counter set shared by every pipeline stage.
#[derive(Debug, Default)]
pub struct Heartbeater {
    counters: [AtomicU64; Counter::ALL.len()],
}

impl Heartbeater {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter as usize].fetch_add(n, Ordering::Relaxed);
    }

    /// Current value without resetting; accounting and tests.
    #[must_use]
    pub fn value(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    /// Take the current snapshot and zero every counter.
    pub fn snapshot_and_reset(&self) -> Vec<(Counter, u64)> {
        Counter::ALL
            .iter()
            .map(|&c| (c, self.counters[c as usize].swap(0, Ordering::Relaxed)))
            .collect()
    }
}

/// Nanoseconds since the epoch for self-emitted records.
pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Ticker task publishing the heartbeat snapshot.
pub struct HeartbeatService {
    heartbeater: Arc<Heartbeater>,
    adapter: Arc<MetricAdapter>,
    foundation: Ustr,
    period: Duration,
    cancel: CancellationToken,
}

impl HeartbeatService {
    #[must_use]
    pub fn new(
        heartbeater: Arc<Heartbeater>,
        adapter: Arc<MetricAdapter>,
        foundation: &str,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            heartbeater,
            adapter,
            foundation: Ustr::from(foundation),
            period,
            cancel,
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            tokio::select! {
                _ = ticker.tick() => self.emit().await,
                () = self.cancel.cancelled() => {
                    debug!("heartbeat service stopped");
                    break;
                }
            }
        }
    }

    async fn emit(&self) {
        let snapshot = self.heartbeater.snapshot_and_reset();
        let event_time = now_nanos();
        let records: Vec<MetricRecord> = snapshot
            .into_iter()
            .map(|(counter, value)| {
                let mut record_labels = LabelMap::new();
                record_labels.insert(Ustr::from(labels::FOUNDATION), self.foundation.as_str());
                MetricRecord {
                    name: Ustr::from(&format!("heartbeat.{}", counter.name())),
                    value: value as f64,
                    unit: Ustr::from(""),
                    kind: MetricKind::Gauge,
                    labels: record_labels,
                    event_time,
                }
            })
            .collect();

        // Direct adapter call: the reserved path that bypasses both the
        // buffer and the adapter worker pool.
        if let Err(err) = self.adapter.post_metrics(records).await {
            warn!("failed to publish heartbeat snapshot: {err}");
        }
    }
}
