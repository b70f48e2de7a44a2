// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backend-shaped metric writes.
//!
//! The adapter turns buffered records into descriptor-checked time-series
//! write requests. Descriptors already created at the backend are cached
//! behind a read-mostly lock; writes retry transient failures with
//! exponential backoff and jitter, and every failure is classified and
//! counted. A pool of workers drains the flush channel; the heartbeat path
//! calls [`MetricAdapter::post_metrics`] directly and so can never be starved
//! by a saturated pool.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::backend::{BackendError, MonitoringClient, Point, TimeSeries};
use crate::constants::{
    MAX_POINTS_PER_REQUEST, MAX_SERIES_PER_REQUEST, RETRY_ATTEMPTS, RETRY_BASE_MS,
};
use crate::errors::PostMetricError;
use crate::heartbeat::{Counter, Heartbeater};
use crate::metrics::record::{Descriptor, MetricBatch, MetricRecord};

pub struct MetricAdapter {
    client: Arc<dyn MonitoringClient>,
    descriptors: RwLock<HashSet<Descriptor>>,
    heartbeater: Arc<Heartbeater>,
    call_timeout: Duration,
    auth_grace: Duration,
    auth_failing_since: Mutex<Option<Instant>>,
    auth_exhausted: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl MetricAdapter {
    #[must_use]
    pub fn new(
        client: Arc<dyn MonitoringClient>,
        heartbeater: Arc<Heartbeater>,
        call_timeout: Duration,
        auth_grace: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            descriptors: RwLock::new(HashSet::new()),
            heartbeater,
            call_timeout,
            auth_grace,
            auth_failing_since: Mutex::new(None),
            auth_exhausted: Arc::new(AtomicBool::new(false)),
            cancel,
        }
    }

    /// True once sustained auth failure has turned fatal.
    #[must_use]
    pub fn auth_exhausted(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.auth_exhausted)
    }

    /// Write one batch of records, aggregating per-series errors.
    ///
    /// Records whose descriptor cannot be created are dropped and counted;
    /// the rest are written in backend-sized requests.
    pub async fn post_metrics(&self, records: MetricBatch) -> Result<(), PostMetricError> {
        let mut failures = PostMetricError::new();

        let mut groups: HashMap<Descriptor, Vec<MetricRecord>> = HashMap::new();
        for record in records {
            groups.entry(record.descriptor()).or_default().push(record);
        }

        let request_size = MAX_SERIES_PER_REQUEST.min(MAX_POINTS_PER_REQUEST);
        for (descriptor, group) in groups {
            if let Err(err) = self.ensure_descriptor(&descriptor).await {
                // terminal for this descriptor in this flush
                warn!(
                    "descriptor {} could not be created, dropping {} record(s): {err}",
                    descriptor.name,
                    group.len()
                );
                self.heartbeater
                    .add(Counter::EventsDropped, group.len() as u64);
                failures.push(err);
                continue;
            }

            let series: Vec<TimeSeries> = group
                .into_iter()
                .map(|record| TimeSeries {
                    descriptor: descriptor.clone(),
                    labels: record.labels.clone(),
                    point: Point {
                        value: record.value,
                        event_time: record.event_time,
                    },
                })
                .collect();
            for request in series.chunks(request_size) {
                if let Err(err) = self.write_series(request).await {
                    failures.push(err);
                }
            }
        }

        failures.into_result()
    }

    async fn ensure_descriptor(&self, descriptor: &Descriptor) -> Result<(), BackendError> {
        {
            #[allow(clippy::expect_used)]
            let known = self.descriptors.read().expect("lock poisoned");
            if known.contains(descriptor) {
                return Ok(());
            }
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = match timeout(self.call_timeout, self.client.ensure_descriptor(descriptor))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::timed_out()),
            };
            match result {
                Ok(()) => {
                    self.clear_auth_failure();
                    #[allow(clippy::expect_used)]
                    self.descriptors
                        .write()
                        .expect("lock poisoned")
                        .insert(descriptor.clone());
                    return Ok(());
                }
                Err(err) => {
                    self.classify(&err);
                    if !err.is_transient() || attempt >= RETRY_ATTEMPTS {
                        return Err(err);
                    }
                    sleep(backoff(attempt)).await;
                }
            }
        }
    }

    async fn write_series(&self, series: &[TimeSeries]) -> Result<(), BackendError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = match timeout(self.call_timeout, self.client.create_time_series(series))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::timed_out()),
            };
            match result {
                Ok(()) => {
                    self.clear_auth_failure();
                    return Ok(());
                }
                Err(err) => {
                    self.classify(&err);
                    if !err.is_transient() || attempt >= RETRY_ATTEMPTS {
                        return Err(err);
                    }
                    sleep(backoff(attempt)).await;
                }
            }
        }
    }

    fn classify(&self, err: &BackendError) {
        match err {
            BackendError::Auth(_) => {
                self.heartbeater.increment(Counter::BackendErrorsAuth);
                self.record_auth_failure();
            }
            BackendError::Transient { .. } => {
                self.heartbeater.increment(Counter::BackendErrorsTransient);
            }
            BackendError::Permanent { .. } => {
                self.heartbeater.increment(Counter::BackendErrorsPermanent);
            }
        }
    }

    /// Auth failures are tolerated for `auth_grace`; past that the shared
    /// cancellation signal fires and the bridge shuts down.
    fn record_auth_failure(&self) {
        #[allow(clippy::expect_used)]
        let mut failing = self.auth_failing_since.lock().expect("lock poisoned");
        let since = failing.get_or_insert_with(Instant::now);
        if since.elapsed() >= self.auth_grace && !self.auth_exhausted.swap(true, Ordering::SeqCst) {
            error!(
                "backend rejected credentials continuously for {:?}, shutting down",
                self.auth_grace
            );
            self.cancel.cancel();
        }
    }

    fn clear_auth_failure(&self) {
        #[allow(clippy::expect_used)]
        let mut failing = self.auth_failing_since.lock().expect("lock poisoned");
        *failing = None;
    }

    #[cfg(test)]
    fn descriptor_cache_len(&self) -> usize {
        self.descriptors.read().unwrap().len()
    }
}

fn backoff(attempt: u32) -> Duration {
    let base = RETRY_BASE_MS * (1 << (attempt - 1).min(6));
    let jitter = rand::thread_rng().gen_range(0..RETRY_BASE_MS);
    Duration::from_millis(base + jitter)
}

/// Worker pool draining the flush channel into the adapter.
pub struct AdapterService;

enum Next {
    Batch(MetricBatch),
    Closed,
    Drain,
}

impl AdapterService {
    /// Spawn `workers` tasks sharing one receiver.
    pub fn spawn_workers(
        adapter: Arc<MetricAdapter>,
        rx: mpsc::Receiver<MetricBatch>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(TokioMutex::new(rx));
        (0..workers)
            .map(|worker_id| {
                let adapter = Arc::clone(&adapter);
                let rx = Arc::clone(&rx);
                let cancel = cancel.clone();
                tokio::spawn(Self::run_worker(adapter, rx, cancel, worker_id))
            })
            .collect()
    }

    async fn run_worker(
        adapter: Arc<MetricAdapter>,
        rx: Arc<TokioMutex<mpsc::Receiver<MetricBatch>>>,
        cancel: CancellationToken,
        worker_id: usize,
    ) {
        loop {
            let next = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    () = cancel.cancelled() => Next::Drain,
                    batch = guard.recv() => match batch {
                        Some(batch) => Next::Batch(batch),
                        None => Next::Closed,
                    },
                }
            };
            match next {
                Next::Batch(batch) => Self::post(&adapter, batch).await,
                Next::Closed => break,
                Next::Drain => {
                    // keep reading until the flush driver drops its sender,
                    // so the final shutdown flush is never lost; the
                    // embedder bounds this with the shutdown grace
                    loop {
                        let batch = { rx.lock().await.recv().await };
                        match batch {
                            Some(batch) => Self::post(&adapter, batch).await,
                            None => break,
                        }
                    }
                    break;
                }
            }
        }
        debug!("adapter worker {worker_id} stopped");
    }

    async fn post(adapter: &MetricAdapter, batch: MetricBatch) {
        let count = batch.len();
        match adapter.post_metrics(batch).await {
            Ok(()) => {
                adapter.heartbeater.increment(Counter::BatchesSent);
                debug!("flushed batch of {count} record(s)");
            }
            Err(err) => {
                // per-series failures were already classified and counted
                warn!("metric flush failed: {err}");
            }
        }
    }
}
