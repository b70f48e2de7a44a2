// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory metric buffering with swap-on-flush.
//!
//! `post` is non-blocking: records land in a mutex-protected vector and the
//! flush driver swaps the whole vector out in O(1). The hard cap is the
//! pipeline's primary backpressure surface; when the buffer is full the
//! caller gets [`BridgeError::BufferFull`] and drops the records rather than
//! letting the queue grow without bound.

use std::collections::HashSet;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::BridgeError;
use crate::heartbeat::{Counter, Heartbeater};
use crate::metrics::record::{self, MetricBatch, MetricRecord};

pub struct MetricBuffer {
    records: Mutex<Vec<MetricRecord>>,
    hard_cap: usize,
    flush_threshold: usize,
    flush_hint: Notify,
    heartbeater: Arc<Heartbeater>,
}

impl MetricBuffer {
    #[must_use]
    pub fn new(hard_cap: usize, flush_threshold: usize, heartbeater: Arc<Heartbeater>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            hard_cap,
            flush_threshold,
            flush_hint: Notify::new(),
            heartbeater,
        }
    }

    /// Append records to the current window.
    ///
    /// Returns [`BridgeError::BufferFull`] when the buffer already holds
    /// `hard_cap` records; the rejected records are counted as dropped.
    pub fn post(&self, records: Vec<MetricRecord>) -> Result<(), BridgeError> {
        if records.is_empty() {
            return Ok(());
        }

        let should_flush = {
            #[allow(clippy::expect_used)]
            let mut buffer = self.records.lock().expect("lock poisoned");
            if buffer.len() >= self.hard_cap {
                self.heartbeater
                    .add(Counter::EventsDropped, records.len() as u64);
                return Err(BridgeError::BufferFull);
            }
            buffer.extend(records);
            buffer.len() >= self.flush_threshold
        };

        if should_flush {
            self.flush_hint.notify_one();
        }
        Ok(())
    }

    /// Swap the window out, leaving an empty one in place.
    #[must_use]
    pub fn swap(&self) -> Vec<MetricRecord> {
        #[allow(clippy::expect_used)]
        let mut buffer = self.records.lock().expect("lock poisoned");
        mem::take(&mut *buffer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let buffer = self.records.lock().expect("lock poisoned");
        buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split a deduplicated window into adapter batches.
///
/// Each batch holds at most `max_size` records and at most `max_descriptors`
/// distinct descriptors.
fn split_batches(
    records: Vec<MetricRecord>,
    max_size: usize,
    max_descriptors: usize,
) -> Vec<MetricBatch> {
    let mut batches = Vec::new();
    let mut current: MetricBatch = Vec::new();
    let mut descriptors = HashSet::new();

    for record in records {
        let descriptor = record.descriptor();
        let new_descriptor = !descriptors.contains(&descriptor);
        if current.len() >= max_size || (new_descriptor && descriptors.len() >= max_descriptors) {
            batches.push(mem::take(&mut current));
            descriptors.clear();
        }
        descriptors.insert(record.descriptor());
        current.push(record);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// The single task that drives flushing.
///
/// Ticks at the flush interval and also wakes early when the buffer crosses
/// its threshold. Every flush swaps the window, deduplicates it, and queues
/// batches on the adapter's work channel.
pub struct FlushDriver {
    buffer: Arc<MetricBuffer>,
    batches: mpsc::Sender<MetricBatch>,
    period: Duration,
    max_batch_size: usize,
    max_descriptors: usize,
    heartbeater: Arc<Heartbeater>,
    cancel: CancellationToken,
}

impl FlushDriver {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffer: Arc<MetricBuffer>,
        batches: mpsc::Sender<MetricBatch>,
        period: Duration,
        max_batch_size: usize,
        max_descriptors: usize,
        heartbeater: Arc<Heartbeater>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            buffer,
            batches,
            period,
            max_batch_size,
            max_descriptors,
            heartbeater,
            cancel,
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.tick().await; // first tick is immediate
        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush().await,
                () = self.buffer.flush_hint.notified() => self.flush().await,
                () = self.cancel.cancelled() => {
                    self.flush().await;
                    debug!("flush driver stopped");
                    break;
                }
            }
        }
    }

    async fn flush(&self) {
        let window = self.buffer.swap();
        if window.is_empty() {
            return;
        }

        let deduped = record::dedup(window, &self.heartbeater);
        self.heartbeater
            .add(Counter::MetricsEmitted, deduped.len() as u64);

        for batch in split_batches(deduped, self.max_batch_size, self.max_descriptors) {
            if let Err(err) = self.batches.send(batch).await {
                warn!("adapter channel closed, discarding flush: {err}");
                return;
            }
        }
    }
}
