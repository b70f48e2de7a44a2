// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The dispatch loop.
//!
//! The nozzle is the only component that pulls from the firehose. `W`
//! workers share one envelope channel; each envelope is classified and
//! routed to the log sink or the metric buffer exactly once. Per-envelope
//! failures are counted and dropped, never escalated; ordering between
//! workers is not preserved.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::envelope::{Envelope, EventType};
use crate::errors::BridgeError;
use crate::heartbeat::{Counter, Heartbeater};
use crate::logs::LogSink;
use crate::metrics::buffer::MetricBuffer;
use crate::serializer::{self, Serializer};

pub struct Nozzle {
    serializer: Serializer,
    log_sink: Arc<LogSink>,
    buffer: Arc<MetricBuffer>,
    heartbeater: Arc<Heartbeater>,
    selected_log_events: HashSet<EventType>,
    selected_metric_events: HashSet<EventType>,
}

enum Next {
    Envelope(Envelope),
    Closed,
    Drain,
}

impl Nozzle {
    #[must_use]
    pub fn new(
        serializer: Serializer,
        log_sink: Arc<LogSink>,
        buffer: Arc<MetricBuffer>,
        heartbeater: Arc<Heartbeater>,
        selected_log_events: HashSet<EventType>,
        selected_metric_events: HashSet<EventType>,
    ) -> Self {
        Self {
            serializer,
            log_sink,
            buffer,
            heartbeater,
            selected_log_events,
            selected_metric_events,
        }
    }

    /// Route one envelope. Exactly one of: log path, metric path, dropped
    /// with error.
    pub async fn handle_event(&self, envelope: &Envelope) -> Result<(), BridgeError> {
        let event_type = envelope.event_type();
        if event_type == EventType::Unknown {
            self.heartbeater.increment(Counter::EventsUnknown);
            return Err(BridgeError::UnknownEventType);
        }

        if serializer::is_log(envelope) {
            if !self.selected_log_events.contains(&event_type) {
                self.heartbeater.increment(Counter::EventsFiltered);
                return Ok(());
            }
            self.heartbeater.increment(Counter::EventsReceived);
            let labels = self.serializer.log_labels(envelope).await;
            // fire-and-forget: sink failures are the sink's problem
            self.log_sink.submit(envelope, labels);
            return Ok(());
        }

        if !self.selected_metric_events.contains(&event_type) {
            self.heartbeater.increment(Counter::EventsFiltered);
            return Ok(());
        }
        let records = self.serializer.get_metrics(envelope).await?;
        self.heartbeater.increment(Counter::EventsReceived);
        self.buffer.post(records)
    }

    /// Spawn `workers` dispatch tasks sharing the firehose channel.
    pub fn spawn_workers(
        nozzle: Arc<Nozzle>,
        rx: mpsc::Receiver<Envelope>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(TokioMutex::new(rx));
        (0..workers)
            .map(|worker_id| {
                let nozzle = Arc::clone(&nozzle);
                let rx = Arc::clone(&rx);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    nozzle.run_worker(rx, cancel, worker_id).await;
                })
            })
            .collect()
    }

    async fn run_worker(
        &self,
        rx: Arc<TokioMutex<mpsc::Receiver<Envelope>>>,
        cancel: CancellationToken,
        worker_id: usize,
    ) {
        loop {
            let next = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    () = cancel.cancelled() => Next::Drain,
                    envelope = guard.recv() => match envelope {
                        Some(envelope) => Next::Envelope(envelope),
                        None => Next::Closed,
                    },
                }
            };
            match next {
                Next::Envelope(envelope) => self.dispatch(&envelope).await,
                Next::Closed => break,
                Next::Drain => {
                    loop {
                        let envelope = { rx.lock().await.try_recv().ok() };
                        match envelope {
                            Some(envelope) => self.dispatch(&envelope).await,
                            None => break,
                        }
                    }
                    break;
                }
            }
        }
        debug!("firehose worker {worker_id} stopped");
    }

    async fn dispatch(&self, envelope: &Envelope) {
        if let Err(err) = self.handle_event(envelope).await {
            match err {
                BridgeError::BufferFull | BridgeError::UnknownEventType => {
                    debug!("dropped envelope from {}: {err}", envelope.origin);
                }
                other => warn!("failed to handle envelope from {}: {other}", envelope.origin),
            }
        }
    }
}
