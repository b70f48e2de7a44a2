// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Service lifecycle: task wiring, startup, and graceful shutdown.
//!
//! All long-lived tasks are spawned here and observe one cancellation
//! token. On shutdown they drain their input channels best-effort within the
//! configured grace window; the handle then reports whether the bridge
//! stopped cleanly or was taken down by a fatal condition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use firehose_bridge::app_info::{
    AppInfoFetcher, AppInfoRepository, CachingAppInfoRepository, NullAppInfoRepository,
};
use firehose_bridge::backend::{LoggingClient, MonitoringClient};
use firehose_bridge::constants::LOG_SINK_QUEUE_CAPACITY;
use firehose_bridge::envelope::Envelope;
use firehose_bridge::heartbeat::{HeartbeatService, Heartbeater};
use firehose_bridge::labels::LabelMaker;
use firehose_bridge::logs::{LogSink, LogSinkService};
use firehose_bridge::metrics::{AdapterService, FlushDriver, MetricAdapter, MetricBuffer};
use firehose_bridge::nozzle::Nozzle;
use firehose_bridge::serializer::Serializer;

use crate::config::BridgeConfig;
use crate::error::ServicesError;

/// Backend collaborators supplied by the embedder.
pub struct Backends {
    pub monitoring: Arc<dyn MonitoringClient>,
    pub logging: Arc<dyn LoggingClient>,
    /// Platform metadata source; `None` disables app enrichment.
    pub app_metadata: Option<Arc<dyn AppInfoFetcher>>,
}

/// Handle to the running bridge.
pub struct ServicesHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    auth_exhausted: Arc<AtomicBool>,
    heartbeater: Arc<Heartbeater>,
    shutdown_grace: std::time::Duration,
}

impl ServicesHandle {
    /// Token shared by every bridge task. Cancelling it starts shutdown.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Counter set for external health reporting.
    #[must_use]
    pub fn heartbeater(&self) -> Arc<Heartbeater> {
        Arc::clone(&self.heartbeater)
    }

    /// True once the bridge began shutting down, for any reason.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the bridge and wait for its tasks to drain.
    ///
    /// Returns `Err(ServicesError::Auth)` when the bridge was taken down by
    /// sustained backend authentication failure, and
    /// `Err(ServicesError::ShutdownTimeout)` when tasks did not finish
    /// within the grace window.
    pub async fn stop(self) -> Result<(), ServicesError> {
        self.cancel.cancel();

        let joined = timeout(self.shutdown_grace, join_all(self.tasks)).await;
        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        warn!("bridge task ended abnormally: {err}");
                    }
                }
            }
            Err(_) => return Err(ServicesError::ShutdownTimeout),
        }

        if self.auth_exhausted.load(Ordering::SeqCst) {
            return Err(ServicesError::Auth(
                "backend rejected credentials past the grace period".to_string(),
            ));
        }
        info!("telemetry bridge stopped");
        Ok(())
    }
}

/// Builder for the full task inventory of the bridge.
pub struct BridgeServices {
    config: BridgeConfig,
}

impl BridgeServices {
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Validate the configuration, wire the pipeline, and spawn every task.
    ///
    /// `firehose` is the envelope channel the embedder's firehose client
    /// writes into.
    pub fn start(
        self,
        firehose: mpsc::Receiver<Envelope>,
        backends: Backends,
    ) -> Result<ServicesHandle, ServicesError> {
        let config = self.config;
        config.validate()?;

        let heartbeater = Arc::new(Heartbeater::new());
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let app_info: Arc<dyn AppInfoRepository> = match backends.app_metadata {
            Some(fetcher) => Arc::new(CachingAppInfoRepository::new(
                fetcher,
                config.app_metadata_cache_period,
                Arc::clone(&heartbeater),
            )),
            None => Arc::new(NullAppInfoRepository),
        };
        let label_maker = Arc::new(LabelMaker::new(app_info, &config.foundation));

        // metric path: buffer -> flush driver -> adapter worker pool
        let buffer = Arc::new(MetricBuffer::new(
            config.metric_buffer_hard_cap,
            config.metric_batch_size,
            Arc::clone(&heartbeater),
        ));
        let (batch_tx, batch_rx) = mpsc::channel(config.adapter_concurrency * 2);
        tasks.push(tokio::spawn(
            FlushDriver::new(
                Arc::clone(&buffer),
                batch_tx,
                config.metric_batch_interval,
                config.metric_batch_size,
                firehose_bridge::constants::MAX_DESCRIPTORS_PER_BATCH,
                Arc::clone(&heartbeater),
                cancel.clone(),
            )
            .run(),
        ));

        let adapter = Arc::new(MetricAdapter::new(
            backends.monitoring,
            Arc::clone(&heartbeater),
            config.backend_call_timeout,
            config.auth_failure_grace,
            cancel.clone(),
        ));
        let auth_exhausted = adapter.auth_exhausted();
        tasks.extend(AdapterService::spawn_workers(
            Arc::clone(&adapter),
            batch_rx,
            config.adapter_concurrency,
            cancel.clone(),
        ));

        // log path: sink queue -> single worker
        let sink = Arc::new(LogSink::new(
            LOG_SINK_QUEUE_CAPACITY,
            Arc::clone(&heartbeater),
        ));
        tasks.push(tokio::spawn(
            LogSinkService::new(
                Arc::clone(&sink),
                backends.logging,
                config.backend_call_timeout,
                Arc::clone(&heartbeater),
                cancel.clone(),
            )
            .run(),
        ));

        // self-metrics bypass the buffer and the adapter pool
        tasks.push(tokio::spawn(
            HeartbeatService::new(
                Arc::clone(&heartbeater),
                adapter,
                &config.foundation,
                config.heartbeat_interval,
                cancel.clone(),
            )
            .run(),
        ));

        let nozzle = Arc::new(Nozzle::new(
            Serializer::new(label_maker),
            sink,
            buffer,
            Arc::clone(&heartbeater),
            config.selected_log_events.clone(),
            config.selected_metric_events.clone(),
        ));
        tasks.extend(Nozzle::spawn_workers(
            nozzle,
            firehose,
            config.firehose_workers,
            cancel.clone(),
        ));

        info!(
            "telemetry bridge started: {} firehose worker(s), {} adapter worker(s), foundation {:?}",
            config.firehose_workers, config.adapter_concurrency, config.foundation
        );

        Ok(ServicesHandle {
            cancel,
            tasks,
            auth_exhausted,
            heartbeater,
            shutdown_grace: config.shutdown_grace,
        })
    }
}
