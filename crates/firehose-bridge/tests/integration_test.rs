// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end pipeline test: envelopes in, backend writes out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use firehose_bridge::app_info::{AppInfo, AppInfoFetcher, CachingAppInfoRepository};
use firehose_bridge::backend::{
    BackendError, LogEntry, LoggingClient, MonitoringClient, TimeSeries,
};
use firehose_bridge::envelope::{
    CounterEventPayload, Envelope, EventPayload, EventType, LogMessagePayload, MessageType,
};
use firehose_bridge::heartbeat::Heartbeater;
use firehose_bridge::labels::LabelMaker;
use firehose_bridge::logs::{LogSink, LogSinkService};
use firehose_bridge::metrics::record::Descriptor;
use firehose_bridge::metrics::{AdapterService, FlushDriver, MetricAdapter, MetricBuffer};
use firehose_bridge::nozzle::Nozzle;
use firehose_bridge::serializer::Serializer;

#[derive(Default)]
struct RecordingMonitoring {
    descriptors: Mutex<Vec<Descriptor>>,
    series: Mutex<Vec<TimeSeries>>,
}

#[async_trait]
impl MonitoringClient for RecordingMonitoring {
    async fn ensure_descriptor(&self, descriptor: &Descriptor) -> Result<(), BackendError> {
        self.descriptors.lock().unwrap().push(descriptor.clone());
        Ok(())
    }

    async fn create_time_series(&self, series: &[TimeSeries]) -> Result<(), BackendError> {
        self.series.lock().unwrap().extend_from_slice(series);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingLogging {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggingClient for RecordingLogging {
    async fn write(&self, entry: LogEntry) -> Result<(), BackendError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

struct StaticFetcher;

#[async_trait]
impl AppInfoFetcher for StaticFetcher {
    async fn fetch(&self, _guid: &str) -> Result<AppInfo, BackendError> {
        Ok(AppInfo {
            app_name: "MyApp".to_string(),
            space_name: "MySpace".to_string(),
            org_name: "MyOrg".to_string(),
            ..AppInfo::default()
        })
    }
}

fn envelope(origin: &str, event: EventPayload) -> Envelope {
    Envelope {
        origin: origin.to_string(),
        timestamp: 1_700_000_000_000_000_000,
        deployment: "cf".to_string(),
        job: "router".to_string(),
        index: "0".to_string(),
        ip: "10.0.0.1".to_string(),
        tags: HashMap::new(),
        event,
    }
}

async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(deadline, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_pipeline_forwards_metrics_and_logs() {
    let heartbeater = Arc::new(Heartbeater::new());
    let cancel = CancellationToken::new();

    let monitoring = Arc::new(RecordingMonitoring::default());
    let logging = Arc::new(RecordingLogging::default());

    let app_info = Arc::new(CachingAppInfoRepository::new(
        Arc::new(StaticFetcher),
        600,
        heartbeater.clone(),
    ));
    let label_maker = Arc::new(LabelMaker::new(app_info, "bosh-foundation"));

    let buffer = Arc::new(MetricBuffer::new(10_000, 4, heartbeater.clone()));
    let (batch_tx, batch_rx) = mpsc::channel(32);
    let driver = FlushDriver::new(
        buffer.clone(),
        batch_tx,
        Duration::from_millis(50),
        200,
        100,
        heartbeater.clone(),
        cancel.clone(),
    );
    let driver_task = tokio::spawn(driver.run());

    let adapter = Arc::new(MetricAdapter::new(
        monitoring.clone(),
        heartbeater.clone(),
        Duration::from_secs(5),
        Duration::from_secs(300),
        cancel.clone(),
    ));
    let adapter_tasks = AdapterService::spawn_workers(adapter, batch_rx, 2, cancel.clone());

    let sink = Arc::new(LogSink::new(1_000, heartbeater.clone()));
    let sink_service = LogSinkService::new(
        sink.clone(),
        logging.clone(),
        Duration::from_secs(5),
        heartbeater.clone(),
        cancel.clone(),
    );
    let sink_task = tokio::spawn(sink_service.run());

    let nozzle = Arc::new(Nozzle::new(
        Serializer::new(label_maker),
        sink,
        buffer,
        heartbeater.clone(),
        HashSet::from([EventType::LogMessage, EventType::Error]),
        HashSet::from([
            EventType::ValueMetric,
            EventType::CounterEvent,
            EventType::ContainerMetric,
            EventType::HttpStartStop,
        ]),
    ));
    let (envelope_tx, envelope_rx) = mpsc::channel(64);
    let nozzle_tasks = Nozzle::spawn_workers(nozzle, envelope_rx, 4, cancel.clone());

    envelope_tx
        .send(envelope(
            "http",
            EventPayload::Counter(CounterEventPayload {
                name: "reqs".to_string(),
                delta: Some(3),
                total: Some(42),
            }),
        ))
        .await
        .unwrap();
    envelope_tx
        .send(envelope(
            "rep",
            EventPayload::Log(LogMessagePayload {
                message: "app started".to_string(),
                message_type: MessageType::Out,
                app_id: "f47ac10b-58cc-4372-a567-0e02b2c3d479".to_string(),
                source_instance: "0".to_string(),
                ..LogMessagePayload::default()
            }),
        ))
        .await
        .unwrap();

    wait_until(Duration::from_secs(5), || {
        monitoring.series.lock().unwrap().len() >= 2 && !logging.entries.lock().unwrap().is_empty()
    })
    .await;

    cancel.cancel();
    drop(envelope_tx);
    for task in nozzle_tasks {
        task.await.unwrap();
    }
    driver_task.await.unwrap();
    for task in adapter_tasks {
        task.await.unwrap();
    }
    sink_task.await.unwrap();

    let series = monitoring.series.lock().unwrap();
    let names: HashSet<&str> = series.iter().map(|s| s.descriptor.name.as_str()).collect();
    assert!(names.contains("http.reqs.delta"));
    assert!(names.contains("http.reqs.total"));
    for s in series.iter() {
        assert_eq!(s.labels.get("foundation"), Some("bosh-foundation"));
        assert_eq!(s.labels.get("job"), Some("router"));
    }

    let descriptors = monitoring.descriptors.lock().unwrap();
    assert!(descriptors.len() >= 2, "descriptors created before writes");

    let entries = logging.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.labels.get("eventType"), Some("LogMessage"));
    assert_eq!(entry.labels.get("origin"), Some("rep"));
    assert_eq!(
        entry.labels.get("applicationPath"),
        Some("/MyOrg/MySpace/MyApp")
    );
    assert_eq!(entry.labels.get("instanceIndex"), Some("0"));
    assert_eq!(entry.payload["message"], "app started");
}
