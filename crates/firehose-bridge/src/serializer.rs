// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Envelope classification and metric expansion.

use std::sync::Arc;

use ustr::Ustr;

use crate::envelope::{Envelope, EventPayload};
use crate::errors::BridgeError;
use crate::labels::{LabelMap, LabelMaker};
use crate::metrics::record::{MetricKind, MetricRecord};

/// True when the envelope belongs on the log path.
///
/// `Error` events carry free-form text and no value, so they are logs too.
#[must_use]
pub fn is_log(envelope: &Envelope) -> bool {
    matches!(
        envelope.event,
        EventPayload::Log(_) | EventPayload::Error(_)
    )
}

/// Expands metric envelopes into records.
pub struct Serializer {
    label_maker: Arc<LabelMaker>,
}

impl Serializer {
    #[must_use]
    pub fn new(label_maker: Arc<LabelMaker>) -> Self {
        Self { label_maker }
    }

    /// Expand a metric-classified envelope into zero or more records.
    ///
    /// Missing payload fields omit the affected record; they never fail the
    /// envelope.
    pub async fn get_metrics(&self, envelope: &Envelope) -> Result<Vec<MetricRecord>, BridgeError> {
        let labels = self.label_maker.metric_labels(envelope, true).await;
        let event_time = envelope.timestamp;

        let mut records = Vec::new();
        let mut push = |name: String, value: f64, unit: &str, kind: MetricKind| {
            records.push(MetricRecord {
                name: Ustr::from(&name),
                value,
                unit: Ustr::from(unit),
                kind,
                labels: labels.clone(),
                event_time,
            });
        };

        match &envelope.event {
            EventPayload::ValueMetric(metric) => {
                if !metric.name.is_empty() {
                    if let Some(value) = metric.value {
                        push(
                            format!("{}.{}", envelope.origin, metric.name),
                            value,
                            &metric.unit,
                            MetricKind::Gauge,
                        );
                    }
                }
            }
            EventPayload::Counter(counter) => {
                if !counter.name.is_empty() {
                    if let Some(delta) = counter.delta {
                        push(
                            format!("{}.{}.delta", envelope.origin, counter.name),
                            delta as f64,
                            "",
                            MetricKind::Gauge,
                        );
                    }
                    if let Some(total) = counter.total {
                        push(
                            format!("{}.{}.total", envelope.origin, counter.name),
                            total as f64,
                            "",
                            MetricKind::Cumulative,
                        );
                    }
                }
            }
            EventPayload::Container(container) => {
                if let Some(quota) = container.disk_bytes_quota {
                    push(
                        "diskBytesQuota".to_string(),
                        quota as f64,
                        "",
                        MetricKind::Gauge,
                    );
                }
                if let Some(index) = container.instance_index {
                    push(
                        "instanceIndex".to_string(),
                        f64::from(index),
                        "",
                        MetricKind::Gauge,
                    );
                }
                if let Some(cpu) = container.cpu_percentage {
                    push("cpuPercentage".to_string(), cpu, "", MetricKind::Gauge);
                }
                if let Some(disk) = container.disk_bytes {
                    push("diskBytes".to_string(), disk as f64, "", MetricKind::Gauge);
                }
                if let Some(memory) = container.memory_bytes {
                    push(
                        "memoryBytes".to_string(),
                        memory as f64,
                        "",
                        MetricKind::Gauge,
                    );
                }
                if let Some(quota) = container.memory_bytes_quota {
                    push(
                        "memoryBytesQuota".to_string(),
                        quota as f64,
                        "",
                        MetricKind::Gauge,
                    );
                }
            }
            EventPayload::HttpStartStop(http) => {
                if let (Some(start), Some(stop)) = (http.start_timestamp, http.stop_timestamp) {
                    push(
                        "http.response.latency".to_string(),
                        (stop - start) as f64 / 1e6,
                        "ms",
                        MetricKind::Gauge,
                    );
                }
            }
            EventPayload::Unknown(_) => return Err(BridgeError::UnknownEventType),
            // log-classified envelopes never reach metric expansion
            EventPayload::Log(_) | EventPayload::Error(_) => {}
        }

        Ok(records)
    }

    /// Labels for a log entry; exposed for the sink.
    pub async fn log_labels(&self, envelope: &Envelope) -> LabelMap {
        self.label_maker.log_labels(envelope).await
    }
}
