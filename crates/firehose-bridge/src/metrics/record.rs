// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric record and descriptor types shared by the buffer and adapter.

use std::hash::{Hash, Hasher};

use ustr::Ustr;

use crate::heartbeat::{Counter, Heartbeater};
use crate::labels::LabelMap;

/// Monotonic counter vs. instantaneous sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Cumulative,
}

impl MetricKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "GAUGE",
            MetricKind::Cumulative => "CUMULATIVE",
        }
    }
}

/// One measured value between production and the next flush.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricRecord {
    pub name: Ustr,
    pub value: f64,
    pub unit: Ustr,
    pub kind: MetricKind,
    pub labels: LabelMap,
    /// Nanoseconds since the epoch.
    pub event_time: i64,
}

impl MetricRecord {
    /// Deduplication identity: `(name, labels)`.
    #[must_use]
    pub fn identity(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.name.as_str().hash(&mut hasher);
        self.labels.fingerprint().hash(&mut hasher);
        hasher.finish()
    }

    /// Schema record the backend requires before accepting points.
    #[must_use]
    pub fn descriptor(&self) -> Descriptor {
        Descriptor {
            name: self.name,
            kind: self.kind,
            unit: self.unit,
            label_keys: self.labels.keys(),
        }
    }
}

/// One swapped-out buffer window on its way to the adapter.
pub type MetricBatch = Vec<MetricRecord>;

/// Metric schema as the monitoring backend sees it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub name: Ustr,
    pub kind: MetricKind,
    pub unit: Ustr,
    /// Sorted label keys.
    pub label_keys: Vec<Ustr>,
}

/// Reduce a window of records by identity.
///
/// Gauges keep the record with the latest event time; cumulatives keep the
/// greatest value (the monotonic projection). A later cumulative record with
/// a smaller value is counted as a regression, which happens when the
/// emitting component restarts.
#[must_use]
pub fn dedup(records: MetricBatch, heartbeater: &Heartbeater) -> MetricBatch {
    let mut out: MetricBatch = Vec::with_capacity(records.len());
    let mut seen: std::collections::HashMap<u64, usize> =
        std::collections::HashMap::with_capacity(records.len());

    for record in records {
        let identity = record.identity();
        match seen.get(&identity) {
            None => {
                seen.insert(identity, out.len());
                out.push(record);
            }
            Some(&slot) => {
                let kept = &mut out[slot];
                match record.kind {
                    MetricKind::Gauge => {
                        if record.event_time >= kept.event_time {
                            *kept = record;
                        }
                    }
                    MetricKind::Cumulative => {
                        if record.value >= kept.value {
                            *kept = record;
                        } else if record.event_time > kept.event_time {
                            heartbeater.increment(Counter::MetricsNonMonotonic);
                        }
                    }
                }
            }
        }
    }
    out
}
