// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed firehose envelopes.
//!
//! One [`Envelope`] is one unit pulled from the platform firehose. The
//! envelope carries origin metadata shared by every event type plus a
//! type-specific payload. Fields the firehose left unset arrive as empty
//! strings (for identifiers) or `None` (for numeric payload fields); the
//! pipeline omits records and labels derived from unset fields rather than
//! failing the envelope.

use std::collections::HashMap;
use std::str::FromStr;

/// Event types the firehose can deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    HttpStartStop,
    LogMessage,
    ValueMetric,
    CounterEvent,
    ContainerMetric,
    Error,
    /// A frame whose type tag this build does not recognize.
    Unknown,
}

impl EventType {
    /// Wire name of the event type, used as the `eventType` log label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::HttpStartStop => "HttpStartStop",
            EventType::LogMessage => "LogMessage",
            EventType::ValueMetric => "ValueMetric",
            EventType::CounterEvent => "CounterEvent",
            EventType::ContainerMetric => "ContainerMetric",
            EventType::Error => "Error",
            EventType::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HttpStartStop" => Ok(EventType::HttpStartStop),
            "LogMessage" => Ok(EventType::LogMessage),
            "ValueMetric" => Ok(EventType::ValueMetric),
            "CounterEvent" => Ok(EventType::CounterEvent),
            "ContainerMetric" => Ok(EventType::ContainerMetric),
            "Error" => Ok(EventType::Error),
            other => Err(format!("unrecognized event type: {other}")),
        }
    }
}

/// Stream of a log message: stdout or stderr of the emitting process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MessageType {
    #[default]
    Out,
    Err,
}

#[derive(Clone, Debug, Default)]
pub struct LogMessagePayload {
    pub message: String,
    pub message_type: MessageType,
    /// GUID of the emitting application; empty for platform components.
    pub app_id: String,
    pub source_type: String,
    pub source_instance: String,
}

#[derive(Clone, Debug, Default)]
pub struct ValueMetricPayload {
    pub name: String,
    pub value: Option<f64>,
    pub unit: String,
}

#[derive(Clone, Debug, Default)]
pub struct CounterEventPayload {
    pub name: String,
    pub delta: Option<u64>,
    pub total: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct ContainerMetricPayload {
    pub application_id: String,
    pub instance_index: Option<i32>,
    pub cpu_percentage: Option<f64>,
    pub memory_bytes: Option<u64>,
    pub disk_bytes: Option<u64>,
    pub memory_bytes_quota: Option<u64>,
    pub disk_bytes_quota: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct HttpStartStopPayload {
    /// Request start, nanoseconds since the epoch.
    pub start_timestamp: Option<i64>,
    /// Response completion, nanoseconds since the epoch.
    pub stop_timestamp: Option<i64>,
    pub application_id: String,
    pub instance_index: Option<i32>,
    /// Instance UUID, used when `instance_index` is unset.
    pub instance_id: String,
    pub status_code: Option<i32>,
}

#[derive(Clone, Debug, Default)]
pub struct ErrorPayload {
    pub source: String,
    pub code: Option<i32>,
    pub message: String,
}

/// Type-specific payload of an envelope.
#[derive(Clone, Debug)]
pub enum EventPayload {
    HttpStartStop(HttpStartStopPayload),
    Log(LogMessagePayload),
    ValueMetric(ValueMetricPayload),
    Counter(CounterEventPayload),
    Container(ContainerMetricPayload),
    Error(ErrorPayload),
    /// Raw type tag of a frame this build does not understand.
    Unknown(i32),
}

/// One unit pulled from the platform firehose.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub origin: String,
    /// Nanoseconds since the epoch.
    pub timestamp: i64,
    pub deployment: String,
    pub job: String,
    pub index: String,
    pub ip: String,
    pub tags: HashMap<String, String>,
    pub event: EventPayload,
}

impl Envelope {
    /// Event type of the carried payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self.event {
            EventPayload::HttpStartStop(_) => EventType::HttpStartStop,
            EventPayload::Log(_) => EventType::LogMessage,
            EventPayload::ValueMetric(_) => EventType::ValueMetric,
            EventPayload::Counter(_) => EventType::CounterEvent,
            EventPayload::Container(_) => EventType::ContainerMetric,
            EventPayload::Error(_) => EventType::Error,
            EventPayload::Unknown(_) => EventType::Unknown,
        }
    }

    /// Application GUID the payload refers to, if the event is app-scoped.
    #[must_use]
    pub fn app_guid(&self) -> Option<&str> {
        let guid = match &self.event {
            EventPayload::Log(log) => log.app_id.as_str(),
            EventPayload::HttpStartStop(http) => http.application_id.as_str(),
            EventPayload::Container(container) => container.application_id.as_str(),
            _ => "",
        };
        if guid.is_empty() {
            None
        } else {
            Some(guid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_with(event: EventPayload) -> Envelope {
        Envelope {
            origin: "rep".to_string(),
            timestamp: 1_000,
            deployment: String::new(),
            job: String::new(),
            index: String::new(),
            ip: String::new(),
            tags: HashMap::new(),
            event,
        }
    }

    #[test]
    fn test_event_type_round_trip() {
        for name in [
            "HttpStartStop",
            "LogMessage",
            "ValueMetric",
            "CounterEvent",
            "ContainerMetric",
            "Error",
        ] {
            let parsed: EventType = name.parse().expect("known event type");
            assert_eq!(parsed.as_str(), name);
        }
        assert!("Metric".parse::<EventType>().is_err());
    }

    #[test]
    fn test_event_type_from_payload() {
        let envelope = envelope_with(EventPayload::Counter(CounterEventPayload::default()));
        assert_eq!(envelope.event_type(), EventType::CounterEvent);

        let envelope = envelope_with(EventPayload::Unknown(42));
        assert_eq!(envelope.event_type(), EventType::Unknown);
    }

    #[test]
    fn test_app_guid_empty_is_none() {
        let envelope = envelope_with(EventPayload::Log(LogMessagePayload::default()));
        assert_eq!(envelope.app_guid(), None);

        let envelope = envelope_with(EventPayload::Log(LogMessagePayload {
            app_id: "f47ac10b-58cc-4372-a567-0e02b2c3d479".to_string(),
            ..LogMessagePayload::default()
        }));
        assert_eq!(
            envelope.app_guid(),
            Some("f47ac10b-58cc-4372-a567-0e02b2c3d479")
        );
    }

    #[test]
    fn test_app_guid_ignores_platform_events() {
        let envelope = envelope_with(EventPayload::ValueMetric(ValueMetricPayload::default()));
        assert_eq!(envelope.app_guid(), None);
    }
}
