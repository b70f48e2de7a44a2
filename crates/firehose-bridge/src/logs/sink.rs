// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{BackendError, LogEntry, LoggingClient, Severity};
use crate::envelope::{Envelope, EventPayload, MessageType};
use crate::heartbeat::{Counter, Heartbeater};
use crate::labels::LabelMap;

/// Severity of a log-classified envelope.
///
/// Stdout messages keep the backend's default severity; stderr and `Error`
/// events are reported at error severity.
#[must_use]
pub fn severity(envelope: &Envelope) -> Severity {
    match &envelope.event {
        EventPayload::Log(log) => match log.message_type {
            MessageType::Out => Severity::Default,
            MessageType::Err => Severity::Error,
        },
        EventPayload::Error(_) => Severity::Error,
        _ => Severity::Default,
    }
}

fn payload(envelope: &Envelope) -> Value {
    match &envelope.event {
        EventPayload::Log(log) => {
            let mut body = serde_json::Map::new();
            body.insert("message".to_string(), json!(log.message));
            if !log.source_type.is_empty() {
                body.insert("sourceType".to_string(), json!(log.source_type));
            }
            if !log.source_instance.is_empty() {
                body.insert("sourceInstance".to_string(), json!(log.source_instance));
            }
            Value::Object(body)
        }
        EventPayload::Error(err) => {
            let mut body = serde_json::Map::new();
            body.insert("message".to_string(), json!(err.message));
            if !err.source.is_empty() {
                body.insert("source".to_string(), json!(err.source));
            }
            if let Some(code) = err.code {
                body.insert("code".to_string(), json!(code));
            }
            Value::Object(body)
        }
        _ => json!({}),
    }
}

/// Bounded drop-oldest queue in front of the logging backend.
pub struct LogSink {
    queue: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    wakeup: Notify,
    heartbeater: Arc<Heartbeater>,
}

impl LogSink {
    #[must_use]
    pub fn new(capacity: usize, heartbeater: Arc<Heartbeater>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            wakeup: Notify::new(),
            heartbeater,
        }
    }

    /// Queue a log-classified envelope with its precomputed labels.
    pub fn submit(&self, envelope: &Envelope, labels: LabelMap) {
        let entry = LogEntry {
            labels,
            severity: severity(envelope),
            timestamp: envelope.timestamp,
            payload: payload(envelope),
        };

        {
            #[allow(clippy::expect_used)]
            let mut queue = self.queue.lock().expect("lock poisoned");
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.heartbeater.increment(Counter::LogsDropped);
            }
            queue.push_back(entry);
        }
        self.wakeup.notify_one();
    }

    fn pop(&self) -> Option<LogEntry> {
        #[allow(clippy::expect_used)]
        let mut queue = self.queue.lock().expect("lock poisoned");
        queue.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let queue = self.queue.lock().expect("lock poisoned");
        queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The single worker draining the log queue.
pub struct LogSinkService {
    sink: Arc<LogSink>,
    client: Arc<dyn LoggingClient>,
    call_timeout: Duration,
    heartbeater: Arc<Heartbeater>,
    cancel: CancellationToken,
}

impl LogSinkService {
    #[must_use]
    pub fn new(
        sink: Arc<LogSink>,
        client: Arc<dyn LoggingClient>,
        call_timeout: Duration,
        heartbeater: Arc<Heartbeater>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sink,
            client,
            call_timeout,
            heartbeater,
            cancel,
        }
    }

    pub async fn run(self) {
        loop {
            tokio::select! {
                () = self.sink.wakeup.notified() => self.drain().await,
                () = self.cancel.cancelled() => {
                    self.drain().await;
                    debug!("log sink stopped");
                    break;
                }
            }
        }
    }

    async fn drain(&self) {
        while let Some(entry) = self.sink.pop() {
            let result = match timeout(self.call_timeout, self.client.write(entry)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::timed_out()),
            };
            // log loss under sustained backend failure is acceptable
            if let Err(err) = result {
                match &err {
                    BackendError::Transient { .. } => {
                        self.heartbeater.increment(Counter::BackendErrorsTransient);
                    }
                    BackendError::Permanent { .. } => {
                        self.heartbeater.increment(Counter::BackendErrorsPermanent);
                    }
                    BackendError::Auth(_) => {
                        self.heartbeater.increment(Counter::BackendErrorsAuth);
                    }
                }
                warn!("log write failed: {err}");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::envelope::{ErrorPayload, LogMessagePayload};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct RecordingLogging {
        entries: Mutex<Vec<LogEntry>>,
        fail: Option<BackendError>,
    }

    impl RecordingLogging {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entries: Mutex::new(Vec::new()),
                fail: None,
            })
        }
    }

    #[async_trait]
    impl LoggingClient for RecordingLogging {
        async fn write(&self, entry: LogEntry) -> Result<(), BackendError> {
            if let Some(err) = &self.fail {
                return Err(err.clone());
            }
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    fn log_envelope(message: &str, message_type: MessageType) -> Envelope {
        Envelope {
            origin: "rep".to_string(),
            timestamp: 42,
            deployment: String::new(),
            job: String::new(),
            index: String::new(),
            ip: String::new(),
            tags: HashMap::new(),
            event: EventPayload::Log(LogMessagePayload {
                message: message.to_string(),
                message_type,
                source_type: "APP".to_string(),
                ..LogMessagePayload::default()
            }),
        }
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(
            severity(&log_envelope("hi", MessageType::Out)),
            Severity::Default
        );
        assert_eq!(
            severity(&log_envelope("oops", MessageType::Err)),
            Severity::Error
        );

        let mut error_envelope = log_envelope("", MessageType::Out);
        error_envelope.event = EventPayload::Error(ErrorPayload {
            message: "broken".to_string(),
            ..ErrorPayload::default()
        });
        assert_eq!(severity(&error_envelope), Severity::Error);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let heartbeater = Arc::new(Heartbeater::new());
        let sink = LogSink::new(2, heartbeater.clone());

        sink.submit(&log_envelope("first", MessageType::Out), LabelMap::new());
        sink.submit(&log_envelope("second", MessageType::Out), LabelMap::new());
        sink.submit(&log_envelope("third", MessageType::Out), LabelMap::new());

        assert_eq!(sink.len(), 2);
        assert_eq!(heartbeater.value(Counter::LogsDropped), 1);

        let survivor = sink.pop().unwrap();
        assert_eq!(survivor.payload["message"], "second");
    }

    #[tokio::test]
    async fn test_service_delivers_entries() {
        let heartbeater = Arc::new(Heartbeater::new());
        let sink = Arc::new(LogSink::new(100, heartbeater.clone()));
        let client = RecordingLogging::new();
        let cancel = CancellationToken::new();

        let service = LogSinkService::new(
            sink.clone(),
            client.clone(),
            Duration::from_secs(5),
            heartbeater,
            cancel.clone(),
        );
        let task = tokio::spawn(service.run());

        sink.submit(&log_envelope("hello", MessageType::Err), LabelMap::new());

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if !client.entries.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap();

        let entries = client.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::Error);
        assert_eq!(entries[0].timestamp, 42);
        assert_eq!(entries[0].payload["message"], "hello");
        assert_eq!(entries[0].payload["sourceType"], "APP");
    }

    #[tokio::test]
    async fn test_delivery_failure_is_counted_not_propagated() {
        let heartbeater = Arc::new(Heartbeater::new());
        let sink = Arc::new(LogSink::new(100, heartbeater.clone()));
        let client = Arc::new(RecordingLogging {
            entries: Mutex::new(Vec::new()),
            fail: Some(BackendError::from_status(503, "unavailable")),
        });
        let cancel = CancellationToken::new();

        let service = LogSinkService::new(
            sink.clone(),
            client,
            Duration::from_secs(5),
            heartbeater.clone(),
            cancel.clone(),
        );
        let task = tokio::spawn(service.run());

        sink.submit(&log_envelope("doomed", MessageType::Out), LabelMap::new());

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if heartbeater.value(Counter::BackendErrorsTransient) > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap();
        assert!(sink.is_empty());
    }
}
