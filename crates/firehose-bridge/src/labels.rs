// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Label construction for metric records and log entries.
//!
//! Label keys come from a closed set; values are interned. A [`LabelMap`]
//! never holds an empty value, which keeps record identities stable when
//! envelopes omit fields.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ustr::Ustr;

use crate::app_info::AppInfoRepository;
use crate::envelope::{Envelope, EventPayload};

// The closed set of label keys. Backend clients key quotas, schemas, and
// dashboards on these names, so the full enumeration is public even though
// the label maker emits only a subset: `ip` and `deployment` are carried by
// every envelope but never become labels.
pub const FOUNDATION: &str = "foundation";
pub const JOB: &str = "job";
pub const INDEX: &str = "index";
pub const IP: &str = "ip";
pub const DEPLOYMENT: &str = "deployment";
pub const ORIGIN: &str = "origin";
pub const EVENT_TYPE: &str = "eventType";
pub const TAGS: &str = "tags";
pub const APPLICATION_PATH: &str = "applicationPath";
pub const INSTANCE_INDEX: &str = "instanceIndex";

/// Sorted label map. Insertion drops empty values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelMap {
    entries: BTreeMap<Ustr, Ustr>,
}

impl LabelMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a label; an empty value is silently omitted.
    pub fn insert(&mut self, key: Ustr, value: &str) {
        if !value.is_empty() {
            self.entries.insert(key, Ustr::from(value));
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&Ustr::from(key)).map(Ustr::as_str)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&Ustr::from(key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in lexicographic order.
    #[must_use]
    pub fn keys(&self) -> Vec<Ustr> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Ustr, &Ustr)> {
        self.entries.iter()
    }

    /// Stable within-process fingerprint over the sorted entries.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (key, value) in &self.entries {
            key.as_str().hash(&mut hasher);
            value.as_str().hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl FromIterator<(Ustr, Ustr)> for LabelMap {
    fn from_iter<T: IntoIterator<Item = (Ustr, Ustr)>>(iter: T) -> Self {
        let mut map = LabelMap::new();
        for (key, value) in iter {
            map.insert(key, value.as_str());
        }
        map
    }
}

/// Serialize envelope tags as `k=v` pairs, sorted by key, joined with `,`.
///
/// Sorting keeps metric identities stable across envelopes that enumerate
/// their tags in different orders.
#[must_use]
pub fn serialize_tags(tags: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(&str, &str)> = tags
        .iter()
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds the label map for a metric record or log entry.
pub struct LabelMaker {
    app_info: Arc<dyn AppInfoRepository>,
    foundation: Ustr,
}

impl LabelMaker {
    #[must_use]
    pub fn new(app_info: Arc<dyn AppInfoRepository>, foundation: &str) -> Self {
        Self {
            app_info,
            foundation: Ustr::from(foundation),
        }
    }

    /// Labels attached to every metric record expanded from `envelope`.
    ///
    /// Always contains `foundation`; `job`, `index`, and `tags` appear when
    /// non-empty. With `include_app_labels`, an envelope that names an
    /// application the repository can resolve also gets `applicationPath`
    /// and `instanceIndex`.
    pub async fn metric_labels(&self, envelope: &Envelope, include_app_labels: bool) -> LabelMap {
        let mut labels = LabelMap::new();
        labels.insert(Ustr::from(FOUNDATION), self.foundation.as_str());
        labels.insert(Ustr::from(JOB), &envelope.job);
        labels.insert(Ustr::from(INDEX), &envelope.index);
        labels.insert(Ustr::from(TAGS), &serialize_tags(&envelope.tags));

        if include_app_labels {
            self.add_app_labels(envelope, &mut labels).await;
        }
        labels
    }

    /// Metric labels plus `origin` and `eventType`.
    pub async fn log_labels(&self, envelope: &Envelope) -> LabelMap {
        let mut labels = self.metric_labels(envelope, true).await;
        labels.insert(Ustr::from(ORIGIN), &envelope.origin);
        labels.insert(Ustr::from(EVENT_TYPE), envelope.event_type().as_str());
        labels
    }

    async fn add_app_labels(&self, envelope: &Envelope, labels: &mut LabelMap) {
        let Some(guid) = envelope.app_guid() else {
            return;
        };
        let info = self.app_info.get_app_info(guid).await;
        if !info.is_resolved() {
            return;
        }

        labels.insert(
            Ustr::from(APPLICATION_PATH),
            &format!("/{}/{}/{}", info.org_name, info.space_name, info.app_name),
        );

        let instance = match &envelope.event {
            EventPayload::HttpStartStop(http) => match http.instance_index {
                // decimal index when the payload carries one, UUID fallback otherwise
                Some(index) => index.to_string(),
                None => http.instance_id.clone(),
            },
            EventPayload::Log(log) => log.source_instance.clone(),
            _ => String::new(),
        };
        labels.insert(Ustr::from(INSTANCE_INDEX), &instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_info::{AppInfo, NullAppInfoRepository};
    use crate::envelope::{EventType, HttpStartStopPayload, LogMessagePayload};
    use async_trait::async_trait;

    const TEST_FOUNDATION: &str = "bosh-foundation";
    const APP_GUID: &str = "f47ac10b-58cc-4372-a567-0e02b2c3d479";

    struct MapAppInfoRepository {
        apps: HashMap<String, AppInfo>,
    }

    #[async_trait]
    impl AppInfoRepository for MapAppInfoRepository {
        async fn get_app_info(&self, guid: &str) -> AppInfo {
            self.apps.get(guid).cloned().unwrap_or_default()
        }
    }

    fn resolved_repository() -> Arc<dyn AppInfoRepository> {
        let mut apps = HashMap::new();
        apps.insert(
            APP_GUID.to_string(),
            AppInfo {
                app_name: "MyApp".to_string(),
                space_guid: "2ab560c3-3f21-45e0-9452-d748ff3a15e9".to_string(),
                space_name: "MySpace".to_string(),
                org_guid: "b494fb47-3c44-4a98-9a08-d839ec5c799b".to_string(),
                org_name: "MyOrg".to_string(),
                last_queried: None,
            },
        );
        Arc::new(MapAppInfoRepository { apps })
    }

    fn full_envelope() -> Envelope {
        Envelope {
            origin: "cool-origin".to_string(),
            timestamp: 1_234,
            deployment: "neat-deployment".to_string(),
            job: "some-job".to_string(),
            index: "an-index".to_string(),
            ip: "192.168.1.1".to_string(),
            tags: HashMap::from([
                ("foo".to_string(), "bar".to_string()),
                ("bar".to_string(), "foo".to_string()),
            ]),
            event: EventPayload::HttpStartStop(HttpStartStopPayload::default()),
        }
    }

    #[tokio::test]
    async fn test_makes_labels_from_envelopes() {
        let maker = LabelMaker::new(Arc::new(NullAppInfoRepository), TEST_FOUNDATION);
        let envelope = full_envelope();

        let metric_labels = maker.metric_labels(&envelope, false).await;
        let expected: LabelMap = [
            (Ustr::from(FOUNDATION), Ustr::from(TEST_FOUNDATION)),
            (Ustr::from(JOB), Ustr::from("some-job")),
            (Ustr::from(INDEX), Ustr::from("an-index")),
            (Ustr::from(TAGS), Ustr::from("bar=foo,foo=bar")),
        ]
        .into_iter()
        .collect();
        assert_eq!(metric_labels, expected);
        // ip and deployment are recognized keys but never emitted
        assert!(!metric_labels.contains_key(IP));
        assert!(!metric_labels.contains_key(DEPLOYMENT));

        let log_labels = maker.log_labels(&envelope).await;
        assert_eq!(log_labels.len(), metric_labels.len() + 2);
        assert_eq!(log_labels.get(ORIGIN), Some("cool-origin"));
        assert_eq!(log_labels.get(EVENT_TYPE), Some("HttpStartStop"));
        for key in metric_labels.keys() {
            assert_eq!(log_labels.get(&key), metric_labels.get(&key));
        }
    }

    #[tokio::test]
    async fn test_ignores_empty_fields() {
        let maker = LabelMaker::new(Arc::new(NullAppInfoRepository), TEST_FOUNDATION);
        let mut envelope = full_envelope();
        envelope.deployment = String::new();
        envelope.ip = String::new();
        envelope.tags = HashMap::from([("foo".to_string(), "bar".to_string())]);

        let labels = maker.metric_labels(&envelope, false).await;
        let expected: LabelMap = [
            (Ustr::from(FOUNDATION), Ustr::from(TEST_FOUNDATION)),
            (Ustr::from(JOB), Ustr::from("some-job")),
            (Ustr::from(INDEX), Ustr::from("an-index")),
            (Ustr::from(TAGS), Ustr::from("foo=bar")),
        ]
        .into_iter()
        .collect();
        assert_eq!(labels, expected);
    }

    #[tokio::test]
    async fn test_unresolved_app_adds_nothing() {
        let maker = LabelMaker::new(
            Arc::new(MapAppInfoRepository {
                apps: HashMap::new(),
            }),
            TEST_FOUNDATION,
        );
        let envelope = Envelope {
            origin: String::new(),
            timestamp: 0,
            deployment: String::new(),
            job: String::new(),
            index: String::new(),
            ip: String::new(),
            tags: HashMap::new(),
            event: EventPayload::Log(LogMessagePayload {
                app_id: APP_GUID.to_string(),
                ..LogMessagePayload::default()
            }),
        };

        let labels = maker.metric_labels(&envelope, true).await;
        assert!(!labels.contains_key(APPLICATION_PATH));
        assert!(!labels.contains_key(INSTANCE_INDEX));
    }

    #[tokio::test]
    async fn test_resolved_log_message() {
        let maker = LabelMaker::new(resolved_repository(), TEST_FOUNDATION);
        let envelope = Envelope {
            origin: String::new(),
            timestamp: 0,
            deployment: String::new(),
            job: String::new(),
            index: String::new(),
            ip: String::new(),
            tags: HashMap::new(),
            event: EventPayload::Log(LogMessagePayload {
                app_id: APP_GUID.to_string(),
                source_instance: "301f96f1-97f8-42f8-aa98-6f13ea1f0b87".to_string(),
                ..LogMessagePayload::default()
            }),
        };

        let labels = maker.metric_labels(&envelope, true).await;
        assert_eq!(
            labels.get(APPLICATION_PATH),
            Some("/MyOrg/MySpace/MyApp")
        );
        assert_eq!(
            labels.get(INSTANCE_INDEX),
            Some("301f96f1-97f8-42f8-aa98-6f13ea1f0b87")
        );
    }

    #[tokio::test]
    async fn test_resolved_http_uses_numeric_index() {
        let maker = LabelMaker::new(resolved_repository(), TEST_FOUNDATION);
        let mut envelope = full_envelope();
        envelope.event = EventPayload::HttpStartStop(HttpStartStopPayload {
            application_id: APP_GUID.to_string(),
            instance_index: Some(1),
            instance_id: "485a10c1-917f-4d89-a98f-dc539ba14dfd".to_string(),
            ..HttpStartStopPayload::default()
        });

        let labels = maker.metric_labels(&envelope, true).await;
        assert_eq!(labels.get(APPLICATION_PATH), Some("/MyOrg/MySpace/MyApp"));
        assert_eq!(labels.get(INSTANCE_INDEX), Some("1"));
    }

    #[tokio::test]
    async fn test_resolved_http_falls_back_to_instance_uuid() {
        let maker = LabelMaker::new(resolved_repository(), TEST_FOUNDATION);
        let mut envelope = full_envelope();
        envelope.event = EventPayload::HttpStartStop(HttpStartStopPayload {
            application_id: APP_GUID.to_string(),
            instance_index: None,
            instance_id: "485a10c1-917f-4d89-a98f-dc539ba14dfd".to_string(),
            ..HttpStartStopPayload::default()
        });

        let labels = maker.metric_labels(&envelope, true).await;
        assert_eq!(labels.get(APPLICATION_PATH), Some("/MyOrg/MySpace/MyApp"));
        assert_eq!(
            labels.get(INSTANCE_INDEX),
            Some("485a10c1-917f-4d89-a98f-dc539ba14dfd")
        );
    }

    #[test]
    fn test_tag_serialization_sorts_by_key() {
        let tags = HashMap::from([
            ("foo".to_string(), "bar".to_string()),
            ("bar".to_string(), "foo".to_string()),
        ]);
        assert_eq!(serialize_tags(&tags), "bar=foo,foo=bar");
        assert_eq!(serialize_tags(&HashMap::new()), "");
    }

    #[test]
    fn test_label_map_drops_empty_values() {
        let mut labels = LabelMap::new();
        labels.insert(Ustr::from(JOB), "");
        labels.insert(Ustr::from(INDEX), "0");
        assert!(!labels.contains_key(JOB));
        assert_eq!(labels.get(INDEX), Some("0"));
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn test_fingerprint_is_order_insensitive() {
        let mut a = LabelMap::new();
        a.insert(Ustr::from(JOB), "router");
        a.insert(Ustr::from(INDEX), "3");

        let mut b = LabelMap::new();
        b.insert(Ustr::from(INDEX), "3");
        b.insert(Ustr::from(JOB), "router");

        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = LabelMap::new();
        c.insert(Ustr::from(JOB), "router");
        c.insert(Ustr::from(INDEX), "4");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_event_type_label_matches_wire_name() {
        assert_eq!(EventType::HttpStartStop.as_str(), "HttpStartStop");
    }
}
