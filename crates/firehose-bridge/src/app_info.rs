// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Application metadata resolution with a jittered TTL cache.
//!
//! The platform metadata API is slow relative to the firehose, so resolved
//! `{app, space, org}` tuples are cached. Expiry is jittered to 75–125% of
//! the configured TTL, sampled per lookup, so a burst of envelopes for apps
//! cached at the same moment does not refresh against the upstream API all
//! at once.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::warn;

use crate::backend::BackendError;
use crate::heartbeat::{Counter, Heartbeater};

/// Resolved application metadata.
///
/// The default value is the "unresolved" sentinel; callers distinguish it by
/// an empty `app_name`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppInfo {
    pub app_name: String,
    pub space_guid: String,
    pub space_name: String,
    pub org_guid: String,
    pub org_name: String,
    pub last_queried: Option<Instant>,
}

impl AppInfo {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !self.app_name.is_empty()
    }
}

/// Resolves an application GUID to its metadata. Never fails visibly.
#[async_trait]
pub trait AppInfoRepository: Send + Sync {
    async fn get_app_info(&self, guid: &str) -> AppInfo;
}

/// Upstream metadata source, typically the platform API client.
#[async_trait]
pub trait AppInfoFetcher: Send + Sync {
    async fn fetch(&self, guid: &str) -> Result<AppInfo, BackendError>;
}

/// Repository that resolves nothing; used when no platform API is wired up.
pub struct NullAppInfoRepository;

#[async_trait]
impl AppInfoRepository for NullAppInfoRepository {
    async fn get_app_info(&self, _guid: &str) -> AppInfo {
        AppInfo::default()
    }
}

/// TTL with 75–125% jitter applied.
fn jittered_ttl(ttl_seconds: f64, rng: &mut SmallRng) -> f64 {
    ttl_seconds * (0.75 + rng.gen::<f64>() / 2.0)
}

struct CacheState {
    entries: HashMap<String, AppInfo>,
    rng: SmallRng,
}

/// Caching repository over an [`AppInfoFetcher`].
///
/// TTL modes: `0` disables the cache entirely, negative caches forever,
/// positive expires entries at a jittered multiple of the TTL. A failed
/// fetch never evicts a stale entry; the caller gets the unresolved sentinel
/// and an error counter increments.
pub struct CachingAppInfoRepository {
    fetcher: Arc<dyn AppInfoFetcher>,
    ttl_seconds: i64,
    state: Mutex<CacheState>,
    heartbeater: Arc<Heartbeater>,
}

impl CachingAppInfoRepository {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn AppInfoFetcher>,
        ttl_seconds: i64,
        heartbeater: Arc<Heartbeater>,
    ) -> Self {
        Self {
            fetcher,
            ttl_seconds,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                rng: SmallRng::from_entropy(),
            }),
            heartbeater,
        }
    }

    async fn query_upstream(&self, guid: &str) -> AppInfo {
        self.heartbeater.increment(Counter::AppInfoMisses);
        match self.fetcher.fetch(guid).await {
            Ok(mut info) => {
                info.last_queried = Some(Instant::now());
                #[allow(clippy::expect_used)]
                let mut state = self.state.lock().expect("lock poisoned");
                state.entries.insert(guid.to_string(), info.clone());
                info
            }
            Err(err) => {
                warn!("app metadata fetch failed for {guid}: {err}");
                self.heartbeater.increment(Counter::AppInfoErrors);
                AppInfo::default()
            }
        }
    }

    #[cfg(test)]
    fn cached(&self, guid: &str) -> Option<AppInfo> {
        self.state.lock().unwrap().entries.get(guid).cloned()
    }

    #[cfg(test)]
    fn force_expire(&self, guid: &str) {
        use std::time::Duration;
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(guid) {
            entry.last_queried = Instant::now().checked_sub(Duration::from_secs(1_000_000));
        }
    }
}

#[async_trait]
impl AppInfoRepository for CachingAppInfoRepository {
    async fn get_app_info(&self, guid: &str) -> AppInfo {
        if self.ttl_seconds != 0 {
            let hit = {
                #[allow(clippy::expect_used)]
                let mut state = self.state.lock().expect("lock poisoned");
                let ttl_seconds = self.ttl_seconds;
                match state.entries.get(guid).cloned() {
                    Some(entry) if ttl_seconds < 0 => Some(entry),
                    Some(entry) => {
                        // jitter sampled per lookup, under the same lock as the map
                        let adjusted = jittered_ttl(ttl_seconds as f64, &mut state.rng);
                        let age = entry
                            .last_queried
                            .map_or(f64::INFINITY, |t| t.elapsed().as_secs_f64());
                        if age < adjusted {
                            Some(entry)
                        } else {
                            None
                        }
                    }
                    None => None,
                }
            };
            if let Some(info) = hit {
                return info;
            }
        }
        // lock released before upstream I/O
        self.query_upstream(guid).await
    }
}
