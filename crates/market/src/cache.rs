//! TTL cache with single-flight fetches and explicit stale fallback.
//!
//! Every external value flows through here. A fresh entry is served without
//! touching the source; an expired entry triggers a refresh; a failed refresh
//! falls back to the prior value flagged `stale`. Concurrent callers for the
//! same key serialize on a per-key async mutex so only one fetch is ever
//! in flight per key. The lock guard is scoped, so a caller cancelled by an
//! enclosing timeout releases it on drop.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sterling_core::Clock;

use crate::adapter::FetchError;

/// A served value and whether it is past its TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<V> {
    pub value: V,
    pub stale: bool,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    fetched_at: DateTime<Utc>,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.fetched_at);
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => age <= ttl,
            Err(_) => false,
        }
    }
}

#[derive(Debug)]
struct Slot<V> {
    entry: Option<Entry<V>>,
    last_error: Option<String>,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            entry: None,
            last_error: None,
        }
    }
}

/// Per-key freshness for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotFreshness {
    Fresh { age_secs: i64 },
    Stale { age_secs: i64 },
    Absent,
}

#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub key: String,
    pub freshness: SlotFreshness,
    pub last_error: Option<String>,
}

pub struct CacheStore<K, V> {
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<K, Arc<tokio::sync::Mutex<Slot<V>>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> CacheStore<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn slot(&self, key: &K) -> Arc<tokio::sync::Mutex<Slot<V>>> {
        let mut slots = self.slots.lock().unwrap();
        slots.entry(key.clone()).or_default().clone()
    }

    /// Serve a fresh entry, or fetch and store one, or fall back to the
    /// prior value flagged stale. Errors only when the fetch fails and no
    /// prior value exists.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: K,
        ttl: Duration,
        fetch: F,
    ) -> Result<Cached<V>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        self.fetch_inner(key, ttl, false, fetch).await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch) but always attempts a fetch,
    /// still falling back to the prior value on failure.
    pub async fn refresh<F, Fut>(
        &self,
        key: K,
        ttl: Duration,
        fetch: F,
    ) -> Result<Cached<V>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        self.fetch_inner(key, ttl, true, fetch).await
    }

    async fn fetch_inner<F, Fut>(
        &self,
        key: K,
        ttl: Duration,
        force: bool,
        fetch: F,
    ) -> Result<Cached<V>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        let slot = self.slot(&key);
        // Single-flight: first caller in fetches, the rest wait here and see
        // the entry it stored. Guard drops on every exit path, including
        // cancellation of the whole call.
        let mut guard = slot.lock().await;

        if !force {
            if let Some(entry) = &guard.entry {
                if entry.is_fresh(self.clock.now()) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Cached {
                        value: entry.value.clone(),
                        stale: false,
                    });
                }
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        match fetch().await {
            Ok(value) => {
                guard.entry = Some(Entry {
                    value: value.clone(),
                    fetched_at: self.clock.now(),
                    ttl,
                });
                guard.last_error = None;
                Ok(Cached {
                    value,
                    stale: false,
                })
            }
            Err(err) => {
                guard.last_error = Some(err.to_string());
                match &guard.entry {
                    Some(prior) => {
                        tracing::warn!(
                            key = %key,
                            error = %err,
                            "fetch failed, serving stale cached value"
                        );
                        Ok(Cached {
                            value: prior.value.clone(),
                            stale: true,
                        })
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Freshness summary across all keys seen so far.
    pub async fn snapshot(&self) -> Vec<SourceStatus> {
        let slots: Vec<(K, Arc<tokio::sync::Mutex<Slot<V>>>)> = {
            let map = self.slots.lock().unwrap();
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let now = self.clock.now();
        let mut statuses = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            let guard = slot.lock().await;
            let freshness = match &guard.entry {
                Some(entry) => {
                    let age_secs = now.signed_duration_since(entry.fetched_at).num_seconds();
                    if entry.is_fresh(now) {
                        SlotFreshness::Fresh { age_secs }
                    } else {
                        SlotFreshness::Stale { age_secs }
                    }
                }
                None => SlotFreshness::Absent,
            };
            statuses.push(SourceStatus {
                key: key.to_string(),
                freshness,
                last_error: guard.last_error.clone(),
            });
        }
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
