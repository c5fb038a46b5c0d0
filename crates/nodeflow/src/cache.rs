// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Fingerprint-keyed compute cache used by reducer-style nodes.
//!
//! Keys are stable SHA-256 fingerprints over a canonical encoding of the
//! input map. `get_or_compute` guarantees at most one in-flight computation
//! per fingerprint (waiters join the leader), and an entry invalidated
//! while a computation is in flight is never served from the cache.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::debug;

use crate::config::CachePolicy;
use crate::error::Result;

/// Stable fingerprint for an input map.
///
/// The encoding is JSON with recursively sorted keys and no whitespace, so
/// the same logical input always hashes identically.
#[must_use]
pub fn fingerprint(input: &Map<String, Value>) -> String {
    let mut encoded = String::new();
    write_canonical(&Value::Object(input.clone()), &mut encoded);
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar).unwrap_or_default()),
    }
}

/// Cache observability counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Keyed by fingerprint; waiters clone the receiver and wait.
    inflight: HashMap<String, watch::Receiver<bool>>,
    /// Bumped on set/invalidate/clear; an in-flight compute only stores
    /// its result if the generation it started under is still current.
    generations: HashMap<String, u64>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Outcome of consulting the cache/in-flight table for a key, used to
/// split the locked decision from the `.await` that follows it.
enum ComputeStep {
    Hit(Value),
    Wait(watch::Receiver<bool>),
    Lead(u64, watch::Sender<bool>),
}

/// Fingerprint-keyed value cache with in-flight deduplication.
pub struct ComputeCache {
    policy: CachePolicy,
    inner: Mutex<CacheInner>,
}

impl ComputeCache {
    #[must_use]
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Cached value for `key`, if present and not invalidated.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        if !self.policy.enabled {
            return None;
        }
        match inner.entries.get(key) {
            Some(entry) => {
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a value, superseding any in-flight computation for `key`.
    pub fn set(&self, key: &str, value: Value) {
        if !self.policy.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        *inner.generations.entry(key.to_string()).or_insert(0) += 1;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: Utc::now(),
            },
        );
        self.enforce_capacity(&mut inner);
    }

    /// Drop a key. Any computation already in flight will not repopulate it.
    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock();
        *inner.generations.entry(key.to_string()).or_insert(0) += 1;
        if inner.entries.remove(key).is_some() {
            inner.evictions += 1;
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let removed = inner.entries.len() as u64;
        let keys: Vec<String> = inner
            .entries
            .keys()
            .chain(inner.inflight.keys())
            .cloned()
            .collect();
        for key in keys {
            *inner.generations.entry(key).or_insert(0) += 1;
        }
        inner.entries.clear();
        inner.evictions += removed;
    }

    /// Synchronous half of a `get_or_compute` loop iteration: consult the
    /// cache and in-flight table under the lock and decide what to do next.
    /// Kept lock-guard-free of any `.await` so the guard never needs to be
    /// held across a suspend point.
    fn get_or_compute_step(&self, key: &str) -> ComputeStep {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(key) {
            let value = entry.value.clone();
            inner.hits += 1;
            return ComputeStep::Hit(value);
        }
        if let Some(rx) = inner.inflight.get(key) {
            return ComputeStep::Wait(rx.clone());
        }

        inner.misses += 1;
        let generation = *inner.generations.entry(key.to_string()).or_insert(0);
        let (tx, rx) = watch::channel(false);
        inner.inflight.insert(key.to_string(), rx);
        ComputeStep::Lead(generation, tx)
    }

    /// Clear a leader's stale in-flight marker (left behind when it was
    /// cancelled without completing) so a waiter can take over leadership.
    fn clear_stale_marker(&self, key: &str) {
        let mut inner = self.inner.lock();
        let stale = inner
            .inflight
            .get(key)
            .map_or(false, |r| r.has_changed().is_err());
        if stale {
            inner.inflight.remove(key);
        }
    }

    /// Return the cached value or run `compute`, deduplicating concurrent
    /// callers: for a given key, at most one computation is in flight and
    /// the others wait for it.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if !self.policy.enabled {
            return compute().await;
        }

        let mut compute = Some(compute);
        loop {
            let (generation, notify) = match self.get_or_compute_step(key) {
                ComputeStep::Hit(value) => return Ok(value),
                ComputeStep::Wait(mut rx) => {
                    if rx.changed().await.is_err() {
                        // The leader was cancelled without completing;
                        // clear its stale marker so a waiter can lead.
                        self.clear_stale_marker(key);
                    }
                    continue;
                }
                ComputeStep::Lead(generation, notify) => (generation, notify),
            };

            // This caller is the leader for the fingerprint.
            let computation = match compute.take() {
                Some(f) => f,
                // A waiter loops back to leadership at most once.
                None => {
                    let mut inner = self.inner.lock();
                    inner.inflight.remove(key);
                    drop(inner);
                    let _ = notify.send(true);
                    return Err(crate::error::Error::OperationFailed(
                        "cache computation already consumed".to_string(),
                    ));
                }
            };
            let result = computation().await;

            {
                let mut inner = self.inner.lock();
                inner.inflight.remove(key);
                if let Ok(value) = &result {
                    let current = *inner.generations.get(key).unwrap_or(&0);
                    if current == generation {
                        inner.entries.insert(
                            key.to_string(),
                            CacheEntry {
                                value: value.clone(),
                                created_at: Utc::now(),
                            },
                        );
                        self.enforce_capacity(&mut inner);
                    } else {
                        debug!(key, "computed value superseded by invalidation, not cached");
                    }
                }
            }
            let _ = notify.send(true);
            return result;
        }
    }

    /// Counters snapshot.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            enabled: self.policy.enabled,
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    fn enforce_capacity(&self, inner: &mut CacheInner) {
        let Some(max_entries) = self.policy.max_entries else {
            return;
        };
        while inner.entries.len() > max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    inner.entries.remove(&key);
                    *inner.generations.entry(key).or_insert(0) += 1;
                    inner.evictions += 1;
                }
                None => break,
            }
        }
    }
}

impl Default for ComputeCache {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

impl std::fmt::Debug for ComputeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ComputeCache")
            .field("enabled", &stats.enabled)
            .field("entries", &stats.entries)
            .finish_non_exhaustive()
    }
}
