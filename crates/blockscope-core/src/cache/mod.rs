//! Short-lived response cache with request coalescing.
//!
//! [`ResponseCache::get_or_compute`] returns a live entry when one exists.
//! Otherwise the first caller for a key becomes the leader and its
//! computation runs in a detached task; every concurrent caller for the same
//! key awaits that single result through a `watch` channel. Successful
//! results are stored until their TTL elapses; failures are handed to the
//! waiters and leave nothing behind, so the next request starts fresh.

mod key;

pub use key::{CacheKey, CacheKeyBuilder};

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::error::CoreError;

// ==============================================================================
// Configuration
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// Absorbs bursts of duplicate polling; well under one block interval.
    Short,
    /// For aggregates that are expensive to derive and change slowly.
    Long,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub short_ttl: Duration,
    pub long_ttl: Duration,
    /// Upper bound on stored keys. In-flight computations may exceed it
    /// while nothing finished is left to evict.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            short_ttl: Duration::from_secs(5),
            long_ttl: Duration::from_secs(60),
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Short => self.short_ttl,
            TtlClass::Long => self.long_ttl,
        }
    }
}

// ==============================================================================
// Entries
// ==============================================================================

type Outcome<V> = Option<Result<V, CoreError>>;

enum Slot<V> {
    Ready {
        value: V,
        expires_at: Instant,
    },
    Pending {
        generation: u64,
        outcome: watch::Receiver<Outcome<V>>,
    },
}

enum Role<V> {
    Hit(V),
    Wait(watch::Receiver<Outcome<V>>),
    Lead {
        generation: u64,
        outcome: watch::Sender<Outcome<V>>,
    },
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
}

struct Inner<V> {
    entries: Mutex<HashMap<CacheKey, Slot<V>>>,
    config: CacheConfig,
    counters: Counters,
    next_generation: AtomicU64,
}

// ==============================================================================
// Response Cache
// ==============================================================================

/// Owned, in-memory, never persisted. Create once at startup, share via
/// `Arc`, and call [`ResponseCache::spawn_sweeper`] to bound memory.
pub struct ResponseCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                config,
                counters: Counters::default(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return the live value for `key`, or compute it exactly once for all
    /// concurrent callers of the same key.
    pub async fn get_or_compute<F>(
        &self,
        key: CacheKey,
        ttl: TtlClass,
        compute: F,
    ) -> Result<V, CoreError>
    where
        F: Future<Output = Result<V, CoreError>> + Send + 'static,
    {
        let mut outcome = match self.claim(&key).await {
            Role::Hit(value) => return Ok(value),
            Role::Wait(outcome) => outcome,
            Role::Lead {
                generation,
                outcome,
            } => {
                let receiver = outcome.subscribe();
                let inner = Arc::clone(&self.inner);
                let ttl = inner.config.ttl(ttl);
                // Detached: dropping the leader's request must not cancel
                // the computation other callers are waiting on.
                tokio::spawn(async move {
                    let result = AssertUnwindSafe(compute)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(CoreError::Internal("cached computation panicked".into()))
                        });
                    inner.settle(key, generation, &result, ttl).await;
                    outcome.send_replace(Some(result));
                });
                receiver
            }
        };

        let settled = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| CoreError::Internal("cached computation was dropped".into()))?;
        match settled.as_ref() {
            Some(result) => result.clone(),
            None => Err(CoreError::Internal(
                "cached computation settled without a result".into(),
            )),
        }
    }

    async fn claim(&self, key: &CacheKey) -> Role<V> {
        let now = Instant::now();
        let counters = &self.inner.counters;
        let mut entries = self.inner.entries.lock().await;

        match entries.get(key) {
            Some(Slot::Ready { value, expires_at }) if *expires_at > now => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "response cache hit");
                return Role::Hit(value.clone());
            }
            Some(Slot::Pending { outcome, .. }) => {
                counters.coalesced.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "joining in-flight computation");
                return Role::Wait(outcome.clone());
            }
            _ => {}
        }

        counters.misses.fetch_add(1, Ordering::Relaxed);
        let capacity = self.inner.config.max_entries.max(1);
        if !entries.contains_key(key) && entries.len() >= capacity {
            purge_expired(&mut entries, now);
            if entries.len() >= capacity {
                if evict_soonest_expiring(&mut entries) {
                    counters.evictions.fetch_add(1, Ordering::Relaxed);
                } else {
                    // Only in-flight work left; admit it so callers still coalesce.
                    warn!(key = %key, capacity, "response cache over capacity with pending work");
                }
            }
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        entries.insert(
            key.clone(),
            Slot::Pending {
                generation,
                outcome: receiver,
            },
        );
        debug!(key = %key, "response cache miss; computing");
        Role::Lead {
            generation,
            outcome: sender,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.inner.entries.lock().await;
        purge_expired(&mut entries, Instant::now())
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.inner.entries.lock().await.len();
        let counters = &self.inner.counters;
        CacheStats {
            entries,
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Periodically purge expired entries. The task exits on its own once
    /// the cache has been dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let every = every.max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("response cache dropped; sweeper exiting");
                    break;
                };
                let removed = {
                    let mut entries = inner.entries.lock().await;
                    purge_expired(&mut entries, Instant::now())
                };
                if removed > 0 {
                    debug!(removed, "swept expired response cache entries");
                }
            }
        })
    }
}

impl<V: Clone> Inner<V> {
    /// Publish a finished computation into the table, unless its pending
    /// slot has been replaced in the meantime.
    async fn settle(
        &self,
        key: CacheKey,
        generation: u64,
        result: &Result<V, CoreError>,
        ttl: Duration,
    ) {
        let mut entries = self.entries.lock().await;
        let owns_slot = matches!(
            entries.get(&key),
            Some(Slot::Pending { generation: g, .. }) if *g == generation
        );
        if !owns_slot {
            return;
        }

        match result {
            Ok(value) => {
                entries.insert(
                    key,
                    Slot::Ready {
                        value: value.clone(),
                        expires_at: Instant::now() + ttl,
                    },
                );
            }
            Err(err) => {
                debug!(key = %key, error = %err, "computation failed; nothing cached");
                entries.remove(&key);
            }
        }
    }
}

fn purge_expired<V>(entries: &mut HashMap<CacheKey, Slot<V>>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, slot| match slot {
        Slot::Ready { expires_at, .. } => *expires_at > now,
        Slot::Pending { .. } => true,
    });
    before - entries.len()
}

/// Evict the stored value closest to expiry. In-flight slots are never
/// evicted because callers are waiting on them.
fn evict_soonest_expiring<V>(entries: &mut HashMap<CacheKey, Slot<V>>) -> bool {
    let victim = entries
        .iter()
        .filter_map(|(key, slot)| match slot {
            Slot::Ready { expires_at, .. } => Some((key, *expires_at)),
            Slot::Pending { .. } => None,
        })
        .min_by_key(|(_, expires_at)| *expires_at)
        .map(|(key, _)| key.clone());

    match victim {
        Some(key) => {
            entries.remove(&key);
            true
        }
        None => false,
    }
}
