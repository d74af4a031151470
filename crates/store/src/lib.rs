//! Kestrel store: bundle cache partitioned by `(bundle, scope)`.
//!
//! Reads never block on the network. A stale or missing entry triggers one
//! background fetch per key; concurrent readers join it. Values are swapped as
//! whole `Arc`s so a reader never sees a half-assembled bundle.

#![forbid(unsafe_code)]

use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use kestrel_core::{BundleError, ScopeKey};
use metrics::{counter, gauge, histogram};
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shortest period accepted by the sweeper and refresh timers.
const MIN_TICK: Duration = Duration::from_secs(1);

mod subscription;

pub use subscription::Subscription;

/// Per-bundle timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Age after which a read triggers a refetch.
    pub stale_after: Duration,
    /// Idle time after which an unsubscribed entry is dropped.
    pub evict_after: Duration,
    /// Background refetch period while at least one subscriber is live.
    pub refresh_every: Option<Duration>,
}

impl CachePolicy {
    pub const fn new(stale_after: Duration, evict_after: Duration) -> Self {
        Self { stale_after, evict_after, refresh_every: None }
    }

    pub const fn refresh_every(mut self, every: Duration) -> Self {
        self.refresh_every = Some(every);
        self
    }
}

/// Outcome of one fetch cycle. `error` marks a query-level failure; `value`
/// then holds the defaulted bundle.
#[derive(Debug, Clone)]
pub struct Loaded<V> {
    pub value: V,
    pub error: Option<BundleError>,
}

impl<V> Loaded<V> {
    pub fn ok(value: V) -> Self { Self { value, error: None } }
    pub fn failed(value: V, error: BundleError) -> Self { Self { value, error: Some(error) } }
}

/// A named bundle definition the store can fetch.
#[async_trait::async_trait]
pub trait Loader: Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    fn name(&self) -> &'static str;
    fn policy(&self) -> CachePolicy;
    async fn load(&self, scope: &ScopeKey) -> Loaded<Self::Value>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub bundle: &'static str,
    pub scope: ScopeKey,
}

impl CacheKey {
    pub fn new(bundle: &'static str, scope: &ScopeKey) -> Self { Self { bundle, scope: scope.clone() } }
}

/// Point-in-time view of one entry.
#[derive(Debug)]
pub struct Snapshot<V> {
    pub value: Option<Arc<V>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub age: Option<Duration>,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub error: Option<Arc<BundleError>>,
}

impl<V> Clone for Snapshot<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            updated_at: self.updated_at,
            age: self.age,
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
            error: self.error.clone(),
        }
    }
}

impl<V> Snapshot<V> {
    fn empty() -> Self {
        Self { value: None, updated_at: None, age: None, is_fetching: false, is_stale: true, error: None }
    }

    pub fn is_loading(&self) -> bool { self.value.is_none() && self.is_fetching }
}

type AnyValue = Arc<dyn Any + Send + Sync>;

struct Slot {
    value: Option<AnyValue>,
    fetched_at: Option<Instant>,
    updated_at: Option<DateTime<Utc>>,
    error: Option<Arc<BundleError>>,
    inflight: Option<u64>,
    subscribers: usize,
    last_access: Instant,
    policy: CachePolicy,
    refresh: Option<AbortHandle>,
    version: watch::Sender<u64>,
}

impl Slot {
    fn new(policy: CachePolicy, now: Instant) -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            value: None,
            fetched_at: None,
            updated_at: None,
            error: None,
            inflight: None,
            subscribers: 0,
            last_access: now,
            policy,
            refresh: None,
            version,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        match (self.value.is_some(), self.fetched_at) {
            (true, Some(at)) => now.saturating_duration_since(at) < self.policy.stale_after,
            _ => false,
        }
    }

    fn bump(&self) { self.version.send_modify(|v| *v = v.wrapping_add(1)); }

    /// Drop cached data; an in-flight fetch loses its right to write.
    fn clear(&mut self) {
        self.value = None;
        self.fetched_at = None;
        self.updated_at = None;
        self.error = None;
        self.inflight = None;
        self.bump();
    }

    fn snapshot<V: Send + Sync + 'static>(&self, now: Instant) -> Snapshot<V> {
        Snapshot {
            value: self.value.clone().and_then(|v| v.downcast::<V>().ok()),
            updated_at: self.updated_at,
            age: self.fetched_at.map(|at| now.saturating_duration_since(at)),
            is_fetching: self.inflight.is_some(),
            is_stale: !self.is_fresh(now),
            error: self.error.clone(),
        }
    }
}

pub(crate) struct Inner {
    slots: Mutex<FxHashMap<CacheKey, Slot>>,
    next_token: AtomicU64,
}

/// Shared cache handle. Cloning is cheap; clones see the same entries.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl Default for CacheStore {
    fn default() -> Self { Self::new() }
}

impl CacheStore {
    pub fn new() -> Self {
        Self { inner: Arc::new(Inner { slots: Mutex::new(FxHashMap::default()), next_token: AtomicU64::new(1) }) }
    }

    fn slots(&self) -> MutexGuard<'_, FxHashMap<CacheKey, Slot>> {
        // A poisoned map only means a panic elsewhere mid-update; entries stay usable.
        self.inner.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn len(&self) -> usize { self.slots().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Serve the entry for `(loader, scope)`. Fresh entries return as-is;
    /// otherwise a fetch is started (or joined) and the previous value, if
    /// any, is returned alongside `is_fetching`.
    pub fn get<L: Loader>(&self, loader: &Arc<L>, scope: &ScopeKey) -> Snapshot<L::Value> {
        self.read(loader, scope, false).0
    }

    /// Like [`get`](Self::get) but waits until the in-flight fetch settles.
    pub async fn load<L: Loader>(&self, loader: &Arc<L>, scope: &ScopeKey) -> Snapshot<L::Value> {
        let (snap, rx) = self.read(loader, scope, true);
        if !snap.is_fetching { return snap; }
        let Some(mut rx) = rx else { return snap };
        let key = CacheKey::new(loader.name(), scope);
        loop {
            if rx.changed().await.is_err() { break; }
            let snap = self.peek_key::<L::Value>(&key);
            if !snap.is_fetching { return snap; }
        }
        self.peek_key(&key)
    }

    /// Current entry without triggering any fetch.
    pub fn peek<L: Loader>(&self, loader: &L, scope: &ScopeKey) -> Snapshot<L::Value> {
        self.peek_key(&CacheKey::new(loader.name(), scope))
    }

    pub(crate) fn peek_key<V: Send + Sync + 'static>(&self, key: &CacheKey) -> Snapshot<V> {
        let slots = self.slots();
        match slots.get(key) {
            Some(slot) => slot.snapshot(Instant::now()),
            None => Snapshot::empty(),
        }
    }

    fn read<L: Loader>(&self, loader: &Arc<L>, scope: &ScopeKey, want_rx: bool) -> (Snapshot<L::Value>, Option<watch::Receiver<u64>>) {
        let key = CacheKey::new(loader.name(), scope);
        let now = Instant::now();
        let mut slots = self.slots();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot::new(loader.policy(), now));
        slot.last_access = now;
        let rx = want_rx.then(|| slot.version.subscribe());
        if slot.is_fresh(now) {
            counter!("cache_hits_total", 1, "bundle" => key.bundle);
            debug!(bundle = key.bundle, scope = %key.scope, "cache: hit");
            return (slot.snapshot(now), rx);
        }
        counter!("cache_misses_total", 1, "bundle" => key.bundle);
        if slot.inflight.is_none() {
            let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
            slot.inflight = Some(token);
            slot.bump();
            self.spawn_fetch(Arc::clone(loader), key, token);
        }
        (slot.snapshot(now), rx)
    }

    /// Force a refetch unless one is already in flight. Keeps the current value.
    pub fn revalidate<L: Loader>(&self, loader: &Arc<L>, scope: &ScopeKey) {
        let key = CacheKey::new(loader.name(), scope);
        let mut slots = self.slots();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot::new(loader.policy(), Instant::now()));
        if slot.inflight.is_some() { return; }
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        slot.inflight = Some(token);
        slot.bump();
        self.spawn_fetch(Arc::clone(loader), key, token);
    }

    fn spawn_fetch<L: Loader>(&self, loader: Arc<L>, key: CacheKey, token: u64) {
        let store = self.clone();
        counter!("cache_fetches_total", 1, "bundle" => key.bundle);
        debug!(bundle = key.bundle, scope = %key.scope, token, "cache: fetch start");
        tokio::spawn(async move {
            let t0 = Instant::now();
            let res = std::panic::AssertUnwindSafe(loader.load(&key.scope)).catch_unwind().await;
            histogram!("bundle_fetch_ms", t0.elapsed().as_secs_f64() * 1000.0, "bundle" => key.bundle);
            match res {
                Ok(loaded) => store.complete(&key, token, loaded, t0),
                Err(_) => {
                    warn!(bundle = key.bundle, scope = %key.scope, "cache: loader panicked");
                    store.abort(&key, token);
                }
            }
        });
    }

    fn complete<V: Send + Sync + 'static>(&self, key: &CacheKey, token: u64, loaded: Loaded<V>, t0: Instant) {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(key) else {
            debug!(bundle = key.bundle, scope = %key.scope, "cache: entry gone; result dropped");
            return;
        };
        if slot.inflight != Some(token) {
            debug!(bundle = key.bundle, scope = %key.scope, token, "cache: superseded fetch; result dropped");
            return;
        }
        slot.inflight = None;
        match loaded.error {
            None => {
                slot.value = Some(Arc::new(loaded.value));
                slot.fetched_at = Some(Instant::now());
                slot.updated_at = Some(Utc::now());
                slot.error = None;
                info!(bundle = key.bundle, scope = %key.scope, took_ms = %t0.elapsed().as_millis(), "cache: stored");
            }
            Some(err) => {
                // Keep the last good bundle; only a first-ever failure stores defaults.
                if slot.value.is_none() {
                    slot.value = Some(Arc::new(loaded.value));
                    slot.updated_at = Some(Utc::now());
                }
                warn!(bundle = key.bundle, scope = %key.scope, error = %err, "cache: fetch failed");
                slot.error = Some(Arc::new(err));
            }
        }
        slot.bump();
    }

    fn abort(&self, key: &CacheKey, token: u64) {
        let mut slots = self.slots();
        if let Some(slot) = slots.get_mut(key) {
            if slot.inflight == Some(token) {
                slot.inflight = None;
                slot.error = Some(Arc::new(BundleError::Aborted { bundle: key.bundle.to_string() }));
                slot.bump();
            }
        }
    }

    /// Drop the cached data for exactly one key, keeping subscribers attached.
    pub fn invalidate(&self, bundle: &'static str, scope: &ScopeKey) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(&CacheKey::new(bundle, scope)) {
            Some(slot) => { slot.clear(); true }
            None => false,
        }
    }

    /// Drop one scope's entry and refetch it immediately.
    pub fn soft_refresh<L: Loader>(&self, loader: &Arc<L>, scope: &ScopeKey) -> Snapshot<L::Value> {
        self.invalidate(loader.name(), scope);
        info!(bundle = loader.name(), scope = %scope, "cache: soft refresh");
        self.get(loader, scope)
    }

    /// Drop every entry whose bundle name starts with `prefix`, across all
    /// scopes, then refetch `scope` through `loader`.
    pub fn hard_reset<L: Loader>(&self, prefix: &str, loader: &Arc<L>, scope: &ScopeKey) -> Snapshot<L::Value> {
        let cleared = self.clear_prefix(prefix);
        info!(prefix = %prefix, cleared, scope = %scope, "cache: hard reset");
        self.get(loader, scope)
    }

    /// Clear every entry under `prefix`; returns how many were cleared.
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let mut slots = self.slots();
        let mut n = 0;
        for (key, slot) in slots.iter_mut() {
            if key.bundle.starts_with(prefix) { slot.clear(); n += 1; }
        }
        n
    }

    /// Remove unsubscribed, idle entries past their eviction threshold.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|key, slot| {
            let idle = now.saturating_duration_since(slot.last_access);
            let keep = slot.subscribers > 0 || slot.inflight.is_some() || idle < slot.policy.evict_after;
            if !keep { debug!(bundle = key.bundle, scope = %key.scope, idle_ms = %idle.as_millis(), "cache: evicted"); }
            keep
        });
        let evicted = before - slots.len();
        if evicted > 0 { counter!("cache_evictions_total", evicted as u64); }
        gauge!("cache_entries", slots.len() as f64);
        evicted
    }

    /// Periodic [`sweep`](Self::sweep). The task ends once every store handle is dropped.
    pub fn spawn_sweeper(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = period.max(MIN_TICK);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                CacheStore { inner }.sweep();
            }
        })
    }

    /// Register a subscriber for `(loader, scope)` and kick off a read.
    pub fn subscribe<L: Loader>(&self, loader: &Arc<L>, scope: &ScopeKey) -> Subscription<L::Value> {
        let key = CacheKey::new(loader.name(), scope);
        let rx = {
            let now = Instant::now();
            let mut slots = self.slots();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot::new(loader.policy(), now));
            slot.subscribers += 1;
            if let (Some(every), None) = (slot.policy.refresh_every, slot.refresh.as_ref()) {
                slot.refresh = Some(self.spawn_refresh(Arc::clone(loader), scope.clone(), every));
                debug!(bundle = key.bundle, scope = %key.scope, every_ms = %every.as_millis(), "cache: refresh timer started");
            }
            slot.version.subscribe()
        };
        self.get(loader, scope);
        Subscription::new(self.clone(), key, rx)
    }

    fn spawn_refresh<L: Loader>(&self, loader: Arc<L>, scope: ScopeKey, every: Duration) -> AbortHandle {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let every = every.max(MIN_TICK);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                CacheStore { inner }.revalidate(&loader, &scope);
            }
        })
        .abort_handle()
    }

    pub(crate) fn release(&self, key: &CacheKey) {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(key) else { return };
        slot.subscribers = slot.subscribers.saturating_sub(1);
        if slot.subscribers == 0 {
            slot.last_access = Instant::now();
            if let Some(timer) = slot.refresh.take() {
                timer.abort();
                debug!(bundle = key.bundle, scope = %key.scope, "cache: refresh timer stopped");
            }
        }
    }

    pub fn subscriber_count(&self, bundle: &'static str, scope: &ScopeKey) -> usize {
        self.slots().get(&CacheKey::new(bundle, scope)).map(|s| s.subscribers).unwrap_or(0)
    }

    pub fn has_refresh_timer(&self, bundle: &'static str, scope: &ScopeKey) -> bool {
        self.slots().get(&CacheKey::new(bundle, scope)).map(|s| s.refresh.is_some()).unwrap_or(false)
    }
}

/// Marker used by [`Subscription`] to keep the value type.
pub(crate) type ValueType<V> = PhantomData<fn() -> V>;
