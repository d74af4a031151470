#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kestrel_core::{BundleError, ScopeKey};
use kestrel_store::{CachePolicy, CacheStore, Loaded, Loader};

struct Counting {
    name: &'static str,
    policy: CachePolicy,
    delays: HashMap<String, Duration>,
    failing: AtomicBool,
    calls: Mutex<HashMap<String, usize>>,
}

impl Counting {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            policy: CachePolicy::new(Duration::from_secs(15), Duration::from_secs(300)),
            delays: HashMap::new(),
            failing: AtomicBool::new(false),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn with_policy(mut self, policy: CachePolicy) -> Self { self.policy = policy; self }

    fn with_delay(mut self, scope: &str, d: Duration) -> Self { self.delays.insert(scope.to_string(), d); self }

    fn calls(&self, scope: &str) -> usize { self.calls.lock().unwrap().get(scope).copied().unwrap_or(0) }
}

#[async_trait::async_trait]
impl Loader for Counting {
    type Value = String;

    fn name(&self) -> &'static str { self.name }
    fn policy(&self) -> CachePolicy { self.policy }

    async fn load(&self, scope: &ScopeKey) -> Loaded<String> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let c = calls.entry(scope.to_string()).or_default();
            *c += 1;
            *c
        };
        if let Some(d) = self.delays.get(scope.as_str()) { tokio::time::sleep(*d).await; }
        if self.failing.load(Ordering::SeqCst) {
            return Loaded::failed(String::new(), BundleError::Unavailable { bundle: self.name.into(), failed: 1 });
        }
        Loaded::ok(format!("{}#{}", scope, n))
    }
}

fn scope(s: &str) -> ScopeKey { ScopeKey::new(s) }

fn val(s: &kestrel_store::Snapshot<String>) -> Option<String> { s.value.as_deref().cloned() }

#[tokio::test(start_paused = true)]
async fn fresh_entry_is_served_without_fetch() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("cluster-overview"));
    let first = store.load(&loader, &scope("a")).await;
    assert_eq!(val(&first).as_deref(), Some("a#1"));

    tokio::time::advance(Duration::from_secs(5)).await;
    let again = store.get(&loader, &scope("a"));
    assert!(!again.is_fetching);
    assert!(!again.is_stale);
    assert_eq!(val(&again).as_deref(), Some("a#1"));
    assert_eq!(loader.calls("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_entry_serves_old_value_while_revalidating() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("cluster-overview"));
    store.load(&loader, &scope("a")).await;

    tokio::time::advance(Duration::from_secs(16)).await;
    let stale = store.get(&loader, &scope("a"));
    assert!(stale.is_fetching);
    assert_eq!(val(&stale).as_deref(), Some("a#1"));

    let next = store.load(&loader, &scope("a")).await;
    assert_eq!(val(&next).as_deref(), Some("a#2"));
    assert_eq!(loader.calls("a"), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_reads_join_one_fetch() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("cluster-overview").with_delay("a", Duration::from_millis(100)));
    let s1 = store.get(&loader, &scope("a"));
    let s2 = store.get(&loader, &scope("a"));
    assert!(s1.is_loading() && s2.is_loading());
    let sa = scope("a");
    let (l1, l2) = tokio::join!(store.load(&loader, &sa), store.load(&loader, &sa));
    assert_eq!(val(&l1), val(&l2));
    assert_eq!(loader.calls("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn scopes_never_share_values() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("security-dashboard"));
    store.load(&loader, &scope("a")).await;
    let b = store.peek(loader.as_ref(), &scope("b"));
    assert!(b.value.is_none());
    let b = store.load(&loader, &scope("b")).await;
    assert_eq!(val(&b).as_deref(), Some("b#1"));
    assert_eq!(val(&store.peek(loader.as_ref(), &scope("a"))).as_deref(), Some("a#1"));
}

#[tokio::test(start_paused = true)]
async fn soft_refresh_touches_only_one_scope() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("cluster-overview"));
    store.load(&loader, &scope("a")).await;
    store.load(&loader, &scope("b")).await;

    let snap = store.soft_refresh(&loader, &scope("a"));
    assert!(snap.value.is_none());
    assert!(snap.is_fetching);
    assert_eq!(val(&store.peek(loader.as_ref(), &scope("b"))).as_deref(), Some("b#1"));

    let a = store.load(&loader, &scope("a")).await;
    assert_eq!(val(&a).as_deref(), Some("a#2"));
    assert_eq!(loader.calls("b"), 1);
}

#[tokio::test(start_paused = true)]
async fn hard_reset_clears_every_scope_under_prefix() {
    let store = CacheStore::new();
    let security = Arc::new(Counting::new("security-dashboard"));
    let overview = Arc::new(Counting::new("cluster-overview"));
    for s in ["a", "b"] {
        store.load(&security, &scope(s)).await;
        store.load(&overview, &scope(s)).await;
    }

    let snap = store.hard_reset("security", &security, &scope("a"));
    assert!(snap.value.is_none());
    assert!(snap.is_fetching, "current scope must go to the network");
    assert!(store.peek(security.as_ref(), &scope("b")).value.is_none());
    assert_eq!(val(&store.peek(overview.as_ref(), &scope("b"))).as_deref(), Some("b#1"));

    let a = store.load(&security, &scope("a")).await;
    assert_eq!(val(&a).as_deref(), Some("a#2"));
    assert_eq!(security.calls("b"), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_keeps_last_good_value() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("helm-releases"));
    store.load(&loader, &scope("a")).await;

    loader.failing.store(true, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(20)).await;
    let snap = store.load(&loader, &scope("a")).await;
    assert_eq!(val(&snap).as_deref(), Some("a#1"));
    assert!(matches!(snap.error.as_deref(), Some(BundleError::Unavailable { .. })));

    loader.failing.store(false, Ordering::SeqCst);
    let healed = store.load(&loader, &scope("a")).await;
    assert_eq!(val(&healed).as_deref(), Some("a#3"));
    assert!(healed.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn first_failure_stores_defaults_with_error() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("helm-releases"));
    loader.failing.store(true, Ordering::SeqCst);
    let snap = store.load(&loader, &scope("a")).await;
    assert_eq!(val(&snap).as_deref(), Some(""));
    assert!(snap.error.is_some());
    assert!(snap.is_stale, "failed entries are retried on next read");
}

#[tokio::test(start_paused = true)]
async fn refresh_timer_lives_with_subscribers() {
    let store = CacheStore::new();
    let policy = CachePolicy::new(Duration::from_secs(15), Duration::from_secs(300)).refresh_every(Duration::from_secs(30));
    let loader = Arc::new(Counting::new("cluster-overview").with_policy(policy));

    let mut sub = store.subscribe(&loader, &scope("a"));
    let first = sub.settled().await.expect("settled");
    assert_eq!(val(&first).as_deref(), Some("a#1"));
    assert!(store.has_refresh_timer("cluster-overview", &scope("a")));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(loader.calls("a"), 2);
    assert_eq!(val(&sub.current()).as_deref(), Some("a#2"));

    drop(sub);
    assert!(!store.has_refresh_timer("cluster-overview", &scope("a")));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(loader.calls("a"), 2);
}

#[tokio::test(start_paused = true)]
async fn two_subscribers_share_one_timer() {
    let store = CacheStore::new();
    let policy = CachePolicy::new(Duration::from_secs(15), Duration::from_secs(300)).refresh_every(Duration::from_secs(30));
    let loader = Arc::new(Counting::new("cluster-overview").with_policy(policy));
    let s1 = store.subscribe(&loader, &scope("a"));
    let s2 = store.subscribe(&loader, &scope("a"));
    assert_eq!(store.subscriber_count("cluster-overview", &scope("a")), 2);
    drop(s1);
    assert!(store.has_refresh_timer("cluster-overview", &scope("a")));
    drop(s2);
    assert!(!store.has_refresh_timer("cluster-overview", &scope("a")));
}

#[tokio::test(start_paused = true)]
async fn subscription_sees_each_change() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("cluster-overview"));
    let mut sub = store.subscribe(&loader, &scope("a"));
    sub.settled().await.expect("first");
    store.soft_refresh(&loader, &scope("a"));
    let mut seen = Vec::new();
    while let Some(s) = sub.changed().await {
        seen.push(val(&s));
        if s.value.is_some() && !s.is_fetching { break; }
    }
    assert_eq!(seen.last().cloned().flatten().as_deref(), Some("a#2"));
}

#[tokio::test(start_paused = true)]
async fn sweep_evicts_only_idle_unsubscribed_entries() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("security-dashboard"));
    store.load(&loader, &scope("a")).await;
    let _sub = store.subscribe(&loader, &scope("b"));
    tokio::task::yield_now().await;

    tokio::time::advance(Duration::from_secs(100)).await;
    assert_eq!(store.sweep(), 0);

    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(store.sweep(), 1);
    assert_eq!(store.len(), 1);
    assert!(store.peek(loader.as_ref(), &scope("a")).value.is_none());
}

#[tokio::test(start_paused = true)]
async fn superseded_fetch_cannot_overwrite() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("cluster-overview").with_delay("a", Duration::from_millis(100)));
    store.get(&loader, &scope("a"));
    tokio::time::advance(Duration::from_millis(10)).await;
    store.soft_refresh(&loader, &scope("a"));
    let snap = store.load(&loader, &scope("a")).await;
    assert_eq!(val(&snap).as_deref(), Some("a#2"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(val(&store.peek(loader.as_ref(), &scope("a"))).as_deref(), Some("a#2"));
}

#[tokio::test(start_paused = true)]
async fn scope_switch_mid_flight_keeps_partitions_apart() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("cluster-overview").with_delay("cluster-a", Duration::from_millis(500)));

    // cluster-a fetch is in flight when the operator switches to cluster-b
    let pending = store.get(&loader, &scope("cluster-a"));
    assert!(pending.is_loading());
    let b = store.load(&loader, &scope("cluster-b")).await;
    assert_eq!(val(&b).as_deref(), Some("cluster-b#1"));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(val(&store.get(&loader, &scope("cluster-b"))).as_deref(), Some("cluster-b#1"));
    let a = store.load(&loader, &scope("cluster-a")).await;
    assert_eq!(val(&a).as_deref(), Some("cluster-a#1"));
}

#[tokio::test(start_paused = true)]
async fn zero_sweep_period_is_clamped() {
    let store = CacheStore::new();
    let loader = Arc::new(Counting::new("security-dashboard"));
    let sweeper = store.spawn_sweeper(Duration::ZERO);
    store.load(&loader, &scope("a")).await;
    assert_eq!(store.len(), 1);

    tokio::time::sleep(Duration::from_secs(302)).await;
    assert!(!sweeper.is_finished(), "sweeper must survive a zero period");
    assert_eq!(store.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn zero_refresh_period_is_clamped() {
    let store = CacheStore::new();
    let policy = CachePolicy::new(Duration::from_secs(15), Duration::from_secs(300)).refresh_every(Duration::ZERO);
    let loader = Arc::new(Counting::new("cluster-overview").with_policy(policy));
    let mut sub = store.subscribe(&loader, &scope("a"));
    sub.settled().await.expect("settled");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(loader.calls("a"), 2);
    assert!(store.has_refresh_timer("cluster-overview", &scope("a")));
}
