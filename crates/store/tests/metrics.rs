#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use kestrel_core::ScopeKey;
use kestrel_store::{CachePolicy, CacheStore, Loaded, Loader};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

struct Fixed;

#[async_trait::async_trait]
impl Loader for Fixed {
    type Value = u32;

    fn name(&self) -> &'static str { "workloads" }
    fn policy(&self) -> CachePolicy { CachePolicy::new(Duration::from_secs(15), Duration::from_secs(300)) }

    async fn load(&self, _scope: &ScopeKey) -> Loaded<u32> { Loaded::ok(7) }
}

#[tokio::test(start_paused = true)]
async fn fetches_are_counted_per_bundle() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("recorder installs once per test binary");

    let store = CacheStore::new();
    let loader = Arc::new(Fixed);
    store.load(&loader, &ScopeKey::new("a")).await;
    store.load(&loader, &ScopeKey::new("b")).await;

    let fetches: u64 = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(key, ..)| key.key().name() == "cache_fetches_total")
        .filter(|(key, ..)| key.key().labels().any(|l| l.key() == "bundle" && l.value() == "workloads"))
        .map(|(.., value)| match value {
            DebugValue::Counter(n) => n,
            _ => 0,
        })
        .sum();
    assert_eq!(fetches, 2);
}
