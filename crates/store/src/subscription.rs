use tokio::sync::watch;

use crate::{CacheKey, CacheStore, Snapshot, ValueType};

/// Live interest in one `(bundle, scope)` entry.
///
/// While any subscription for a key is alive the entry is never evicted and a
/// configured refresh timer keeps running. Dropping the last one stops it.
pub struct Subscription<V> {
    store: CacheStore,
    key: CacheKey,
    rx: watch::Receiver<u64>,
    _value: ValueType<V>,
}

impl<V: Send + Sync + 'static> Subscription<V> {
    pub(crate) fn new(store: CacheStore, key: CacheKey, rx: watch::Receiver<u64>) -> Self {
        Self { store, key, rx, _value: Default::default() }
    }

    pub fn key(&self) -> &CacheKey { &self.key }

    pub fn current(&self) -> Snapshot<V> { self.store.peek_key(&self.key) }

    /// Wait for the next change of the entry and return the new view.
    /// `None` once the entry can no longer change.
    pub async fn changed(&mut self) -> Option<Snapshot<V>> {
        self.rx.changed().await.ok()?;
        Some(self.current())
    }

    /// Wait until the entry has settled: not fetching and holding a value or an error.
    pub async fn settled(&mut self) -> Option<Snapshot<V>> {
        loop {
            let snap = self.current();
            if !snap.is_fetching && (snap.value.is_some() || snap.error.is_some()) { return Some(snap); }
            self.rx.changed().await.ok()?;
        }
    }
}

impl<V> Drop for Subscription<V> {
    fn drop(&mut self) { self.store.release(&self.key); }
}
