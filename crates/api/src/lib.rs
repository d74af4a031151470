//! Kestrel public API façade.
//!
//! [`Dashboard`] ties the gateway, the bundle cache and the active cluster
//! together. Frontends read bundles through it; every read is keyed by the
//! cluster selected at read time.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use kestrel_core::{GatewayError, ScopeKey};
use kestrel_gateway::{Gateway, HttpGateway};
use kestrel_store::{CacheStore, Loader, Snapshot, Subscription};
use tracing::info;

pub mod bundles;
mod fanout;
mod settings;

pub use bundles::{ClusterOverview, HelmReleases, SecurityDashboard};
pub use kestrel_store::{CachePolicy, Loaded};
pub use settings::{Settings, SettingsError};

/// Per-bundle handle bound to the dashboard's current scope.
pub struct BundleHandle<'a, L: Loader> {
    dash: &'a Dashboard,
    loader: &'a Arc<L>,
}

impl<'a, L: Loader> BundleHandle<'a, L> {
    /// Cached view; starts a background fetch when stale.
    pub fn get(&self) -> Snapshot<L::Value> { self.dash.store.get(self.loader, &self.dash.scope()) }

    /// Settled view; waits for any in-flight fetch.
    pub async fn load(&self) -> Snapshot<L::Value> { self.dash.store.load(self.loader, &self.dash.scope()).await }

    pub fn subscribe(&self) -> Subscription<L::Value> { self.dash.store.subscribe(self.loader, &self.dash.scope()) }

    /// Drop the current cluster's entry and refetch it.
    pub fn refresh(&self) -> Snapshot<L::Value> { self.dash.store.soft_refresh(self.loader, &self.dash.scope()) }

    /// Drop this bundle family for every cluster, then refetch the current one.
    pub fn reset(&self) -> Snapshot<L::Value> {
        let prefix = bundles::family(self.loader.name());
        self.dash.store.hard_reset(prefix, self.loader, &self.dash.scope())
    }
}

pub struct Dashboard {
    store: CacheStore,
    active: ArcSwap<ScopeKey>,
    sentinel: String,
    overview: Arc<bundles::OverviewLoader>,
    security: Arc<bundles::SecurityLoader>,
    helm: Arc<bundles::HelmLoader>,
}

impl Dashboard {
    pub fn new(gateway: Arc<dyn Gateway>, store: CacheStore, default_scope: impl Into<String>) -> Self {
        let sentinel = default_scope.into();
        Self {
            store,
            active: ArcSwap::from_pointee(ScopeKey::new(sentinel.clone())),
            sentinel,
            overview: Arc::new(bundles::OverviewLoader::new(Arc::clone(&gateway))),
            security: Arc::new(bundles::SecurityLoader::new(Arc::clone(&gateway))),
            helm: Arc::new(bundles::HelmLoader::new(gateway)),
        }
    }

    /// HTTP-backed dashboard with a periodic cache sweeper.
    pub fn from_settings(settings: &Settings) -> Result<Self, GatewayError> {
        let gateway = HttpGateway::new(settings.api_url.clone(), settings.http_timeout, settings.default_scope.clone())?;
        let store = CacheStore::new();
        let _ = store.spawn_sweeper(settings.sweep_every);
        info!(api = %settings.api_url, "dashboard: http gateway ready");
        Ok(Self::new(Arc::new(gateway), store, settings.default_scope.clone()))
    }

    pub fn store(&self) -> &CacheStore { &self.store }

    pub fn scope(&self) -> ScopeKey { self.active.load().as_ref().clone() }

    /// Switch the active cluster. `None` or blank selects the default scope.
    /// In-flight fetches for the previous cluster keep running into their own partition.
    pub fn select_cluster(&self, cluster: Option<&str>) -> ScopeKey {
        let next = ScopeKey::for_cluster(cluster, &self.sentinel);
        let prev = self.active.swap(Arc::new(next.clone()));
        if *prev != next { info!(from = %prev, to = %next, "dashboard: active cluster changed"); }
        next
    }

    pub fn overview(&self) -> BundleHandle<'_, bundles::OverviewLoader> { BundleHandle { dash: self, loader: &self.overview } }

    pub fn security(&self) -> BundleHandle<'_, bundles::SecurityLoader> { BundleHandle { dash: self, loader: &self.security } }

    pub fn helm_releases(&self) -> BundleHandle<'_, bundles::HelmLoader> { BundleHandle { dash: self, loader: &self.helm } }
}
