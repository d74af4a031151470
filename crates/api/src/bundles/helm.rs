use std::sync::Arc;
use std::time::Duration;

use kestrel_core::{BundleError, HelmRelease, ScopeKey};
use kestrel_gateway::{endpoints, Gateway};
use kestrel_store::{CachePolicy, Loaded, Loader};
use serde::Serialize;

use crate::fanout::settle;

pub const HELM_RELEASES: &str = "helm-releases";

#[derive(Debug, Clone, Default, Serialize)]
pub struct HelmReleases {
    pub releases: Vec<HelmRelease>,
}

impl HelmReleases {
    /// Releases not in `deployed` state (failed, pending-*, superseded).
    pub fn unhealthy(&self) -> impl Iterator<Item = &HelmRelease> {
        self.releases.iter().filter(|r| !r.status.eq_ignore_ascii_case("deployed"))
    }
}

pub struct HelmLoader {
    gateway: Arc<dyn Gateway>,
}

impl HelmLoader {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self { Self { gateway } }
}

#[async_trait::async_trait]
impl Loader for HelmLoader {
    type Value = HelmReleases;

    fn name(&self) -> &'static str { HELM_RELEASES }

    fn policy(&self) -> CachePolicy { CachePolicy::new(Duration::from_secs(60), Duration::from_secs(300)) }

    async fn load(&self, scope: &ScopeKey) -> Loaded<HelmReleases> {
        match settle(HELM_RELEASES, endpoints::helm_releases(self.gateway.as_ref(), scope)).await {
            Ok(releases) => Loaded::ok(HelmReleases { releases }),
            Err(source) => Loaded::failed(HelmReleases::default(), BundleError::Source { bundle: HELM_RELEASES.into(), source }),
        }
    }
}
