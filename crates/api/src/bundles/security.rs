use std::sync::Arc;
use std::time::Duration;

use kestrel_core::{
    BundleError, NetworkPolicySummary, RbacSummary, ScopeKey, SecurityScore, SecurityTrendPoint, VulnerabilitySummary,
};
use kestrel_gateway::{endpoints, Gateway};
use kestrel_store::{CachePolicy, Loaded, Loader};
use serde::Serialize;

use crate::fanout::{failures, settle};

pub const SECURITY: &str = "security-dashboard";
const TREND_DAYS: u32 = 30;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SecurityDashboard {
    pub score: Option<SecurityScore>,
    pub vulnerabilities: Option<VulnerabilitySummary>,
    pub rbac: Option<RbacSummary>,
    pub network_policies: Option<NetworkPolicySummary>,
    pub trends: Vec<SecurityTrendPoint>,
}

pub struct SecurityLoader {
    gateway: Arc<dyn Gateway>,
}

impl SecurityLoader {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self { Self { gateway } }
}

#[async_trait::async_trait]
impl Loader for SecurityLoader {
    type Value = SecurityDashboard;

    fn name(&self) -> &'static str { SECURITY }

    fn policy(&self) -> CachePolicy { CachePolicy::new(Duration::from_secs(120), Duration::from_secs(600)) }

    async fn load(&self, scope: &ScopeKey) -> Loaded<SecurityDashboard> {
        let gw = self.gateway.as_ref();
        let (score, vulnerabilities, rbac, network_policies, trends) = tokio::join!(
            settle(SECURITY, endpoints::security_score(gw, scope)),
            settle(SECURITY, endpoints::vulnerabilities(gw, scope)),
            settle(SECURITY, endpoints::rbac(gw, scope)),
            settle(SECURITY, endpoints::network_policies(gw, scope)),
            settle(SECURITY, endpoints::security_trends(gw, scope, TREND_DAYS)),
        );
        let outcomes =
            [score.is_err(), vulnerabilities.is_err(), rbac.is_err(), network_policies.is_err(), trends.is_err()];
        let failed = failures(&outcomes);
        let dash = SecurityDashboard {
            score: score.ok(),
            vulnerabilities: vulnerabilities.ok(),
            rbac: rbac.ok(),
            network_policies: network_policies.ok(),
            trends: trends.unwrap_or_default(),
        };
        if failed == outcomes.len() {
            return Loaded::failed(dash, BundleError::Unavailable { bundle: SECURITY.into(), failed });
        }
        Loaded::ok(dash)
    }
}
