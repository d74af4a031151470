use std::sync::Arc;
use std::time::Duration;

use kestrel_core::{
    assemble_insights, synthesize_series, BundleError, ClusterEvent, ClusterHealth, ClusterMetrics, Insights,
    MetricHistory, MetricPoint, NamespaceSummary, ScopeKey, SecurityPosture,
};
use kestrel_gateway::endpoints::{self, RangeMetric};
use kestrel_gateway::Gateway;
use kestrel_store::{CachePolicy, Loaded, Loader};
use serde::Serialize;
use tracing::debug;

use crate::fanout::{failures, settle};

pub const OVERVIEW: &str = "cluster-overview";
const EVENT_LIMIT: usize = 50;

/// Everything the cluster overview page shows, fetched in one fan-out.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterOverview {
    pub cluster_health: Option<ClusterHealth>,
    pub namespaces: Vec<NamespaceSummary>,
    pub events: Vec<ClusterEvent>,
    pub metrics: Option<ClusterMetrics>,
    pub cpu_history: MetricHistory,
    pub memory_history: MetricHistory,
    pub security_posture: Option<SecurityPosture>,
    pub insights: Insights,
}

pub struct OverviewLoader {
    gateway: Arc<dyn Gateway>,
}

impl OverviewLoader {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self { Self { gateway } }
}

/// Check the time-series stack, then query CPU and memory in parallel.
/// Any failure along the way reads as "no live history".
async fn live_history(gw: &dyn Gateway, scope: &ScopeKey) -> (Vec<MetricPoint>, Vec<MetricPoint>) {
    match settle(OVERVIEW, endpoints::stack_status(gw, scope)).await {
        Ok(status) if status.available => {}
        Ok(_) => {
            debug!(scope = %scope, "overview: time-series stack not available");
            return (Vec::new(), Vec::new());
        }
        Err(_) => return (Vec::new(), Vec::new()),
    }
    let (cpu, mem) = tokio::join!(
        settle(OVERVIEW, endpoints::query_range(gw, scope, RangeMetric::Cpu)),
        settle(OVERVIEW, endpoints::query_range(gw, scope, RangeMetric::Memory)),
    );
    (cpu.unwrap_or_default(), mem.unwrap_or_default())
}

/// Live series are kept together once either has data; synthesis covers
/// both only when neither query returned points.
fn histories(cpu: Vec<MetricPoint>, mem: Vec<MetricPoint>, metrics: Option<ClusterMetrics>) -> (MetricHistory, MetricHistory) {
    if cpu.is_empty() && mem.is_empty() {
        let cpu = synthesize_series(metrics.and_then(|m| m.cpu_percent));
        let mem = synthesize_series(metrics.and_then(|m| m.memory_percent));
        return (MetricHistory::Synthetic(cpu), MetricHistory::Synthetic(mem));
    }
    (MetricHistory::Live(cpu), MetricHistory::Live(mem))
}

#[async_trait::async_trait]
impl Loader for OverviewLoader {
    type Value = ClusterOverview;

    fn name(&self) -> &'static str { OVERVIEW }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Duration::from_secs(15), Duration::from_secs(300)).refresh_every(Duration::from_secs(30))
    }

    async fn load(&self, scope: &ScopeKey) -> Loaded<ClusterOverview> {
        let gw = self.gateway.as_ref();
        let (health, namespaces, events, metrics, (cpu_live, mem_live), recs, posture) = tokio::join!(
            settle(OVERVIEW, endpoints::cluster_health(gw, scope)),
            settle(OVERVIEW, endpoints::namespaces(gw, scope)),
            settle(OVERVIEW, endpoints::events(gw, scope, EVENT_LIMIT)),
            settle(OVERVIEW, endpoints::cluster_metrics(gw, scope)),
            live_history(gw, scope),
            settle(OVERVIEW, endpoints::recommendations(gw, scope)),
            settle(OVERVIEW, endpoints::security_posture(gw, scope)),
        );
        let outcomes = [
            health.is_err(),
            namespaces.is_err(),
            events.is_err(),
            metrics.is_err(),
            recs.is_err(),
            posture.is_err(),
        ];
        let failed = failures(&outcomes);

        let metrics = metrics.ok();
        let (cpu_history, memory_history) = histories(cpu_live, mem_live, metrics);
        let recs = recs.unwrap_or_default();
        let posture = posture.ok();
        let issues = posture.as_ref().map(|p| p.issues.as_slice()).unwrap_or(&[]);
        let insights = assemble_insights(&recs, issues);

        let overview = ClusterOverview {
            cluster_health: health.ok(),
            namespaces: namespaces.unwrap_or_default(),
            events: events.unwrap_or_default(),
            metrics,
            cpu_history,
            memory_history,
            security_posture: posture,
            insights,
        };
        if failed == outcomes.len() {
            return Loaded::failed(overview, BundleError::Unavailable { bundle: OVERVIEW.into(), failed });
        }
        debug!(scope = %scope, failed, "overview: assembled");
        Loaded::ok(overview)
    }
}
