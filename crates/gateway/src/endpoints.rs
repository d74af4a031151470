//! Typed endpoint helpers. Each call decodes one backend payload.

use kestrel_core::{
    ClusterEvent, ClusterHealth, ClusterMetrics, GatewayError, HelmRelease, MetricPoint, NamespaceSummary,
    NetworkPolicySummary, RbacSummary, Recommendation, ScopeKey, SecurityPosture, SecurityScore,
    SecurityTrendPoint, StackStatus, VulnerabilitySummary,
};
use serde::de::DeserializeOwned;

use crate::{Gateway, Request};

pub const CLUSTER_HEALTH: &str = "/api/cluster/health";
pub const NAMESPACES: &str = "/api/namespaces";
pub const EVENTS: &str = "/api/events";
pub const CLUSTER_METRICS: &str = "/api/metrics/cluster";
pub const STACK_STATUS: &str = "/api/observability/status";
pub const QUERY_RANGE: &str = "/api/observability/query_range";
pub const RECOMMENDATIONS: &str = "/api/optimization/recommendations";
pub const SECURITY_POSTURE: &str = "/api/security/posture";
pub const SECURITY_SCORE: &str = "/api/security/score";
pub const VULNERABILITIES: &str = "/api/security/vulnerabilities/summary";
pub const RBAC: &str = "/api/security/rbac";
pub const NETWORK_POLICIES: &str = "/api/security/network-policies";
pub const SECURITY_TRENDS: &str = "/api/security/trends";
pub const HELM_RELEASES: &str = "/api/helm/releases";

/// Metric addressed by a range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMetric {
    Cpu,
    Memory,
}

impl RangeMetric {
    pub fn as_str(&self) -> &'static str {
        match self { RangeMetric::Cpu => "cpu", RangeMetric::Memory => "memory" }
    }
}

fn decode<T: DeserializeOwned>(req: &Request, v: serde_json::Value) -> Result<T, GatewayError> {
    serde_json::from_value(v).map_err(|e| GatewayError::Decode { endpoint: req.key(), message: e.to_string() })
}

/// Accept either a bare array or an object wrapping it under `field`.
fn decode_list<T: DeserializeOwned>(req: &Request, mut v: serde_json::Value, field: &str) -> Result<Vec<T>, GatewayError> {
    if let Some(inner) = v.get_mut(field) { v = inner.take(); }
    decode(req, v)
}

async fn fetch<T: DeserializeOwned>(gw: &dyn Gateway, scope: &ScopeKey, req: Request) -> Result<T, GatewayError> {
    let v = gw.get_json(scope, &req).await?;
    decode(&req, v)
}

async fn fetch_list<T: DeserializeOwned>(gw: &dyn Gateway, scope: &ScopeKey, req: Request, field: &str) -> Result<Vec<T>, GatewayError> {
    let v = gw.get_json(scope, &req).await?;
    decode_list(&req, v, field)
}

pub async fn cluster_health(gw: &dyn Gateway, scope: &ScopeKey) -> Result<ClusterHealth, GatewayError> {
    fetch(gw, scope, Request::get(CLUSTER_HEALTH)).await
}

pub async fn namespaces(gw: &dyn Gateway, scope: &ScopeKey) -> Result<Vec<NamespaceSummary>, GatewayError> {
    fetch_list(gw, scope, Request::get(NAMESPACES).param("detailed", "true"), "namespaces").await
}

pub async fn events(gw: &dyn Gateway, scope: &ScopeKey, limit: usize) -> Result<Vec<ClusterEvent>, GatewayError> {
    fetch_list(gw, scope, Request::get(EVENTS).param("limit", limit.to_string()), "events").await
}

pub async fn cluster_metrics(gw: &dyn Gateway, scope: &ScopeKey) -> Result<ClusterMetrics, GatewayError> {
    fetch(gw, scope, Request::get(CLUSTER_METRICS)).await
}

pub async fn stack_status(gw: &dyn Gateway, scope: &ScopeKey) -> Result<StackStatus, GatewayError> {
    fetch(gw, scope, Request::get(STACK_STATUS)).await
}

pub async fn query_range(gw: &dyn Gateway, scope: &ScopeKey, metric: RangeMetric) -> Result<Vec<MetricPoint>, GatewayError> {
    let req = Request::get(QUERY_RANGE).param("metric", metric.as_str()).param("range", "1h").param("step", "4m");
    fetch_list(gw, scope, req, "points").await
}

pub async fn recommendations(gw: &dyn Gateway, scope: &ScopeKey) -> Result<Vec<Recommendation>, GatewayError> {
    fetch_list(gw, scope, Request::get(RECOMMENDATIONS), "recommendations").await
}

pub async fn security_posture(gw: &dyn Gateway, scope: &ScopeKey) -> Result<SecurityPosture, GatewayError> {
    fetch(gw, scope, Request::get(SECURITY_POSTURE)).await
}

pub async fn security_score(gw: &dyn Gateway, scope: &ScopeKey) -> Result<SecurityScore, GatewayError> {
    fetch(gw, scope, Request::get(SECURITY_SCORE)).await
}

pub async fn vulnerabilities(gw: &dyn Gateway, scope: &ScopeKey) -> Result<VulnerabilitySummary, GatewayError> {
    fetch(gw, scope, Request::get(VULNERABILITIES)).await
}

pub async fn rbac(gw: &dyn Gateway, scope: &ScopeKey) -> Result<RbacSummary, GatewayError> {
    fetch(gw, scope, Request::get(RBAC)).await
}

pub async fn network_policies(gw: &dyn Gateway, scope: &ScopeKey) -> Result<NetworkPolicySummary, GatewayError> {
    fetch(gw, scope, Request::get(NETWORK_POLICIES)).await
}

pub async fn security_trends(gw: &dyn Gateway, scope: &ScopeKey, days: u32) -> Result<Vec<SecurityTrendPoint>, GatewayError> {
    fetch_list(gw, scope, Request::get(SECURITY_TRENDS).param("days", days.to_string()), "trends").await
}

pub async fn helm_releases(gw: &dyn Gateway, scope: &ScopeKey) -> Result<Vec<HelmRelease>, GatewayError> {
    fetch_list(gw, scope, Request::get(HELM_RELEASES), "releases").await
}
