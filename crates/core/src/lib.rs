//! Kestrel core types shared by the gateway, cache and bundle crates.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod insights;
pub mod synth;

pub use error::{BundleError, GatewayError};
pub use insights::{assemble_insights, Impact, Insight, InsightSource, Insights};
pub use synth::{synthesize_series, SYNTHETIC_OFFSETS};

pub mod prelude {
    pub use super::{
        BundleError, ClusterEvent, ClusterHealth, ClusterMetrics, GatewayError, HelmRelease, Insight,
        MetricHistory, MetricPoint, NamespaceSummary, Recommendation, ScopeKey, SecurityPosture,
    };
}

/// Sentinel scope used when no cluster is selected.
pub const DEFAULT_SCOPE: &str = "default";

/// Cache partition key: the active cluster identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn new(s: impl Into<String>) -> Self { Self(s.into()) }

    /// Scope for an optional cluster selection, falling back to `sentinel`.
    /// Blank selections count as no selection.
    pub fn for_cluster(cluster: Option<&str>, sentinel: &str) -> Self {
        match cluster.map(str::trim) {
            Some(c) if !c.is_empty() => Self(c.to_string()),
            _ => Self(sentinel.to_string()),
        }
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl Default for ScopeKey {
    fn default() -> Self { Self(DEFAULT_SCOPE.to_string()) }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for ScopeKey {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

// ---- backend shapes ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClusterHealth {
    pub status: String,
    pub healthy: bool,
    pub node_count: u32,
    pub ready_nodes: u32,
    pub pod_count: u32,
    pub running_pods: u32,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NamespaceSummary {
    pub name: String,
    pub status: String,
    pub pod_count: u32,
    pub running_pods: u32,
    pub service_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClusterEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
    pub message: String,
    pub namespace: Option<String>,
    pub object: Option<String>,
    pub count: u32,
    pub last_timestamp: Option<String>,
}

/// Scalar utilization sample, both values in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClusterMetrics {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
}

/// Reachability of the time-series stack behind range queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StackStatus {
    pub available: bool,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: i64,
    pub value: f64,
}

/// CPU or memory history. Synthetic series carry no timestamps on purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "points", rename_all = "snake_case")]
pub enum MetricHistory {
    Live(Vec<MetricPoint>),
    Synthetic(Vec<f64>),
}

impl MetricHistory {
    pub fn len(&self) -> usize {
        match self { MetricHistory::Live(p) => p.len(), MetricHistory::Synthetic(v) => v.len() }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn is_synthetic(&self) -> bool { matches!(self, MetricHistory::Synthetic(_)) }

    /// Values without timestamps, for sparklines.
    pub fn values(&self) -> Vec<f64> {
        match self {
            MetricHistory::Live(p) => p.iter().map(|p| p.value).collect(),
            MetricHistory::Synthetic(v) => v.clone(),
        }
    }
}

impl Default for MetricHistory {
    fn default() -> Self { MetricHistory::Synthetic(Vec::new()) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    pub category: String,
    /// Free-form priority from the optimizer (`high`, `critical`, `low`, ...).
    pub priority: String,
    pub estimated_savings: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecurityIssue {
    pub title: String,
    pub description: String,
    pub severity: String,
    pub resource: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecurityPosture {
    pub score: u32,
    pub grade: String,
    pub issues: Vec<SecurityIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecurityScore {
    pub score: u32,
    pub grade: String,
    pub last_scan: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VulnerabilitySummary {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl VulnerabilitySummary {
    pub fn total(&self) -> u32 { self.critical + self.high + self.medium + self.low }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RbacSummary {
    pub total_roles: u32,
    pub cluster_admin_bindings: u32,
    pub risky_roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NetworkPolicySummary {
    pub total_policies: u32,
    pub namespaces_without_policy: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecurityTrendPoint {
    pub date: String,
    pub score: u32,
    pub vulnerabilities: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HelmRelease {
    pub name: String,
    pub namespace: String,
    pub chart: String,
    pub chart_version: String,
    pub app_version: Option<String>,
    pub status: String,
    pub revision: u32,
    pub updated: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_falls_back_to_sentinel() {
        assert_eq!(ScopeKey::for_cluster(None, DEFAULT_SCOPE).as_str(), "default");
        assert_eq!(ScopeKey::for_cluster(Some("  "), "none").as_str(), "none");
        assert_eq!(ScopeKey::for_cluster(Some("prod-eu"), DEFAULT_SCOPE).as_str(), "prod-eu");
    }

    #[test]
    fn backend_shapes_tolerate_missing_fields() {
        let h: ClusterHealth = serde_json::from_value(serde_json::json!({"status": "healthy"})).expect("decode");
        assert_eq!(h.status, "healthy");
        assert_eq!(h.node_count, 0);
        let e: ClusterEvent = serde_json::from_value(serde_json::json!({"type": "Warning", "reason": "BackOff"})).expect("decode");
        assert_eq!(e.kind, "Warning");
    }

    #[test]
    fn history_kind_is_visible_on_the_wire() {
        let v = serde_json::to_value(MetricHistory::Synthetic(vec![1.0])).expect("encode");
        assert_eq!(v["kind"], "synthetic");
        assert!(MetricHistory::default().is_empty());
    }
}
