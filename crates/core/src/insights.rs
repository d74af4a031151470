//! Uniform insight cards assembled from optimizer and security findings.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{Recommendation, SecurityIssue};

const MAX_OPTIMIZATION: usize = 3;
const MAX_SECURITY: usize = 2;
/// Padding target; the generic pool never pushes past it.
const MIN_INSIGHTS: usize = 3;
const MAX_INSIGHTS: usize = 5;

pub type Insights = SmallVec<[Insight; MAX_INSIGHTS]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    Medium,
    Low,
}

impl Impact {
    /// Map a free-form priority or severity label.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" | "high" | "urgent" => Impact::High,
            "medium" | "moderate" | "warning" => Impact::Medium,
            _ => Impact::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSource {
    Optimization,
    Security,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    pub description: String,
    pub category: String,
    pub impact: Impact,
    pub source: InsightSource,
}

fn generic_pool() -> [Insight; 2] {
    [
        Insight {
            title: "Set resource requests and limits".into(),
            description: "Workloads without CPU and memory requests make scheduling and autoscaling unpredictable.".into(),
            category: "best-practice".into(),
            impact: Impact::Medium,
            source: InsightSource::Ai,
        },
        Insight {
            title: "Add liveness and readiness probes".into(),
            description: "Probes let the kubelet restart hung containers and keep unready pods out of service endpoints.".into(),
            category: "reliability".into(),
            impact: Impact::Low,
            source: InsightSource::Ai,
        },
    ]
}

fn from_recommendation(r: &Recommendation) -> Insight {
    let category = if r.category.is_empty() { "optimization".to_string() } else { r.category.clone() };
    Insight {
        title: r.title.clone(),
        description: r.description.clone(),
        category,
        impact: Impact::from_label(&r.priority),
        source: InsightSource::Optimization,
    }
}

fn from_security_issue(i: &SecurityIssue) -> Insight {
    let description = match &i.resource {
        Some(res) if !res.is_empty() => format!("{} ({})", i.description, res),
        _ => i.description.clone(),
    };
    Insight {
        title: i.title.clone(),
        description,
        category: "security".into(),
        impact: Impact::from_label(&i.severity),
        source: InsightSource::Security,
    }
}

/// Build the insight list shown on the overview.
///
/// Takes the first three recommendations and the two most severe security
/// issues, pads from the generic pool toward three entries and caps the list
/// at five. Pure function of its inputs.
pub fn assemble_insights(recommendations: &[Recommendation], issues: &[SecurityIssue]) -> Insights {
    let mut out: Insights = recommendations.iter().take(MAX_OPTIMIZATION).map(from_recommendation).collect();

    let mut ranked: Vec<&SecurityIssue> = issues.iter().collect();
    ranked.sort_by_key(|i| Impact::from_label(&i.severity));
    out.extend(ranked.into_iter().take(MAX_SECURITY).map(from_security_issue));

    if out.len() < MIN_INSIGHTS {
        let missing = MIN_INSIGHTS - out.len();
        out.extend(generic_pool().into_iter().take(missing));
    }
    out.truncate(MAX_INSIGHTS);
    out
}
