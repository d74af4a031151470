//! Bundle definitions: one loader per dashboard page.

mod helm;
mod overview;
mod security;

pub use helm::{HelmLoader, HelmReleases, HELM_RELEASES};
pub use overview::{ClusterOverview, OverviewLoader, OVERVIEW};
pub use security::{SecurityDashboard, SecurityLoader, SECURITY};

/// Invalidation family of a bundle name: the segment before the first `-`.
pub fn family(name: &str) -> &str { name.split('-').next().unwrap_or(name) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_is_leading_segment() {
        assert_eq!(family(SECURITY), "security");
        assert_eq!(family(OVERVIEW), "cluster");
        assert_eq!(family("plain"), "plain");
    }
}
