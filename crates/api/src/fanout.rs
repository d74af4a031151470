use std::future::Future;

use kestrel_core::GatewayError;
use metrics::counter;
use tracing::warn;

/// Await one sub-fetch and log its failure. The caller maps `Err` to the
/// field default; nothing here propagates past the bundle boundary.
pub(crate) async fn settle<T, F>(bundle: &'static str, fut: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    let res = fut.await;
    if let Err(e) = &res {
        warn!(bundle, endpoint = %e.endpoint(), error = %e, "sub-fetch failed; field defaulted");
        counter!("fetch_failures_total", 1, "bundle" => bundle);
    }
    res
}

/// Number of failed results among `outcomes`.
pub(crate) fn failures(outcomes: &[bool]) -> usize { outcomes.iter().filter(|failed| **failed).count() }
