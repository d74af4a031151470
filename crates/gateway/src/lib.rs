//! Kestrel gateway: REST access to the dashboard backend.
//!
//! Callers depend on the [`Gateway`] trait; [`HttpGateway`] talks to a live
//! backend and [`MockGateway`] replays scripted responses in tests.

#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use kestrel_core::{GatewayError, ScopeKey};
use metrics::{counter, histogram};
use tracing::{debug, warn};
use url::Url;

pub mod endpoints;
mod mock;

pub use mock::MockGateway;

/// Query parameter carrying the active cluster.
pub const CLUSTER_PARAM: &str = "cluster";

/// One GET against the backend: path plus ordered query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub path: &'static str,
    pub query: Vec<(&'static str, String)>,
}

impl Request {
    pub fn get(path: &'static str) -> Self { Self { path, query: Vec::new() } }

    pub fn param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }

    /// `path?k=v&..` in insertion order; used for logs and mock routing.
    pub fn key(&self) -> String {
        if self.query.is_empty() { return self.path.to_string(); }
        let q: Vec<String> = self.query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}?{}", self.path, q.join("&"))
    }
}

/// Backend access seam. Implementations must report every failure as a value.
#[async_trait::async_trait]
pub trait Gateway: Send + Sync {
    async fn get_json(&self, scope: &ScopeKey, req: &Request) -> Result<serde_json::Value, GatewayError>;
}

/// reqwest-backed gateway.
pub struct HttpGateway {
    client: reqwest::Client,
    base: Url,
    default_scope: String,
}

impl HttpGateway {
    pub fn new(base: Url, timeout: Duration, default_scope: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport { endpoint: base.to_string(), message: e.to_string() })?;
        Ok(Self { client, base, default_scope: default_scope.into() })
    }

    pub fn base(&self) -> &Url { &self.base }

    fn url_for(&self, scope: &ScopeKey, req: &Request) -> Result<Url, GatewayError> {
        let mut url = self.base.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| GatewayError::Transport { endpoint: req.key(), message: format!("base url {} cannot carry a path", self.base) })?
            .pop_if_empty()
            .extend(req.path.trim_start_matches('/').split('/'));
        {
            let mut q = url.query_pairs_mut();
            for (k, v) in &req.query { q.append_pair(k, v); }
            if scope.as_str() != self.default_scope { q.append_pair(CLUSTER_PARAM, scope.as_str()); }
        }
        if url.query() == Some("") { url.set_query(None); }
        Ok(url)
    }
}

#[async_trait::async_trait]
impl Gateway for HttpGateway {
    async fn get_json(&self, scope: &ScopeKey, req: &Request) -> Result<serde_json::Value, GatewayError> {
        let t0 = Instant::now();
        let endpoint = req.key();
        match self.fetch(scope, req, &endpoint).await {
            Ok(body) => {
                histogram!("gateway_request_ms", t0.elapsed().as_secs_f64() * 1000.0);
                debug!(endpoint = %endpoint, scope = %scope, took_ms = %t0.elapsed().as_millis(), "gateway: ok");
                Ok(body)
            }
            Err(e) => {
                warn!(endpoint = %endpoint, scope = %scope, error = %e, "gateway: request failed");
                counter!("gateway_errors_total", 1);
                Err(e)
            }
        }
    }
}

impl HttpGateway {
    async fn fetch(&self, scope: &ScopeKey, req: &Request, endpoint: &str) -> Result<serde_json::Value, GatewayError> {
        let url = self.url_for(scope, req)?;
        let res = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout { endpoint: endpoint.to_string() }
            } else {
                GatewayError::Transport { endpoint: endpoint.to_string(), message: e.to_string() }
            }
        })?;
        let status = res.status();
        if !status.is_success() {
            return Err(GatewayError::Status { endpoint: endpoint.to_string(), status: status.as_u16() });
        }
        res.json::<serde_json::Value>()
            .await
            .map_err(|e| GatewayError::Decode { endpoint: endpoint.to_string(), message: e.to_string() })
    }
}

/// WebSocket base for an HTTP base (`http` → `ws`, `https` → `wss`).
pub fn ws_base(http: &Url) -> Url {
    let mut ws = http.clone();
    let scheme = if http.scheme() == "https" { "wss" } else { "ws" };
    // http(s) -> ws(s) is an allowed special-scheme swap
    let _ = ws.set_scheme(scheme);
    ws
}
