use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use kestrel_core::{GatewayError, ScopeKey};

use crate::{Gateway, Request};

#[derive(Debug, Clone)]
enum Reply {
    Json(serde_json::Value),
    Fail(GatewayError),
}

#[derive(Debug, Clone, Default)]
struct Route {
    any: Option<Reply>,
    scoped: HashMap<ScopeKey, Reply>,
    delay: Option<Duration>,
}

/// Scripted in-memory gateway for tests.
///
/// Routes match the full request key (`path?query`) first, then the bare path.
/// Unrouted requests fail with status 404. Every call is counted by bare path.
#[derive(Debug, Default)]
pub struct MockGateway {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockGateway {
    pub fn new() -> Self { Self::default() }

    pub fn with_json(self, key: &str, body: serde_json::Value) -> Self { self.set_json(key, body); self }

    pub fn with_scoped_json(self, scope: &str, key: &str, body: serde_json::Value) -> Self {
        self.edit(key, |r| { r.scoped.insert(ScopeKey::new(scope), Reply::Json(body)); });
        self
    }

    pub fn with_failure(self, key: &str) -> Self { self.set_failure(key); self }

    pub fn with_delay(self, key: &str, delay: Duration) -> Self {
        self.edit(key, |r| r.delay = Some(delay));
        self
    }

    pub fn set_json(&self, key: &str, body: serde_json::Value) { self.edit(key, |r| r.any = Some(Reply::Json(body))); }

    pub fn set_failure(&self, key: &str) {
        let err = GatewayError::Status { endpoint: key.to_string(), status: 503 };
        self.edit(key, |r| r.any = Some(Reply::Fail(err)));
    }

    /// Number of calls whose bare path equals `path`.
    pub fn calls(&self, path: &str) -> usize {
        self.calls.lock().map(|c| c.get(path).copied().unwrap_or(0)).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize { self.calls.lock().map(|c| c.values().sum()).unwrap_or(0) }

    fn edit(&self, key: &str, f: impl FnOnce(&mut Route)) {
        if let Ok(mut routes) = self.routes.lock() { f(routes.entry(key.to_string()).or_default()); }
    }

    fn lookup(&self, scope: &ScopeKey, req: &Request) -> (Option<Reply>, Option<Duration>) {
        let Ok(routes) = self.routes.lock() else { return (None, None) };
        let route = routes.get(&req.key()).or_else(|| routes.get(req.path));
        match route {
            Some(r) => (r.scoped.get(scope).cloned().or_else(|| r.any.clone()), r.delay),
            None => (None, None),
        }
    }
}

#[async_trait::async_trait]
impl Gateway for MockGateway {
    async fn get_json(&self, scope: &ScopeKey, req: &Request) -> Result<serde_json::Value, GatewayError> {
        if let Ok(mut calls) = self.calls.lock() { *calls.entry(req.path.to_string()).or_default() += 1; }
        let (reply, delay) = self.lookup(scope, req);
        if let Some(d) = delay { tokio::time::sleep(d).await; }
        match reply {
            Some(Reply::Json(v)) => Ok(v),
            Some(Reply::Fail(e)) => Err(e),
            None => Err(GatewayError::Status { endpoint: req.key(), status: 404 }),
        }
    }
}
