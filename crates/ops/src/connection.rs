//! Log connection state machine.
//!
//! `disconnected -> connecting -> connected -> {disconnected | error}`. Every
//! `connect()` tears down the previous transport first, and frames from a
//! superseded transport are discarded by generation.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::buffer::LogBuffer;
use crate::message::{Incoming, StreamMessage};
use crate::transport::{CancelHandle, Connector, Frame, StreamHandle};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("namespace and pod are required (got namespace={namespace:?} pod={pod:?})")]
    MissingTarget { namespace: String, pod: String },
    #[error("base url {0} cannot carry a path")]
    BaseUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Which pod/container to stream, and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStreamParams {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
    pub tail_lines: Option<u32>,
    pub timestamps: Option<bool>,
}

impl LogStreamParams {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), pod: pod.into(), ..Default::default() }
    }

    pub fn container(mut self, container: impl Into<String>) -> Self { self.container = Some(container.into()); self }
    pub fn tail_lines(mut self, n: u32) -> Self { self.tail_lines = Some(n); self }
    pub fn timestamps(mut self, on: bool) -> Self { self.timestamps = Some(on); self }

    pub fn is_valid(&self) -> bool { !self.namespace.trim().is_empty() && !self.pod.trim().is_empty() }

    /// `{base}/api/pods/{namespace}/{pod}/logs/stream`, with `container`,
    /// `tailLines` and `timestamps` appended only when set.
    pub fn url(&self, base: &Url) -> Result<Url, ConnectError> {
        if !self.is_valid() {
            return Err(ConnectError::MissingTarget { namespace: self.namespace.clone(), pod: self.pod.clone() });
        }
        let mut url = base.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| ConnectError::BaseUrl(base.to_string()))?
            .pop_if_empty()
            .extend(["api", "pods", self.namespace.as_str(), self.pod.as_str(), "logs", "stream"]);
        {
            let mut q = url.query_pairs_mut();
            if let Some(c) = &self.container { q.append_pair("container", c); }
            if let Some(n) = self.tail_lines { q.append_pair("tailLines", &n.to_string()); }
            if let Some(t) = self.timestamps { q.append_pair("timestamps", if t { "true" } else { "false" }); }
        }
        if url.query() == Some("") { url.set_query(None); }
        Ok(url)
    }
}

struct Live {
    cancel: CancelHandle,
    driver: AbortHandle,
    opened: bool,
}

struct State {
    params: LogStreamParams,
    enabled: bool,
    status: ConnectionStatus,
    stream_status: Option<String>,
    last_error: Option<String>,
    buffer: LogBuffer,
    generation: u64,
    live: Option<Live>,
}

struct Inner {
    id: Uuid,
    connector: Arc<dyn Connector>,
    base: Url,
    state: Mutex<State>,
    version: watch::Sender<u64>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(|p| p.into_inner()) }

    fn bump(&self) { self.version.send_modify(|v| *v = v.wrapping_add(1)); }

    /// Closes the current transport, if any. Later frames from it are ignored.
    fn teardown(&self, st: &mut State) {
        st.generation = st.generation.wrapping_add(1);
        if let Some(live) = st.live.take() {
            live.driver.abort();
            live.cancel.cancel();
            if live.opened { metrics::decrement_gauge!("log_connections_open", 1.0); }
            debug!(conn = %self.id, "logs: transport closed");
        }
    }

    /// Applies one frame. Returns false once the transport is finished or superseded.
    fn apply(&self, generation: u64, frame: Frame) -> bool {
        let mut st = self.lock();
        if st.generation != generation { return false; }
        let keep_going = match frame {
            Frame::Opened => {
                st.status = ConnectionStatus::Connected;
                st.last_error = None;
                if let Some(live) = st.live.as_mut() {
                    live.opened = true;
                    metrics::increment_gauge!("log_connections_open", 1.0);
                }
                info!(conn = %self.id, ns = %st.params.namespace, pod = %st.params.pod, "logs: connected");
                true
            }
            Frame::Text(text) => {
                match Incoming::parse(&text) {
                    Incoming::Message(StreamMessage::Log { content }) => push_line(&mut st.buffer, content),
                    Incoming::Message(StreamMessage::Status { status }) => st.stream_status = Some(status),
                    Incoming::Message(StreamMessage::Error { message }) => {
                        warn!(conn = %self.id, error = %message, "logs: server reported error");
                        st.status = ConnectionStatus::Error;
                        st.last_error = Some(message);
                    }
                    Incoming::Message(StreamMessage::Pong) => {}
                    Incoming::Raw(line) => push_line(&mut st.buffer, line),
                }
                true
            }
            Frame::Closed { code } => {
                info!(conn = %self.id, code = ?code, "logs: stream closed");
                self.teardown(&mut st);
                st.status = ConnectionStatus::Disconnected;
                false
            }
            Frame::Failed(message) => {
                warn!(conn = %self.id, error = %message, "logs: transport failed");
                self.teardown(&mut st);
                st.status = ConnectionStatus::Error;
                st.last_error = Some(message);
                false
            }
        };
        drop(st);
        self.bump();
        keep_going
    }

    /// Transport channel ended without a terminal frame.
    fn ended(&self, generation: u64) {
        let mut st = self.lock();
        if st.generation != generation { return; }
        self.teardown(&mut st);
        if st.status != ConnectionStatus::Error { st.status = ConnectionStatus::Disconnected; }
        drop(st);
        self.bump();
    }
}

fn push_line(buffer: &mut LogBuffer, line: String) {
    buffer.push(line);
    metrics::counter!("log_lines_total", 1);
}

async fn drive(inner: Arc<Inner>, generation: u64, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if !inner.apply(generation, frame) { return; }
    }
    inner.ended(generation);
}

/// Streaming log tail for one pod. Dropping it closes the transport.
pub struct LogConnection {
    inner: Arc<Inner>,
}

impl LogConnection {
    /// `base` is the WebSocket base (`ws://` or `wss://`) of the backend.
    pub fn new(connector: Arc<dyn Connector>, base: Url, buffer_cap: usize) -> Self {
        let state = State {
            params: LogStreamParams::default(),
            enabled: false,
            status: ConnectionStatus::Disconnected,
            stream_status: None,
            last_error: None,
            buffer: LogBuffer::with_cap(buffer_cap),
            generation: 0,
            live: None,
        };
        let (version, _) = watch::channel(0);
        Self { inner: Arc::new(Inner { id: Uuid::new_v4(), connector, base, state: Mutex::new(state), version }) }
    }

    pub fn id(&self) -> Uuid { self.inner.id }

    /// Open a fresh transport for the current parameters, closing any existing one.
    pub fn connect(&self) -> Result<(), ConnectError> {
        let mut st = self.inner.lock();
        let res = self.connect_locked(&mut st);
        drop(st);
        self.inner.bump();
        res
    }

    fn connect_locked(&self, st: &mut State) -> Result<(), ConnectError> {
        self.inner.teardown(st);
        let url = match st.params.url(&self.inner.base) {
            Ok(url) => url,
            Err(e) => {
                st.status = ConnectionStatus::Error;
                st.last_error = Some(e.to_string());
                return Err(e);
            }
        };
        st.status = ConnectionStatus::Connecting;
        info!(conn = %self.inner.id, url = %url, "logs: connecting");
        let StreamHandle { rx, cancel } = self.inner.connector.open(url);
        let driver = tokio::spawn(drive(Arc::clone(&self.inner), st.generation, rx)).abort_handle();
        st.live = Some(Live { cancel, driver, opened: false });
        Ok(())
    }

    /// Close the transport. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut st = self.inner.lock();
        self.inner.teardown(&mut st);
        st.status = ConnectionStatus::Disconnected;
        drop(st);
        self.inner.bump();
    }

    /// Empties the buffer; the connection is untouched.
    pub fn clear_logs(&self) {
        self.inner.lock().buffer.clear();
        self.inner.bump();
    }

    /// Enabling connects when the target is valid; disabling disconnects.
    pub fn set_enabled(&self, enabled: bool) {
        let mut st = self.inner.lock();
        let was = std::mem::replace(&mut st.enabled, enabled);
        if enabled && (!was || st.live.is_none()) && st.params.is_valid() {
            let _ = self.connect_locked(&mut st);
        } else if !enabled && was {
            self.inner.teardown(&mut st);
            st.status = ConnectionStatus::Disconnected;
        }
        drop(st);
        self.inner.bump();
    }

    /// Replace the target. A changed target reconnects when enabled.
    pub fn set_params(&self, params: LogStreamParams) {
        let mut st = self.inner.lock();
        if st.params == params { return; }
        st.params = params;
        st.stream_status = None;
        if st.enabled && st.params.is_valid() {
            let _ = self.connect_locked(&mut st);
        } else {
            self.inner.teardown(&mut st);
            st.status = ConnectionStatus::Disconnected;
        }
        drop(st);
        self.inner.bump();
    }

    pub fn params(&self) -> LogStreamParams { self.inner.lock().params.clone() }
    pub fn status(&self) -> ConnectionStatus { self.inner.lock().status }
    /// Last `status` message from the server.
    pub fn stream_status(&self) -> Option<String> { self.inner.lock().stream_status.clone() }
    pub fn last_error(&self) -> Option<String> { self.inner.lock().last_error.clone() }
    pub fn is_connected(&self) -> bool { self.status() == ConnectionStatus::Connected }

    pub fn lines(&self) -> Vec<String> { self.inner.lock().buffer.to_vec() }
    pub fn line_count(&self) -> usize { self.inner.lock().buffer.len() }
    /// Hands buffered lines to the caller, leaving the buffer empty.
    pub fn take_lines(&self) -> Vec<String> { self.inner.lock().buffer.drain() }
    pub fn export(&self) -> String { self.inner.lock().buffer.export() }
    pub fn filter(&self, needle: &str) -> Vec<String> {
        self.inner.lock().buffer.filter(needle).into_iter().map(str::to_string).collect()
    }

    /// Ticks on every state or buffer change.
    pub fn watch(&self) -> watch::Receiver<u64> { self.inner.version.subscribe() }
}

impl Drop for LogConnection {
    fn drop(&mut self) {
        let mut st = self.inner.lock();
        self.inner.teardown(&mut st);
        st.status = ConnectionStatus::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_only_set_params() {
        let base = Url::parse("ws://kestrel.local:8000").unwrap();
        let p = LogStreamParams::new("prod", "api-7f9c");
        assert_eq!(p.url(&base).unwrap().as_str(), "ws://kestrel.local:8000/api/pods/prod/api-7f9c/logs/stream");

        let p = p.container("app").tail_lines(200).timestamps(true);
        assert_eq!(
            p.url(&base).unwrap().as_str(),
            "ws://kestrel.local:8000/api/pods/prod/api-7f9c/logs/stream?container=app&tailLines=200&timestamps=true"
        );
    }

    #[test]
    fn url_respects_base_path() {
        let base = Url::parse("wss://gw.example.com/kestrel/").unwrap();
        let url = LogStreamParams::new("ns", "p").url(&base).unwrap();
        assert_eq!(url.as_str(), "wss://gw.example.com/kestrel/api/pods/ns/p/logs/stream");
    }

    #[test]
    fn blank_target_is_invalid() {
        let base = Url::parse("ws://localhost").unwrap();
        assert!(!LogStreamParams::new(" ", "pod").is_valid());
        assert!(matches!(LogStreamParams::new("ns", "").url(&base), Err(ConnectError::MissingTarget { .. })));
    }
}
