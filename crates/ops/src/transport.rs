//! Transport seam. A [`Connector`] turns a URL into a stream of [`Frame`]s;
//! [`WsConnector`] is the WebSocket implementation.

use std::fmt::Display;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::message::PING;

/// What a transport reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Opened,
    Text(String),
    /// Peer closed, or the stream ended without a close frame (`code: None`).
    Closed { code: Option<u16> },
    Failed(String),
}

/// Cancellation handle for an in-flight transport.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.tx.take() { let _ = tx.send(()); }
    }
}

/// Result of starting a streaming operation.
pub struct StreamHandle<T> {
    pub rx: mpsc::Receiver<T>,
    pub cancel: CancelHandle,
}

pub trait Connector: Send + Sync + 'static {
    /// Start a transport for `url` in the background. The first frame is
    /// `Opened` or `Failed`; after `Closed` or `Failed` nothing follows.
    fn open(&self, url: Url) -> StreamHandle<Frame>;
}

const FRAME_QUEUE: usize = 1024;

pub struct WsConnector {
    ping_every: Duration,
}

impl WsConnector {
    /// Intervals below one second are raised to one second.
    pub fn new(ping_every: Duration) -> Self { Self { ping_every: ping_every.max(Duration::from_secs(1)) } }
}

impl Connector for WsConnector {
    fn open(&self, url: Url) -> StreamHandle<Frame> {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let (cancel, mut cancel_rx) = CancelHandle::new();
        let ping_every = self.ping_every;
        tokio::spawn(async move {
            let ws = tokio::select! {
                _ = &mut cancel_rx => { debug!(url = %url, "ws: cancelled before open"); return; }
                res = tokio_tungstenite::connect_async(url.as_str()) => match res {
                    Ok((ws, _)) => ws,
                    Err(e) => {
                        warn!(url = %url, error = %e, "ws: connect failed");
                        let _ = tx.send(Frame::Failed(e.to_string())).await;
                        return;
                    }
                }
            };
            if tx.send(Frame::Opened).await.is_err() { return; }
            info!(url = %url, "ws: connected");
            let (sink, stream) = ws.split();
            pump_messages(stream, sink, tx, cancel_rx, ping_every).await;
        });
        StreamHandle { rx, cancel }
    }
}

/// Forward WebSocket messages as frames until the peer closes, the owner
/// cancels, or the owner drops its receiver. Sends a heartbeat every `ping_every`.
pub async fn pump_messages<S, K, E>(stream: S, mut sink: K, tx: mpsc::Sender<Frame>, mut cancel_rx: oneshot::Receiver<()>, ping_every: Duration)
where
    S: Stream<Item = Result<Message, E>>,
    E: Display,
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let stream = stream.fuse();
    futures::pin_mut!(stream);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        let frame = tokio::select! {
            _ = &mut cancel_rx => {
                let _ = sink.send(Message::Close(None)).await;
                debug!("ws pump cancelled");
                break;
            }
            _ = heartbeat.tick() => {
                if let Err(e) = sink.send(Message::Text(PING.to_string())).await { warn!(error = %e, "ws: heartbeat failed"); }
                continue;
            }
            next = stream.next() => match next {
                Some(Ok(Message::Text(text))) => Frame::Text(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => Frame::Text(text),
                    Err(_) => continue,
                },
                Some(Ok(Message::Close(close))) => Frame::Closed { code: close.map(|c| u16::from(c.code)) },
                // protocol-level ping/pong is answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => { warn!(error = %e, "ws: stream error"); Frame::Failed(e.to_string()) }
                None => Frame::Closed { code: None },
            }
        };
        let terminal = matches!(frame, Frame::Closed { .. } | Frame::Failed(_));
        if tx.send(frame).await.is_err() || terminal { break; }
    }
    debug!("ws pump ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    type Item = Result<Message, std::io::Error>;

    async fn drain_frames(mut rx: mpsc::Receiver<Frame>) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Some(f) = rx.recv().await { out.push(f); }
        out
    }

    #[tokio::test]
    async fn forwards_text_until_stream_ends() {
        let s = async_stream::stream! {
            yield Ok::<_, std::io::Error>(Message::Text("one".into()));
            yield Ok(Message::Pong(vec![]));
            yield Ok(Message::Binary(b"two".to_vec()));
        };
        let (tx, rx) = mpsc::channel(8);
        let (_cancel, cancel_rx) = CancelHandle::new();
        pump_messages(s, futures::sink::drain(), tx, cancel_rx, Duration::from_secs(30)).await;
        assert_eq!(drain_frames(rx).await, [Frame::Text("one".into()), Frame::Text("two".into()), Frame::Closed { code: None }]);
    }

    #[tokio::test]
    async fn close_frame_carries_code_and_stops() {
        let s = async_stream::stream! {
            yield Ok::<_, std::io::Error>(Message::Close(Some(CloseFrame { code: CloseCode::Error, reason: "boom".into() })));
            yield Ok(Message::Text("after close".into()));
        };
        let (tx, rx) = mpsc::channel(8);
        let (_cancel, cancel_rx) = CancelHandle::new();
        pump_messages(s, futures::sink::drain(), tx, cancel_rx, Duration::from_secs(30)).await;
        assert_eq!(drain_frames(rx).await, [Frame::Closed { code: Some(1011) }]);
    }

    #[tokio::test]
    async fn stream_error_is_failed_frame() {
        let s = async_stream::stream! {
            yield Err::<Message, _>(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
        };
        let (tx, rx) = mpsc::channel(8);
        let (_cancel, cancel_rx) = CancelHandle::new();
        pump_messages(s, futures::sink::drain(), tx, cancel_rx, Duration::from_secs(30)).await;
        let frames = drain_frames(rx).await;
        assert!(matches!(frames.as_slice(), [Frame::Failed(msg)] if msg.contains("reset")));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_then_cancel_closes() {
        let (sink, mut sent) = futures::channel::mpsc::unbounded::<Message>();
        let (tx, _rx) = mpsc::channel(8);
        let (cancel, cancel_rx) = CancelHandle::new();
        let pump = tokio::spawn(pump_messages(futures::stream::pending::<Item>(), sink, tx, cancel_rx, Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(sent.next().await, Some(Message::Text(PING.to_string())));

        cancel.cancel();
        pump.await.unwrap();
        assert_eq!(sent.next().await, Some(Message::Close(None)));
        assert_eq!(sent.next().await, None, "sink dropped with the pump");
    }
}
