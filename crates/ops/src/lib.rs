//! Kestrel Ops: streaming pod log connection.
//!
//! [`LogConnection`] owns one WebSocket tail of a pod's logs, a bounded
//! [`LogBuffer`] of received lines and an observable connection status.
//! Transports sit behind the [`Connector`] trait so the state machine can be
//! driven by a scripted transport in tests.

#![forbid(unsafe_code)]

mod buffer;
mod connection;
mod message;
mod transport;

pub use buffer::{LogBuffer, DEFAULT_LOG_CAP};
pub use connection::{ConnectError, ConnectionStatus, LogConnection, LogStreamParams};
pub use message::{Incoming, StreamMessage, PING};
pub use transport::{pump_messages, CancelHandle, Connector, Frame, StreamHandle, WsConnector};
