use serde::{Deserialize, Serialize};

/// Heartbeat frame sent to the backend; answered with `{"type":"pong"}`.
pub const PING: &str = r#"{"type":"ping"}"#;

/// Typed frames the log endpoint sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    Log {
        #[serde(default, alias = "data", alias = "line")]
        content: String,
    },
    Status {
        #[serde(default)]
        status: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Pong,
}

/// A text frame: either a typed message or a line to show verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Message(StreamMessage),
    Raw(String),
}

impl Incoming {
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<StreamMessage>(text) {
            Ok(m) => Incoming::Message(m),
            Err(_) => Incoming::Raw(text.to_string()),
        }
    }
}
