//! Records that travel through the broker.
//!
//! - `Message` is what producers publish and what each topic log line holds.
//! - `Response` is one delivery written back over a consumer's connection.
//! - `MetaConsumer` is the persisted resume position of a named consumer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header every message carries; producers can use it for idempotent
/// processing since delivery is at-least-once.
pub const ID_HEADER: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl Message {
    /// Create a message with a freshly generated `id` header.
    pub fn new(body: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(ID_HEADER.to_string(), Uuid::new_v4().to_string());
        Self {
            headers,
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.headers.get(ID_HEADER).map(String::as_str)
    }
}

/// One delivered record. `offset` is the zero-based position of the record
/// in its topic; `body` is the raw log line, i.e. a JSON-encoded `Message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub offset: u64,
    pub body: String,
}

impl Response {
    /// Decode the embedded message.
    pub fn message(&self) -> serde_json::Result<Message> {
        serde_json::from_str(&self.body)
    }
}

/// Contents of a `<name>.<topic>.consumer` file. An empty file or `{}`
/// means nothing has been delivered yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaConsumer {
    #[serde(default)]
    pub offset: u64,
}

impl MetaConsumer {
    pub fn parse(data: &[u8]) -> serde_json::Result<Self> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(data)
    }
}
