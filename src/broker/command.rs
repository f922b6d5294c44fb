//! Wire requests and the commands the worker pool dispatches.
//!
//! A client sends one JSON `Request` per line. The ingest loop turns each into
//! a `Command` bound to the originating `Connection`; disconnection is
//! modelled as a synthesized `CommandKind::Close`.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, watch};

use crate::broker::message::Message;
use crate::utils::error::{BrokerError, Result};

/// Numeric `type` values of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum CommandType {
    Publish = 0,
    Consume = 1,
    Close = 2,
}

impl TryFrom<u64> for CommandType {
    type Error = BrokerError;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            0 => Ok(CommandType::Publish),
            1 => Ok(CommandType::Consume),
            2 => Ok(CommandType::Close),
            other => Err(BrokerError::UnknownCommandType(other)),
        }
    }
}

/// One line of client input.
///
/// `body` carries the JSON-encoded message for a publish and the consumer
/// name for a consume. `consumer_name` is accepted as a fallback name and
/// `offset` is informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: u64,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub consumer_name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub offset: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl Request {
    pub fn publish(topic: &str, message: &Message) -> Result<Self> {
        Ok(Self {
            kind: CommandType::Publish as u64,
            topic: topic.to_string(),
            body: serde_json::to_string(message)?,
            ..Self::default()
        })
    }

    pub fn consume(topic: &str, consumer_name: &str) -> Self {
        Self {
            kind: CommandType::Consume as u64,
            topic: topic.to_string(),
            body: consumer_name.to_string(),
            ..Self::default()
        }
    }

    pub fn close() -> Self {
        Self {
            kind: CommandType::Close as u64,
            ..Self::default()
        }
    }

    /// Serialize as a single newline-terminated JSON line.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// `body` is the still-encoded message; the router decodes it.
    Publish { topic: String, body: String },
    Consume { topic: String, name: String },
    Close,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub kind: CommandKind,
    pub connection: Connection,
}

impl Command {
    /// Bind a decoded request to the connection it arrived on.
    pub fn from_request(request: Request, connection: Connection) -> Result<Self> {
        let kind = match CommandType::try_from(request.kind)? {
            CommandType::Publish => CommandKind::Publish {
                topic: request.topic,
                body: request.body,
            },
            CommandType::Consume => {
                let name = if request.body.is_empty() {
                    request.consumer_name
                } else {
                    request.body
                };
                if name.is_empty() {
                    return Err(BrokerError::MissingConsumerName);
                }
                CommandKind::Consume {
                    topic: request.topic,
                    name,
                }
            }
            CommandType::Close => CommandKind::Close,
        };
        Ok(Self { kind, connection })
    }

    /// The command the ingest loop enqueues when its peer disconnects.
    pub fn close(connection: Connection) -> Self {
        Self {
            kind: CommandKind::Close,
            connection,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            CommandKind::Publish { .. } => "publish",
            CommandKind::Consume { .. } => "consume",
            CommandKind::Close => "close",
        }
    }
}

pub type ConnectionId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to the writing side of one client connection.
///
/// Cloned into every command read from that connection and into every
/// consumer started by it. Two handles are equal when they refer to the same
/// connection.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    writer: Arc<Mutex<Option<BoxedWriter>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl Connection {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            writer: Arc::new(Mutex::new(Some(Box::new(writer)))),
            closed: Arc::new(closed),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Write `line` followed by a newline and flush.
    pub async fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');
        writer.write_all(&buf).await?;
        writer.flush().await
    }

    /// Shut the connection down. Safe to call more than once.
    pub async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(connection = self.id, error = %e, "shutdown of closed connection");
            }
        }
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`Connection::close`] has been called on any clone.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so this only returns on close.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
