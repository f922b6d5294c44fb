//! Topic log
//!
//! Every topic is a single append-only file, `<data_path>/<topic>.topic`,
//! holding one JSON `Message` per line in publish order. Lines are never
//! rewritten, so offset N names the same record for the lifetime of the topic.
//!
//! Writers open their own handle in append mode and emit each record with one
//! `write` call, relying on the file system's atomic append for concurrent
//! publishers. Readers (consumers) open their own read-only handle.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::broker::message::Message;
use crate::utils::error::{BrokerError, Result};

const TOPIC_EXTENSION: &str = "topic";

#[derive(Debug, Clone)]
pub struct TopicLog {
    name: String,
    path: PathBuf,
}

impl TopicLog {
    /// Resolve the log for `topic` inside `data_dir`. Nothing is created on
    /// disk until the first append or read.
    pub fn new(data_dir: &Path, topic: &str) -> Result<Self> {
        validate_name(topic)?;
        Ok(Self {
            name: topic.to_string(),
            path: data_dir.join(format!("{topic}.{TOPIC_EXTENSION}")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `message` as one newline-terminated JSON line, creating the
    /// log if needed. Errors are returned as-is, never retried.
    pub fn append(&self, message: &Message) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        // One write per record; a short write would leave a torn line.
        let written = file.write(&line)?;
        if written != line.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!(
                    "short append to topic {}: {written} of {} bytes",
                    self.name,
                    line.len()
                ),
            )
            .into());
        }
        Ok(())
    }

    /// Open the log for reading from the start, creating an empty log when
    /// the topic has never been published to.
    pub async fn open_read(&self) -> Result<tokio::fs::File> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await?;
        Ok(file)
    }
}

/// Topic and consumer names end up in file names, so they must stay a single
/// path component.
pub fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.contains("..");
    if bad {
        return Err(BrokerError::InvalidName(name.to_string()));
    }
    Ok(())
}
