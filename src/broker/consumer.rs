//! Offset-tracked consumer
//!
//! A consumer turns a topic log into an ordered stream for one named client.
//! Its life is `Created -> Tailing -> Closed`:
//!
//! - **Created** ([`Consumer::open`]): load the persisted `MetaConsumer` from
//!   `<name>.<topic>.consumer` and skip that many records of the log.
//! - **Tailing** ([`Consumer::start`]): read the next complete line, write it
//!   to the connection as a `Response`, then bump and persist the offset. At
//!   the end of the log, wait one poll interval (interrupted by close).
//! - **Closed**: persist the offset a final time and release both files.
//!   [`ConsumerHandle::release`] stops here and leaves the connection open,
//!   which is how a consumer is handed over to a new one;
//!   [`ConsumerHandle::close`] also shuts the connection down.
//!
//! Delivery happens before persistence, so a crash between the two steps
//! redelivers that record on restart: delivery is at-least-once and
//! consumers should deduplicate on the message `id` header.

use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::command::Connection;
use crate::broker::message::{MetaConsumer, Response};
use crate::broker::topic::{TopicLog, validate_name};
use crate::utils::error::{BrokerError, Result};

const META_EXTENSION: &str = "consumer";

/// Identity of a consumer: the same name on two topics is two consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId {
    pub name: String,
    pub topic: String,
}

impl ConsumerId {
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
        }
    }

    pub fn meta_file_name(&self) -> String {
        format!("{}.{}.{META_EXTENSION}", self.name, self.topic)
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.topic)
    }
}

pub struct Consumer {
    id: ConsumerId,
    connection: Connection,
    reader: BufReader<File>,
    meta_file: File,
    meta: MetaConsumer,
    /// Records still to be passed over before delivery resumes. Non-zero
    /// after `open` only when the log holds fewer lines than the offset.
    skip: u64,
    /// Unterminated tail of the log seen by the last read.
    partial: Vec<u8>,
    poll_interval: Duration,
}

impl Consumer {
    /// Create the consumer `name` on `topic`, resuming from its persisted
    /// offset. Both the meta file and the topic log are created if absent.
    pub async fn open(
        data_dir: &Path,
        name: &str,
        topic: &str,
        connection: Connection,
        poll_interval: Duration,
    ) -> Result<Self> {
        validate_name(name)?;
        let log = TopicLog::new(data_dir, topic)?;
        let id = ConsumerId::new(name, topic);

        let mut meta_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(data_dir.join(id.meta_file_name()))
            .await?;

        let mut data = Vec::new();
        meta_file.read_to_end(&mut data).await?;
        let meta = MetaConsumer::parse(&data)?;

        let reader = BufReader::new(log.open_read().await?);

        let mut consumer = Self {
            id,
            connection,
            reader,
            meta_file,
            meta,
            skip: meta.offset,
            partial: Vec::new(),
            poll_interval,
        };
        consumer.skip_delivered().await?;

        info!(consumer = %consumer.id, offset = consumer.meta.offset, "consumer created");
        Ok(consumer)
    }

    pub fn id(&self) -> &ConsumerId {
        &self.id
    }

    pub fn offset(&self) -> u64 {
        self.meta.offset
    }

    /// Move a consumer that has not started yet forward to `offset`, the
    /// final offset of the consumer it replaces. Records between the loaded
    /// offset and `offset` are skipped by the tailing loop. Never moves back.
    pub fn resume_from(&mut self, offset: u64) {
        if offset > self.meta.offset {
            self.skip += offset - self.meta.offset;
            self.meta.offset = offset;
        }
    }

    /// Spawn the tailing loop and hand back the handle used to close it.
    pub fn start(self) -> ConsumerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let id = self.id.clone();
        let connection = self.connection.clone();
        let task = tokio::spawn(self.run(stop_rx));

        ConsumerHandle {
            id,
            connection,
            stop: stop_tx,
            task: Mutex::new(Some(task)),
        }
    }

    async fn skip_delivered(&mut self) -> Result<()> {
        while self.skip > 0 {
            match self.next_line().await? {
                Some(_) => self.skip -= 1,
                None => break,
            }
        }
        if self.skip > 0 {
            warn!(
                consumer = %self.id,
                missing = self.skip,
                "topic log is shorter than the persisted offset"
            );
        }
        Ok(())
    }

    /// Next complete line of the log without its terminator, or `None` when
    /// no complete line is available yet.
    async fn next_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        self.reader.read_until(b'\n', &mut self.partial).await?;
        if self.partial.last() != Some(&b'\n') {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.partial);
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) -> u64 {
        debug!(consumer = %self.id, "consuming");
        let mut connection_lost = false;

        loop {
            if *stop.borrow() {
                break;
            }

            let line = match self.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    if self.idle(&mut stop).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(consumer = %self.id, error = %e, "unable to read topic log");
                    if self.idle(&mut stop).await {
                        break;
                    }
                    continue;
                }
            };

            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }

            let response = Response {
                offset: self.meta.offset,
                body: String::from_utf8_lossy(&line).into_owned(),
            };
            let payload = match serde_json::to_vec(&response) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(consumer = %self.id, error = %e, "unable to encode response");
                    continue;
                }
            };

            let sent = tokio::select! {
                _ = stop.changed() => break,
                sent = self.connection.write_line(&payload) => sent,
            };
            if let Err(e) = sent {
                let e = BrokerError::from(e);
                if e.is_connection_closed() || self.connection.is_closed() {
                    debug!(consumer = %self.id, "connection gone, stopping delivery");
                } else {
                    warn!(consumer = %self.id, error = %e, "unable to deliver record");
                }
                connection_lost = true;
                break;
            }

            self.meta.offset += 1;
            if let Err(e) = self.persist().await {
                error!(consumer = %self.id, offset = self.meta.offset, error = %e, "unable to persist offset");
            }
        }

        self.finish(connection_lost).await
    }

    /// Wait one poll interval. Returns true if the consumer was told to stop
    /// in the meantime.
    async fn idle(&self, stop: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = stop.changed() => true,
            _ = tokio::time::sleep(self.poll_interval) => false,
        }
    }

    /// Truncate the meta file and write the current offset from the start.
    async fn persist(&mut self) -> Result<()> {
        let data = serde_json::to_vec(&self.meta)?;
        self.meta_file.set_len(0).await?;
        self.meta_file.seek(SeekFrom::Start(0)).await?;
        self.meta_file.write_all(&data).await?;
        self.meta_file.flush().await?;
        Ok(())
    }

    /// Flush the offset and return it. The connection is only shut down here
    /// when delivery to it failed; otherwise that is up to the handle.
    async fn finish(mut self, connection_lost: bool) -> u64 {
        info!(consumer = %self.id, offset = self.meta.offset, "stopping consumer");
        if let Err(e) = self.persist().await {
            error!(consumer = %self.id, error = %e, "unable to persist offset on close");
        } else if let Err(e) = self.meta_file.sync_data().await {
            warn!(consumer = %self.id, error = %e, "unable to sync meta file");
        }
        if connection_lost {
            self.connection.close().await;
        }
        // Dropping `self` releases the log and meta file handles.
        self.meta.offset
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("offset", &self.meta.offset)
            .field("connection", &self.connection)
            .finish()
    }
}

/// Registry-side view of a running consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    id: ConsumerId,
    connection: Connection,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<u64>>>,
}

impl ConsumerHandle {
    pub fn id(&self) -> &ConsumerId {
        &self.id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Signal the tailing loop to stop and wait until it has flushed its
    /// offset, leaving the connection open. Returns the final offset on the
    /// first call and `None` afterwards.
    pub async fn release(&self) -> Option<u64> {
        self.stop.send_replace(true);

        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match task?.await {
            Ok(offset) => Some(offset),
            Err(e) => {
                error!(consumer = %self.id, error = %e, "consumer task failed");
                None
            }
        }
    }

    /// Release the consumer and shut its connection down. Calling this again
    /// is a no-op.
    pub async fn close(&self) {
        self.release().await;
        self.connection.close().await;
    }

    /// True once the tailing loop has returned, for example after its
    /// connection went away.
    pub fn is_finished(&self) -> bool {
        match self.task.lock() {
            Ok(guard) => guard.as_ref().is_none_or(JoinHandle::is_finished),
            Err(poisoned) => poisoned.into_inner().as_ref().is_none_or(JoinHandle::is_finished),
        }
    }
}
