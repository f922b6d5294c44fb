//! Broker engine
//!
//! This module wires the broker together:
//! - `Router` executes one `Command` (publish, consume or close)
//! - `run_worker` is one member of the worker pool draining the shared queue
//! - `Broker` is the supervisor: it owns the consumer registry, starts the
//!   accept loop and the workers, and performs the shutdown sequence
//!
//! Concurrency notes:
//! - The command queue is a single bounded mpsc channel whose receiver is
//!   shared by all workers behind an async mutex. Commands from one
//!   connection are enqueued in read order; nothing is promised across
//!   connections or across workers.
//! - Consumers run as their own tasks once started and write straight to
//!   their connection; the queue only carries control commands.
//! - A consume for an identity that is already live opens the new consumer
//!   first, then releases the old one (its connection stays open) and resumes
//!   the new one from the released offset. Swaps are serialized, so the meta
//!   file always has a single writer. A failed open leaves the live consumer
//!   alone. File creation is lazy and
//!   idempotent on both the publish and the consume path, so a publish
//!   racing the first consume of a topic is safe in either order.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::broker::command::{Command, CommandKind, Connection};
use crate::broker::consumer::Consumer;
use crate::broker::message::{ID_HEADER, Message};
use crate::broker::registry::ConsumerRegistry;
use crate::broker::topic::TopicLog;
use crate::config::BrokerSettings;
use crate::transport::tcp::accept_loop;
use crate::utils::error::Result;

/// Receiving side of the command queue, shared by every worker.
pub type CommandQueue = Arc<Mutex<mpsc::Receiver<Command>>>;

/// Capacity of the command queue. Kept at one so a connection waits for a
/// worker rather than piling up commands nobody has picked up.
const QUEUE_CAPACITY: usize = 1;

#[derive(Debug)]
pub struct Router {
    data_dir: PathBuf,
    registry: Arc<ConsumerRegistry>,
    poll_interval: Duration,
    swap: Mutex<()>,
}

impl Router {
    pub fn new(settings: &BrokerSettings, registry: Arc<ConsumerRegistry>) -> Self {
        Self {
            data_dir: PathBuf::from(&settings.data_path),
            registry,
            poll_interval: settings.poll_interval(),
            swap: Mutex::new(()),
        }
    }

    /// Execute one command. Errors are returned for the caller to log; the
    /// command is never retried.
    pub async fn route(&self, command: Command) -> Result<()> {
        debug!(
            command = command.name(),
            connection = command.connection.id(),
            "received command"
        );

        match command.kind {
            CommandKind::Publish { topic, body } => self.publish(&topic, &body).await,
            CommandKind::Consume { topic, name } => {
                self.consume(&topic, &name, command.connection).await
            }
            CommandKind::Close => {
                self.close(&command.connection).await;
                Ok(())
            }
        }
    }

    async fn publish(&self, topic: &str, body: &str) -> Result<()> {
        let mut message: Message = serde_json::from_str(body)?;
        message
            .headers
            .entry(ID_HEADER.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string());

        let log = TopicLog::new(&self.data_dir, topic)?;
        tokio::task::spawn_blocking(move || log.append(&message))
            .await
            .map_err(io::Error::other)??;

        debug!(topic, "message appended");
        Ok(())
    }

    async fn consume(&self, topic: &str, name: &str, connection: Connection) -> Result<()> {
        let _swap = self.swap.lock().await;

        let mut consumer =
            Consumer::open(&self.data_dir, name, topic, connection, self.poll_interval).await?;

        if let Some(previous) = self.registry.remove(consumer.id()) {
            info!(consumer = %previous.id(), "replacing live consumer");
            if let Some(offset) = previous.release().await {
                consumer.resume_from(offset);
            }
        }

        self.registry.insert(consumer.start());
        Ok(())
    }

    async fn close(&self, connection: &Connection) {
        let mut handles = self.registry.remove_by_connection(connection);
        handles.extend(self.registry.remove_finished());
        for handle in handles {
            handle.close().await;
        }
    }
}

/// One worker of the pool: pull commands until the queue is closed and
/// drained.
pub async fn run_worker(worker: usize, router: Arc<Router>, queue: CommandQueue) {
    debug!(worker, "worker started");
    loop {
        let next = { queue.lock().await.recv().await };
        let Some(command) = next else {
            break;
        };
        let name = command.name();
        if let Err(e) = router.route(command).await {
            error!(worker, command = name, error = %e, "error on routing command");
        }
    }
    debug!(worker, "worker stopped");
}

/// The broker supervisor.
#[derive(Debug)]
pub struct Broker {
    settings: BrokerSettings,
    registry: Arc<ConsumerRegistry>,
}

impl Broker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            registry: Arc::new(ConsumerRegistry::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConsumerRegistry> {
        &self.registry
    }

    /// Serve `listener` until `shutdown` resolves, then stop accepting
    /// commands, let the workers drain the queue and close every consumer.
    /// Returns once all offsets have been flushed.
    pub async fn run<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::fs::create_dir_all(&self.settings.data_path).await?;

        let (commands_tx, commands_rx) = mpsc::channel::<Command>(QUEUE_CAPACITY);
        let queue: CommandQueue = Arc::new(Mutex::new(commands_rx));
        let (stop_tx, stop_rx) = watch::channel(false);
        let router = Arc::new(Router::new(&self.settings, self.registry.clone()));

        info!(
            addr = ?listener.local_addr().ok(),
            data_path = %self.settings.data_path,
            workers = self.settings.workers,
            "broker started"
        );

        let accept = tokio::spawn(accept_loop(
            listener,
            commands_tx,
            stop_rx,
            self.settings.accept_timeout(),
        ));

        let workers: Vec<_> = (0..self.settings.workers)
            .map(|worker| tokio::spawn(run_worker(worker, router.clone(), queue.clone())))
            .collect();

        shutdown.await;
        info!("shutting down services");

        stop_tx.send_replace(true);
        if let Err(e) = accept.await {
            error!(error = %e, "accept loop failed");
        }
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "worker failed");
            }
        }

        let consumers = self.registry.drain();
        info!(count = consumers.len(), "closing consumers");
        join_all(consumers.iter().map(|consumer| consumer.close())).await;

        info!("broker stopped");
        Ok(())
    }
}
