//! TCP transport
//!
//! - `accept_loop` accepts with a short deadline so a shutdown is noticed
//!   within one poll interval, enables keep-alive and spawns one ingest task
//!   per connection.
//! - `ingest` reads one JSON request per line, binds it to the connection and
//!   enqueues it. Malformed lines are logged and skipped. End of stream
//!   enqueues a synthesized close command, and so does a failed read. A connection closed from our side
//!   or a broker shutdown ends the loop quietly.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::broker::command::{Command, Connection, Request};
use crate::utils::error::{Result, is_closed_kind};

pub async fn accept_loop(
    listener: TcpListener,
    commands: mpsc::Sender<Command>,
    stop: watch::Receiver<bool>,
    accept_timeout: Duration,
) {
    loop {
        if *stop.borrow() {
            break;
        }

        let (stream, peer) = match tokio::time::timeout(accept_timeout, listener.accept()).await {
            // Deadline expired, look at the stop flag again.
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!(error = %e, "unable to accept tcp connection");
                continue;
            }
            Ok(Ok(accepted)) => accepted,
        };

        if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
            warn!(%peer, error = %e, "unable to set keep alive");
        }

        tokio::spawn(handle_connection(
            stream,
            peer,
            commands.clone(),
            stop.clone(),
        ));
    }
    debug!("accept loop stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    commands: mpsc::Sender<Command>,
    stop: watch::Receiver<bool>,
) {
    let (reader, writer) = stream.into_split();
    let connection = Connection::new(writer);
    debug!(%peer, connection = connection.id(), "connection accepted");
    ingest(reader, connection, commands, stop).await;
    debug!(%peer, "connection loop finished");
}

/// Decode one input line into a command for `connection`.
pub fn decode_line(line: &[u8], connection: &Connection) -> Result<Command> {
    let request: Request = serde_json::from_slice(line)?;
    Command::from_request(request, connection.clone())
}

/// Read commands from `reader` until end of stream, shutdown or until
/// `connection` is closed by a consumer.
pub async fn ingest<R>(
    reader: R,
    connection: Connection,
    commands: mpsc::Sender<Command>,
    mut stop: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        if *stop.borrow() {
            return;
        }

        line.clear();
        let read = tokio::select! {
            _ = stop.changed() => return,
            _ = connection.closed() => return,
            read = reader.read_until(b'\n', &mut line) => read,
        };

        match read {
            Ok(0) => {
                debug!(connection = connection.id(), "end of stream");
                enqueue(&commands, Command::close(connection.clone()), &mut stop).await;
                return;
            }
            Ok(_) => {
                let trimmed = line.trim_ascii();
                if trimmed.is_empty() {
                    continue;
                }
                match decode_line(trimmed, &connection) {
                    Ok(command) => {
                        if !enqueue(&commands, command, &mut stop).await {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(connection = connection.id(), error = %e, "error on command");
                    }
                }
            }
            Err(e) if connection.is_closed() => {
                debug!(connection = connection.id(), error = %e, "read on closed connection");
                return;
            }
            Err(e) => {
                if is_closed_kind(e.kind()) {
                    debug!(connection = connection.id(), error = %e, "connection dropped");
                } else {
                    warn!(connection = connection.id(), error = %e, "unable to read connection");
                }
                enqueue(&commands, Command::close(connection.clone()), &mut stop).await;
                return;
            }
        }
    }
}

/// Hand `command` to the workers. Returns false when the broker is shutting
/// down or the queue is gone, in which case the caller should stop reading.
async fn enqueue(
    commands: &mpsc::Sender<Command>,
    command: Command,
    stop: &mut watch::Receiver<bool>,
) -> bool {
    if *stop.borrow() {
        return false;
    }
    tokio::select! {
        _ = stop.changed() => false,
        sent = commands.send(command) => sent.is_ok(),
    }
}
