use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::broker::command::Request;
use crate::broker::message::{Message, Response};
use crate::utils::error::{BrokerError, Result};

/// Header stamped by [`publish`] with the client-side publish time (RFC 3339).
pub const PUBLISHED_AT_HEADER: &str = "published_at";

/// One record received by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub offset: u64,
    pub message: Message,
}

/// Publish `body` to `topic` over `writer`. Returns the message as sent,
/// including its generated `id` header.
pub async fn publish<W>(writer: &mut W, body: &str, topic: &str) -> Result<Message>
where
    W: AsyncWrite + Unpin,
{
    let message = Message::new(body)
        .with_header(PUBLISHED_AT_HEADER, chrono::Utc::now().to_rfc3339());
    let line = Request::publish(topic, &message)?.to_line()?;

    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(message)
}

/// Start consuming `topic` as `consumer_name` and return the stream of
/// deliveries. The stream ends when the broker closes the connection.
/// Lines that do not decode are skipped.
pub async fn consume<S>(
    mut socket: S,
    topic: &str,
    consumer_name: &str,
) -> Result<BoxStream<'static, Result<Delivery>>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let line = Request::consume(topic, consumer_name).to_line()?;
    socket.write_all(line.as_bytes()).await?;
    socket.flush().await?;

    let reader = Some(BufReader::new(socket));
    let deliveries = stream::unfold(reader, |reader| async move {
        let Some(mut reader) = reader else {
            return None;
        };
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => return None,
                Ok(_) => match decode_delivery(line.trim_end()) {
                    Ok(delivery) => return Some((Ok(delivery), Some(reader))),
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable response");
                        continue;
                    }
                },
                Err(e) => return Some((Err(BrokerError::from(e)), None)),
            }
        }
    });

    Ok(deliveries.boxed())
}

fn decode_delivery(line: &str) -> Result<Delivery> {
    let response: Response = serde_json::from_str(line)?;
    let message = response.message()?;
    Ok(Delivery {
        offset: response.offset,
        message,
    })
}
