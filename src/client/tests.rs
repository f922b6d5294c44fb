use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::{PUBLISHED_AT_HEADER, consume, publish};
use crate::broker::command::{CommandType, Request};
use crate::broker::message::{Message, Response};

#[tokio::test]
async fn test_publish_writes_one_request_line() {
    let (mut client, server) = tokio::io::duplex(4096);
    let sent = publish(&mut client, "hello", "greetings").await.unwrap();
    assert!(sent.id().is_some());
    assert!(sent.headers.contains_key(PUBLISHED_AT_HEADER));
    drop(client);

    let mut lines = BufReader::new(server).lines();
    let line = lines.next_line().await.unwrap().unwrap();
    let request: Request = serde_json::from_str(&line).unwrap();
    assert_eq!(request.kind, CommandType::Publish as u64);
    assert_eq!(request.topic, "greetings");
    let message: Message = serde_json::from_str(&request.body).unwrap();
    assert_eq!(message, sent);
    assert!(lines.next_line().await.unwrap().is_none());
}

#[tokio::test]
async fn test_consume_streams_deliveries() {
    let (client, server) = tokio::io::duplex(4096);
    let mut deliveries = consume(client, "t", "c").await.unwrap();

    let (read, mut write) = tokio::io::split(server);
    let mut request = String::new();
    BufReader::new(read).read_line(&mut request).await.unwrap();
    assert_eq!(request, Request::consume("t", "c").to_line().unwrap());

    let first = Message::new("a");
    let second = Message::new("b");
    let mut out = String::new();
    for (offset, message) in [(0, &first), (1, &second)] {
        let response = Response {
            offset,
            body: serde_json::to_string(message).unwrap(),
        };
        out.push_str(&serde_json::to_string(&response).unwrap());
        out.push('\n');
        if offset == 0 {
            out.push_str("garbage\n");
        }
    }
    write.write_all(out.as_bytes()).await.unwrap();
    write.shutdown().await.unwrap();

    let got = deliveries.next().await.unwrap().unwrap();
    assert_eq!((got.offset, got.message), (0, first));
    let got = deliveries.next().await.unwrap().unwrap();
    assert_eq!((got.offset, got.message), (1, second));
}
