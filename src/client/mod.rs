//! The `client` module is the thin client side of the wire protocol: it
//! serializes publish and consume requests onto a socket and decodes the
//! responses streamed back by the broker.

pub mod pubsub_client;
pub use pubsub_client::{Delivery, PUBLISHED_AT_HEADER, consume, publish};

#[cfg(test)]
mod tests;
