//! # PopLog
//!
//! `poplog` is a minimal, durable message broker built with Rust. Producers
//! append messages to named topics over TCP; named consumers tail a topic
//! from a persisted offset and receive new messages as they are appended.
//!
//! ## Core Modules
//!
//! - `broker`: topic logs, offset-tracked consumers, the consumer registry and
//!   the engine (router, worker pool, supervisor).
//! - `client`: the thin client helper that speaks the wire protocol.
//! - `config`: loading and validating the server configuration.
//! - `transport`: the TCP accept loop and per-connection command ingest.
//! - `utils`: shared error type and logging setup.
//!
//! ## Wire protocol
//!
//! Newline-delimited JSON. `{"type":0,"topic":..,"body":<message json>}`
//! publishes, `{"type":1,"topic":..,"body":<consumer name>}` starts a
//! consumer, after which the broker streams `{"offset":..,"body":..}` lines
//! until the connection closes.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
