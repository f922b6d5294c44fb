//! The `transport` module is responsible for the network side of the broker:
//! accepting TCP connections and turning each connection's newline-delimited
//! JSON input into commands on the shared queue.

pub mod tcp;
