//! The broker core: topic logs, consumers, the registry and the command
//! engine that ties them together.

pub mod command;
pub mod consumer;
pub mod engine;
pub mod message;
pub mod registry;
pub mod topic;

pub use engine::Broker;
