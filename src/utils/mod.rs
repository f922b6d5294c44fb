//! The `utils` module provides the pieces shared by every other module of
//! `poplog`: the crate error type and the tracing subscriber setup.

pub mod error;
pub mod logging;
