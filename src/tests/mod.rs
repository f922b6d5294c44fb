//! End-to-end tests: a real broker on a local port driven through the
//! client helper.
