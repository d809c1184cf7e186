//! HTTP transport for network oracles.

pub mod client;
