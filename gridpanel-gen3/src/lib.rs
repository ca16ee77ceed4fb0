//! Streaming binary RPC transport for G3 panels.
//!
//! The panel exposes a trait-handler service on TCP port 50065 with no
//! authentication. Topology is discovered once per connect via
//! `GetInstances` + `GetRevision`; telemetry then arrives over a long-lived
//! `Subscribe` stream and is reflected into memory for cheap reads.

mod client;
pub mod data;
pub mod protocol;

pub use client::{Gen3Client, Gen3Config, UnregisterHandle, DEFAULT_RPC_PORT};
