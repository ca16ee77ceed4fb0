//! HTTP transport for G2 panels.
//!
//! The panel speaks JSON over HTTP with bearer-token auth. This crate wraps
//! it in a typed client with a per-endpoint time-window cache, bounded
//! exponential-backoff retry, virtual unmapped-circuit synthesis and a
//! snapshot projection; a simulation engine can stand in for the wire.

mod cache;
mod client;
pub mod retry;
mod unmapped;

pub use cache::TimedCache;
pub use client::{Gen2Client, Gen2Config, DEFAULT_HTTP_PORT};
pub use retry::{retry_with_sleep, set_sleep_fn, with_retries, RetryPolicy, SleepFn, SleepFuture};
pub use unmapped::{synthesize_unmapped, UNMAPPED_PREFIX};
