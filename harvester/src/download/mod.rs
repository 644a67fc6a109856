//! HTTP download engine for manifest artifacts.
//!
//! This module provides:
//! - The network seam and its reqwest implementation (`transport`, `http`)
//! - Retry classification and backoff (`retry`)
//! - Average-bandwidth throttling (`throttle`)
//! - The shared in-flight URL set (`inflight`)
//! - Single-artifact downloads (`engine`)
//! - Sequential and parallel batch strategies (`strategy`)
//!
//! # Architecture
//!
//! ```text
//! DownloadStrategy (trait)
//!         ├── SequentialStrategy
//!         └── ParallelStrategy
//!                 │
//!                 ▼
//!          DownloadEngine ──► InFlightSet (per URL exclusion)
//!                 │      └──► IntegrityChecker (skip / verify)
//!                 ▼
//!          Transport (trait)
//!                 └── HttpTransport (reqwest blocking)
//! ```

mod engine;
mod error;
mod http;
mod inflight;
mod retry;
mod strategy;
mod throttle;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{part_path, DownloadEngine, DownloadOutcome, DownloadRequest, EngineSettings};
pub use error::{DownloadError, DownloadResult};
pub use http::{HttpOptions, HttpTransport, DEFAULT_USER_AGENT};
pub use inflight::{InFlightGuard, InFlightSet};
pub use retry::{is_retryable_status, parse_retry_after, RetryPolicy, RETRYABLE_STATUSES};
pub use strategy::{
    strategy_for, CompletionCallback, DownloadStrategy, ParallelStrategy, SequentialStrategy,
};
pub use throttle::pace;
pub use transport::{Transport, TransportResponse};
