//! Harvester - incremental downloader for open-data portals
//!
//! This library mirrors a portal's published datasets to local storage: it
//! walks manifest XML files, extracts archive and schema links, checks what
//! is already present and valid, and downloads the rest with retry,
//! throttling and resumable progress tracking.
//!
//! # Modules
//!
//! - [`resolver`]: filename dates, normalization and target folders
//! - [`manifest`]: manifest index parsing and link extraction
//! - [`integrity`]: archive and file validation with a persisted cache
//! - [`download`]: transport, retry, throttling and download strategies
//! - [`pipeline`]: the end-to-end harvest run
//! - [`inspect`]: offline archive statistics and comparison
//! - [`config`], [`logging`], [`state`]: ambient setup and persistence

pub mod config;
pub mod download;
pub mod inspect;
pub mod integrity;
pub mod logging;
pub mod manifest;
pub mod pipeline;
pub mod resolver;
pub mod state;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
