//! Harvest pipeline.
//!
//! Ties the manifest, integrity and download modules together into one run:
//!
//! - `orchestrator`: the [`Harvester`] driving a run
//! - `dedup`: global newest-wins ownership of artifacts across manifests
//! - `stage`: per-manifest stage machine
//! - `status`: persisted per-manifest status records
//! - `report`: run counters and the resume point
//!
//! # Example
//!
//! ```ignore
//! use harvester::config::HarvestConfig;
//! use harvester::pipeline::Harvester;
//!
//! let (config, _) = HarvestConfig::load(None)?;
//! let mut harvester = Harvester::with_http(config)?;
//! let report = harvester.run()?;
//! if let Some(resume) = &report.resume {
//!     println!("Interrupted at {}", resume);
//! }
//! ```

mod dedup;
mod error;
mod orchestrator;
mod report;
mod stage;
mod status;

pub use dedup::{assign_owners, OwnedArtifact};
pub use error::{HarvestError, HarvestResult};
pub use orchestrator::{Harvester, ProgressCallback, ProgressEvent};
pub use report::{ResumePoint, RunCounters, RunReport};
pub use stage::{ManifestStage, StageTracker};
pub use status::{FileState, FileStatus, ManifestStatus, StatusKind, StatusStore};
