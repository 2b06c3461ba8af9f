// src/lib.rs
// Public library surface for the binary and the integration tests.

pub mod augment;
pub mod catalog;
pub mod config;
pub mod error;
pub mod error_log;
pub mod format;
pub mod harvest;
pub mod maps;
pub mod rate_limit;
pub mod site;
pub mod sources;
pub mod tracker;
pub mod translation;

pub use crate::error::{ErrorKind, HarvestError};
pub use crate::error_log::ErrorLogger;
pub use crate::harvest::{HarvestCounts, HarvestParams, Harvester, RunSummary};
pub use crate::site::{DeliveryMode, SiteParams};
pub use crate::tracker::DownloadTracker;
