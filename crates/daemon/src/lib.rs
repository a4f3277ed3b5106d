//! Transcode Scheduler
//!
//! Watches media libraries, decides which files need transcoding, and keeps a
//! prioritized, deduplicated job queue for remote worker nodes to pull from.

pub mod concurrency;
pub mod daemon;
pub mod decide;
pub mod discover;
pub mod dispatch;
pub mod library;
pub mod manager;
pub mod metadata;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use transcode_scheduler_config as config;
pub use transcode_scheduler_config::Config;
pub use concurrency::{derive_plan, ScanPlan};
pub use daemon::{seed_libraries, Daemon, DaemonError};
pub use decide::{
    CodecCommandDecider, CommandDecider, CommandDeciderSettings, CommandSteps, DecideError,
};
pub use discover::{DiscoverError, VideoFileDiscoverer, WalkDirDiscoverer};
pub use dispatch::{CompletedJob, DispatchError, ImportSummary, JobOutcome, QueueSnapshot};
pub use library::{Job, Library, LibraryError, LibraryId, LibraryQueue, LibrarySettings};
pub use manager::LibraryManager;
pub use metadata::{FfprobeReader, Metadata, MetadataError, MetadataReader};
pub use scheduler::{is_due, ScanGuard, ScanTracker, Scheduler};
pub use server::{
    bind_status_listener, create_status_router, run_status_server, serve_status, ServerError,
};
pub use store::{DataStore, DispatchRecord, HistoryEntry, MemoryStore, StoreError};
pub use worker::ScanReport;
