//! Scan worker: discovers, filters and enqueues jobs for one library.

use crate::config::MetadataErrorPolicy;
use crate::library::{Job, Library, LibraryId};
use crate::manager::LibraryManager;
use crate::metadata::Metadata;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Counters describing one scan, mostly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub discovered: usize,
    pub masked: usize,
    pub already_dispatched: usize,
    pub already_queued: usize,
    pub metadata_errors: usize,
    pub declined: usize,
    pub enqueued: usize,
    /// Paths skipped because a store call failed.
    pub store_errors: usize,
}

/// Outcome of trying to add one job to a library's stored queue.
enum EnqueueResult {
    Added,
    Duplicate,
    Dispatched,
}

impl LibraryManager {
    /// Scans `library` once and enqueues a job for every new file that needs work.
    ///
    /// Per-file failures are logged and skipped; only a discovery failure ends
    /// the scan early. The returned report is `None` in that case.
    pub async fn update_library_queue(&self, library: Library) -> Option<ScanReport> {
        let discovered = match self.discoverer.video_files(&library.folder).await {
            Ok(files) => files,
            Err(e) => {
                error!(library_id = %library.id, folder = %library.folder.display(), error = %e, "video discovery failed");
                return None;
            }
        };

        let mut report = ScanReport {
            discovered: discovered.len(),
            ..Default::default()
        };

        for path in discovered {
            self.process_path(&library, path, &mut report).await;
        }

        debug!(library_id = %library.id, ?report, "library scan finished");
        Some(report)
    }

    async fn process_path(&self, library: &Library, path: PathBuf, report: &mut ScanReport) {
        if let Some(mask) = library.matching_mask(&path) {
            debug!(path = %path.display(), mask, "skipped because of a path mask");
            report.masked += 1;
            return;
        }

        match self.store.is_path_dispatched(&path).await {
            Ok(true) => {
                report.already_dispatched += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!(path = %path.display(), error = %e, "dispatch lookup failed");
                report.store_errors += 1;
                return;
            }
        }

        if library.queue.in_queue_path(&path) {
            report.already_queued += 1;
            return;
        }

        let metadata = match self.metadata_reader.read(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                report.metadata_errors += 1;
                match self.metadata_error_policy {
                    MetadataErrorPolicy::Skip => {
                        error!(path = %path.display(), error = %e, "skipping file, metadata read failed");
                        return;
                    }
                    MetadataErrorPolicy::Decide => {
                        error!(path = %path.display(), error = %e, "metadata read failed, deciding on empty metadata");
                        Metadata::default()
                    }
                }
            }
        };

        let command = match self
            .command_decider
            .decide(&metadata, &library.command_decider_settings)
        {
            Ok(command) => command,
            Err(e) => {
                debug!(path = %path.display(), reason = %e, "skipped by command decider");
                report.declined += 1;
                return;
            }
        };

        let job = Job::new(path, command, metadata);
        match self.enqueue(library.id, job).await {
            Ok(EnqueueResult::Added) => report.enqueued += 1,
            Ok(EnqueueResult::Duplicate) => report.already_queued += 1,
            Ok(EnqueueResult::Dispatched) => report.already_dispatched += 1,
            Err(()) => report.store_errors += 1,
        }
    }

    /// Pushes `job` onto the stored queue of `library_id` and persists it.
    ///
    /// Works on a fresh copy of the library under its lock so concurrent pops
    /// and settings updates are never overwritten by this worker's snapshot.
    async fn enqueue(&self, library_id: LibraryId, job: Job) -> Result<EnqueueResult, ()> {
        let _guard = self.locks.lock(library_id).await;

        let mut library = match self.store.library(library_id).await {
            Ok(Some(library)) => library,
            Ok(None) => {
                warn!(library_id = %library_id, path = %job.path.display(), "library removed during scan, dropping job");
                return Err(());
            }
            Err(e) => {
                error!(library_id = %library_id, error = %e, "failed to load library for enqueue");
                return Err(());
            }
        };

        // A pop may have taken this path since the unlocked check above
        match self.store.is_path_dispatched(&job.path).await {
            Ok(true) => return Ok(EnqueueResult::Dispatched),
            Ok(false) => {}
            Err(e) => {
                error!(path = %job.path.display(), error = %e, "dispatch lookup failed");
                return Err(());
            }
        }

        let path = job.path.clone();
        if !library.queue.push(job) {
            return Ok(EnqueueResult::Duplicate);
        }
        info!(library_id = %library_id, path = %path.display(), "added to library queue");

        if let Err(e) = self.store.save_library(&library).await {
            error!(library_id = %library_id, path = %path.display(), error = %e, "failed to persist library queue");
            return Err(());
        }

        Ok(EnqueueResult::Added)
    }
}
