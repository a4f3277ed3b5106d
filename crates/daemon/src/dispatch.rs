//! Job dispatch API: cross-library operations used by the worker-assignment
//! layer and the status server.

use crate::library::{current_timestamp_ms, Job, Library, LibraryId, LibrarySettings};
use crate::manager::LibraryManager;
use crate::store::{DispatchRecord, HistoryEntry, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error type for dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// How a worker node finished a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The transcode finished; `artifact` points at the produced file, if kept.
    Success {
        #[serde(default)]
        artifact: Option<PathBuf>,
    },
    /// The transcode failed terminally.
    Failed { reason: String },
}

/// A completion report from a worker node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletedJob {
    pub job_id: Uuid,
    pub path: PathBuf,
    pub outcome: JobOutcome,
}

/// Counts from one `import_completed_jobs` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Completions matched to a dispatch record and recorded in history.
    pub reconciled: usize,
    /// Completions with no matching dispatch record.
    pub unknown: usize,
    pub store_errors: usize,
}

/// Read-only view of one library's pending jobs.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueSnapshot {
    pub library_id: LibraryId,
    pub priority: i32,
    pub jobs: Vec<Job>,
}

/// Orders libraries the way jobs are handed out: priority descending, then id.
pub fn sort_for_dispatch(libraries: &mut [Library]) {
    libraries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
}

impl LibraryManager {
    /// Removes the next job across all libraries and marks its path dispatched.
    ///
    /// Returns `Ok(None)` when every queue is empty. The pop and the dispatch
    /// marker are written together under the library's lock, so two callers
    /// can never receive the same path, and a failed write loses nothing.
    pub async fn pop_new_job(&self) -> Result<Option<Job>, DispatchError> {
        let mut libraries = self.store.libraries().await?;
        sort_for_dispatch(&mut libraries);

        for snapshot in libraries {
            if snapshot.queue.is_empty() {
                continue;
            }

            let _guard = self.locks.lock(snapshot.id).await;
            let Some(mut library) = self.store.library(snapshot.id).await? else {
                continue;
            };
            let Some(job) = library.queue.pop() else {
                continue;
            };

            self.store
                .dispatch_job(&library, DispatchRecord::new(&job, library.id))
                .await?;

            info!(library_id = %library.id, job_id = %job.id, path = %job.path.display(), "dispatched job");
            return Ok(Some(job));
        }

        Ok(None)
    }

    /// Reconciles completion reports against the dispatch records.
    ///
    /// Matched completions clear the dispatch marker, whatever their outcome,
    /// and are appended to the history. Reports without a matching record are
    /// logged and ignored.
    pub async fn import_completed_jobs(&self, completed: Vec<CompletedJob>) -> ImportSummary {
        let mut summary = ImportSummary::default();

        for done in completed {
            let record = match self.store.dispatch_record(&done.path).await {
                Ok(Some(record)) if record.job_id == done.job_id => record,
                Ok(Some(record)) => {
                    warn!(
                        path = %done.path.display(),
                        reported_job_id = %done.job_id,
                        dispatched_job_id = %record.job_id,
                        "completion does not match the dispatched job, ignoring"
                    );
                    summary.unknown += 1;
                    continue;
                }
                Ok(None) => {
                    warn!(path = %done.path.display(), job_id = %done.job_id, "completion for a path that was never dispatched, ignoring");
                    summary.unknown += 1;
                    continue;
                }
                Err(e) => {
                    error!(path = %done.path.display(), error = %e, "dispatch lookup failed during import");
                    summary.store_errors += 1;
                    continue;
                }
            };

            if let Err(e) = self.store.clear_dispatched(&done.path).await {
                error!(path = %done.path.display(), error = %e, "failed to clear dispatch marker");
                summary.store_errors += 1;
                continue;
            }

            let entry = HistoryEntry {
                job_id: done.job_id,
                library_id: record.library_id,
                path: done.path,
                outcome: done.outcome,
                completed_at: current_timestamp_ms(),
            };
            match &entry.outcome {
                JobOutcome::Success { .. } => {
                    info!(job_id = %entry.job_id, path = %entry.path.display(), "job completed")
                }
                JobOutcome::Failed { reason } => {
                    warn!(job_id = %entry.job_id, path = %entry.path.display(), reason = %reason, "job failed")
                }
            }

            if let Err(e) = self.store.append_history(entry).await {
                error!(error = %e, "failed to append completion history");
                summary.store_errors += 1;
                continue;
            }
            summary.reconciled += 1;
        }

        summary
    }

    /// Configuration of every library, ordered by id.
    pub async fn library_settings(&self) -> Result<Vec<LibrarySettings>, DispatchError> {
        let mut settings: Vec<LibrarySettings> = self
            .store
            .libraries()
            .await?
            .iter()
            .map(Library::settings)
            .collect();
        settings.sort_by_key(|s| s.id);
        Ok(settings)
    }

    /// Applies settings updates, keeping each library's id and queue.
    ///
    /// Unknown ids and updates that would make a library invalid are logged and
    /// skipped. Returns the number of libraries updated.
    pub async fn update_library_settings(&self, updates: HashMap<LibraryId, Library>) -> usize {
        let mut updates: Vec<(LibraryId, Library)> = updates.into_iter().collect();
        updates.sort_by_key(|(id, _)| *id);

        let mut applied = 0;
        for (id, update) in updates {
            let _guard = self.locks.lock(id).await;

            let mut library = match self.store.library(id).await {
                Ok(Some(library)) => library,
                Ok(None) => {
                    warn!(library_id = %id, "settings update for unknown library, skipping");
                    continue;
                }
                Err(e) => {
                    error!(library_id = %id, error = %e, "failed to load library for settings update");
                    continue;
                }
            };

            library.apply_settings(update);
            if let Err(e) = library.validate() {
                warn!(library_id = %id, error = %e, "rejected settings update");
                continue;
            }

            match self.store.save_library(&library).await {
                Ok(()) => {
                    debug!(library_id = %id, "library settings updated");
                    applied += 1;
                }
                Err(e) => error!(library_id = %id, error = %e, "failed to save library settings"),
            }
        }

        applied
    }

    /// Snapshot of every library's queue, in dispatch order.
    pub async fn library_queues(&self) -> Result<Vec<QueueSnapshot>, DispatchError> {
        let mut libraries = self.store.libraries().await?;
        sort_for_dispatch(&mut libraries);
        Ok(libraries
            .into_iter()
            .map(|library| QueueSnapshot {
                library_id: library.id,
                priority: library.priority,
                jobs: library.queue.iter().cloned().collect(),
            })
            .collect())
    }

    /// Completion history, oldest first.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, DispatchError> {
        Ok(self.store.history().await?)
    }
}
