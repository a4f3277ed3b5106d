//! Scheduler loop: decides when each library is due and launches Scan Workers.

use crate::concurrency::ScanPlan;
use crate::library::{Library, LibraryId};
use crate::manager::LibraryManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Per-library "no scan in flight" flags.
///
/// A library that has never been seen counts as completed.
#[derive(Debug, Default)]
pub struct ScanTracker {
    completed: Mutex<HashMap<LibraryId, bool>>,
}

impl ScanTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, HashMap<LibraryId, bool>> {
        // A panic while holding this lock cannot leave a flag half-written
        self.completed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_completed(&self, id: LibraryId) -> bool {
        self.flags().get(&id).copied().unwrap_or(true)
    }

    /// Marks `id` as running if no scan is in flight.
    ///
    /// The returned guard flips the flag back when dropped, on every exit path
    /// of the worker that owns it.
    pub fn try_begin(self: &Arc<Self>, id: LibraryId) -> Option<ScanGuard> {
        let mut flags = self.flags();
        let completed = flags.entry(id).or_insert(true);
        if !*completed {
            return None;
        }
        *completed = false;
        Some(ScanGuard {
            tracker: Arc::clone(self),
            id,
        })
    }

    fn finish(&self, id: LibraryId) {
        self.flags().insert(id, true);
    }

    /// Drops the flags of finished scans whose library `keep` rejects.
    ///
    /// Flags of running scans stay until their guard is dropped.
    pub fn forget_finished(&self, keep: impl Fn(LibraryId) -> bool) {
        self.flags().retain(|id, completed| !*completed || keep(*id));
    }

    /// Number of libraries with a flag.
    pub fn tracked(&self) -> usize {
        self.flags().len()
    }
}

/// Marks a library's scan as completed when dropped.
#[derive(Debug)]
pub struct ScanGuard {
    tracker: Arc<ScanTracker>,
    id: LibraryId,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.tracker.finish(self.id);
    }
}

/// Whether a library should be scanned at `now`.
///
/// `last_checked` is `None` for a library never scanned by this process, which
/// makes it due immediately.
pub fn is_due(
    last_checked: Option<Instant>,
    now: Instant,
    interval: Duration,
    previous_completed: bool,
) -> bool {
    if !previous_completed {
        return false;
    }
    match last_checked {
        None => true,
        Some(last) => now.saturating_duration_since(last) > interval,
    }
}

/// Top-level control loop over every library in the store.
pub struct Scheduler {
    manager: Arc<LibraryManager>,
    tick_interval: Duration,
    scan_slots: Arc<Semaphore>,
    last_checked: HashMap<LibraryId, Instant>,
    scans: Arc<ScanTracker>,
    tasks: TaskTracker,
}

impl Scheduler {
    pub fn new(manager: Arc<LibraryManager>, tick_interval: Duration, plan: &ScanPlan) -> Self {
        Self {
            manager,
            tick_interval,
            scan_slots: Arc::new(Semaphore::new(plan.scan_slots as usize)),
            last_checked: HashMap::new(),
            scans: Arc::new(ScanTracker::new()),
            tasks: TaskTracker::new(),
        }
    }

    /// Tracker of every spawned Scan Worker.
    ///
    /// It is closed when [`Scheduler::run`] returns, so `wait()` resolves once
    /// the loop has stopped and all in-flight scans have finished.
    pub fn tracker(&self) -> TaskTracker {
        self.tasks.clone()
    }

    pub fn scans(&self) -> Arc<ScanTracker> {
        Arc::clone(&self.scans)
    }

    pub fn is_scan_running(&self, id: LibraryId) -> bool {
        !self.scans.is_completed(id)
    }

    /// Runs until `cancel` fires. In-flight scans are left to finish.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(tick_ms = self.tick_interval.as_millis() as u64, "scheduler started");

        while !cancel.is_cancelled() {
            self.tick(Instant::now()).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }

        self.tasks.close();
        info!(in_flight = self.tasks.len(), "scheduler stopped");
    }

    /// One polling round. Returns the ids whose scans were launched.
    pub async fn tick(&mut self, now: Instant) -> Vec<LibraryId> {
        let libraries = match self.manager.store().libraries().await {
            Ok(libraries) => libraries,
            Err(e) => {
                error!(error = %e, "failed to list libraries, retrying next tick");
                return Vec::new();
            }
        };

        // Forget libraries that were removed from the store
        let present = |id: LibraryId| libraries.iter().any(|l| l.id == id);
        self.last_checked.retain(|id, _| present(*id));
        self.scans.forget_finished(present);

        let mut launched = Vec::new();
        for library in libraries {
            if let Err(e) = library.validate() {
                warn!(library_id = %library.id, error = %e, "skipping invalid library");
                continue;
            }

            let id = library.id;
            let due = is_due(
                self.last_checked.get(&id).copied(),
                now,
                library.fs_check_interval,
                self.scans.is_completed(id),
            );
            if !due {
                continue;
            }

            let Some(guard) = self.scans.try_begin(id) else {
                continue;
            };
            self.last_checked.insert(id, now);
            self.spawn_scan(library, guard);
            launched.push(id);
        }

        launched
    }

    fn spawn_scan(&self, library: Library, guard: ScanGuard) {
        let manager = Arc::clone(&self.manager);
        let slots = Arc::clone(&self.scan_slots);

        debug!(library_id = %library.id, folder = %library.folder.display(), "launching scan");
        self.tasks.spawn(async move {
            let _guard = guard;
            let _permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(library_id = %library.id, error = %e, "scan slots closed");
                    return;
                }
            };
            manager.update_library_queue(library).await;
        });
    }
}
