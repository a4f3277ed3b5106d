//! Library manager: the collaborators shared by scan workers and the dispatch
//! API, plus the per-library locks that serialise queue mutations.

use crate::config::MetadataErrorPolicy;
use crate::decide::CommandDecider;
use crate::discover::{VideoFileDiscoverer, WalkDirDiscoverer};
use crate::library::LibraryId;
use crate::metadata::MetadataReader;
use crate::store::DataStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per library id, created on first use.
///
/// Holding a library's guard is required for every read-modify-write of that
/// library's stored record (queue pushes, pops, settings updates).
#[derive(Debug, Default)]
pub struct LibraryLocks {
    locks: Mutex<HashMap<LibraryId, Arc<Mutex<()>>>>,
}

impl LibraryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: LibraryId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Shared state behind the scheduler loop, scan workers and dispatch API.
pub struct LibraryManager {
    pub(crate) store: Arc<dyn DataStore>,
    pub(crate) discoverer: Arc<dyn VideoFileDiscoverer>,
    pub(crate) metadata_reader: Arc<dyn MetadataReader>,
    pub(crate) command_decider: Arc<dyn CommandDecider>,
    pub(crate) metadata_error_policy: MetadataErrorPolicy,
    pub(crate) locks: LibraryLocks,
}

impl std::fmt::Debug for LibraryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryManager")
            .field("metadata_error_policy", &self.metadata_error_policy)
            .finish_non_exhaustive()
    }
}

impl LibraryManager {
    /// Create a manager that discovers files with [`WalkDirDiscoverer`].
    pub fn new(
        store: Arc<dyn DataStore>,
        metadata_reader: Arc<dyn MetadataReader>,
        command_decider: Arc<dyn CommandDecider>,
    ) -> Self {
        Self {
            store,
            discoverer: Arc::new(WalkDirDiscoverer),
            metadata_reader,
            command_decider,
            metadata_error_policy: MetadataErrorPolicy::default(),
            locks: LibraryLocks::new(),
        }
    }

    pub fn with_discoverer(mut self, discoverer: Arc<dyn VideoFileDiscoverer>) -> Self {
        self.discoverer = discoverer;
        self
    }

    pub fn with_metadata_error_policy(mut self, policy: MetadataErrorPolicy) -> Self {
        self.metadata_error_policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn metadata_error_policy(&self) -> MetadataErrorPolicy {
        self.metadata_error_policy
    }
}
