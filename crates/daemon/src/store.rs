//! Data store module for library configuration, dispatch records and
//! completion history.
//!
//! [`MemoryStore`] keeps everything in memory and, when given a state file,
//! rewrites it as pretty JSON after every mutation. A mutation whose write
//! fails leaves the in-memory state untouched.

use crate::dispatch::JobOutcome;
use crate::library::{current_timestamp_ms, Job, Library, LibraryError, LibraryId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the state file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The state file could not be encoded or decoded.
    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A library with this id does not exist.
    #[error("Unknown library: {0}")]
    UnknownLibrary(LibraryId),

    /// The library violates its invariants.
    #[error("Invalid library: {0}")]
    InvalidLibrary(#[from] LibraryError),

    /// The backing service could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A path that has been handed to a worker node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchRecord {
    pub job_id: Uuid,
    pub library_id: LibraryId,
    pub path: PathBuf,
    /// Unix timestamp (milliseconds) of the hand-off.
    pub dispatched_at: i64,
}

impl DispatchRecord {
    pub fn new(job: &Job, library_id: LibraryId) -> Self {
        Self {
            job_id: job.id,
            library_id,
            path: job.path.clone(),
            dispatched_at: current_timestamp_ms(),
        }
    }
}

/// A reconciled job completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub job_id: Uuid,
    pub library_id: LibraryId,
    pub path: PathBuf,
    pub outcome: JobOutcome,
    /// Unix timestamp (milliseconds) of the import.
    pub completed_at: i64,
}

/// Persistence used by the scheduler and the dispatch API.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// All libraries, ordered by id.
    async fn libraries(&self) -> Result<Vec<Library>, StoreError>;

    async fn library(&self, id: LibraryId) -> Result<Option<Library>, StoreError>;

    /// Validates `library`, assigns it a fresh id and stores it.
    async fn add_library(&self, library: Library) -> Result<LibraryId, StoreError>;

    /// Replaces the stored record with the same id.
    async fn save_library(&self, library: &Library) -> Result<(), StoreError>;

    async fn is_path_dispatched(&self, path: &Path) -> Result<bool, StoreError>;

    async fn dispatch_record(&self, path: &Path) -> Result<Option<DispatchRecord>, StoreError>;

    async fn mark_dispatched(&self, record: DispatchRecord) -> Result<(), StoreError>;

    /// Saves `library` and records `record` as a single write.
    ///
    /// On error neither change is visible.
    async fn dispatch_job(
        &self,
        library: &Library,
        record: DispatchRecord,
    ) -> Result<(), StoreError>;

    /// Removes and returns the dispatch record for `path`, if any.
    async fn clear_dispatched(&self, path: &Path) -> Result<Option<DispatchRecord>, StoreError>;

    async fn append_history(&self, entry: HistoryEntry) -> Result<(), StoreError>;

    async fn history(&self) -> Result<Vec<HistoryEntry>, StoreError>;
}

#[derive(Debug, Default, Clone)]
struct StoreState {
    next_library_id: i64,
    libraries: BTreeMap<LibraryId, Library>,
    dispatched: HashMap<PathBuf, DispatchRecord>,
    history: Vec<HistoryEntry>,
}

/// On-disk layout of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    next_library_id: i64,
    #[serde(default)]
    libraries: Vec<Library>,
    #[serde(default)]
    dispatched: Vec<DispatchRecord>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

impl From<PersistedState> for StoreState {
    fn from(p: PersistedState) -> Self {
        let max_id = p.libraries.iter().map(|l| l.id.0).max().unwrap_or(0);
        Self {
            next_library_id: p.next_library_id.max(max_id),
            libraries: p.libraries.into_iter().map(|l| (l.id, l)).collect(),
            dispatched: p
                .dispatched
                .into_iter()
                .map(|r| (r.path.clone(), r))
                .collect(),
            history: p.history,
        }
    }
}

impl StoreState {
    fn to_persisted(&self) -> PersistedState {
        let mut dispatched: Vec<DispatchRecord> = self.dispatched.values().cloned().collect();
        dispatched.sort_by(|a, b| a.path.cmp(&b.path));

        PersistedState {
            next_library_id: self.next_library_id,
            libraries: self.libraries.values().cloned().collect(),
            dispatched,
            history: self.history.clone(),
        }
    }
}

/// In-process store, optionally persisted to a JSON state file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    state_file: Option<PathBuf>,
}

impl MemoryStore {
    /// Creates an empty store that is never written to disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by `state_file`.
    ///
    /// A missing file starts an empty store; the file is created on the first
    /// mutation.
    pub async fn open(state_file: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let state_file = state_file.into();

        let persisted = match tokio::fs::read_to_string(&state_file).await {
            Ok(content) => serde_json::from_str::<PersistedState>(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            state: RwLock::new(persisted.into()),
            state_file: Some(state_file),
        })
    }

    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }

    /// Writes the state file via a temporary sibling and a rename.
    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&state.to_persisted())?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Applies `change` to a copy of the state, persists the copy and only
    /// then makes it current.
    async fn commit<T>(
        &self,
        change: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let out = change(&mut next)?;
        self.persist(&next).await?;
        *state = next;
        Ok(out)
    }
}

fn replace_library(state: &mut StoreState, library: &Library) -> Result<(), StoreError> {
    match state.libraries.get_mut(&library.id) {
        Some(existing) => {
            *existing = library.clone();
            Ok(())
        }
        None => Err(StoreError::UnknownLibrary(library.id)),
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn libraries(&self) -> Result<Vec<Library>, StoreError> {
        Ok(self.state.read().await.libraries.values().cloned().collect())
    }

    async fn library(&self, id: LibraryId) -> Result<Option<Library>, StoreError> {
        Ok(self.state.read().await.libraries.get(&id).cloned())
    }

    async fn add_library(&self, mut library: Library) -> Result<LibraryId, StoreError> {
        self.commit(|state| {
            library.id = LibraryId(state.next_library_id + 1);
            library.validate()?;

            let id = library.id;
            state.next_library_id = id.0;
            state.libraries.insert(id, library);
            Ok(id)
        })
        .await
    }

    async fn save_library(&self, library: &Library) -> Result<(), StoreError> {
        self.commit(|state| replace_library(state, library)).await
    }

    async fn is_path_dispatched(&self, path: &Path) -> Result<bool, StoreError> {
        Ok(self.state.read().await.dispatched.contains_key(path))
    }

    async fn dispatch_record(&self, path: &Path) -> Result<Option<DispatchRecord>, StoreError> {
        Ok(self.state.read().await.dispatched.get(path).cloned())
    }

    async fn mark_dispatched(&self, record: DispatchRecord) -> Result<(), StoreError> {
        self.commit(|state| {
            state.dispatched.insert(record.path.clone(), record);
            Ok(())
        })
        .await
    }

    async fn dispatch_job(
        &self,
        library: &Library,
        record: DispatchRecord,
    ) -> Result<(), StoreError> {
        self.commit(|state| {
            replace_library(state, library)?;
            state.dispatched.insert(record.path.clone(), record);
            Ok(())
        })
        .await
    }

    async fn clear_dispatched(&self, path: &Path) -> Result<Option<DispatchRecord>, StoreError> {
        if !self.state.read().await.dispatched.contains_key(path) {
            return Ok(None);
        }
        self.commit(|state| Ok(state.dispatched.remove(path))).await
    }

    async fn append_history(&self, entry: HistoryEntry) -> Result<(), StoreError> {
        self.commit(|state| {
            state.history.push(entry);
            Ok(())
        })
        .await
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.state.read().await.history.clone())
    }
}
