//! In-crate fakes for the scheduler's collaborators.

use crate::decide::{
    CodecCommandDecider, CommandDecider, CommandDeciderSettings, CommandSteps, DecideError,
    INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER,
};
use crate::discover::{DiscoverError, VideoFileDiscoverer};
use crate::library::{Library, LibraryId};
use crate::manager::LibraryManager;
use crate::metadata::{AudioStream, FormatInfo, Metadata, MetadataError, MetadataReader, VideoStream};
use crate::store::{DataStore, DispatchRecord, HistoryEntry, MemoryStore, StoreError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// A library whose default settings ask for HEVC, so h264 files need work.
pub fn h264_library(folder: &str) -> Library {
    Library::new(folder, Duration::from_secs(60))
}

/// Manager over `store` using the default command decider.
pub fn manager_with(
    store: Arc<FlakyStore>,
    discoverer: FakeDiscoverer,
    reader: FakeReader,
) -> LibraryManager {
    LibraryManager::new(store, Arc::new(reader), Arc::new(CodecCommandDecider))
        .with_discoverer(Arc::new(discoverer))
}

#[derive(Default)]
struct DiscovererState {
    files: Vec<PathBuf>,
    broken: bool,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    running: Mutex<HashMap<PathBuf, usize>>,
    overlapped: AtomicBool,
}

/// Returns the configured files beneath the requested root.
///
/// A gated discoverer blocks until the test adds a permit to the gate, which
/// keeps a scan "in flight" for as long as the test needs.
#[derive(Clone, Default)]
pub struct FakeDiscoverer {
    state: Arc<DiscovererState>,
}

impl FakeDiscoverer {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            state: Arc::new(DiscovererState {
                files,
                ..Default::default()
            }),
        }
    }

    pub fn broken() -> Self {
        Self {
            state: Arc::new(DiscovererState {
                broken: true,
                ..Default::default()
            }),
        }
    }

    pub fn gated(files: Vec<PathBuf>, gate: Arc<Semaphore>) -> Self {
        Self {
            state: Arc::new(DiscovererState {
                files,
                gate: Some(gate),
                ..Default::default()
            }),
        }
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Highest number of discoveries running at once, across all roots.
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Whether two discoveries of the same root ever overlapped.
    pub fn overlapped(&self) -> bool {
        self.state.overlapped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoFileDiscoverer for FakeDiscoverer {
    async fn video_files(&self, root: &Path) -> Result<Vec<PathBuf>, DiscoverError> {
        let state = &self.state;
        state.calls.fetch_add(1, Ordering::SeqCst);
        if state.broken {
            return Err(DiscoverError::NotADirectory(root.to_path_buf()));
        }

        {
            let mut running = state.running.lock().unwrap();
            let count = running.entry(root.to_path_buf()).or_default();
            *count += 1;
            if *count > 1 {
                state.overlapped.store(true, Ordering::SeqCst);
            }
        }
        let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak.fetch_max(active, Ordering::SeqCst);

        if let Some(gate) = &state.gate {
            // Each permit lets every waiting discovery through in turn
            let _permit = gate.acquire().await.unwrap();
        } else {
            tokio::task::yield_now().await;
        }

        state.active.fetch_sub(1, Ordering::SeqCst);
        *state
            .running
            .lock()
            .unwrap()
            .get_mut(root)
            .unwrap() -= 1;

        Ok(state
            .files
            .iter()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct ReaderState {
    failing: HashSet<PathBuf>,
    reads: AtomicUsize,
}

/// Reports a 1080p h264 file with 5.1 audio for every path except the
/// configured failures.
#[derive(Clone, Default)]
pub struct FakeReader {
    state: Arc<ReaderState>,
}

impl FakeReader {
    pub fn failing(paths: &[&str]) -> Self {
        Self {
            state: Arc::new(ReaderState {
                failing: paths.iter().map(PathBuf::from).collect(),
                ..Default::default()
            }),
        }
    }

    pub fn reads(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }
}

pub fn h264_metadata() -> Metadata {
    Metadata {
        video_streams: vec![VideoStream {
            codec_name: "h264".to_string(),
            width: 1920,
            height: 1080,
            bitrate_kbps: Some(8000.0),
            color_transfer: None,
        }],
        audio_streams: vec![AudioStream {
            codec_name: "ac3".to_string(),
            channels: 6,
        }],
        format: FormatInfo {
            duration_secs: 5400.0,
            size_bytes: 6_000_000_000,
        },
    }
}

#[async_trait]
impl MetadataReader for FakeReader {
    async fn read(&self, path: &Path) -> Result<Metadata, MetadataError> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        if self.state.failing.contains(path) {
            return Err(MetadataError::FfprobeFailed(format!(
                "cannot probe {}",
                path.display()
            )));
        }
        Ok(h264_metadata())
    }
}

/// Accepts every file and records the metadata it was given.
#[derive(Default)]
pub struct AcceptAllDecider {
    seen: Mutex<Vec<Metadata>>,
}

impl AcceptAllDecider {
    pub fn seen(&self) -> Vec<Metadata> {
        self.seen.lock().unwrap().clone()
    }
}

impl CommandDecider for AcceptAllDecider {
    fn decide(
        &self,
        metadata: &Metadata,
        _settings: &CommandDeciderSettings,
    ) -> Result<CommandSteps, DecideError> {
        self.seen.lock().unwrap().push(metadata.clone());
        Ok(vec![
            "-i".to_string(),
            INPUT_PLACEHOLDER.to_string(),
            OUTPUT_PLACEHOLDER.to_string(),
        ])
    }
}

/// [`MemoryStore`] with switchable failures.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_saves: AtomicBool,
    fail_listing: AtomicBool,
    failing_lookups: Mutex<HashSet<PathBuf>>,
    removed: Mutex<HashSet<LibraryId>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_dispatch_lookup_for(&self, path: &str) {
        self.failing_lookups
            .lock()
            .unwrap()
            .insert(PathBuf::from(path));
    }

    /// Hides `id` from every later read, as if an operator deleted it.
    pub fn remove_library(&self, id: LibraryId) {
        self.removed.lock().unwrap().insert(id);
    }

    fn unavailable(what: &str) -> StoreError {
        StoreError::Unavailable(format!("injected {} failure", what))
    }
}

#[async_trait]
impl DataStore for FlakyStore {
    async fn libraries(&self) -> Result<Vec<Library>, StoreError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Self::unavailable("listing"));
        }
        let removed = self.removed.lock().unwrap().clone();
        let mut libraries = self.inner.libraries().await?;
        libraries.retain(|l| !removed.contains(&l.id));
        Ok(libraries)
    }

    async fn library(&self, id: LibraryId) -> Result<Option<Library>, StoreError> {
        if self.removed.lock().unwrap().contains(&id) {
            return Ok(None);
        }
        self.inner.library(id).await
    }

    async fn add_library(&self, library: Library) -> Result<LibraryId, StoreError> {
        self.inner.add_library(library).await
    }

    async fn save_library(&self, library: &Library) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Self::unavailable("save"));
        }
        self.inner.save_library(library).await
    }

    async fn is_path_dispatched(&self, path: &Path) -> Result<bool, StoreError> {
        if self.failing_lookups.lock().unwrap().contains(path) {
            return Err(Self::unavailable("lookup"));
        }
        self.inner.is_path_dispatched(path).await
    }

    async fn dispatch_record(&self, path: &Path) -> Result<Option<DispatchRecord>, StoreError> {
        self.inner.dispatch_record(path).await
    }

    async fn mark_dispatched(&self, record: DispatchRecord) -> Result<(), StoreError> {
        self.inner.mark_dispatched(record).await
    }

    async fn dispatch_job(
        &self,
        library: &Library,
        record: DispatchRecord,
    ) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Self::unavailable("save"));
        }
        self.inner.dispatch_job(library, record).await
    }

    async fn clear_dispatched(&self, path: &Path) -> Result<Option<DispatchRecord>, StoreError> {
        self.inner.clear_dispatched(path).await
    }

    async fn append_history(&self, entry: HistoryEntry) -> Result<(), StoreError> {
        self.inner.append_history(entry).await
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        self.inner.history().await
    }
}
