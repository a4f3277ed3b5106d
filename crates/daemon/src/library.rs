//! Library, job and queue types shared by the scheduler, the scan worker and
//! the dispatch API.

use crate::decide::{CommandDeciderSettings, CommandSteps};
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use transcode_scheduler_config::LibraryConfig;
use uuid::Uuid;

/// Identifier assigned to a library by the data store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryId(pub i64);

impl std::fmt::Display for LibraryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Library records that cannot be scheduled.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LibraryError {
    #[error("library {0} has an empty folder path")]
    EmptyFolder(LibraryId),

    /// A zero interval would rescan on every tick.
    #[error("library {0} has a zero filesystem check interval")]
    ZeroInterval(LibraryId),
}

/// One unit of transcoding work discovered by a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique job identifier, never reused.
    pub id: Uuid,
    /// Source file to transcode.
    pub path: PathBuf,
    /// Decided ffmpeg arguments.
    pub command: CommandSteps,
    /// Metadata the command was decided from.
    pub metadata: Metadata,
    /// Unix timestamp (milliseconds) when the job was created.
    pub created_at: i64,
}

impl Job {
    /// Creates a job with a freshly generated identifier.
    pub fn new(path: PathBuf, command: CommandSteps, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            command,
            metadata,
            created_at: current_timestamp_ms(),
        }
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub(crate) fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Pending jobs of one library in insertion order, at most one per path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct LibraryQueue {
    jobs: VecDeque<Job>,
}

impl LibraryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a job for `path` is already queued.
    pub fn in_queue_path(&self, path: &Path) -> bool {
        self.jobs.iter().any(|job| job.path == path)
    }

    /// Appends `job` unless its path is already queued.
    ///
    /// Returns `false` (and drops the job) on a duplicate path.
    pub fn push(&mut self, job: Job) -> bool {
        if self.in_queue_path(&job.path) {
            return false;
        }
        self.jobs.push_back(job);
        true
    }

    /// Removes and returns the oldest job.
    pub fn pop(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    pub fn peek(&self) -> Option<&Job> {
        self.jobs.front()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }
}

/// A configured scan root with its policy and pending work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Library {
    /// Assigned by the data store; scheduler-owned.
    pub id: LibraryId,
    /// Root folder scanned for video files.
    pub folder: PathBuf,
    /// Higher priority libraries hand out jobs first.
    pub priority: i32,
    /// Minimum time between two scans.
    pub fs_check_interval: Duration,
    /// Any discovered path containing one of these substrings is ignored.
    pub path_masks: Vec<String>,
    /// Opaque to the scheduler, forwarded to the command decider.
    pub command_decider_settings: CommandDeciderSettings,
    /// Scheduler-owned; never replaced by a settings update.
    #[serde(default)]
    pub queue: LibraryQueue,
}

impl Library {
    /// Creates an unsaved library; the store assigns the real id.
    pub fn new(folder: impl Into<PathBuf>, fs_check_interval: Duration) -> Self {
        Self {
            id: LibraryId(0),
            folder: folder.into(),
            priority: 0,
            fs_check_interval,
            path_masks: Vec::new(),
            command_decider_settings: CommandDeciderSettings::default(),
            queue: LibraryQueue::new(),
        }
    }

    /// Builds an unsaved library from a `[[libraries]]` config entry.
    pub fn from_config(cfg: &LibraryConfig) -> Self {
        Self {
            priority: cfg.priority,
            path_masks: cfg.path_masks.clone(),
            command_decider_settings: cfg.decider.clone().into(),
            ..Self::new(
                cfg.folder.clone(),
                Duration::from_secs(cfg.fs_check_interval_secs),
            )
        }
    }

    pub fn validate(&self) -> Result<(), LibraryError> {
        if self.folder.as_os_str().is_empty() {
            return Err(LibraryError::EmptyFolder(self.id));
        }
        if self.fs_check_interval.is_zero() {
            return Err(LibraryError::ZeroInterval(self.id));
        }
        Ok(())
    }

    /// Returns the first path mask contained in `path`, if any.
    ///
    /// Blank masks are ignored; they would otherwise exclude every file.
    pub fn matching_mask(&self, path: &Path) -> Option<&str> {
        let path_str = path.to_string_lossy();
        self.path_masks
            .iter()
            .map(String::as_str)
            .filter(|mask| !mask.is_empty())
            .find(|mask| path_str.contains(mask))
    }

    /// Configuration view without queue contents.
    pub fn settings(&self) -> LibrarySettings {
        LibrarySettings {
            id: self.id,
            folder: self.folder.clone(),
            priority: self.priority,
            fs_check_interval: self.fs_check_interval,
            path_masks: self.path_masks.clone(),
            command_decider_settings: self.command_decider_settings.clone(),
            queued_jobs: self.queue.len(),
        }
    }

    /// Replaces every field except `id` and `queue` with the ones in `update`.
    pub fn apply_settings(&mut self, update: Library) {
        let Library {
            id: _,
            queue: _,
            folder,
            priority,
            fs_check_interval,
            path_masks,
            command_decider_settings,
        } = update;

        self.folder = folder;
        self.priority = priority;
        self.fs_check_interval = fs_check_interval;
        self.path_masks = path_masks;
        self.command_decider_settings = command_decider_settings;
    }
}

/// Operator-facing library configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibrarySettings {
    pub id: LibraryId,
    pub folder: PathBuf,
    pub priority: i32,
    pub fs_check_interval: Duration,
    pub path_masks: Vec<String>,
    pub command_decider_settings: CommandDeciderSettings,
    /// Number of pending jobs; the jobs themselves are not included.
    pub queued_jobs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_job(path: &str) -> Job {
        Job::new(PathBuf::from(path), vec!["-i".to_string()], Metadata::default())
    }

    fn make_library(masks: &[&str]) -> Library {
        Library {
            id: LibraryId(1),
            path_masks: masks.iter().map(|m| m.to_string()).collect(),
            ..Library::new("/movies", Duration::from_secs(10))
        }
    }

    #[test]
    fn test_job_new_generates_unique_ids() {
        let a = make_job("/movies/a.mkv");
        let b = make_job("/movies/a.mkv");
        assert_ne!(a.id, b.id);
        assert!(a.created_at > 0);
    }

    #[test]
    fn test_queue_rejects_duplicate_path() {
        let mut queue = LibraryQueue::new();
        assert!(queue.push(make_job("/movies/a.mkv")));
        assert!(queue.push(make_job("/movies/b.mkv")));
        assert!(!queue.push(make_job("/movies/a.mkv")));

        assert_eq!(queue.len(), 2);
        assert!(queue.in_queue_path(Path::new("/movies/a.mkv")));
        assert!(!queue.in_queue_path(Path::new("/movies/c.mkv")));
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = LibraryQueue::new();
        queue.push(make_job("/movies/1.mkv"));
        queue.push(make_job("/movies/2.mkv"));
        queue.push(make_job("/movies/3.mkv"));

        let order: Vec<PathBuf> = std::iter::from_fn(|| queue.pop()).map(|j| j.path).collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("/movies/1.mkv"),
                PathBuf::from("/movies/2.mkv"),
                PathBuf::from("/movies/3.mkv"),
            ]
        );
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_mask_matching() {
        let lib = make_library(&["/tmp/", "_partial"]);
        assert_eq!(lib.matching_mask(Path::new("/movies/tmp/a.mkv")), Some("/tmp/"));
        assert_eq!(
            lib.matching_mask(Path::new("/movies/b_partial.mkv")),
            Some("_partial")
        );
        assert_eq!(lib.matching_mask(Path::new("/movies/a.mkv")), None);
    }

    #[test]
    fn test_blank_mask_ignored() {
        let lib = make_library(&[""]);
        assert_eq!(lib.matching_mask(Path::new("/movies/a.mkv")), None);
    }

    #[test]
    fn test_validate() {
        assert!(make_library(&[]).validate().is_ok());

        let mut lib = make_library(&[]);
        lib.fs_check_interval = Duration::ZERO;
        assert_eq!(lib.validate(), Err(LibraryError::ZeroInterval(LibraryId(1))));

        let mut lib = make_library(&[]);
        lib.folder = PathBuf::new();
        assert_eq!(lib.validate(), Err(LibraryError::EmptyFolder(LibraryId(1))));
    }

    #[test]
    fn test_apply_settings_keeps_id_and_queue() {
        let mut lib = make_library(&[]);
        for i in 0..3 {
            lib.queue.push(make_job(&format!("/movies/{}.mkv", i)));
        }

        let update = Library {
            id: LibraryId(99),
            folder: PathBuf::from("/films"),
            priority: 7,
            fs_check_interval: Duration::from_secs(60),
            path_masks: vec!["sample".to_string()],
            command_decider_settings: CommandDeciderSettings {
                target_video_codec: "av1".to_string(),
                create_stereo_audio: true,
                skip_hdr: false,
            },
            queue: LibraryQueue::new(),
        };
        lib.apply_settings(update);

        assert_eq!(lib.id, LibraryId(1));
        assert_eq!(lib.queue.len(), 3);
        assert_eq!(lib.folder, PathBuf::from("/films"));
        assert_eq!(lib.priority, 7);
        assert_eq!(lib.fs_check_interval, Duration::from_secs(60));
        assert_eq!(lib.path_masks, vec!["sample".to_string()]);
        assert_eq!(lib.command_decider_settings.target_video_codec, "av1");
    }

    #[test]
    fn test_settings_view_counts_jobs() {
        let mut lib = make_library(&["/tmp/"]);
        lib.queue.push(make_job("/movies/a.mkv"));
        let settings = lib.settings();
        assert_eq!(settings.id, LibraryId(1));
        assert_eq!(settings.queued_jobs, 1);
        assert_eq!(settings.path_masks, lib.path_masks);
    }

    #[test]
    fn test_from_config() {
        let cfg = LibraryConfig {
            folder: PathBuf::from("/media/tv"),
            priority: 3,
            fs_check_interval_secs: 120,
            path_masks: vec!["/tmp/".to_string()],
            decider: Default::default(),
        };
        let lib = Library::from_config(&cfg);
        assert_eq!(lib.id, LibraryId(0));
        assert_eq!(lib.folder, PathBuf::from("/media/tv"));
        assert_eq!(lib.priority, 3);
        assert_eq!(lib.fs_check_interval, Duration::from_secs(120));
        assert!(lib.queue.is_empty());
    }

    // Pushing any sequence of paths never leaves two jobs for one path.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_queue_dedup(names in prop::collection::vec("[a-d]{1,2}", 0..30)) {
            let mut queue = LibraryQueue::new();
            for name in &names {
                queue.push(make_job(&format!("/movies/{}.mkv", name)));
            }

            let mut paths: Vec<&PathBuf> = queue.iter().map(|j| &j.path).collect();
            let total = paths.len();
            paths.sort();
            paths.dedup();
            prop_assert_eq!(paths.len(), total);

            let mut unique = names.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(total, unique.len());
        }

        #[test]
        fn prop_mask_exclusion(
            dir in "[a-z]{1,8}",
            file in "[a-z]{1,8}",
            mask in "[a-z]{1,4}",
        ) {
            let lib = make_library(&[mask.as_str()]);
            let path = PathBuf::from(format!("/{}/{}.mkv", dir, file));
            let expected = path.to_string_lossy().contains(mask.as_str());
            prop_assert_eq!(lib.matching_mask(&path).is_some(), expected);
        }
    }
}
