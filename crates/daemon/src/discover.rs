//! Discovery module for finding video files beneath a library root.
//!
//! The scan worker depends on [`VideoFileDiscoverer`]; [`WalkDirDiscoverer`]
//! walks the filesystem recursively, filtering by extension.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Video file extensions recognised by the discoverer (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".avi", ".mov", ".m4v", ".ts", ".m2ts", ".webm", ".wmv", ".flv", ".mpg",
    ".mpeg",
];

/// Error type for discovery.
#[derive(Debug, Error)]
pub enum DiscoverError {
    /// The library root does not exist or is not a directory.
    #[error("library root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The blocking walk task panicked or was cancelled.
    #[error("discovery task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Produces the video files beneath a root directory.
#[async_trait]
pub trait VideoFileDiscoverer: Send + Sync {
    async fn video_files(&self, root: &Path) -> Result<Vec<PathBuf>, DiscoverError>;
}

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Recursive filesystem discoverer backed by `walkdir`.
///
/// Hidden directories (names starting with `.`) are not descended into.
/// Entries that cannot be read are skipped; only an unusable root is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkDirDiscoverer;

impl WalkDirDiscoverer {
    /// Blocking walk; paths come back in walk order.
    pub fn walk(root: &Path) -> Result<Vec<PathBuf>, DiscoverError> {
        if !root.is_dir() {
            return Err(DiscoverError::NotADirectory(root.to_path_buf()));
        }

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                // Allow the root directory even if it starts with '.'
                if entry.depth() > 0 && entry.file_type().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        return !name.starts_with('.');
                    }
                }
                true
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(root = %root.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            if entry.file_type().is_file() && is_video_file(entry.path()) {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl VideoFileDiscoverer for WalkDirDiscoverer {
    async fn video_files(&self, root: &Path) -> Result<Vec<PathBuf>, DiscoverError> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || Self::walk(&root)).await?
    }
}
