//! Metadata module for reading technical information about video files.
//!
//! The scheduler only needs a [`MetadataReader`]; [`FfprobeReader`] is the
//! default implementation that shells out to `ffprobe` and parses its JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

/// Transfer characteristics that mark a stream as HDR.
const HDR_TRANSFERS: &[&str] = &["smpte2084", "arib-std-b67"];

/// Error type for metadata reads.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// ffprobe ran but reported a failure.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// IO error while spawning ffprobe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Information about a video stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VideoStream {
    /// Codec name (e.g., "hevc", "h264", "av1").
    pub codec_name: String,
    /// Video width in pixels.
    pub width: u32,
    /// Video height in pixels.
    pub height: u32,
    /// Bitrate in kbps (if available).
    pub bitrate_kbps: Option<f32>,
    /// Transfer characteristics (e.g., "smpte2084" for PQ).
    #[serde(default)]
    pub color_transfer: Option<String>,
}

impl VideoStream {
    /// Whether the stream carries HDR transfer characteristics.
    pub fn is_hdr(&self) -> bool {
        self.color_transfer
            .as_deref()
            .map(|t| HDR_TRANSFERS.contains(&t.to_lowercase().as_str()))
            .unwrap_or(false)
    }
}

/// Information about an audio stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AudioStream {
    /// Codec name (e.g., "aac", "truehd", "dts").
    pub codec_name: String,
    /// Number of audio channels.
    pub channels: u32,
}

/// Container-level information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FormatInfo {
    /// Duration in seconds.
    pub duration_secs: f64,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// Technical metadata for one video file.
///
/// `Metadata::default()` is the empty value handed to the command decider when
/// a read fails and the library is configured to decide anyway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Metadata {
    /// Video streams found in the file.
    pub video_streams: Vec<VideoStream>,
    /// Audio streams found in the file.
    pub audio_streams: Vec<AudioStream>,
    /// Format information.
    pub format: FormatInfo,
}

/// Extracts metadata from a file on disk.
#[async_trait]
pub trait MetadataReader: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Metadata, MetadataError>;
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub bit_rate: Option<String>,
        pub channels: Option<u32>,
        pub color_transfer: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub size: Option<String>,
    }
}

/// Reads metadata by running `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfprobeReader {
    program: String,
}

impl FfprobeReader {
    pub fn new() -> Self {
        Self::with_program("ffprobe")
    }

    /// Use a specific ffprobe binary instead of the one on PATH.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfprobeReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataReader for FfprobeReader {
    /// Runs `ffprobe -v quiet -print_format json -show_streams -show_format <path>`
    /// and parses the JSON output.
    async fn read(&self, path: &Path) -> Result<Metadata, MetadataError> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MetadataError::FfprobeFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_output(&stdout)
    }
}

/// Parses ffprobe JSON output into [`Metadata`].
pub fn parse_ffprobe_output(json_str: &str) -> Result<Metadata, MetadataError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| MetadataError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let format = ffprobe.format.ok_or_else(|| {
        MetadataError::ParseError("Missing format information in ffprobe output".to_string())
    })?;

    let mut video_streams = Vec::new();
    let mut audio_streams = Vec::new();

    for stream in streams {
        let codec_type = stream.codec_type.as_deref().unwrap_or("");
        let codec_name = stream.codec_name.clone().unwrap_or_default();

        match codec_type {
            "video" => {
                let bitrate_kbps = stream
                    .bit_rate
                    .as_ref()
                    .and_then(|br| br.parse::<f64>().ok())
                    .map(|bps| (bps / 1000.0) as f32);

                video_streams.push(VideoStream {
                    codec_name,
                    width: stream.width.unwrap_or(0),
                    height: stream.height.unwrap_or(0),
                    bitrate_kbps,
                    color_transfer: stream.color_transfer,
                });
            }
            "audio" => {
                audio_streams.push(AudioStream {
                    codec_name,
                    channels: stream.channels.unwrap_or(0),
                });
            }
            _ => {}
        }
    }

    let duration_secs = format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let size_bytes = format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(Metadata {
        video_streams,
        audio_streams,
        format: FormatInfo {
            duration_secs,
            size_bytes,
        },
    })
}
