//! Command decision module.
//!
//! Turns a file's [`Metadata`] plus per-library [`CommandDeciderSettings`] into
//! the ffmpeg argument list a worker node should run, or declines when the file
//! already matches the library's policy.

use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use transcode_scheduler_config::DeciderConfig;

/// Placeholder substituted with the source path by the worker node.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder substituted with the temporary output path by the worker node.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Ordered ffmpeg arguments for one job.
pub type CommandSteps = Vec<String>;

/// Error type for command decisions.
///
/// Every variant means "do not create a job for this file"; only
/// [`DecideError::UnsupportedCodec`] indicates a misconfigured library.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecideError {
    /// The file already matches the library's settings.
    #[error("no work needed")]
    NoWorkNeeded,

    /// The file has no video stream to transcode.
    #[error("no video streams")]
    NoVideoStream,

    /// HDR sources are skipped for this library.
    #[error("HDR source skipped")]
    HdrSource,

    /// The target codec has no known encoder.
    #[error("unsupported target codec: {0}")]
    UnsupportedCodec(String),
}

/// Per-library policy consumed by the command decider.
///
/// The scheduler stores and forwards these settings without inspecting them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandDeciderSettings {
    /// Codec every video stream should end up in (e.g., "hevc", "av1").
    pub target_video_codec: String,
    /// Add a stereo AAC track when the source has no stereo audio.
    #[serde(default)]
    pub create_stereo_audio: bool,
    /// Leave HDR sources untouched.
    #[serde(default)]
    pub skip_hdr: bool,
}

impl Default for CommandDeciderSettings {
    fn default() -> Self {
        DeciderConfig::default().into()
    }
}

impl From<DeciderConfig> for CommandDeciderSettings {
    fn from(cfg: DeciderConfig) -> Self {
        Self {
            target_video_codec: cfg.target_video_codec,
            create_stereo_audio: cfg.create_stereo_audio,
            skip_hdr: cfg.skip_hdr,
        }
    }
}

/// Decides which command, if any, a file needs.
pub trait CommandDecider: Send + Sync {
    fn decide(
        &self,
        metadata: &Metadata,
        settings: &CommandDeciderSettings,
    ) -> Result<CommandSteps, DecideError>;
}

/// Default decider: re-encode video into the target codec and optionally add a
/// stereo downmix, copying every other stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecCommandDecider;

/// Normalise codec aliases so "h265" and "hevc" compare equal.
fn canonical_codec(name: &str) -> String {
    match name.to_lowercase().as_str() {
        "h265" | "hevc" | "x265" => "hevc".to_string(),
        "h264" | "avc" | "x264" => "h264".to_string(),
        "av1" | "libaom-av1" | "libsvtav1" | "av01" => "av1".to_string(),
        "vp9" | "vp09" => "vp9".to_string(),
        other => other.to_string(),
    }
}

/// Software encoder used for a canonical codec name.
fn encoder_for(codec: &str) -> Option<&'static str> {
    match codec {
        "hevc" => Some("libx265"),
        "h264" => Some("libx264"),
        "av1" => Some("libsvtav1"),
        "vp9" => Some("libvpx-vp9"),
        _ => None,
    }
}

impl CommandDecider for CodecCommandDecider {
    /// Builds the argument list:
    /// `-i {input} -map 0 -c copy [-c:v <encoder>] [stereo downmix] {output}`
    fn decide(
        &self,
        metadata: &Metadata,
        settings: &CommandDeciderSettings,
    ) -> Result<CommandSteps, DecideError> {
        let target = canonical_codec(&settings.target_video_codec);
        let encoder = encoder_for(&target)
            .ok_or_else(|| DecideError::UnsupportedCodec(settings.target_video_codec.clone()))?;

        let video = metadata
            .video_streams
            .first()
            .ok_or(DecideError::NoVideoStream)?;

        if settings.skip_hdr && video.is_hdr() {
            return Err(DecideError::HdrSource);
        }

        let needs_video = canonical_codec(&video.codec_name) != target;
        let needs_stereo = settings.create_stereo_audio
            && !metadata.audio_streams.is_empty()
            && !metadata.audio_streams.iter().any(|a| a.channels == 2);

        if !needs_video && !needs_stereo {
            return Err(DecideError::NoWorkNeeded);
        }

        let mut args: CommandSteps = vec![
            "-i".to_string(),
            INPUT_PLACEHOLDER.to_string(),
            "-map".to_string(),
            "0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
        ];

        if needs_video {
            args.push("-c:v".to_string());
            args.push(encoder.to_string());
        }

        if needs_stereo {
            // The downmix lands after every copied audio stream
            let index = metadata.audio_streams.len();
            args.extend([
                "-map".to_string(),
                "0:a:0".to_string(),
                format!("-c:a:{}", index),
                "aac".to_string(),
                format!("-ac:a:{}", index),
                "2".to_string(),
            ]);
        }

        args.push(OUTPUT_PLACEHOLDER.to_string());
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AudioStream, FormatInfo, VideoStream};
    use proptest::prelude::*;

    fn make_metadata(video_codec: Option<&str>, audio_channels: &[u32]) -> Metadata {
        Metadata {
            video_streams: video_codec
                .map(|codec| {
                    vec![VideoStream {
                        codec_name: codec.to_string(),
                        width: 1920,
                        height: 1080,
                        bitrate_kbps: Some(8000.0),
                        color_transfer: None,
                    }]
                })
                .unwrap_or_default(),
            audio_streams: audio_channels
                .iter()
                .map(|&channels| AudioStream {
                    codec_name: "ac3".to_string(),
                    channels,
                })
                .collect(),
            format: FormatInfo {
                duration_secs: 3600.0,
                size_bytes: 4_000_000_000,
            },
        }
    }

    fn settings(target: &str, stereo: bool) -> CommandDeciderSettings {
        CommandDeciderSettings {
            target_video_codec: target.to_string(),
            create_stereo_audio: stereo,
            skip_hdr: true,
        }
    }

    #[test]
    fn test_reencodes_non_target_codec() {
        let steps = CodecCommandDecider
            .decide(&make_metadata(Some("h264"), &[2]), &settings("hevc", false))
            .expect("h264 should be re-encoded");

        assert_eq!(
            steps,
            vec!["-i", "{input}", "-map", "0", "-c", "copy", "-c:v", "libx265", "{output}"]
        );
    }

    #[test]
    fn test_target_codec_needs_no_work() {
        let result =
            CodecCommandDecider.decide(&make_metadata(Some("hevc"), &[2]), &settings("h265", false));
        assert_eq!(result, Err(DecideError::NoWorkNeeded));
    }

    #[test]
    fn test_default_metadata_has_no_video_stream() {
        let result = CodecCommandDecider.decide(&Metadata::default(), &settings("hevc", false));
        assert_eq!(result, Err(DecideError::NoVideoStream));
    }

    #[test]
    fn test_hdr_skipped_when_configured() {
        let mut metadata = make_metadata(Some("h264"), &[6]);
        metadata.video_streams[0].color_transfer = Some("smpte2084".to_string());

        let result = CodecCommandDecider.decide(&metadata, &settings("hevc", false));
        assert_eq!(result, Err(DecideError::HdrSource));

        let mut allow_hdr = settings("hevc", false);
        allow_hdr.skip_hdr = false;
        assert!(CodecCommandDecider.decide(&metadata, &allow_hdr).is_ok());
    }

    #[test]
    fn test_stereo_only_work() {
        let steps = CodecCommandDecider
            .decide(&make_metadata(Some("hevc"), &[6, 8]), &settings("hevc", true))
            .expect("surround-only source needs a stereo track");

        assert!(!steps.contains(&"-c:v".to_string()));
        assert!(steps.contains(&"-c:a:2".to_string()));
        assert!(steps.contains(&"-ac:a:2".to_string()));
        assert_eq!(steps.last().map(String::as_str), Some(OUTPUT_PLACEHOLDER));
    }

    #[test]
    fn test_existing_stereo_track_not_duplicated() {
        let result =
            CodecCommandDecider.decide(&make_metadata(Some("hevc"), &[6, 2]), &settings("hevc", true));
        assert_eq!(result, Err(DecideError::NoWorkNeeded));
    }

    #[test]
    fn test_unsupported_target_codec() {
        let result =
            CodecCommandDecider.decide(&make_metadata(Some("h264"), &[2]), &settings("theora", false));
        assert_eq!(
            result,
            Err(DecideError::UnsupportedCodec("theora".to_string()))
        );
    }

    #[test]
    fn test_settings_from_config() {
        let cfg = DeciderConfig {
            target_video_codec: "av1".to_string(),
            create_stereo_audio: true,
            skip_hdr: false,
        };
        let settings: CommandDeciderSettings = cfg.into();
        assert_eq!(settings.target_video_codec, "av1");
        assert!(settings.create_stereo_audio);
        assert!(!settings.skip_hdr);
    }

    // Any produced command reads from the input placeholder first and writes
    // to the output placeholder last.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_command_shape(
            source in prop_oneof![
                Just("h264"), Just("hevc"), Just("av1"), Just("vp9"), Just("mpeg2video"),
            ],
            target in prop_oneof![Just("hevc"), Just("av1"), Just("h264"), Just("vp9")],
            channels in prop::collection::vec(1u32..9, 0..4),
            stereo in proptest::bool::ANY,
        ) {
            let metadata = make_metadata(Some(source), &channels);
            match CodecCommandDecider.decide(&metadata, &settings(target, stereo)) {
                Ok(steps) => {
                    prop_assert_eq!(steps[0].as_str(), "-i");
                    prop_assert_eq!(steps[1].as_str(), INPUT_PLACEHOLDER);
                    prop_assert_eq!(steps.last().map(String::as_str), Some(OUTPUT_PLACEHOLDER));
                }
                Err(e) => {
                    prop_assert_eq!(e, DecideError::NoWorkNeeded);
                    prop_assert_eq!(canonical_codec(source), canonical_codec(target));
                }
            }
        }
    }
}
