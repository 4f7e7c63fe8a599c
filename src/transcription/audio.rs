//! Audio track extraction for video containers.
//!
//! Whisper is happiest with 16 kHz mono PCM. For `mp4`/`mov` uploads the audio
//! track is pulled out with ffmpeg into a scratch directory before transcription.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Extensions whose audio must be extracted first.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov"];

pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|video| video.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct AudioExtractor {
    ffmpeg_command: String,
    sample_rate: u32,
}

impl AudioExtractor {
    pub fn new(ffmpeg_command: impl Into<String>) -> Self {
        Self {
            ffmpeg_command: ffmpeg_command.into(),
            sample_rate: 16_000,
        }
    }

    /// Write `<output_dir>/<stem>.wav` from the first audio track of `video_path`.
    pub async fn extract_wav(&self, video_path: &Path, output_dir: &Path) -> Result<PathBuf> {
        let stem = video_path
            .file_stem()
            .ok_or_else(|| anyhow!("Invalid video filename: {}", video_path.display()))?
            .to_string_lossy();
        let audio_path = output_dir.join(format!("{}.wav", stem));

        info!("Extracting audio track from {}", video_path.display());

        let output = Command::new(&self.ffmpeg_command)
            .arg("-y")
            .arg("-i")
            .arg(video_path)
            .args(["-vn", "-acodec", "pcm_s16le", "-ac", "1"])
            .arg("-ar")
            .arg(self.sample_rate.to_string())
            .arg(&audio_path)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.ffmpeg_command))?;

        if !output.status.success() {
            return Err(anyhow!(
                "Audio extraction failed for {} ({}): {}",
                video_path.display(),
                output.status,
                stderr_tail(&output.stderr)
            ));
        }

        debug!("Audio extracted to {}", audio_path.display());
        Ok(audio_path)
    }
}

/// Last few lines of a child's stderr, for error messages.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_video() {
        assert!(is_video(Path::new("uploads/clip.MP4")));
        assert!(is_video(Path::new("talk.mov")));
        assert!(!is_video(Path::new("talk.wav")));
        assert!(!is_video(Path::new("noext")));
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr = b"one\n\ntwo\nthree\nfour\nfive\nsix\n";
        assert_eq!(stderr_tail(stderr), "two | three | four | five | six");
        assert_eq!(stderr_tail(b""), "");
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = AudioExtractor::new("definitely-not-ffmpeg-on-this-host");
        let result = extractor
            .extract_wav(&dir.path().join("clip.mp4"), dir.path())
            .await;
        assert!(result.is_err());
    }
}
