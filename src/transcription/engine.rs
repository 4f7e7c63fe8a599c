//! # Transcription Engine
//!
//! The speech-to-text model is an external collaborator: a media file goes in,
//! text comes out. [`Transcriber`] is the seam the pipeline depends on;
//! [`WhisperCli`] is the production implementation, driving the OpenAI Whisper
//! command-line tool as a child process.
//!
//! ## Call Contract:
//! - The call runs to completion. There is no internal timeout and no cancellation;
//!   a reverse proxy or the client decides how long it is willing to wait.
//! - Errors come back as `anyhow::Error` with enough context to show a user.

use super::audio::{is_video, stderr_tail, AudioExtractor};
use super::model::ModelSize;
use crate::config::TranscriptionSettings;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use uuid::Uuid;

/// Speech-to-text backend used by the upload pipeline.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Short identifier recorded in transcript sidecars and health output.
    fn name(&self) -> &str;

    /// Transcribe the media file at `media_path` with the given model.
    async fn transcribe(&self, media_path: &Path, model: ModelSize) -> Result<String>;
}

/// Runs `whisper <file> --model <size> --output_format txt` and reads back the text.
#[derive(Debug, Clone)]
pub struct WhisperCli {
    whisper_command: String,
    language: Option<String>,
    device: Option<String>,
    extractor: AudioExtractor,
    scratch_root: PathBuf,
}

impl WhisperCli {
    pub fn new(settings: &TranscriptionSettings) -> Self {
        Self {
            whisper_command: settings.whisper_command.clone(),
            language: settings.language.clone(),
            device: settings.device.clone(),
            extractor: AudioExtractor::new(settings.ffmpeg_command.clone()),
            scratch_root: std::env::temp_dir(),
        }
    }

    /// Put per-call working directories somewhere other than the system temp dir.
    pub fn with_scratch_root(mut self, scratch_root: impl Into<PathBuf>) -> Self {
        self.scratch_root = scratch_root.into();
        self
    }

    fn build_command(&self, input: &Path, output_dir: &Path, model: ModelSize) -> Command {
        let mut cmd = Command::new(&self.whisper_command);
        cmd.arg(input)
            .arg("--model")
            .arg(model.as_str())
            .arg("--output_dir")
            .arg(output_dir)
            .args(["--output_format", "txt", "--verbose", "False"]);

        if let Some(language) = &self.language {
            cmd.arg("--language").arg(language);
        }
        if let Some(device) = &self.device {
            cmd.arg("--device").arg(device);
            if device.eq_ignore_ascii_case("cpu") {
                cmd.args(["--fp16", "False"]);
            }
        }

        cmd.stdin(Stdio::null());
        cmd
    }

    async fn run_in(&self, scratch: &Path, media_path: &Path, model: ModelSize) -> Result<String> {
        let input = if is_video(media_path) {
            self.extractor.extract_wav(media_path, scratch).await?
        } else {
            media_path.to_path_buf()
        };

        let mut cmd = self.build_command(&input, scratch, model);
        tracing::debug!("Executing command: {:?}", cmd);

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.whisper_command))?;

        if !output.status.success() {
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.whisper_command,
                output.status,
                stderr_tail(&output.stderr)
            ));
        }

        let stem = input
            .file_stem()
            .ok_or_else(|| anyhow!("Invalid media filename: {}", input.display()))?
            .to_string_lossy();
        let text_path = scratch.join(format!("{}.txt", stem));
        let text = tokio::fs::read_to_string(&text_path)
            .await
            .with_context(|| format!("Whisper produced no transcript at {}", text_path.display()))?;

        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl Transcriber for WhisperCli {
    fn name(&self) -> &str {
        "whisper-cli"
    }

    async fn transcribe(&self, media_path: &Path, model: ModelSize) -> Result<String> {
        let start_time = Instant::now();
        let scratch = self
            .scratch_root
            .join(format!("transcribe-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&scratch)
            .await
            .with_context(|| format!("Cannot create scratch dir {}", scratch.display()))?;

        tracing::info!(
            "Starting {} transcription of {}",
            model,
            media_path.display()
        );
        let result = self.run_in(&scratch, media_path, model).await;

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            tracing::warn!("Failed to clean up {}: {}", scratch.display(), e);
        }

        let text = result?;
        tracing::info!(
            "Transcription completed: {} -> {} chars in {:.2}s",
            media_path.display(),
            text.len(),
            start_time.elapsed().as_secs_f64()
        );
        Ok(text)
    }
}
