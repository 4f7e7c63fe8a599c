//! # File Storage
//!
//! Two flat directories keyed by sanitized filename:
//! - `uploads/<filename>`: the raw media exactly as uploaded
//! - `transcripts/<filename>_transcribe.txt` plus `transcripts/<filename>_metadata.json`
//!
//! Artifacts are named after the whole filename, extension included, so
//! `talk.wav` and `talk.mp3` never share a transcript.
//!
//! Every path handed out here has been through [`contained_path`]. Callers pass
//! names that already went through [`super::sanitize`].

use super::paths::contained_path;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Suffix appended to a filename to name its transcript.
pub const TRANSCRIPT_SUFFIX: &str = "_transcribe.txt";

/// Suffix appended to a filename to name its JSON sidecar.
pub const SIDECAR_SUFFIX: &str = "_metadata.json";

/// Details of the last successful transcription, written next to the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSidecar {
    pub filename: String,
    pub model_size: String,
    pub engine: String,
    pub transcription_date: DateTime<Utc>,
}

/// What a best-effort cleanup actually removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    pub upload_removed: bool,
    pub transcript_removed: bool,
    pub sidecar_removed: bool,
    /// Artifacts that existed but could not be removed
    pub failures: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    upload_dir: PathBuf,
    transcript_dir: PathBuf,
}

impl FileStorage {
    pub fn new(upload_dir: impl Into<PathBuf>, transcript_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            transcript_dir: transcript_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn transcript_dir(&self) -> &Path {
        &self.transcript_dir
    }

    /// Create both storage roots if they are missing.
    pub async fn ensure_dirs(&self) -> AppResult<()> {
        for dir in [&self.upload_dir, &self.transcript_dir] {
            if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    AppError::Storage(format!("Cannot create {}: {}", dir.display(), e))
                })?;
                info!("Created storage directory at {}", dir.display());
            }
        }
        Ok(())
    }

    pub fn upload_path(&self, safe_name: &str) -> AppResult<PathBuf> {
        contained_path(&self.upload_dir, safe_name)
    }

    pub fn transcript_path(&self, safe_name: &str) -> AppResult<PathBuf> {
        contained_path(&self.transcript_dir, &derived_name(safe_name, TRANSCRIPT_SUFFIX))
    }

    pub fn sidecar_path(&self, safe_name: &str) -> AppResult<PathBuf> {
        contained_path(&self.transcript_dir, &derived_name(safe_name, SIDECAR_SUFFIX))
    }

    /// Store upload bytes, replacing any previous file of the same name.
    ///
    /// Bytes land in a hidden temp sibling first and are renamed into place, so a
    /// reader never sees a half-written upload.
    pub async fn write_upload(&self, safe_name: &str, bytes: &[u8]) -> AppResult<PathBuf> {
        let target = self.upload_path(safe_name)?;
        write_atomically(&self.upload_dir, &target, bytes).await?;
        debug!("Stored {} bytes at {}", bytes.len(), target.display());
        Ok(target)
    }

    pub async fn write_transcript(&self, safe_name: &str, text: &str) -> AppResult<PathBuf> {
        let target = self.transcript_path(safe_name)?;
        write_atomically(&self.transcript_dir, &target, text.as_bytes()).await?;
        Ok(target)
    }

    pub async fn write_sidecar(
        &self,
        safe_name: &str,
        sidecar: &TranscriptSidecar,
    ) -> AppResult<PathBuf> {
        let target = self.sidecar_path(safe_name)?;
        let body = serde_json::to_vec_pretty(sidecar)
            .map_err(|e| AppError::StorageWriteFailed(e.to_string()))?;
        write_atomically(&self.transcript_dir, &target, &body).await?;
        Ok(target)
    }

    pub async fn upload_exists(&self, safe_name: &str) -> AppResult<bool> {
        let path = self.upload_path(safe_name)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Size on disk of a stored upload, `None` when it is not there.
    pub async fn upload_size(&self, safe_name: &str) -> AppResult<Option<u64>> {
        let path = self.upload_path(safe_name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Storage(e.to_string())),
        }
    }

    /// Remove upload, transcript and sidecar for a filename.
    ///
    /// Missing files are fine. Other failures are logged and reported but never
    /// abort the cleanup.
    pub async fn remove_artifacts(&self, safe_name: &str) -> RemovalReport {
        let mut report = RemovalReport::default();

        report.upload_removed = self
            .remove_one(self.upload_path(safe_name), &mut report.failures)
            .await;
        report.transcript_removed = self
            .remove_one(self.transcript_path(safe_name), &mut report.failures)
            .await;
        report.sidecar_removed = self
            .remove_one(self.sidecar_path(safe_name), &mut report.failures)
            .await;

        report
    }

    async fn remove_one(&self, path: AppResult<PathBuf>, failures: &mut Vec<PathBuf>) -> bool {
        let path = match path {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping removal: {}", e);
                return false;
            }
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted {}", path.display());
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                failures.push(path);
                false
            }
        }
    }

    /// Names of all regular files in the upload root, skipping in-progress temp files.
    pub async fn list_uploads(&self) -> AppResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.upload_dir)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_file && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// `sample.wav` + `_transcribe.txt` → `sample.wav_transcribe.txt`
fn derived_name(safe_name: &str, suffix: &str) -> String {
    format!("{}{}", safe_name, suffix)
}

async fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> AppResult<()> {
    let temp = dir.join(format!(".{}.part", Uuid::new_v4()));

    let result = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, target).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(AppError::StorageWriteFailed(format!(
            "{}: {}",
            target.display(),
            e
        )));
    }
    Ok(())
}
