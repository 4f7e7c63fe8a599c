//! # Upload-Transcribe Pipeline
//!
//! Orchestrates validation, storage, the transcription engine and metadata
//! updates, and owns the query/delete operations over the same state.
//!
//! ## Upload Steps:
//! 1. Reject empty content, unsupported extensions and unknown model sizes
//! 2. Sanitize the filename and resolve its path inside the upload root
//! 3. Take the per-filename lock
//! 4. Write the bytes (overwriting a previous upload of the same name)
//! 5. Upsert the record as Pending and commit, before the engine runs
//! 6. Run the engine
//! 7. Write transcript + sidecar, mark Completed
//! 8. On any failure in 6–7, mark Failed and report why
//!
//! A crash between 4 and 5 leaves a file without a record; a crash during 6 leaves
//! a Pending record. [`TranscriptService::reconcile`] finds both at startup.

use super::locks::FilenameLocks;
use crate::database::{DatabaseManager, FileMetadataRepository, FileRecord, StatusCounts};
use crate::error::{AppError, AppResult};
use crate::storage::{sanitize, FileStorage, RemovalReport, TranscriptSidecar};
use crate::transcription::{ModelSize, Transcriber};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Media extensions accepted for upload (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "mp4", "mov"];

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub filename: String,
    pub model_size: ModelSize,
}

#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub filename: String,
    pub removal: RemovalReport,
}

/// Findings of the startup consistency pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Pending rows left behind by a crash, now marked Failed
    pub stale_pending_failed: u64,
    /// Records whose upload file is gone
    pub missing_uploads: Vec<String>,
    /// Upload files nobody has a record for
    pub orphaned_uploads: Vec<String>,
}

pub struct TranscriptService {
    db: DatabaseManager,
    storage: FileStorage,
    transcriber: Arc<dyn Transcriber>,
    locks: FilenameLocks,
    default_model: ModelSize,
}

impl TranscriptService {
    pub fn new(
        db: DatabaseManager,
        storage: FileStorage,
        transcriber: Arc<dyn Transcriber>,
        default_model: ModelSize,
    ) -> Self {
        Self {
            db,
            storage,
            transcriber,
            locks: FilenameLocks::new(),
            default_model,
        }
    }

    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.db
    }

    pub fn engine_name(&self) -> &str {
        self.transcriber.name()
    }

    pub fn default_model(&self) -> ModelSize {
        self.default_model
    }

    /// Store, transcribe and record one uploaded file.
    ///
    /// `model_size` of `None` (or blank) means the configured default.
    pub async fn upload(
        &self,
        raw_filename: &str,
        bytes: &[u8],
        model_size: Option<&str>,
    ) -> AppResult<UploadOutcome> {
        if bytes.is_empty() {
            return Err(AppError::NoFileProvided);
        }
        supported_extension(raw_filename)?;
        let model = self.resolve_model(model_size)?;

        let filename = sanitize(raw_filename)?;
        let file_type = supported_extension(&filename)?;
        let upload_path = self.storage.upload_path(&filename)?;

        let _guard = self.locks.acquire(&filename).await;

        self.storage.write_upload(&filename, bytes).await?;
        info!("File saved: {}", upload_path.display());

        FileMetadataRepository::upsert_pending(self.db.pool(), &filename, &file_type, Utc::now())
            .await
            .map_err(|e| AppError::MetadataCommitFailed(e.to_string()))?;

        match self.transcribe_and_persist(&filename, &upload_path, model).await {
            Ok(()) => {
                info!("Upload of {} transcribed with {} model", filename, model);
                Ok(UploadOutcome {
                    filename,
                    model_size: model,
                })
            }
            Err(e) => {
                error!("Error during transcription of {}: {}", filename, e);
                self.mark_failed(&filename).await;
                Err(e)
            }
        }
    }

    fn resolve_model(&self, model_size: Option<&str>) -> AppResult<ModelSize> {
        match model_size.map(str::trim) {
            Some(name) if !name.is_empty() => name
                .parse::<ModelSize>()
                .map_err(|e| AppError::Validation(e.to_string())),
            _ => Ok(self.default_model),
        }
    }

    async fn transcribe_and_persist(
        &self,
        filename: &str,
        upload_path: &Path,
        model: ModelSize,
    ) -> AppResult<()> {
        let text = self
            .transcriber
            .transcribe(upload_path, model)
            .await
            .map_err(|e| AppError::TranscriptionFailed(format!("{:#}", e)))?;

        let transcript_path = self.storage.write_transcript(filename, &text).await?;
        info!("Transcription saved at {}", transcript_path.display());

        let sidecar = TranscriptSidecar {
            filename: filename.to_string(),
            model_size: model.to_string(),
            engine: self.transcriber.name().to_string(),
            transcription_date: Utc::now(),
        };
        self.storage.write_sidecar(filename, &sidecar).await?;

        let updated = FileMetadataRepository::mark_completed(self.db.pool(), filename, &text)
            .await
            .map_err(|e| AppError::MetadataCommitFailed(e.to_string()))?;
        if !updated {
            return Err(AppError::MetadataCommitFailed(format!(
                "record for {} disappeared during transcription",
                filename
            )));
        }
        Ok(())
    }

    /// Best-effort: a failure here is logged, the original error is what the caller sees.
    async fn mark_failed(&self, filename: &str) {
        match FileMetadataRepository::mark_failed(self.db.pool(), filename).await {
            Ok(true) => info!("Marked {} as failed", filename),
            Ok(false) => warn!("No record to mark failed for {}", filename),
            Err(e) => error!("Could not mark {} as failed: {}", filename, e),
        }
    }

    /// All records, newest upload first.
    pub async fn list_files(&self) -> AppResult<Vec<FileRecord>> {
        Ok(FileMetadataRepository::list(self.db.pool()).await?)
    }

    pub async fn status_counts(&self) -> AppResult<StatusCounts> {
        Ok(FileMetadataRepository::status_counts(self.db.pool()).await?)
    }

    /// Whether an upload with this name is present in storage.
    ///
    /// Deliberately a storage-layer probe: a file written just before a crash
    /// exists here even though its record may not.
    pub async fn check_exists(&self, raw_filename: &str) -> AppResult<bool> {
        let filename = sanitize(raw_filename)?;
        self.storage.upload_exists(&filename).await
    }

    /// Transcript text from the metadata record.
    pub async fn get_transcript(&self, raw_filename: &str) -> AppResult<String> {
        let filename = sanitize(raw_filename)?;
        FileMetadataRepository::find_by_filename(self.db.pool(), &filename)
            .await?
            .and_then(|record| record.transcription_text)
            .ok_or_else(|| AppError::NotFound(format!("No transcription for {}", filename)))
    }

    pub async fn transcript_available(&self, raw_filename: &str) -> AppResult<bool> {
        let filename = sanitize(raw_filename)?;
        Ok(
            FileMetadataRepository::find_by_filename(self.db.pool(), &filename)
                .await?
                .is_some_and(|record| record.transcription_text.is_some()),
        )
    }

    /// Bytes of the upload currently on disk.
    pub async fn upload_progress(&self, raw_filename: &str) -> AppResult<u64> {
        let filename = sanitize(raw_filename)?;
        self.storage
            .upload_size(&filename)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", filename)))
    }

    /// Path of a stored upload, checked for containment and existence.
    pub async fn download_path(&self, raw_filename: &str) -> AppResult<(String, PathBuf)> {
        let filename = sanitize(raw_filename)?;
        let path = self.storage.upload_path(&filename)?;
        if !self.storage.upload_exists(&filename).await? {
            return Err(AppError::NotFound(format!("File {} not found", filename)));
        }
        Ok((filename, path))
    }

    /// Remove a record and its files.
    ///
    /// The record is the source of truth: no record means `NotFound`, even if
    /// stray files exist. File removal is best-effort; the row removal decides
    /// success.
    pub async fn delete(&self, raw_filename: &str) -> AppResult<DeleteOutcome> {
        let filename = sanitize(raw_filename)?;
        // Resolve both paths up front so a containment failure refuses the whole delete.
        self.storage.upload_path(&filename)?;
        self.storage.transcript_path(&filename)?;

        let _guard = self.locks.acquire(&filename).await;

        if FileMetadataRepository::find_by_filename(self.db.pool(), &filename)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(format!("File {} not found", filename)));
        }

        let removal = self.storage.remove_artifacts(&filename).await;
        if !removal.failures.is_empty() {
            warn!(
                "Deleting {} left {} file(s) behind",
                filename,
                removal.failures.len()
            );
        }

        let removed = FileMetadataRepository::delete(self.db.pool(), &filename)
            .await
            .map_err(|e| AppError::MetadataCommitFailed(e.to_string()))?;
        if !removed {
            return Err(AppError::NotFound(format!("File {} not found", filename)));
        }

        info!("Deleted record for {}", filename);
        Ok(DeleteOutcome { filename, removal })
    }

    /// Startup consistency pass. Must run before the server accepts uploads.
    pub async fn reconcile(&self) -> AppResult<ReconcileReport> {
        let stale_pending_failed = FileMetadataRepository::fail_stale_pending(self.db.pool())
            .await
            .map_err(|e| AppError::MetadataCommitFailed(e.to_string()))?;
        if stale_pending_failed > 0 {
            warn!(
                "Marked {} interrupted transcription(s) as failed",
                stale_pending_failed
            );
        }

        let records = FileMetadataRepository::list(self.db.pool()).await?;
        let uploads = self.storage.list_uploads().await?;

        let on_disk: HashSet<&str> = uploads.iter().map(String::as_str).collect();
        let known: HashSet<&str> = records.iter().map(|r| r.filename.as_str()).collect();

        let missing_uploads: Vec<String> = records
            .iter()
            .filter(|r| !on_disk.contains(r.filename.as_str()))
            .map(|r| r.filename.clone())
            .collect();
        let orphaned_uploads: Vec<String> = uploads
            .iter()
            .filter(|name| !known.contains(name.as_str()))
            .cloned()
            .collect();

        for name in &missing_uploads {
            warn!("Record {} has no upload file", name);
        }
        for name in &orphaned_uploads {
            warn!("Upload {} has no metadata record", name);
        }

        Ok(ReconcileReport {
            stale_pending_failed,
            missing_uploads,
            orphaned_uploads,
        })
    }
}

/// Lowercased extension of the last path component, if it is a supported media type.
pub fn supported_extension(name: &str) -> AppResult<String> {
    let last_component = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let extension = match last_component.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() || !ext.is_empty() => ext.trim().to_lowercase(),
        _ => String::new(),
    };

    if SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else if extension.is_empty() {
        Err(AppError::UnsupportedFormat(format!(
            "{} has no file extension",
            last_component
        )))
    } else {
        Err(AppError::UnsupportedFormat(extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::FileStatus;
    use crate::transcription::testing::ScriptedTranscriber;
    use std::time::Duration;

    struct Harness {
        _root: tempfile::TempDir,
        service: Arc<TranscriptService>,
        engine: Arc<ScriptedTranscriber>,
    }

    async fn harness(engine: ScriptedTranscriber) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(root.path().join("uploads"), root.path().join("transcripts"));
        storage.ensure_dirs().await.unwrap();
        let url = format!("sqlite://{}", root.path().join("meta.db").display());
        let db = DatabaseManager::new(&url).await.unwrap();

        let engine = Arc::new(engine);
        let service = TranscriptService::new(db, storage, engine.clone(), ModelSize::Base);
        let service = Arc::new(service);
        Harness {
            _root: root,
            service,
            engine,
        }
    }

    async fn wait_for_calls(engine: &ScriptedTranscriber, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.calls().len() < expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("engine never saw the expected number of calls");
    }

    #[test]
    fn test_supported_extension() {
        assert_eq!(supported_extension("talk.WAV").unwrap(), "wav");
        assert_eq!(supported_extension("dir.mp3/clip.mov").unwrap(), "mov");
        assert!(matches!(
            supported_extension("doc.pdf"),
            Err(AppError::UnsupportedFormat(_))
        ));
        assert!(supported_extension("wav").is_err());
        assert!(supported_extension("clip.wav/").is_err());
    }

    #[tokio::test]
    async fn test_upload_then_fetch_transcript() {
        let h = harness(ScriptedTranscriber::succeeding("hello world")).await;

        let outcome = h.service.upload("sample.wav", b"RIFF....", Some("base")).await.unwrap();
        assert_eq!(outcome.filename, "sample.wav");
        assert_eq!(h.service.get_transcript("sample.wav").await.unwrap(), "hello world");
        assert!(h.service.transcript_available("sample.wav").await.unwrap());

        let calls = h.engine.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, ModelSize::Base);

        let storage = h.service.storage();
        let transcript = tokio::fs::read_to_string(storage.transcript_path("sample.wav").unwrap())
            .await
            .unwrap();
        assert_eq!(transcript, "hello world");
        assert!(tokio::fs::try_exists(storage.sidecar_path("sample.wav").unwrap())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_default_and_invalid_model() {
        let h = harness(ScriptedTranscriber::succeeding("x")).await;

        h.service.upload("a.mp3", b"ID3", None).await.unwrap();
        h.service.upload("b.mp3", b"ID3", Some("  ")).await.unwrap();
        let models: Vec<ModelSize> = h.engine.calls().into_iter().map(|c| c.1).collect();
        assert_eq!(models, vec![ModelSize::Base, ModelSize::Base]);

        let err = h.service.upload("c.mp3", b"ID3", Some("gigantic")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!h.service.check_exists("c.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn test_reupload_resets_in_place() {
        let h = harness(ScriptedTranscriber::succeeding("first")).await;
        h.service.upload("a.wav", b"one", None).await.unwrap();
        let before = h.service.list_files().await.unwrap().remove(0);

        h.engine.respond_with(Ok("second"));
        h.service.upload("a.wav", b"two", None).await.unwrap();

        let records = h.service.list_files().await.unwrap();
        assert_eq!(records.len(), 1);
        let after = &records[0];
        assert_eq!(after.id, before.id);
        assert!(after.upload_timestamp > before.upload_timestamp);
        assert_eq!(after.status, FileStatus::Completed);
        assert_eq!(h.service.get_transcript("a.wav").await.unwrap(), "second");

        let (_, path) = h.service.download_path("a.wav").await.unwrap();
        assert_eq!(tokio::fs::read(path).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_engine_failure_marks_failed() {
        let h = harness(ScriptedTranscriber::failing("model exploded")).await;

        let err = h.service.upload("a.ogg", b"OggS", None).await.unwrap_err();
        assert!(matches!(err, AppError::TranscriptionFailed(ref m) if m.contains("model exploded")));

        let record = h.service.list_files().await.unwrap().remove(0);
        assert_eq!(record.status, FileStatus::Failed);
        assert!(record.transcription_text.is_none());
        assert!(matches!(
            h.service.get_transcript("a.ogg").await,
            Err(AppError::NotFound(_))
        ));
        // The upload itself is kept so a retry is just another upload.
        assert!(h.service.check_exists("a.ogg").await.unwrap());

        h.engine.respond_with(Ok("recovered"));
        h.service.upload("a.ogg", b"OggS", None).await.unwrap();
        assert_eq!(h.service.get_transcript("a.ogg").await.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn test_rejections_write_nothing() {
        let h = harness(ScriptedTranscriber::succeeding("x")).await;

        assert!(matches!(
            h.service.upload("report.pdf", b"%PDF", None).await,
            Err(AppError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            h.service.upload("empty.wav", b"", None).await,
            Err(AppError::NoFileProvided)
        ));
        for raw in ["../escape.wav", "/etc/evil.wav", "a/../../b.wav"] {
            assert!(matches!(
                h.service.upload(raw, b"RIFF", None).await,
                Err(AppError::InvalidPath(_))
            ));
        }

        assert!(h.service.list_files().await.unwrap().is_empty());
        assert!(h.service.storage().list_uploads().await.unwrap().is_empty());
        assert!(h.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let h = harness(ScriptedTranscriber::succeeding("bye")).await;
        h.service.upload("a.m4a", b"....ftyp", None).await.unwrap();

        let outcome = h.service.delete("a.m4a").await.unwrap();
        assert!(outcome.removal.upload_removed);
        assert!(outcome.removal.transcript_removed);
        assert!(outcome.removal.sidecar_removed);
        assert!(!h.service.check_exists("a.m4a").await.unwrap());

        assert!(matches!(
            h.service.delete("a.m4a").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.service.delete("../a.m4a").await,
            Err(AppError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_progress_and_download_missing() {
        let h = harness(ScriptedTranscriber::succeeding("x")).await;
        h.service.upload("a.wav", b"12345", None).await.unwrap();

        assert_eq!(h.service.upload_progress("a.wav").await.unwrap(), 5);
        assert!(matches!(
            h.service.upload_progress("b.wav").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.service.download_path("b.wav").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_finds_crash_leftovers() {
        let h = harness(ScriptedTranscriber::succeeding("x")).await;
        h.service.upload("done.wav", b"RIFF", None).await.unwrap();

        // Crash mid-transcription: a Pending row with its file.
        h.service.storage().write_upload("crashed.wav", b"RIFF").await.unwrap();
        FileMetadataRepository::upsert_pending(h.service.database().pool(), "crashed.wav", "wav", Utc::now())
            .await
            .unwrap();
        // Crash between file write and metadata commit.
        h.service.storage().write_upload("orphan.mp3", b"ID3").await.unwrap();
        // Upload removed behind the service's back.
        h.service.upload("gone.wav", b"RIFF", None).await.unwrap();
        tokio::fs::remove_file(h.service.storage().upload_path("gone.wav").unwrap())
            .await
            .unwrap();

        let report = h.service.reconcile().await.unwrap();
        assert_eq!(report.stale_pending_failed, 1);
        assert_eq!(report.missing_uploads, vec!["gone.wav".to_string()]);
        assert_eq!(report.orphaned_uploads, vec!["orphan.mp3".to_string()]);

        let counts = h.service.status_counts().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test]
    async fn test_same_stem_uploads_keep_their_own_transcripts() {
        let h = harness(ScriptedTranscriber::succeeding("wav text")).await;
        h.service.upload("talk.wav", b"RIFF", None).await.unwrap();
        h.engine.respond_with(Ok("mp3 text"));
        h.service.upload("talk.mp3", b"ID3", None).await.unwrap();

        let storage = h.service.storage();
        let wav_transcript = storage.transcript_path("talk.wav").unwrap();
        assert_eq!(tokio::fs::read_to_string(&wav_transcript).await.unwrap(), "wav text");

        h.service.delete("talk.mp3").await.unwrap();
        assert!(tokio::fs::try_exists(&wav_transcript).await.unwrap());
        assert!(tokio::fs::try_exists(storage.sidecar_path("talk.wav").unwrap())
            .await
            .unwrap());
        assert_eq!(h.service.get_transcript("talk.wav").await.unwrap(), "wav text");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_name_uploads_are_serialized() {
        let h = harness(ScriptedTranscriber::succeeding("first").gated()).await;

        let service = h.service.clone();
        let first = tokio::spawn(async move { service.upload("a.wav", b"one", None).await });
        wait_for_calls(&h.engine, 1).await;

        let service = h.service.clone();
        let second = tokio::spawn(async move { service.upload("a.wav", b"two", None).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The second upload is parked on the filename lock: no engine call, no overwrite.
        assert_eq!(h.engine.calls().len(), 1);
        assert!(!second.is_finished());
        let (_, path) = h.service.download_path("a.wav").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"one");

        h.engine.release(1);
        first.await.unwrap().unwrap();
        assert_eq!(h.service.get_transcript("a.wav").await.unwrap(), "first");

        wait_for_calls(&h.engine, 2).await;
        h.engine.respond_with(Ok("second"));
        h.engine.release(1);
        second.await.unwrap().unwrap();

        let records = h.service.list_files().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, FileStatus::Completed);
        assert_eq!(h.service.get_transcript("a.wav").await.unwrap(), "second");
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"two");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_different_names_transcribe_concurrently() {
        let h = harness(ScriptedTranscriber::succeeding("parallel").gated()).await;

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let service = h.service.clone();
                tokio::spawn(async move {
                    let name = format!("clip{}.wav", i);
                    service.upload(&name, b"RIFF", None).await
                })
            })
            .collect();

        // All eight are inside the engine at once before any is let through.
        wait_for_calls(&h.engine, 8).await;
        h.engine.release(8);
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let counts = h.service.status_counts().await.unwrap();
        assert_eq!(counts.completed, 8);
        assert_eq!(counts.total(), 8);
    }
}
