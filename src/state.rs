//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## Ownership Layout:
//! - **config**: immutable after startup, so a plain `Arc<AppConfig>`
//! - **service**: the upload/transcription pipeline; it carries its own locking
//! - **metrics**: `Arc<RwLock<AppMetrics>>`, updated by middleware on every request
//!   and by the upload handler around each transcription
//!
//! ## Lock Poisoning:
//! A panic while a metrics lock is held must not take the whole API down, so
//! every access recovers the guard with `PoisonError::into_inner`. The counters
//! are plain integers and stay meaningful after such a panic.

use crate::config::AppConfig;
use crate::database::DatabaseManager;
use crate::error::AppResult;
use crate::pipeline::TranscriptService;
use crate::storage::FileStorage;
use crate::transcription::Transcriber;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::info;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration, validated before the server starts
    pub config: Arc<AppConfig>,

    /// Upload → transcribe → persist pipeline plus the read/delete operations
    pub service: Arc<TranscriptService>,

    /// Request and transcription counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Uploads currently inside the engine call
    pub active_transcriptions: u32,

    pub transcriptions_completed: u64,
    pub transcriptions_failed: u64,

    /// Per-route statistics, keyed by "METHOD /route/{pattern}"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, service: TranscriptService) -> Self {
        Self {
            config: Arc::new(config),
            service: Arc::new(service),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Build the full state from configuration.
    ///
    /// ## Startup Order:
    /// 1. Create the upload and transcript roots
    /// 2. Open the metadata database (runs migrations)
    /// 3. Reconcile leftovers from a previous crash, before any upload can start
    pub async fn initialize(
        config: AppConfig,
        transcriber: Arc<dyn Transcriber>,
    ) -> AppResult<Self> {
        let storage = FileStorage::new(
            config.storage.upload_dir.clone(),
            config.storage.transcript_dir.clone(),
        );
        storage.ensure_dirs().await?;

        let db = DatabaseManager::new(&config.storage.database_url).await?;
        let default_model = config.default_model()?;
        let service = TranscriptService::new(db, storage, transcriber, default_model);

        if config.storage.reconcile_on_startup {
            let report = service.reconcile().await?;
            info!(
                "Reconciliation finished: {} stale pending, {} missing uploads, {} orphaned uploads",
                report.stale_pending_failed,
                report.missing_uploads.len(),
                report.orphaned_uploads.len()
            );
        }

        Ok(Self::new(config, service))
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Called for every 4xx/5xx response.
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first time we see an endpoint, a zeroed [`EndpointMetric`] is created.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn transcription_started(&self) {
        self.metrics_write().active_transcriptions += 1;
    }

    /// Balance a [`Self::transcription_started`] call. Never goes below zero.
    pub fn transcription_finished(&self, succeeded: bool) {
        let mut metrics = self.metrics_write();
        metrics.active_transcriptions = metrics.active_transcriptions.saturating_sub(1);
        if succeeded {
            metrics.transcriptions_completed += 1;
        } else {
            metrics.transcriptions_failed += 1;
        }
    }

    /// Balance a start for an upload refused before the engine ran.
    pub fn transcription_rejected(&self) {
        let mut metrics = self.metrics_write();
        metrics.active_transcriptions = metrics.active_transcriptions.saturating_sub(1);
    }

    /// Copy of the current metrics, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Total duration ÷ number of requests.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Errors ÷ requests, from 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! State builders for handler tests.

    use super::*;
    use crate::transcription::testing::ScriptedTranscriber;
    use crate::transcription::ModelSize;

    /// An [`AppState`] rooted in a temp dir, with a scripted engine.
    pub async fn state_with(engine: Arc<ScriptedTranscriber>) -> (tempfile::TempDir, AppState) {
        let root = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.upload_dir = root.path().join("uploads");
        config.storage.transcript_dir = root.path().join("transcripts");
        config.storage.static_dir = root.path().join("static");
        config.storage.database_url = format!("sqlite://{}", root.path().join("meta.db").display());

        let state = AppState::initialize(config, engine).await.unwrap();
        assert_eq!(state.service.default_model(), ModelSize::Base);
        (root, state)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::state_with;
    use crate::transcription::testing::ScriptedTranscriber;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_endpoint_metrics() {
        let (_root, state) = state_with(Arc::new(ScriptedTranscriber::succeeding("x"))).await;

        state.record_endpoint_request("GET /api/files", 10, false);
        state.record_endpoint_request("GET /api/files", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /api/files"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_transcription_counters_never_underflow() {
        let (_root, state) = state_with(Arc::new(ScriptedTranscriber::succeeding("x"))).await;

        state.transcription_started();
        state.transcription_finished(true);
        state.transcription_finished(false);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.active_transcriptions, 0);
        assert_eq!(snapshot.transcriptions_completed, 1);
        assert_eq!(snapshot.transcriptions_failed, 1);
    }

    #[tokio::test]
    async fn test_initialize_reconciles_and_creates_dirs() {
        let (root, state) = state_with(Arc::new(ScriptedTranscriber::succeeding("x"))).await;
        assert!(root.path().join("uploads").is_dir());
        assert!(root.path().join("transcripts").is_dir());
        assert!(state.service.list_files().await.unwrap().is_empty());
    }
}
