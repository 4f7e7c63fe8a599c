//! # File REST API Handlers
//!
//! Thin HTTP layer over [`crate::pipeline::TranscriptService`]: extract, call,
//! serialize. Every error is an [`AppError`] and becomes a JSON body through
//! its `ResponseError` impl.
//!
//! ## Available Endpoints:
//! - `POST /api/upload` - Upload a media file and transcribe it
//! - `GET /api/files` - List all file records, newest first
//! - `GET /api/check-file/{filename}` - Is an upload with this name stored?
//! - `GET /api/download/{filename}` - Stream the raw upload back
//! - `GET /api/transcription/{filename}` - Transcript text (also `/api/transcript/{filename}`)
//! - `GET /api/transcript-available/{filename}` - Is a completed transcript recorded?
//! - `GET /api/check-progress?filename=` - Bytes of the upload currently stored
//! - `DELETE /api/delete/{filename}` - Remove record, upload, transcript and sidecar

use super::content_type_for;
use crate::database::FileRecord;
use crate::error::AppError;
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::web::{self, Bytes};
use actix_web::HttpResponse;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// Download chunk size.
const CHUNK_SIZE: usize = 64 * 1024;

/// Longest accepted `model_size` form value.
const MAX_MODEL_FIELD_BYTES: usize = 64;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub transcription_text: String,
}

#[derive(Debug, Serialize)]
pub struct AvailableResponse {
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub current_size: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub filename: Option<String>,
}

/// Parts of the multipart form we care about.
#[derive(Debug, Default)]
struct UploadForm {
    filename: Option<String>,
    bytes: Vec<u8>,
    model_size: Option<String>,
}

/// Upload a media file and transcribe it.
///
/// ## Endpoint: `POST /api/upload`
///
/// ## Form Fields:
/// - `file`: the media file (mp3, wav, ogg, m4a, mp4, mov)
/// - `model_size`: optional, one of tiny/base/small/medium/large
///
/// ## Response:
/// ```json
/// { "message": "File uploaded and transcribed successfully", "filename": "sample.wav" }
/// ```
///
/// The request stays open until transcription finishes. The work runs in its
/// own task, so a client that disconnects early does not leave a half-written
/// record behind.
pub async fn upload_file(
    app_state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let form = read_upload_form(payload, app_state.config.storage.max_upload_bytes).await?;

    let raw_filename = match form.filename {
        Some(name) if !name.trim().is_empty() => name,
        _ => return Err(AppError::NoFileProvided),
    };
    info!(
        "Received upload {} ({} bytes, model {:?})",
        raw_filename,
        form.bytes.len(),
        form.model_size
    );

    let state = app_state.clone();
    let bytes = form.bytes;
    let model_size = form.model_size;

    app_state.transcription_started();
    let task = tokio::spawn(async move {
        let result = state
            .service
            .upload(&raw_filename, &bytes, model_size.as_deref())
            .await;
        match &result {
            Ok(_) => state.transcription_finished(true),
            Err(e) if e.is_client_error() => state.transcription_rejected(),
            Err(_) => state.transcription_finished(false),
        }
        result
    });

    let outcome = task
        .await
        .map_err(|e| AppError::Internal(format!("Upload task aborted: {}", e)))??;

    Ok(HttpResponse::Ok().json(UploadResponse {
        message: "File uploaded and transcribed successfully".to_string(),
        filename: outcome.filename,
    }))
}

async fn read_upload_form(mut payload: Multipart, max_bytes: usize) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    while let Some(mut field) = payload.try_next().await? {
        let (name, filename) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().unwrap_or_default().to_string(),
                cd.get_filename().map(str::to_string),
            ),
            None => (String::new(), None),
        };

        match name.as_str() {
            "file" => {
                form.bytes = read_field(&mut field, max_bytes, "file").await?;
                form.filename = filename;
            }
            "model_size" => {
                let raw = read_field(&mut field, MAX_MODEL_FIELD_BYTES, "model_size").await?;
                form.model_size = Some(String::from_utf8_lossy(&raw).trim().to_string());
            }
            other => {
                warn!("Ignoring unexpected form field {:?}", other);
                while field.try_next().await?.is_some() {}
            }
        }
    }

    Ok(form)
}

async fn read_field(field: &mut Field, limit: usize, what: &str) -> Result<Vec<u8>, AppError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        if data.len() + chunk.len() > limit {
            return Err(AppError::Validation(format!(
                "Field {} exceeds the {} byte limit",
                what, limit
            )));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

/// List every file record, newest upload first.
///
/// ## Endpoint: `GET /api/files`
///
/// An empty store returns `[]`.
pub async fn list_files(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let records: Vec<FileRecord> = app_state.service.list_files().await?;
    Ok(HttpResponse::Ok().json(records))
}

/// ## Endpoint: `GET /api/check-file/{filename}`
pub async fn check_file(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let exists = app_state.service.check_exists(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ExistsResponse { exists }))
}

/// Stream a stored upload back as an attachment.
///
/// ## Endpoint: `GET /api/download/{filename}`
pub async fn download_file(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let (filename, file_path) = app_state.service.download_path(&path.into_inner()).await?;

    let file = tokio::fs::File::open(&file_path)
        .await
        .map_err(|e| AppError::Storage(format!("Cannot open {}: {}", filename, e)))?;

    let body = futures_util::stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok::<_, std::io::Error>(Bytes::from(buf)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });

    Ok(HttpResponse::Ok()
        .content_type(content_type_for(&filename))
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(filename)],
        })
        .streaming(body))
}

/// ## Endpoint: `GET /api/transcription/{filename}`
///
/// ## Response:
/// ```json
/// { "transcription_text": "hello world" }
/// ```
pub async fn get_transcription(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let transcription_text = app_state.service.get_transcript(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(TranscriptResponse { transcription_text }))
}

/// ## Endpoint: `GET /api/transcript-available/{filename}`
pub async fn transcript_available(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let available = app_state
        .service
        .transcript_available(&path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(AvailableResponse { available }))
}

/// ## Endpoint: `GET /api/check-progress?filename=<name>`
pub async fn check_progress(
    app_state: web::Data<AppState>,
    query: web::Query<ProgressQuery>,
) -> Result<HttpResponse, AppError> {
    let filename = query
        .into_inner()
        .filename
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::Validation("filename query parameter is required".to_string()))?;

    let current_size = app_state.service.upload_progress(&filename).await?;
    Ok(HttpResponse::Ok().json(ProgressResponse { current_size }))
}

/// ## Endpoint: `DELETE /api/delete/{filename}`
pub async fn delete_file(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let outcome = app_state.service.delete(&path.into_inner()).await?;
    info!("File {} deleted", outcome.filename);
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "File deleted successfully".to_string(),
    }))
}

/// Register the file routes under `/api`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/upload", web::post().to(upload_file))
        .route("/files", web::get().to(list_files))
        .route("/check-file/{filename}", web::get().to(check_file))
        .route("/download/{filename}", web::get().to(download_file))
        .route("/transcription/{filename}", web::get().to(get_transcription))
        .route("/transcript/{filename}", web::get().to(get_transcription))
        .route(
            "/transcript-available/{filename}",
            web::get().to(transcript_available),
        )
        .route("/check-progress", web::get().to(check_progress))
        .route("/delete/{filename}", web::delete().to(delete_file));
}
