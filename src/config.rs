//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms set these)
//! 2. Environment variables (APP_SERVER__PORT, APP_STORAGE__UPLOAD_DIR, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that field names which
//! themselves contain underscores (`upload_dir`, `max_upload_bytes`) survive.

use crate::transcription::ModelSize;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration that contains all settings.
///
/// ## Rust Concepts:
/// - **#[derive(...)]**: `Serialize`/`Deserialize` let the `config` crate build this
///   struct from TOML and environment layers, and let us dump it back out as TOML.
/// - **Nested structs**: each section of config.toml maps onto one struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub transcription: TranscriptionSettings,
}

/// Server-specific configuration settings.
///
/// `workers = 0` means "let actix pick one worker per physical core".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

/// Where uploads, transcripts, the metadata database and the frontend build live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Raw uploaded media, one file per sanitized filename
    pub upload_dir: PathBuf,

    /// Generated `<filename>_transcribe.txt` files and their JSON sidecars
    pub transcript_dir: PathBuf,

    /// Built frontend served for `/` and unmatched non-API paths
    pub static_dir: PathBuf,

    /// sqlx connection string, e.g. `sqlite://data/database.db`
    pub database_url: String,

    /// Hard cap on a single uploaded file, in bytes
    pub max_upload_bytes: usize,

    /// Mark crashed Pending rows as Failed and report orphans at startup
    pub reconcile_on_startup: bool,
}

/// Settings for the external speech-to-text engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    /// Model used when an upload does not name one ("tiny", "base", "small", "medium", "large")
    pub default_model: String,

    /// Executable for the Whisper CLI
    pub whisper_command: String,

    /// Executable used to pull audio tracks out of video containers
    pub ffmpeg_command: String,

    /// Force a spoken language (ISO 639-1); autodetect when unset
    pub language: Option<String>,

    /// Inference device passed through to Whisper ("cpu", "cuda"); engine default when unset
    pub device: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 9010,
                workers: 0,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("uploads"),
                transcript_dir: PathBuf::from("transcripts"),
                static_dir: PathBuf::from("frontend/build"),
                database_url: "sqlite://database.db".to_string(),
                max_upload_bytes: 1024 * 1024 * 1024, // 1 GiB
                reconcile_on_startup: true,
            },
            transcription: TranscriptionSettings {
                default_model: "base".to_string(),
                whisper_command: "whisper".to_string(),
                ffmpeg_command: "ffmpeg".to_string(),
                language: None,
                device: None,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_STORAGE__UPLOAD_DIR=/srv/uploads`: Override upload root
    /// - `APP_TRANSCRIPTION__DEFAULT_MODEL=small`: Override default model
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching these at startup keeps a bad deployment from accepting uploads
    /// it can never store or transcribe.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.upload_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Upload directory must be set"));
        }

        if self.storage.transcript_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Transcript directory must be set"));
        }

        if self.storage.upload_dir == self.storage.transcript_dir {
            return Err(anyhow::anyhow!(
                "Upload and transcript directories must differ"
            ));
        }

        if self.storage.database_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Database URL must be set"));
        }

        if self.storage.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        self.default_model()?;

        Ok(())
    }

    /// The configured default model, parsed.
    pub fn default_model(&self) -> Result<ModelSize> {
        self.transcription.default_model.parse::<ModelSize>()
    }

    /// Render the effective configuration as TOML (logged at startup).
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
