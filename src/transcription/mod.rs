//! # Transcription Module
//!
//! Speech-to-text is delegated to an external engine. The pipeline only sees the
//! [`Transcriber`] trait; the default implementation shells out to the Whisper CLI.
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, the default
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest

pub mod audio; // ffmpeg audio extraction for video uploads
pub mod engine; // Transcriber trait and Whisper CLI backend
pub mod model; // Model size selector

pub use engine::{Transcriber, WhisperCli};
pub use model::ModelSize;
