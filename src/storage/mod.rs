//! # Storage Module
//!
//! Filesystem side of the service: the path sanitizer that guards every
//! user-derived path, and the blob areas for uploads and transcripts.

pub mod files;
pub mod paths;

pub use files::{FileStorage, RemovalReport, TranscriptSidecar};
pub use paths::{resolves_within, sanitize};
