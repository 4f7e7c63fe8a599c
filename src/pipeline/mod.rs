//! # Pipeline Module
//!
//! Everything that touches more than one of storage, metadata and the engine
//! goes through [`TranscriptService`].

pub mod locks; // Per-filename async locks
pub mod service; // Upload → transcribe → persist, queries and deletion

pub use service::TranscriptService;
