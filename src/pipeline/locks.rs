//! Per-filename serialization.
//!
//! A re-upload and an in-flight transcription of the same filename must not
//! interleave, but different filenames should run in parallel. Each filename
//! gets its own async mutex; the map itself is only locked for the lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct FilenameLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FilenameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `filename`. Released when the guard drops.
    pub async fn acquire(&self, filename: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Only the map holds these: nobody owns or awaits them.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(filename.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of filenames currently tracked (held, awaited, or not yet pruned).
    pub fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
