//! Process-scoped prewarm storage.
//!
//! Expensive resources are loaded once per worker process, before any job is
//! assigned, into a [`ProcessUserData`] store. The store is written during
//! prewarm and then published; from that point on it is read-only and shared
//! by every session in the process. Sessions that start early wait for the
//! publication for a bounded time and then fail fast.

use crate::vad::{EnergyVad, VadOptions, VoiceActivityDetector};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

/// Key under which prewarm stores the shared voice-activity detector.
pub const VAD_KEY: &str = "vad";

#[derive(Debug, thiserror::Error)]
pub enum PrewarmError {
    #[error("process storage was already published; `{0}` cannot be inserted")]
    AlreadyPublished(String),
    #[error("prewarm did not complete within {0:?}")]
    NotReady(Duration),
    #[error("prewarmed resource `{0}` is missing or has an unexpected type")]
    MissingResource(&'static str),
    #[error("failed to load `{resource}`: {source}")]
    Load {
        resource: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Key/value store that lives as long as the worker process.
pub struct ProcessUserData {
    entries: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    published: watch::Sender<bool>,
}

impl Default for ProcessUserData {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            published: watch::channel(false).0,
        }
    }
}

impl std::fmt::Debug for ProcessUserData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        f.debug_struct("ProcessUserData")
            .field("keys", &keys)
            .field("published", &self.is_published())
            .finish()
    }
}

impl ProcessUserData {
    pub fn insert<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<(), PrewarmError> {
        let key = key.into();
        if self.is_published() {
            return Err(PrewarmError::AlreadyPublished(key));
        }
        self.entries.write().insert(key, Arc::new(value));
        Ok(())
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let entry = self.entries.read().get(key).cloned()?;
        entry.downcast::<T>().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Seals the store. Later inserts are rejected.
    pub fn publish(&self) {
        self.published.send_replace(true);
    }

    pub fn is_published(&self) -> bool {
        *self.published.borrow()
    }

    /// Waits until the store is published, at most `timeout`.
    pub async fn wait_published(&self, timeout: Duration) -> Result<(), PrewarmError> {
        let mut rx = self.published.subscribe();
        let published = async move {
            while !*rx.borrow_and_update() {
                // The sender lives in `self`, so the channel outlives this wait.
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };
        tokio::time::timeout(timeout, published)
            .await
            .map_err(|_| PrewarmError::NotReady(timeout))
    }
}

/// Shared handle to the prewarmed detector, as stored under [`VAD_KEY`].
#[derive(Debug, Clone)]
pub struct SharedVad(pub Arc<dyn VoiceActivityDetector>);

/// Handle to the worker process as seen by prewarm and job entrypoints.
#[derive(Debug, Default)]
pub struct JobProcess {
    pub userdata: ProcessUserData,
    prewarm_lock: Mutex<()>,
}

impl JobProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches the prewarmed detector, waiting for prewarm to publish first.
    pub async fn vad(&self, wait: Duration) -> Result<SharedVad, PrewarmError> {
        self.userdata.wait_published(wait).await?;
        self.userdata
            .get::<SharedVad>(VAD_KEY)
            .map(|vad| (*vad).clone())
            .ok_or(PrewarmError::MissingResource(VAD_KEY))
    }
}

/// Loads the voice-activity detector into process storage and publishes it.
///
/// Safe to call more than once, also concurrently: only the first call loads.
pub async fn prewarm(proc: &JobProcess, options: VadOptions) -> Result<(), PrewarmError> {
    let _guard = proc.prewarm_lock.lock().await;
    if proc.userdata.is_published() {
        debug!("Process already prewarmed, skipping");
        return Ok(());
    }

    let vad = tokio::task::spawn_blocking(move || EnergyVad::load(options))
        .await
        .map_err(|e| PrewarmError::Load {
            resource: VAD_KEY,
            source: e.into(),
        })?
        .map_err(|source| PrewarmError::Load {
            resource: VAD_KEY,
            source,
        })?;
    info!(vad = vad.name(), threshold = vad.threshold(), "Loaded voice activity detector");

    proc.userdata.insert(VAD_KEY, SharedVad(Arc::new(vad)))?;
    proc.userdata.publish();
    Ok(())
}
