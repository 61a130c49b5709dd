//! Process-wide model slot with single-flight loading

use crate::error::LoadError;
use crate::models::loader::ModelLoader;
use crate::models::LoadedModel;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Holds either a fully loaded model or nothing.
///
/// The slot is only written with a complete [`LoadedModel`] or cleared, so
/// readers never observe metadata without its model.
pub struct ModelCache {
    loader: ModelLoader,
    slot: RwLock<Option<Arc<LoadedModel>>>,
    /// Serializes load attempts so a cold start fetches once
    load_gate: Mutex<()>,
    load_attempts: AtomicU64,
    load_failures: AtomicU64,
}

impl ModelCache {
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            loader,
            slot: RwLock::new(None),
            load_gate: Mutex::new(()),
            load_attempts: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
        }
    }

    /// Currently installed model, without attempting a load
    pub fn current(&self) -> Option<Arc<LoadedModel>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return the installed model, loading it first if the slot is empty.
    ///
    /// Returns `None` when the load fails; the failure is logged and the next
    /// call tries again.
    pub async fn get_or_load(&self) -> Option<Arc<LoadedModel>> {
        if let Some(model) = self.current() {
            return Some(model);
        }

        let _gate = self.load_gate.lock().await;
        if let Some(model) = self.current() {
            debug!("Model was loaded by a concurrent request");
            return Some(model);
        }

        self.load_into_slot().await.ok()
    }

    /// Replace the installed model with a fresh load.
    ///
    /// On failure the slot is cleared, matching a failed cold start.
    pub async fn reload(&self) -> Result<Arc<LoadedModel>, LoadError> {
        let _gate = self.load_gate.lock().await;
        self.load_into_slot().await
    }

    pub fn load_attempts(&self) -> u64 {
        self.load_attempts.load(Ordering::Relaxed)
    }

    pub fn load_failures(&self) -> u64 {
        self.load_failures.load(Ordering::Relaxed)
    }

    async fn load_into_slot(&self) -> Result<Arc<LoadedModel>, LoadError> {
        self.load_attempts.fetch_add(1, Ordering::Relaxed);

        match self.loader.load().await {
            Ok(model) => {
                let model = Arc::new(model);
                self.install(Some(model.clone()));
                info!(
                    container = %self.loader.container(),
                    features = model.features().len(),
                    format = model.format.as_str(),
                    "Model installed"
                );
                Ok(model)
            }
            Err(e) => {
                self.load_failures.fetch_add(1, Ordering::Relaxed);
                self.install(None);
                error!(
                    container = %self.loader.container(),
                    error = %e,
                    "Failed to load model or metadata"
                );
                Err(e)
            }
        }
    }

    fn install(&self, model: Option<Arc<LoadedModel>>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = model;
    }
}
