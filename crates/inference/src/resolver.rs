use crate::backend::{BackendHandle, BackendVariant, LoadedModel};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// One way of turning a model path into a loaded model.
pub trait BackendAdapter: Send + Sync {
    fn variant(&self) -> BackendVariant;

    /// Load `model_path`. Must leave no shared state behind on failure.
    fn load(&self, model_path: &str) -> anyhow::Result<LoadedModel>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadAttempt {
    pub variant: BackendVariant,
    pub error: String,
}

impl LoadAttempt {
    pub fn new(variant: BackendVariant, error: impl Into<String>) -> Self {
        Self {
            variant,
            error: error.into(),
        }
    }
}

/// Failures of the most recent resolution pass, in attempt order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LoadAttemptLog(Vec<LoadAttempt>);

impl LoadAttemptLog {
    pub fn attempts(&self) -> &[LoadAttempt] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, attempt: LoadAttempt) {
        self.0.push(attempt);
    }
}

impl From<Vec<LoadAttempt>> for LoadAttemptLog {
    fn from(attempts: Vec<LoadAttempt>) -> Self {
        Self(attempts)
    }
}

impl std::fmt::Display for LoadAttemptLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, attempt) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", attempt.variant, attempt.error)?;
        }
        Ok(())
    }
}

/// Picks the first adapter that can load a model and owns the active handle.
///
/// The handle slot is only ever replaced wholesale. Readers clone the `Arc`
/// once per request, so a reload never changes the model under a running
/// inference.
pub struct Resolver {
    adapters: Vec<Box<dyn BackendAdapter>>,
    active: RwLock<Option<Arc<BackendHandle>>>,
    last_attempts: Mutex<LoadAttemptLog>,
    // One resolution pass at a time; readers of `active` never wait on it
    pass: Mutex<()>,
}

impl Resolver {
    /// Adapters are tried in variant priority order regardless of the order given.
    pub fn new(mut adapters: Vec<Box<dyn BackendAdapter>>) -> Self {
        adapters.sort_by_key(|adapter| adapter.variant());
        Self {
            adapters,
            active: RwLock::new(None),
            last_attempts: Mutex::new(LoadAttemptLog::default()),
            pass: Mutex::new(()),
        }
    }

    pub fn variants(&self) -> Vec<BackendVariant> {
        self.adapters.iter().map(|a| a.variant()).collect()
    }

    /// Try every adapter in order; install the first success.
    ///
    /// On exhaustion the previous handle stays active and the full log is
    /// returned. Either way the log is retained for diagnostics.
    pub fn resolve(&self, model_path: &str) -> Result<Arc<BackendHandle>, LoadAttemptLog> {
        // Serializes passes against each other only. Downloads and clones run
        // under it, but `active` is write-locked just for the final swap.
        let _pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);

        let mut log = LoadAttemptLog::default();

        for adapter in &self.adapters {
            let variant = adapter.variant();
            let _s = tracing::info_span!("load_attempt", %variant, model_path).entered();

            match adapter.load(model_path) {
                Ok(model) => {
                    let handle = Arc::new(BackendHandle::new(model, model_path));
                    *self.active.write().unwrap_or_else(PoisonError::into_inner) =
                        Some(Arc::clone(&handle));
                    *self.attempts_guard() = log;

                    tracing::info!(%variant, model_path, "Backend activated");
                    return Ok(handle);
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    tracing::warn!(%variant, error = %message, "Backend variant failed to load");
                    log.push(LoadAttempt::new(variant, message));
                }
            }
        }

        tracing::error!(model_path, attempts = %log, "All backend variants failed");
        *self.attempts_guard() = log.clone();
        Err(log)
    }

    /// The handle in-flight requests should use, captured once.
    pub fn active(&self) -> Option<Arc<BackendHandle>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Failures recorded by the most recent resolution pass.
    pub fn last_attempts(&self) -> LoadAttemptLog {
        self.attempts_guard().clone()
    }

    fn attempts_guard(&self) -> MutexGuard<'_, LoadAttemptLog> {
        self.last_attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
