//! Embedding service core.
//!
//! Owns the lifecycle (`Uninitialized → Loading → Ready → ShuttingDown → Stopped`,
//! or `Loading → Failed`) and the write-once [`Pipeline`]. Requests are only served
//! against a pipeline that finished loading; everything else is rejected as not ready.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde::Serialize;

use crate::error::{ServiceError, StartupError};
use crate::pipeline::{Embedding, Pipeline};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Ready,
    /// Terminal. Holds the startup error message for logs and diagnostics.
    Failed(String),
    ShuttingDown,
    Stopped,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Loading => "loading",
            Phase::Ready => "ready",
            Phase::Failed(_) => "failed",
            Phase::ShuttingDown => "shutting_down",
            Phase::Stopped => "stopped",
        }
    }

    /// Status string reported by the health endpoint.
    pub fn health_status(&self) -> &'static str {
        match self {
            Phase::Uninitialized | Phase::Loading => "loading",
            Phase::Ready => "healthy",
            Phase::Failed(_) => "failed",
            Phase::ShuttingDown | Phase::Stopped => "stopping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
}

pub struct EmbeddingService {
    phase: RwLock<Phase>,
    pipeline: OnceLock<Arc<Pipeline>>,
}

impl Default for EmbeddingService {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingService {
    pub fn new() -> Self {
        Self {
            phase: RwLock::new(Phase::Uninitialized),
            pipeline: OnceLock::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn health(&self) -> HealthReport {
        let phase = self.phase();
        let ready = phase == Phase::Ready;
        HealthReport {
            status: phase.health_status(),
            model_loaded: self.pipeline.get().is_some(),
            dimension: self.pipeline.get().filter(|_| ready).map(|p| p.dimension()),
        }
    }

    /// Run `loader` once on a blocking thread and install its pipeline.
    ///
    /// Only the first call does anything; later calls fail with `AlreadyStarted`
    /// without touching the current phase.
    pub async fn start<F>(&self, loader: F) -> Result<(), StartupError>
    where
        F: FnOnce() -> Result<Pipeline, StartupError> + Send + 'static,
    {
        self.begin_loading()?;

        let result = match tokio::task::spawn_blocking(loader).await {
            Ok(result) => result,
            Err(e) => Err(StartupError::Pipeline {
                reason: format!("loader task failed: {e}"),
            }),
        };

        match result {
            Ok(pipeline) => {
                self.install(pipeline);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start embedding service: {}", e);
                self.transition(|_| Some(Phase::Failed(e.to_string())));
                Err(e)
            }
        }
    }

    fn begin_loading(&self) -> Result<(), StartupError> {
        let mut phase = self.phase.write().unwrap_or_else(PoisonError::into_inner);
        if *phase != Phase::Uninitialized {
            return Err(StartupError::AlreadyStarted(phase.name()));
        }
        log::info!("Service phase: {} -> {}", phase.name(), Phase::Loading.name());
        *phase = Phase::Loading;
        Ok(())
    }

    fn install(&self, pipeline: Pipeline) {
        // begin_loading admits exactly one loader, so the cell is always empty here.
        if self.pipeline.set(Arc::new(pipeline)).is_err() {
            log::warn!("Pipeline already installed, keeping the first one");
        }
        // A shutdown requested while loading wins.
        self.transition(|current| (*current == Phase::Loading).then_some(Phase::Ready));
    }

    /// Stop admitting new requests. In-flight requests finish normally.
    pub fn begin_shutdown(&self) {
        self.transition(|current| (*current != Phase::Stopped).then_some(Phase::ShuttingDown));
    }

    pub fn mark_stopped(&self) {
        self.transition(|_| Some(Phase::Stopped));
    }

    fn transition(&self, next: impl FnOnce(&Phase) -> Option<Phase>) {
        let mut phase = self.phase.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(next) = next(&phase) {
            if *phase != next {
                log::info!("Service phase: {} -> {}", phase.name(), next.name());
                *phase = next;
            }
        }
    }

    fn ready_pipeline(&self) -> Result<Arc<Pipeline>, ServiceError> {
        let phase = self.phase();
        match (phase, self.pipeline.get()) {
            (Phase::Ready, Some(pipeline)) => Ok(Arc::clone(pipeline)),
            (phase, _) => Err(ServiceError::NotReady(phase.name())),
        }
    }

    /// Embed one text. Input is validated before the service state is consulted.
    pub async fn embed(&self, text: &str) -> Result<Embedding, ServiceError> {
        validate_text(text)?;
        let pipeline = self.ready_pipeline()?;

        // Closed only if the pipeline is torn down, which never happens while we hold an Arc.
        let permit = Arc::clone(&pipeline.gate)
            .acquire_owned()
            .await
            .map_err(|_| ServiceError::Internal)?;

        // The permit moves into the job: a caller that gives up (client disconnect)
        // does not free the slot while inference is still running.
        let text = text.to_owned();
        let job = move || {
            let result = pipeline.embed_blocking(&text);
            drop(permit);
            result
        };
        match tokio::task::spawn_blocking(job).await {
            Ok(Ok(embedding)) => Ok(embedding),
            // Already logged with context inside the pipeline.
            Ok(Err(_)) => Err(ServiceError::Internal),
            Err(e) => {
                log::error!("Embedding task failed: {}", e);
                Err(ServiceError::Internal)
            }
        }
    }
}

/// Reject empty and whitespace-only input before it reaches the pipeline.
pub fn validate_text(text: &str) -> Result<(), ServiceError> {
    if text.trim().is_empty() {
        return Err(ServiceError::InvalidInput("Text cannot be empty".into()));
    }
    Ok(())
}
