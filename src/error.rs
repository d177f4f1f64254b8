//! Error taxonomy for the embedding pipeline.
//!
//! Startup errors are fatal for the service (it never reaches `Ready`). Request
//! errors are scoped to one call and collapse into [`ServiceError`] at the
//! service boundary, which is the only type the HTTP layer maps to status codes.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while bringing the service up. None of these are retried.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load tokenizer from {}: {reason}", path.display())]
    TokenizerLoad { path: PathBuf, reason: String },

    #[error("failed to load model from {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("checksum verification failed for {}: {reason}", path.display())]
    Checksum { path: PathBuf, reason: String },

    /// Artifacts loaded but the warm-up inference (or the loader itself) failed.
    #[error("pipeline initialization failed: {reason}")]
    Pipeline { reason: String },

    #[error("startup already triggered (current phase: {0})")]
    AlreadyStarted(&'static str),
}

/// Tokenization of request text failed. Not expected for valid UTF-8.
#[derive(Debug, Error)]
#[error("tokenize: {0}")]
pub struct TokenizeError(pub String);

/// Failures while executing the graph for a single request.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("shape mismatch ({context}): expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },

    #[error("onnx runtime: {0}")]
    Runtime(String),

    #[error("model produced non-finite values")]
    NonFinite,
}

impl From<ort::Error> for InferenceError {
    fn from(e: ort::Error) -> Self {
        InferenceError::Runtime(e.to_string())
    }
}

/// Failures while reducing token embeddings to a sentence vector.
#[derive(Debug, Error)]
pub enum PoolingError {
    /// Pooled vector has zero (or non-finite) length and cannot be normalized.
    #[error("degenerate pooled vector (norm = {norm})")]
    DegenerateNorm { norm: f32 },

    #[error("tensor: {0}")]
    Tensor(#[from] candle_core::Error),
}

/// Any failure inside tokenize → infer → pool for one request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Pooling(#[from] PoolingError),
}

/// What callers of the service see. One variant per transport status class.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("service is not ready (phase: {0})")]
    NotReady(&'static str),

    /// Details are logged where the failure happened; the message stays generic.
    #[error("internal error while generating embedding")]
    Internal,
}

impl ServiceError {
    /// Stable machine-readable kind, used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::NotReady(_) => "not_ready",
            ServiceError::Internal => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_error_hides_details() {
        let e = ServiceError::Internal;
        assert_eq!(e.to_string(), "internal error while generating embedding");
        assert_eq!(e.kind(), "internal");
    }

    #[test]
    fn test_startup_error_names_path() {
        let e = StartupError::ModelLoad {
            path: PathBuf::from("/srv/onnx_model/model.onnx"),
            reason: "file not found".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/srv/onnx_model/model.onnx"));
        assert!(msg.contains("file not found"));
    }
}
