// pipeline.rs — tokenize → encode → pool, over state loaded once at startup.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::artifacts::ArtifactPaths;
use crate::config;
use crate::embeddings::engine::{Encoder, OnnxEncoder};
use crate::embeddings::pooling::pool_and_normalize;
use crate::embeddings::tokenizer::TextTokenizer;
use crate::error::{InferenceError, PipelineError, StartupError};

/// One sentence embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub dimension: usize,
    /// Tokens fed to the model, after truncation and including sentinels.
    pub token_count: usize,
}

/// Knobs for loading the pipeline from disk.
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub max_length: usize,
    pub sessions: usize,
    pub intra_threads: usize,
}

/// Immutable after construction; shared by every request.
pub struct Pipeline {
    tokenizer: TextTokenizer,
    encoder: Box<dyn Encoder>,
    dimension: usize,
    /// One permit per encoder slot, so waiting happens here instead of on a blocking thread.
    /// A permit travels with the blocking job and is released only when inference ends.
    pub(crate) gate: Arc<Semaphore>,
}

impl Pipeline {
    /// Assemble a pipeline and run one warm-up inference to fix the hidden dimension.
    pub fn new(tokenizer: TextTokenizer, encoder: Box<dyn Encoder>) -> Result<Self, StartupError> {
        let warmup_err = |reason: String| StartupError::Pipeline { reason };

        let probe = tokenizer
            .tokenize(config::embedding::WARMUP_TEXT)
            .map_err(|e| warmup_err(e.to_string()))?;
        let output = encoder.encode(&probe).map_err(|e| warmup_err(e.to_string()))?;
        if output.hidden_size == 0 {
            return Err(warmup_err("encoder reports hidden size 0".into()));
        }
        pool_and_normalize(&output, &probe.attention_mask).map_err(|e| warmup_err(e.to_string()))?;

        let dimension = output.hidden_size;
        let slots = encoder.slots().max(1);
        log::info!(
            "Pipeline ready: {} (dimension={}, max_length={}, slots={})",
            encoder.describe(),
            dimension,
            tokenizer.max_length(),
            slots
        );

        Ok(Self {
            tokenizer,
            encoder,
            dimension,
            gate: Arc::new(Semaphore::new(slots)),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn max_length(&self) -> usize {
        self.tokenizer.max_length()
    }

    /// Run the whole pipeline on the calling thread. Blocks for the duration of inference.
    ///
    /// No input policy here: empty text yields the sentinel-only embedding.
    pub fn embed_blocking(&self, text: &str) -> Result<Embedding, PipelineError> {
        let input = self.tokenizer.tokenize(text).inspect_err(|e| {
            log::error!("Tokenization failed (chars={}): {}", text.chars().count(), e);
        })?;

        let output = self.encoder.encode(&input).inspect_err(|e| {
            log::error!("Inference failed (tokens={}): {}", input.len(), e);
        })?;

        if output.hidden_size != self.dimension {
            let err = InferenceError::ShapeMismatch {
                context: "hidden dimension",
                expected: self.dimension.to_string(),
                actual: output.hidden_size.to_string(),
            };
            log::error!("Inference failed (tokens={}): {}", input.len(), err);
            return Err(err.into());
        }

        let values = pool_and_normalize(&output, &input.attention_mask).inspect_err(|e| {
            log::error!("Pooling failed (tokens={}): {}", input.len(), e);
        })?;

        log::debug!("Embedded {} tokens into {} dims", input.len(), values.len());
        Ok(Embedding {
            dimension: values.len(),
            values,
            token_count: input.len(),
        })
    }
}

/// Verify artifacts and build the production pipeline (tokenizer.json + ONNX graph).
pub fn load_pipeline(paths: &ArtifactPaths, settings: &LoadSettings) -> Result<Pipeline, StartupError> {
    log::info!("Loading tokenizer from: {}", paths.tokenizer_dir.display());
    log::info!("Loading model from: {}", paths.model_path.display());

    paths.verify_present()?;
    let verified = paths.verify_checksums()?;
    if verified > 0 {
        log::info!("Verified {} artifact checksums", verified);
    }

    let tokenizer = TextTokenizer::load(&paths.tokenizer_dir, settings.max_length)?;
    let encoder = OnnxEncoder::load(&paths.model_path, settings.sessions, settings.intra_threads)?;

    Pipeline::new(tokenizer, Box::new(encoder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::engine::TokenEmbeddings;
    use crate::embeddings::tokenizer::TokenizedInput;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic per-token vectors derived from the token id.
    struct HashEncoder {
        hidden: usize,
    }

    impl Encoder for HashEncoder {
        fn encode(&self, input: &TokenizedInput) -> Result<TokenEmbeddings, InferenceError> {
            let hidden = self.hidden;
            let values = input
                .ids
                .iter()
                .flat_map(|&id| (0..hidden).map(move |j| ((id as usize * 31 + j * 7) % 13) as f32 - 5.5))
                .collect();
            Ok(TokenEmbeddings {
                values,
                seq_len: input.len(),
                hidden_size: hidden,
            })
        }

        fn describe(&self) -> String {
            "hash".into()
        }
    }

    /// Correct on the first call, wrong hidden size afterwards.
    struct DriftingEncoder {
        calls: AtomicUsize,
    }

    impl Encoder for DriftingEncoder {
        fn encode(&self, input: &TokenizedInput) -> Result<TokenEmbeddings, InferenceError> {
            let hidden = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 { 4 } else { 6 };
            Ok(TokenEmbeddings {
                values: vec![1.0; input.len() * hidden],
                seq_len: input.len(),
                hidden_size: hidden,
            })
        }

        fn describe(&self) -> String {
            "drifting".into()
        }
    }

    struct ZeroEncoder;

    impl Encoder for ZeroEncoder {
        fn encode(&self, input: &TokenizedInput) -> Result<TokenEmbeddings, InferenceError> {
            Ok(TokenEmbeddings {
                values: vec![0.0; input.len() * 4],
                seq_len: input.len(),
                hidden_size: 4,
            })
        }

        fn describe(&self) -> String {
            "zero".into()
        }
    }

    fn tokenizer(max_length: usize) -> TextTokenizer {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/tokenizer");
        TextTokenizer::load(&dir, max_length).unwrap()
    }

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_dimension_fixed_at_warmup() {
        let p = Pipeline::new(tokenizer(512), Box::new(HashEncoder { hidden: 8 })).unwrap();
        assert_eq!(p.dimension(), 8);
        assert_eq!(p.gate.available_permits(), 1);
    }

    #[test]
    fn test_embedding_is_unit_length_and_stable() {
        let p = Pipeline::new(tokenizer(512), Box::new(HashEncoder { hidden: 8 })).unwrap();
        let a = p.embed_blocking("Machine learning is awesome!").unwrap();
        let b = p.embed_blocking("Machine learning is awesome!").unwrap();
        assert_eq!(a.dimension, 8);
        assert_eq!(a.values.len(), 8);
        assert!((norm(&a.values) - 1.0).abs() < 1e-5);
        assert_eq!(a, b);
        assert_eq!(a.token_count, 7);
    }

    #[test]
    fn test_max_length_follows_tokenizer() {
        let p = Pipeline::new(tokenizer(16), Box::new(HashEncoder { hidden: 8 })).unwrap();
        assert_eq!(p.max_length(), 16);
    }

    #[test]
    fn test_long_text_is_truncated() {
        let p = Pipeline::new(tokenizer(16), Box::new(HashEncoder { hidden: 8 })).unwrap();
        let e = p.embed_blocking(&"this is a test sentence ".repeat(200)).unwrap();
        assert_eq!(e.token_count, 16);
        assert_eq!(e.dimension, 8);
    }

    #[test]
    fn test_hidden_size_drift_is_inference_error() {
        let encoder = DriftingEncoder {
            calls: AtomicUsize::new(0),
        };
        let p = Pipeline::new(tokenizer(512), Box::new(encoder)).unwrap();
        let err = p.embed_blocking("hello").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Inference(InferenceError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_degenerate_model_fails_warmup() {
        let err = Pipeline::new(tokenizer(512), Box::new(ZeroEncoder)).err().unwrap();
        assert!(matches!(err, StartupError::Pipeline { .. }));
    }

    #[test]
    fn test_load_reports_missing_tokenizer_first() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = LoadSettings {
            max_length: 512,
            sessions: 1,
            intra_threads: 1,
        };
        let err = load_pipeline(&ArtifactPaths::under(tmp.path()), &settings).err().unwrap();
        assert!(matches!(err, StartupError::TokenizerLoad { .. }));
    }
}
