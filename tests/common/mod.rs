#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use embed_server::embeddings::engine::{Encoder, TokenEmbeddings};
use embed_server::embeddings::tokenizer::{TextTokenizer, TokenizedInput};
use embed_server::error::{InferenceError, StartupError};
use embed_server::pipeline::Pipeline;
use embed_server::service::EmbeddingService;

pub const HIDDEN: usize = 8;

pub fn fixture_tokenizer_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/tokenizer")
}

pub fn fixture_tokenizer(max_length: usize) -> TextTokenizer {
    TextTokenizer::load(&fixture_tokenizer_dir(), max_length).unwrap()
}

/// Per-token vectors derived from the token id only, so output depends on input alone.
pub struct HashEncoder;

impl Encoder for HashEncoder {
    fn encode(&self, input: &TokenizedInput) -> Result<TokenEmbeddings, InferenceError> {
        let values = input
            .ids
            .iter()
            .flat_map(|&id| (0..HIDDEN).map(move |j| ((id as usize * 31 + j * 7) % 13) as f32 - 5.5))
            .collect();
        Ok(TokenEmbeddings {
            values,
            seq_len: input.len(),
            hidden_size: HIDDEN,
        })
    }

    fn slots(&self) -> usize {
        2
    }

    fn describe(&self) -> String {
        "hash".into()
    }
}

/// Healthy during warm-up, all zeros afterwards.
pub struct CollapsingEncoder {
    calls: AtomicUsize,
}

impl CollapsingEncoder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl Encoder for CollapsingEncoder {
    fn encode(&self, input: &TokenizedInput) -> Result<TokenEmbeddings, InferenceError> {
        let fill = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 { 1.0 } else { 0.0 };
        Ok(TokenEmbeddings {
            values: vec![fill; input.len() * HIDDEN],
            seq_len: input.len(),
            hidden_size: HIDDEN,
        })
    }

    fn describe(&self) -> String {
        "collapsing".into()
    }
}

pub fn hash_pipeline() -> Result<Pipeline, StartupError> {
    Pipeline::new(fixture_tokenizer(512), Box::new(HashEncoder))
}

pub async fn ready_service() -> Arc<EmbeddingService> {
    let service = Arc::new(EmbeddingService::new());
    service.start(hash_pipeline).await.unwrap();
    service
}

pub fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}
