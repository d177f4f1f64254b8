// tokenizer.rs — Text to (ids, attention mask, token type ids) for a single input.
//
// Wraps a HuggingFace tokenizer.json. Truncation is configured on the tokenizer
// itself so the post-processor keeps its sentinel tokens ([CLS]/[SEP]) in range.

use std::fs;
use std::path::Path;

use tokenizers::{Tokenizer, TruncationParams};

use crate::config;
use crate::error::{StartupError, TokenizeError};

/// Below this a BERT-style post-processor has no room left for content tokens.
const MIN_MAX_LENGTH: usize = 4;

/// One tokenized text. All three sequences have the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedInput {
    pub ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub type_ids: Vec<i64>,
}

impl TokenizedInput {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

pub struct TextTokenizer {
    inner: Tokenizer,
    max_length: usize,
}

impl TextTokenizer {
    /// Load `tokenizer.json` (and, if present, `tokenizer_config.json`) from a directory.
    ///
    /// The effective limit is the smaller of `max_length` and the config's
    /// `model_max_length`.
    pub fn load(tokenizer_dir: &Path, max_length: usize) -> Result<Self, StartupError> {
        let tokenizer_path = tokenizer_dir.join(config::artifacts::TOKENIZER_JSON);
        let inner = Tokenizer::from_file(&tokenizer_path).map_err(|e| StartupError::TokenizerLoad {
            path: tokenizer_path.clone(),
            reason: e.to_string(),
        })?;

        let config_path = tokenizer_dir.join(config::artifacts::TOKENIZER_CONFIG_JSON);
        let max_length = match model_max_length(&config_path)? {
            Some(declared) if declared < max_length => {
                log::info!(
                    "tokenizer_config.json limits max length to {} (requested {})",
                    declared,
                    max_length
                );
                declared
            }
            _ => max_length,
        };

        let tokenizer = Self::from_tokenizer(inner, max_length).map_err(|reason| {
            StartupError::TokenizerLoad {
                path: tokenizer_path.clone(),
                reason,
            }
        })?;

        log::info!(
            "Tokenizer loaded from {} (vocab={}, max_length={})",
            tokenizer_path.display(),
            tokenizer.inner.get_vocab_size(true),
            tokenizer.max_length
        );
        Ok(tokenizer)
    }

    fn from_tokenizer(mut inner: Tokenizer, max_length: usize) -> Result<Self, String> {
        if max_length < MIN_MAX_LENGTH {
            return Err(format!("max length must be at least {MIN_MAX_LENGTH}, got {max_length}"));
        }
        inner
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| format!("configure truncation: {e}"))?;
        // Batch size is always 1, so padding would only add masked-out positions.
        inner.with_padding(None);
        Ok(Self { inner, max_length })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Tokenize one text. Empty input yields just the sentinel tokens.
    pub fn tokenize(&self, text: &str) -> Result<TokenizedInput, TokenizeError> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| TokenizeError(e.to_string()))?;

        let len = encoding.get_ids().len().min(self.max_length);
        let widen = |xs: &[u32]| xs[..len].iter().map(|&x| i64::from(x)).collect::<Vec<_>>();

        Ok(TokenizedInput {
            ids: widen(encoding.get_ids()),
            attention_mask: widen(encoding.get_attention_mask()),
            type_ids: widen(encoding.get_type_ids()),
        })
    }
}

/// Read `model_max_length` from tokenizer_config.json, ignoring the "unlimited" sentinel.
fn model_max_length(config_path: &Path) -> Result<Option<usize>, StartupError> {
    if !config_path.is_file() {
        return Ok(None);
    }
    let load_err = |reason: String| StartupError::TokenizerLoad {
        path: config_path.to_path_buf(),
        reason,
    };
    let text = fs::read_to_string(config_path).map_err(|e| load_err(format!("read: {e}")))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| load_err(format!("parse: {e}")))?;

    let declared = value.get("model_max_length").and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| f.is_finite() && *f >= 1.0).map(|f| f as u64))
    });
    Ok(declared
        .filter(|&n| n > 0 && n <= config::embedding::MAX_SANE_MODEL_MAX_LENGTH)
        .map(|n| n as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/tokenizer")
    }

    fn fixture(max_length: usize) -> TextTokenizer {
        TextTokenizer::load(&fixture_dir(), max_length).unwrap()
    }

    #[test]
    fn test_tokenize_adds_sentinels() {
        let t = fixture(512).tokenize("Hello world!").unwrap();
        assert_eq!(t.ids, vec![2, 4, 5, 6, 3]);
        assert_eq!(t.attention_mask, vec![1; 5]);
        assert_eq!(t.type_ids, vec![0; 5]);
    }

    #[test]
    fn test_empty_text_is_just_sentinels() {
        let t = fixture(512).tokenize("").unwrap();
        assert_eq!(t.ids, vec![2, 3]);
        assert_eq!(t.attention_mask, vec![1, 1]);
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let t = fixture(512).tokenize("zebra").unwrap();
        assert_eq!(t.ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_truncation_keeps_sentinels() {
        let long = "machine learning is awesome ".repeat(100);
        let t = fixture(8).tokenize(&long).unwrap();
        assert_eq!(t.len(), 8);
        assert_eq!(t.ids.first(), Some(&2));
        assert_eq!(t.ids.last(), Some(&3));
        assert_eq!(t.attention_mask.len(), 8);
        assert_eq!(t.type_ids.len(), 8);
    }

    #[test]
    fn test_config_caps_max_length() {
        assert_eq!(fixture(4096).max_length(), 512);
        assert_eq!(fixture(64).max_length(), 64);
    }

    #[test]
    fn test_unlimited_sentinel_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = tmp.path().join("tokenizer_config.json");
        fs::write(&cfg, r#"{"model_max_length": 1e30}"#).unwrap();
        assert_eq!(model_max_length(&cfg).unwrap(), None);
        fs::write(&cfg, r#"{"model_max_length": 256}"#).unwrap();
        assert_eq!(model_max_length(&cfg).unwrap(), Some(256));
    }

    #[test]
    fn test_load_failures_are_tokenizer_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let err = TextTokenizer::load(tmp.path(), 512).err().unwrap();
        assert!(matches!(err, StartupError::TokenizerLoad { .. }));

        fs::write(tmp.path().join("tokenizer.json"), "{ not json").unwrap();
        let err = TextTokenizer::load(tmp.path(), 512).err().unwrap();
        assert!(matches!(err, StartupError::TokenizerLoad { .. }));
    }

    #[test]
    fn test_tiny_max_length_rejected() {
        let err = TextTokenizer::load(&fixture_dir(), 2).err().unwrap();
        assert!(matches!(err, StartupError::TokenizerLoad { .. }));
    }
}
