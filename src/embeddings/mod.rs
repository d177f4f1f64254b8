// embeddings/ — Local sentence embedding pipeline.
//
// Provides:
// - Tokenization of one text into ids + attention mask
// - ONNX encoder execution with a bounded session pool
// - Mask-aware mean pooling + L2 normalization

pub mod engine;
pub mod pooling;
pub mod tokenizer;
