//! Offline sentence-embedding server.
//!
//! Text goes through a tokenizer, a static-graph encoder, mask-aware mean pooling and
//! L2 normalization. [`service::EmbeddingService`] owns the loaded pipeline and its
//! lifecycle; [`server`] exposes it over HTTP.

pub mod artifacts;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod service;
