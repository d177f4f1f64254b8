// IMPORTANT:
// Keep ALL numeric values centralized here (repo rule: no hardcoded numeric values scattered around).

use std::path::PathBuf;

use clap::Parser;

pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod logging {
    pub const LOG_FILE_BASENAME: &str = "embed_server";
    pub const DEFAULT_LEVEL: &str = "info";

    pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
    pub const LOG_ROTATE_KEEP_FILES: usize = 5;
}

pub mod http {
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 8000;

    // A single text per request; anything larger than this is not a sentence.
    pub const MAX_BODY_BYTES: usize = 1024 * 1024;

    pub const ROOT_MESSAGE: &str = "ONNX Embedding Server is running";
}

pub mod artifacts {
    pub const TOKENIZER_DIR_REL: &str = "tokenizer";
    pub const TOKENIZER_JSON: &str = "tokenizer.json";
    pub const TOKENIZER_CONFIG_JSON: &str = "tokenizer_config.json";
    pub const MODEL_REL: &str = "onnx_model/model.onnx";

    // Optional `sha256sum`-style manifest next to the artifact directories.
    pub const CHECKSUM_MANIFEST: &str = "SHA256SUMS";
}

pub mod embedding {
    // Matches the tokenizer's model_max_length for BERT-family encoders.
    pub const DEFAULT_MAX_LENGTH: usize = 512;

    // tokenizer_config.json uses a huge sentinel (1e30) when no limit is set.
    pub const MAX_SANE_MODEL_MAX_LENGTH: u64 = 1_000_000;

    pub const MASK_SUM_FLOOR: f64 = 1e-9;

    // Each session holds its own copy of the graph; cap memory by default.
    pub const MAX_DEFAULT_SESSIONS: usize = 4;

    pub const WARMUP_TEXT: &str = "warmup";
    pub const CHECK_TEXT: &str = "Hello world!";
}

/// Command-line / environment configuration for the server process.
#[derive(Debug, Clone, Parser)]
#[command(name = "embed-server", version, about = "Offline sentence-embedding HTTP server")]
pub struct Cli {
    /// Address to bind the HTTP listener on.
    #[arg(long, env = "EMBED_SERVER_HOST", default_value = http::DEFAULT_HOST)]
    pub host: String,

    /// Port to bind the HTTP listener on.
    #[arg(long, env = "EMBED_SERVER_PORT", default_value_t = http::DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding `tokenizer/` and `onnx_model/`. Defaults to the executable's directory.
    #[arg(long, env = "EMBED_ARTIFACT_ROOT")]
    pub artifact_root: Option<PathBuf>,

    /// Override for the tokenizer directory.
    #[arg(long, env = "EMBED_TOKENIZER_DIR")]
    pub tokenizer_dir: Option<PathBuf>,

    /// Override for the ONNX model file.
    #[arg(long, env = "EMBED_MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Maximum number of tokens per input (longer inputs are truncated).
    #[arg(long, default_value_t = embedding::DEFAULT_MAX_LENGTH)]
    pub max_length: usize,

    /// Number of independent inference sessions (concurrent execution slots).
    #[arg(long, env = "EMBED_SESSIONS")]
    pub sessions: Option<usize>,

    /// Write rotating log files into this directory (stderr only when unset).
    #[arg(long, env = "EMBED_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `embed_server=debug`. `RUST_LOG` takes precedence.
    #[arg(long, env = "EMBED_LOG", default_value = logging::DEFAULT_LEVEL)]
    pub log_level: String,

    /// Load the artifacts, embed a probe sentence, print a summary and exit.
    #[arg(long)]
    pub check: bool,
}

impl Cli {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Session count and intra-op threads per session for this machine.
pub fn session_layout(requested: Option<usize>) -> (usize, usize) {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let sessions = requested
        .filter(|&n| n > 0)
        .unwrap_or_else(|| cores.min(embedding::MAX_DEFAULT_SESSIONS));
    let intra_threads = (cores / sessions).max(1);
    (sessions, intra_threads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        let cli = Cli::parse_from(["embed-server"]);
        assert_eq!(cli.port, http::DEFAULT_PORT);
        assert_eq!(cli.max_length, 512);
        assert_eq!(cli.bind_addr(), "0.0.0.0:8000");
        assert!(!cli.check);
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "embed-server",
            "--port",
            "9001",
            "--artifact-root",
            "/srv/embed",
            "--sessions",
            "2",
            "--check",
        ]);
        assert_eq!(cli.port, 9001);
        assert_eq!(cli.artifact_root, Some(PathBuf::from("/srv/embed")));
        assert_eq!(cli.sessions, Some(2));
        assert!(cli.check);
    }

    #[test]
    fn test_session_layout_honors_request() {
        let (sessions, threads) = session_layout(Some(2));
        assert_eq!(sessions, 2);
        assert!(threads >= 1);

        // Zero is treated as "pick for me".
        let (sessions, _) = session_layout(Some(0));
        assert!(sessions >= 1 && sessions <= embedding::MAX_DEFAULT_SESSIONS);
    }
}
