// artifacts.rs — Locating and verifying the on-disk artifacts the server loads.
//
// Layout under the artifact root (produced by the external conversion step):
//   tokenizer/tokenizer.json
//   tokenizer/tokenizer_config.json   (optional)
//   onnx_model/model.onnx
//   SHA256SUMS                        (optional, `sha256sum` format)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config;
use crate::error::StartupError;

/// Where the artifact directories live. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRoot {
    /// Given on the command line or via the environment.
    Explicit(PathBuf),
    /// Next to the running executable (packaged-binary placement).
    ExecutableDir,
}

impl ArtifactRoot {
    pub fn from_option(path: Option<PathBuf>) -> Self {
        match path {
            Some(p) => ArtifactRoot::Explicit(p),
            None => ArtifactRoot::ExecutableDir,
        }
    }

    pub fn resolve(&self) -> io::Result<PathBuf> {
        match self {
            ArtifactRoot::Explicit(p) => Ok(p.clone()),
            ArtifactRoot::ExecutableDir => {
                let exe = std::env::current_exe()?;
                exe.parent().map(Path::to_path_buf).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "executable has no parent directory")
                })
            }
        }
    }
}

/// Concrete artifact paths after resolution and overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub root: PathBuf,
    pub tokenizer_dir: PathBuf,
    pub model_path: PathBuf,
}

impl ArtifactPaths {
    pub fn under(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            tokenizer_dir: root.join(config::artifacts::TOKENIZER_DIR_REL),
            model_path: root.join(config::artifacts::MODEL_REL),
        }
    }

    pub fn resolve(
        root: &ArtifactRoot,
        tokenizer_dir: Option<PathBuf>,
        model_path: Option<PathBuf>,
    ) -> io::Result<Self> {
        let mut paths = Self::under(&root.resolve()?);
        if let Some(dir) = tokenizer_dir {
            paths.tokenizer_dir = dir;
        }
        if let Some(model) = model_path {
            paths.model_path = model;
        }
        Ok(paths)
    }

    pub fn tokenizer_json(&self) -> PathBuf {
        self.tokenizer_dir.join(config::artifacts::TOKENIZER_JSON)
    }

    pub fn checksum_manifest(&self) -> PathBuf {
        self.root.join(config::artifacts::CHECKSUM_MANIFEST)
    }

    /// Check that every required file exists. Tokenizer problems are reported first.
    pub fn verify_present(&self) -> Result<(), StartupError> {
        if !self.tokenizer_dir.is_dir() {
            return Err(StartupError::TokenizerLoad {
                path: self.tokenizer_dir.clone(),
                reason: "tokenizer directory not found".into(),
            });
        }
        let tokenizer_json = self.tokenizer_json();
        if !tokenizer_json.is_file() {
            return Err(StartupError::TokenizerLoad {
                path: tokenizer_json,
                reason: "tokenizer.json not found".into(),
            });
        }
        if !self.model_path.is_file() {
            return Err(StartupError::ModelLoad {
                path: self.model_path.clone(),
                reason: "model file not found".into(),
            });
        }
        Ok(())
    }

    /// Verify files listed in the checksum manifest, if there is one.
    /// Returns the number of files verified.
    pub fn verify_checksums(&self) -> Result<usize, StartupError> {
        let manifest = self.checksum_manifest();
        if !manifest.is_file() {
            log::debug!("No checksum manifest at {}, skipping verification", manifest.display());
            return Ok(0);
        }

        let text = fs::read_to_string(&manifest).map_err(|e| StartupError::Checksum {
            path: manifest.clone(),
            reason: format!("read manifest: {e}"),
        })?;

        let entries = parse_manifest(&text).map_err(|reason| StartupError::Checksum {
            path: manifest.clone(),
            reason,
        })?;

        for (expected, rel) in &entries {
            let path = self.root.join(rel);
            let actual = sha256_file(&path).map_err(|e| StartupError::Checksum {
                path: path.clone(),
                reason: format!("read: {e}"),
            })?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(StartupError::Checksum {
                    path,
                    reason: format!("expected {expected}, got {actual}"),
                });
            }
            log::info!("SHA256 verified for {} ({})", rel, &actual[..12]);
        }

        Ok(entries.len())
    }
}

/// Parse `<hex>  <path>` lines. `sha256sum` binary-mode markers (`*path`) are accepted.
fn parse_manifest(text: &str) -> Result<Vec<(String, String)>, String> {
    let mut entries = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (hash, rel) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| format!("line {}: expected `<sha256> <path>`", lineno + 1))?;
        let rel = rel.trim_start().trim_start_matches('*');
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("line {}: invalid sha256 {hash:?}", lineno + 1));
        }
        if rel.is_empty() {
            return Err(format!("line {}: missing path", lineno + 1));
        }
        entries.push((hash.to_string(), rel.to_string()));
    }
    Ok(entries)
}

/// Stream a file through SHA-256 (model files are too large to slurp comfortably).
fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
