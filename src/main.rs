use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use embed_server::artifacts::{ArtifactPaths, ArtifactRoot};
use embed_server::config::{self, Cli};
use embed_server::logging;
use embed_server::pipeline::{load_pipeline, LoadSettings};
use embed_server::server;
use embed_server::service::EmbeddingService;

fn main() {
    if let Err(e) = real_main() {
        // Keep stderr noisy for bug reports; logs may also go to file.
        eprintln!("[embed-server] fatal error: {e:?}");
        log::error!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}

fn real_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _logger = logging::init_logging(&cli.log_level, cli.log_dir.as_deref())?;

    let root = ArtifactRoot::from_option(cli.artifact_root.clone());
    let paths = ArtifactPaths::resolve(&root, cli.tokenizer_dir.clone(), cli.model_path.clone())
        .context("failed to resolve artifact root")?;
    log::info!("Artifact root: {}", paths.root.display());

    let (sessions, intra_threads) = config::session_layout(cli.sessions);
    let settings = LoadSettings {
        max_length: cli.max_length,
        sessions,
        intra_threads,
    };

    if cli.check {
        return run_check(&paths, &settings);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;
    runtime.block_on(run_server(cli, paths, settings))
}

/// Load everything, embed one probe sentence and report. Exit status is the verdict.
fn run_check(paths: &ArtifactPaths, settings: &LoadSettings) -> anyhow::Result<()> {
    let pipeline = load_pipeline(paths, settings)?;
    let embedding = pipeline
        .embed_blocking(config::embedding::CHECK_TEXT)
        .context("probe embedding failed")?;
    let norm = embedding.values.iter().map(|v| v * v).sum::<f32>().sqrt();

    println!("dimension: {}", embedding.dimension);
    println!("tokens: {}", embedding.token_count);
    println!("max_length: {}", pipeline.max_length());
    println!("norm: {norm:.6}");
    log::info!(
        "Check passed: {:?} -> {} dims (norm={:.6})",
        config::embedding::CHECK_TEXT,
        embedding.dimension,
        norm
    );
    Ok(())
}

async fn run_server(cli: Cli, paths: ArtifactPaths, settings: LoadSettings) -> anyhow::Result<()> {
    let service = Arc::new(EmbeddingService::new());

    // Bind first so /health answers "loading" while the model comes up.
    let addr = cli.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("Listening on http://{}", addr);

    let loader_service = Arc::clone(&service);
    tokio::spawn(async move {
        // Failure is already logged and reflected in /health; the server keeps running.
        if loader_service
            .start(move || load_pipeline(&paths, &settings))
            .await
            .is_ok()
        {
            log::info!("Embedding service is ready");
        }
    });

    server::serve(listener, Arc::clone(&service))
        .await
        .context("HTTP server failed")?;

    log::info!("Server stopped (phase: {})", service.phase().name());
    Ok(())
}
