use std::path::Path;

use anyhow::Context;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};

use crate::config;

/// Start the global logger. The returned handle must be kept alive for the process
/// lifetime, otherwise buffered file output is lost on exit.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> anyhow::Result<LoggerHandle> {
    // RUST_LOG wins over the CLI level so operators can raise verbosity without
    // touching the service definition.
    let logger = Logger::try_with_env_or_str(level)
        .with_context(|| format!("invalid log specification {level:?}"))?
        .format(flexi_logger::detailed_format);

    let logger = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed creating log dir {}", dir.display()))?;
            logger
                .log_to_file(FileSpec::default().directory(dir).basename(config::logging::LOG_FILE_BASENAME))
                .rotate(
                    Criterion::Size(config::logging::LOG_ROTATE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(config::logging::LOG_ROTATE_KEEP_FILES),
                )
                .duplicate_to_stderr(Duplicate::Info)
        }
        None => logger.log_to_stderr(),
    };

    let handle = logger.start().context("failed to start logger")?;

    log::info!("{}", "=".repeat(60));
    log::info!("Embedding server starting");
    log::info!("Version: {}", config::SERVER_VERSION);
    log::info!("Platform: {}", std::env::consts::OS);
    log::info!("{}", "=".repeat(60));

    Ok(handle)
}
