use std::path::Path;

use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log to stderr at `console_level` and to `log_path` at `file_level`.
/// `RUST_LOG` overrides both levels. Keep the guard alive until exit so the
/// file writer gets flushed.
pub fn init_logging(
    console_level: LevelFilter,
    log_path: &Path,
    file_level: LevelFilter,
) -> anyhow::Result<WorkerGuard> {
    let directory = log_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;
    let file_name = log_path.file_name().context("Log path has no file name")?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

    let console_filter = EnvFilter::builder()
        .with_default_directive(console_level.into())
        .from_env_lossy();
    let file_filter = EnvFilter::builder().with_default_directive(file_level.into()).from_env_lossy();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .with(fmt::layer().with_writer(file_writer).with_ansi(false).with_filter(file_filter))
        .try_init()
        .context("Failed to install the log subscriber")?;

    Ok(guard)
}
