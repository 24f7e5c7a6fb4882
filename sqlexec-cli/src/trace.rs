//! Log wiring for the server binary.
//!
//! Two layers: a daily-rolling file under `<config-dir>/logs` carrying the
//! full stream, and a colored stderr mirror restricted to warnings and
//! errors. The engine surfaces downgrade, write-conflict, and xid-wrap
//! notices through plain `log::warn!`, so the mirror carries every warning
//! target rather than a dedicated one.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Days of rolled log files to keep on disk.
const KEEP_LOG_FILES: usize = 7;

/// Keeps the non-blocking file writer flushing; hold it until shutdown.
pub struct LogGuard {
    _flush: WorkerGuard,
}

/// Installs the global logger. `debug` widens the file layer to debug
/// lines; the stderr mirror stays at warnings either way. Returns `None`
/// when a logger is already installed (repeated init, tests).
pub fn init(dir: &Path, debug: bool) -> Result<Option<LogGuard>> {
    std::fs::create_dir_all(dir)?;
    let rolling = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("sqlexec")
        .filename_suffix("log")
        .max_log_files(KEEP_LOG_FILES)
        .build(dir)?;
    let (writer, flush) = tracing_appender::non_blocking(rolling);

    let file_level = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    let file_layer = fern::Dispatch::new()
        .level(file_level)
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {:<5} [{}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .chain(Box::new(writer) as Box<dyn Write + Send>);

    let colors = ColoredLevelConfig::new().warn(Color::Yellow).error(Color::Red);
    let stderr_layer = fern::Dispatch::new()
        .level(LevelFilter::Warn)
        .format(move |out, message, record| {
            out.finish(format_args!("{}: {}", colors.color(record.level()), message))
        })
        .chain(std::io::stderr());

    match fern::Dispatch::new().chain(file_layer).chain(stderr_layer).apply() {
        Ok(()) => Ok(Some(LogGuard { _flush: flush })),
        Err(_) => Ok(None),
    }
}
