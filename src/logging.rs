use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_ENV: &str = "ANITSU_LOG";
const DEFAULT_FILTER: &str = "anitsu=info";
const LOG_FILE: &str = "anitsu.log";

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub console: bool,
    pub dir: Option<PathBuf>,
}

pub struct Guard {
    _file: Option<WorkerGuard>,
}

pub fn log_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("anitsu")
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init(options: Options) -> Result<Guard> {
    let dir = options.dir.unwrap_or_else(log_dir);
    let mut guard = None;
    let file_layer = match fs::create_dir_all(&dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(&dir, LOG_FILE);
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard = Some(file_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(filter()),
            )
        }
        Err(err) => {
            if options.console {
                eprintln!("warning: cannot create log directory {}: {err}", dir.display());
            }
            None
        }
    };

    let console_layer = options.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .with_filter(EnvFilter::new("warn"))
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("logging: install subscriber")?;

    Ok(Guard { _file: guard })
}
