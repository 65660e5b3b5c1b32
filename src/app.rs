use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::bridge::SessionPaths;
use crate::catalog;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::session::{Session, SessionEvent};

const FAREWELL: &str = "anitsu: bye";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{tool:?} ({role}) was not found on PATH")]
    MissingTool { tool: String, role: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Clean,
    Interrupted,
}

impl Exit {
    pub fn code(self) -> i32 {
        match self {
            Exit::Clean => 0,
            Exit::Interrupted => 130,
        }
    }
}

pub fn require_tool(tool: &str, role: &'static str) -> Result<PathBuf, AppError> {
    which::which(tool).map_err(|_| AppError::MissingTool {
        tool: tool.to_string(),
        role,
    })
}

fn install_signal_handler(flag: Arc<AtomicBool>, events: Sender<SessionEvent>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("app: install signal handler")?;
    thread::Builder::new()
        .name("anitsu-signals".into())
        .spawn(move || {
            for sig in signals.forever() {
                tracing::info!(signal = sig, "app: interrupted");
                flag.store(true, Ordering::SeqCst);
                let _ = events.send(SessionEvent::Interrupted);
            }
        })
        .context("app: spawn signal thread")?;
    Ok(())
}

pub fn run(cfg: &Config) -> Result<Exit> {
    require_tool(&cfg.finder.command, "finder")?;
    require_tool(&cfg.download.command, "downloader")?;

    let catalog = Arc::new(catalog::load(&cfg.catalog.path, cfg.catalog.order)?);
    if catalog.is_empty() {
        tracing::warn!(path = %cfg.catalog.path.display(), "app: catalog is empty, run `anitsu update`");
    }
    tracing::info!(entries = catalog.len(), path = %cfg.catalog.path.display(), "app: catalog loaded");

    let paths = SessionPaths::new(&cfg.download.runtime_dir, std::process::id());
    let interrupted = Arc::new(AtomicBool::new(false));
    let exe = std::env::current_exe().context("app: locate own executable")?;

    let event = {
        let mut session = Session::start(cfg, catalog, paths.clone())?;
        install_signal_handler(interrupted.clone(), session.notifier())?;
        session.launch_finder(cfg, &exe)?;
        session.wait()?
    };

    let selection = match event {
        SessionEvent::Selected(selection) => selection,
        SessionEvent::Interrupted => return Ok(Exit::Interrupted),
        SessionEvent::FinderExited(status) => {
            if !status.success() {
                tracing::info!(%status, "app: finder closed without a selection");
            }
            println!("{FAREWELL}");
            return Ok(Exit::Clean);
        }
    };

    println!(
        "anitsu: downloading {} file(s) to {}",
        selection.len(),
        cfg.download.dir.display()
    );
    let dispatcher = Dispatcher::new(cfg.download.clone(), paths.batch_input(), interrupted)?;
    let report = dispatcher.dispatch(&selection)?;
    for line in report.summary() {
        println!("anitsu: {line}");
    }
    if report.failed() {
        tracing::warn!(summary = ?report.summary(), "app: download failed");
    }
    if report.interrupted() {
        return Ok(Exit::Interrupted);
    }
    println!("{FAREWELL}");
    Ok(Exit::Clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_names_the_role() {
        let err = require_tool("anitsu-no-such-tool", "downloader").unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"anitsu-no-such-tool\" (downloader) was not found on PATH"
        );
    }

    #[test]
    fn present_tool_resolves() {
        assert!(require_tool("sh", "shell").is_ok());
    }

    #[test]
    fn interrupt_exit_code() {
        assert_eq!(Exit::Interrupted.code(), 130);
        assert_eq!(Exit::Clean.code(), 0);
    }
}
