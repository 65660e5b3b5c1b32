use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};

use crate::bridge::{SessionPaths, SESSION_ENV};
use crate::config::FinderConfig;

const HEADER: &str =
    "enter open  ctrl-d download folder  ctrl-f files only  ctrl-a toggle all  shift-left back";

pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | ','));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

pub fn arguments(cfg: &FinderConfig, exe: &Path) -> Vec<String> {
    let exe = shell_quote(&exe.to_string_lossy());
    let mut args: Vec<String> = vec![
        "-m".into(),
        "--border".into(),
        "none".into(),
        "--prompt".into(),
        cfg.prompt.clone(),
        "--header".into(),
        HEADER.into(),
        "--preview".into(),
        format!("{exe} preview {{}}"),
        "--preview-window".into(),
        cfg.preview_window.clone(),
    ];
    let bindings = [
        format!("enter:reload({exe} reload {{+}})+clear-query"),
        format!("ctrl-d:execute({exe} download_folder {{+}})"),
        format!("ctrl-f:reload({exe} files_only)+clear-query"),
        "ctrl-a:toggle-all+last+toggle+first".to_string(),
        "ctrl-g:first".to_string(),
        "ctrl-t:last".to_string(),
        format!("shift-left:reload({exe} reload ..)+clear-query"),
        format!("shift-right:reload({exe} reload {{}})+clear-query"),
    ];
    for binding in bindings {
        args.push("--bind".into());
        args.push(binding);
    }
    args.extend(cfg.extra_args.iter().cloned());
    args
}

pub struct Finder {
    pid: u32,
    exited: Arc<AtomicBool>,
    supervisor: Option<thread::JoinHandle<()>>,
}

impl Finder {
    pub fn launch<F>(
        cfg: &FinderConfig,
        exe: &Path,
        paths: &SessionPaths,
        keys: Vec<String>,
        on_exit: F,
    ) -> Result<Self>
    where
        F: FnOnce(ExitStatus) + Send + 'static,
    {
        let mut child = Command::new(&cfg.command)
            .args(arguments(cfg, exe))
            .env(SESSION_ENV, paths.prefix())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("finder: start {}", cfg.command))?;
        let pid = child.id();
        tracing::info!(pid, command = %cfg.command, "finder: started");

        let mut stdin = child.stdin.take();
        let exited = Arc::new(AtomicBool::new(false));
        let flag = exited.clone();
        let supervisor = thread::Builder::new()
            .name("anitsu-finder".into())
            .spawn(move || {
                if let Some(mut stdin) = stdin.take() {
                    let mut input = keys.join("\n");
                    input.push('\n');
                    if let Err(err) = stdin.write_all(input.as_bytes()) {
                        tracing::debug!(error = %err, "finder: write initial keys");
                    }
                }
                match child.wait() {
                    Ok(status) => {
                        flag.store(true, Ordering::SeqCst);
                        tracing::info!(%status, "finder: exited");
                        on_exit(status);
                    }
                    Err(err) => {
                        flag.store(true, Ordering::SeqCst);
                        tracing::warn!(error = %err, "finder: wait failed");
                    }
                }
            })
            .context("finder: spawn supervisor")?;

        Ok(Self {
            pid,
            exited,
            supervisor: Some(supervisor),
        })
    }

    pub fn terminate(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        let Ok(pid) = libc::pid_t::try_from(self.pid) else {
            return;
        };
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            tracing::debug!(pid, error = %std::io::Error::last_os_error(), "finder: kill");
        }
    }
}

impl Drop for Finder {
    fn drop(&mut self) {
        self.terminate();
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }
    }
}
