use std::fs;
use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::config::DownloadConfig;
use crate::navigation::Selection;

const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Completed,
    Failed { code: Option<i32>, input: PathBuf },
    Interrupted { input: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRun {
    pub count: usize,
    pub status: BatchStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub daemon: usize,
    pub batch: Option<BatchRun>,
}

impl Report {
    pub fn failed(&self) -> bool {
        matches!(
            self.batch,
            Some(BatchRun {
                status: BatchStatus::Failed { .. },
                ..
            })
        )
    }

    pub fn interrupted(&self) -> bool {
        matches!(
            self.batch,
            Some(BatchRun {
                status: BatchStatus::Interrupted { .. },
                ..
            })
        )
    }

    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.daemon > 0 {
            lines.push(format!("{} file(s) queued on the download daemon", self.daemon));
        }
        if let Some(run) = &self.batch {
            match &run.status {
                BatchStatus::Completed => lines.push(format!("{} file(s) downloaded", run.count)),
                BatchStatus::Failed { code, input } => lines.push(format!(
                    "download failed ({}); URI list kept at {}",
                    code.map(|c| format!("exit code {c}"))
                        .unwrap_or_else(|| "no exit code".into()),
                    input.display()
                )),
                BatchStatus::Interrupted { input } => lines.push(format!(
                    "download interrupted; URI list kept at {}",
                    input.display()
                )),
            }
        }
        lines
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

pub struct Dispatcher {
    cfg: DownloadConfig,
    batch_input: PathBuf,
    interrupted: Arc<AtomicBool>,
    client: Client,
}

impl Dispatcher {
    pub fn new(cfg: DownloadConfig, batch_input: PathBuf, interrupted: Arc<AtomicBool>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(cfg.rpc.timeout)
            .timeout(RPC_REQUEST_TIMEOUT)
            .no_proxy()
            .user_agent(format!("anitsu/{}", crate::VERSION))
            .build()
            .context("dispatch: build rpc client")?;
        Ok(Self {
            cfg,
            batch_input,
            interrupted,
            client,
        })
    }

    pub fn dispatch(&self, selection: &Selection) -> Result<Report> {
        let mut report = Report::default();
        if selection.is_empty() {
            return Ok(report);
        }
        let mut remaining = selection.uris();

        if self.cfg.rpc.enabled && self.daemon_reachable() {
            let (accepted, failure) = self.submit_to_daemon(remaining);
            report.daemon = accepted;
            remaining = &remaining[accepted..];
            if let Some(err) = failure {
                tracing::warn!(
                    error = %format!("{err:#}"),
                    left = remaining.len(),
                    "dispatch: rpc submission failed, falling back to batch download"
                );
            }
        }

        if !remaining.is_empty() {
            let status = self.run_batch(remaining)?;
            report.batch = Some(BatchRun {
                count: remaining.len(),
                status,
            });
        }
        Ok(report)
    }

    fn daemon_reachable(&self) -> bool {
        let Ok(url) = Url::parse(&self.cfg.rpc.url) else {
            tracing::warn!(url = %self.cfg.rpc.url, "dispatch: invalid rpc url");
            return false;
        };
        let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
            return false;
        };
        let Ok(addrs) = (host, port).to_socket_addrs() else {
            return false;
        };
        let reachable = addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, self.cfg.rpc.timeout).is_ok());
        tracing::debug!(host, port, reachable, "dispatch: probed download daemon");
        reachable
    }

    fn submit_to_daemon(&self, uris: &[String]) -> (usize, Option<anyhow::Error>) {
        for (done, uri) in uris.iter().enumerate() {
            match self.add_uri(uri) {
                Ok(gid) => tracing::info!(%gid, uri = %uri, "dispatch: queued on daemon"),
                Err(err) => return (done, Some(err)),
            }
        }
        (uris.len(), None)
    }

    fn add_uri(&self, uri: &str) -> Result<String> {
        let mut params = Vec::new();
        if !self.cfg.rpc.secret.is_empty() {
            params.push(json!(format!("token:{}", self.cfg.rpc.secret)));
        }
        params.push(json!([uri]));
        params.push(json!({ "dir": self.cfg.dir.to_string_lossy() }));
        let body = json!({
            "jsonrpc": "2.0",
            "id": "anitsu",
            "method": "aria2.addUri",
            "params": params,
        });

        let response: RpcResponse = self
            .client
            .post(&self.cfg.rpc.url)
            .json(&body)
            .send()
            .context("rpc: send aria2.addUri")?
            .json()
            .context("rpc: decode response")?;

        if let Some(err) = response.error {
            bail!("rpc: aria2 error {}: {}", err.code, err.message);
        }
        match response.result {
            Some(Value::String(gid)) => Ok(gid),
            other => Err(anyhow!("rpc: unexpected result {other:?}")),
        }
    }

    fn run_batch(&self, uris: &[String]) -> Result<BatchStatus> {
        fs::create_dir_all(&self.cfg.dir)
            .with_context(|| format!("dispatch: create {}", self.cfg.dir.display()))?;
        write_batch_input(&self.batch_input, uris)?;
        tracing::info!(
            count = uris.len(),
            input = %self.batch_input.display(),
            command = %self.cfg.command,
            "dispatch: starting batch download"
        );

        let status = Command::new(&self.cfg.command)
            .arg("-j")
            .arg(self.cfg.concurrency.max(1).to_string())
            .arg("--dir")
            .arg(&self.cfg.dir)
            .arg(format!("--input-file={}", self.batch_input.display()))
            .status()
            .with_context(|| format!("dispatch: run {}", self.cfg.command))?;

        let input = self.batch_input.clone();
        if self.interrupted.load(Ordering::SeqCst) || status.signal().is_some() {
            tracing::warn!(%status, "dispatch: batch download interrupted");
            return Ok(BatchStatus::Interrupted { input });
        }
        if !status.success() {
            tracing::warn!(%status, "dispatch: batch download failed");
            return Ok(BatchStatus::Failed {
                code: status.code(),
                input,
            });
        }

        match fs::remove_file(&input) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(error = %err, "dispatch: remove batch input"),
        }
        Ok(BatchStatus::Completed)
    }
}

pub fn write_batch_input(path: &Path, uris: &[String]) -> Result<()> {
    let mut contents = uris.join("\n");
    contents.push('\n');
    fs::write(path, contents)
        .with_context(|| format!("dispatch: write batch input {}", path.display()))
}
