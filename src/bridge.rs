use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

pub const SESSION_ENV: &str = "ANITSU_SESSION";

const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("no running session ({SESSION_ENV} is not set)")]
    NoSession,
    #[error("unknown request verb {0:?}")]
    UnknownVerb(String),
    #[error("preview request without a key")]
    MissingKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Reload,
    Preview,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Reload, ChannelKind::Preview];

    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::Reload => "reload",
            ChannelKind::Preview => "preview",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    prefix: PathBuf,
}

impl SessionPaths {
    pub fn new(runtime_dir: &Path, pid: u32) -> Self {
        Self {
            prefix: runtime_dir.join(format!("anitsu.{pid}")),
        }
    }

    pub fn from_prefix(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn from_env() -> Result<Self, BridgeError> {
        std::env::var_os(SESSION_ENV)
            .filter(|value| !value.is_empty())
            .map(Self::from_prefix)
            .ok_or(BridgeError::NoSession)
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn socket(&self, kind: ChannelKind) -> PathBuf {
        let mut name = self.prefix.clone().into_os_string();
        name.push(format!(".{}.sock", kind.name()));
        PathBuf::from(name)
    }

    pub fn batch_input(&self) -> PathBuf {
        self.prefix.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Reload(Vec<String>),
    DownloadFolder(Vec<String>),
    FilesOnly,
    Preview(String),
}

impl Request {
    pub fn channel(&self) -> ChannelKind {
        match self {
            Request::Preview(_) => ChannelKind::Preview,
            _ => ChannelKind::Reload,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Request::Reload(_) => "reload",
            Request::DownloadFolder(_) => "download_folder",
            Request::FilesOnly => "files_only",
            Request::Preview(_) => "preview",
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::from(self.verb());
        out.push('\n');
        let keys: &[String] = match self {
            Request::Reload(keys) | Request::DownloadFolder(keys) => keys,
            Request::Preview(key) => std::slice::from_ref(key),
            Request::FilesOnly => &[],
        };
        for key in keys {
            out.push_str(key);
            out.push('\n');
        }
        out
    }

    pub fn decode(text: &str) -> Result<Option<Self>, BridgeError> {
        let mut lines = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.is_empty());
        let Some(verb) = lines.next() else {
            return Ok(None);
        };
        let keys: Vec<String> = lines.map(str::to_string).collect();
        let request = match verb {
            "reload" => Request::Reload(keys),
            "download_folder" => Request::DownloadFolder(keys),
            "files_only" => Request::FilesOnly,
            "preview" => Request::Preview(keys.into_iter().next().ok_or(BridgeError::MissingKey)?),
            other => return Err(BridgeError::UnknownVerb(other.to_string())),
        };
        Ok(Some(request))
    }
}

pub trait Handler: Send {
    fn handle(&mut self, request: Request) -> Result<Vec<String>>;
}

pub struct Listener {
    kind: ChannelKind,
    path: PathBuf,
    inner: UnixListener,
}

impl Listener {
    pub fn bind(kind: ChannelKind, path: PathBuf) -> Result<Self> {
        match fs::remove_file(&path) {
            Ok(()) => tracing::warn!(path = %path.display(), "bridge: removed stale socket"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("bridge: remove stale socket {}", path.display()))
            }
        }
        let inner = UnixListener::bind(&path)
            .with_context(|| format!("bridge: bind {} channel at {}", kind.name(), path.display()))?;
        Ok(Self { kind, path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn serve<H: Handler>(self, mut handler: H) {
        let channel = self.kind.name();
        tracing::debug!(channel, "bridge: listening");
        for stream in self.inner.incoming() {
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(channel, error = %err, "bridge: accept failed");
                    continue;
                }
            };
            let _ = stream.set_read_timeout(Some(IO_TIMEOUT));
            let _ = stream.set_write_timeout(Some(IO_TIMEOUT));

            let mut raw = String::new();
            if let Err(err) = stream.read_to_string(&mut raw) {
                tracing::warn!(channel, error = %err, "bridge: read request failed");
                continue;
            }

            let response = match Request::decode(&raw) {
                Ok(None) => {
                    tracing::debug!(channel, "bridge: shutdown requested");
                    break;
                }
                Ok(Some(request)) => match handler.handle(request) {
                    Ok(lines) => lines,
                    Err(err) => {
                        tracing::warn!(channel, error = %format!("{err:#}"), "bridge: handler failed");
                        Vec::new()
                    }
                },
                Err(err) => {
                    tracing::warn!(channel, error = %err, "bridge: malformed request");
                    Vec::new()
                }
            };

            if let Err(err) = write_lines(&mut stream, &response) {
                tracing::warn!(channel, error = %err, "bridge: write response failed");
            }
        }
        tracing::debug!(channel, "bridge: listener stopped");
    }
}

fn write_lines(stream: &mut UnixStream, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
    }
    stream.flush()
}

pub fn request(paths: &SessionPaths, request: &Request) -> Result<Vec<String>> {
    let path = paths.socket(request.channel());
    let mut stream = UnixStream::connect(&path)
        .with_context(|| format!("bridge: connect to {}", path.display()))?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream
        .write_all(request.encode().as_bytes())
        .context("bridge: write request")?;
    stream
        .shutdown(Shutdown::Write)
        .context("bridge: finish request")?;

    let mut raw = String::new();
    stream
        .read_to_string(&mut raw)
        .context("bridge: read response")?;
    Ok(response_lines(&raw))
}

// Blank lines are kept; preview output uses them as padding.
fn response_lines(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    let body = raw.strip_suffix('\n').unwrap_or(raw);
    body.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

pub fn shutdown(path: &Path) -> Result<()> {
    let mut stream = match UnixStream::connect(path) {
        Ok(stream) => stream,
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            return Ok(())
        }
        Err(err) => {
            return Err(err).with_context(|| format!("bridge: connect to {}", path.display()))
        }
    };
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream
        .shutdown(Shutdown::Write)
        .context("bridge: send shutdown")?;
    let mut drain = Vec::new();
    let _ = stream.read_to_end(&mut drain);
    Ok(())
}
