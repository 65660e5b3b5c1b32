use std::borrow::Cow;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use crossterm::cursor::{MoveTo, RestorePosition, SavePosition};
use crossterm::QueueableCommand;
use image::ImageFormat;
use rand::Rng;

use crate::config::{ImageBackend, ImageConfig};

const KITTY_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRequest {
    Show(PathBuf),
    Clear,
    Shutdown,
}

pub trait ImageSink: Send {
    fn show(&mut self, path: &Path) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

pub struct ImageChannel {
    tx: Sender<ImageRequest>,
    pending: Receiver<ImageRequest>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ImageChannel {
    pub fn spawn(sink: Box<dyn ImageSink>) -> Result<Self> {
        let (tx, rx) = bounded(1);
        let pending = rx.clone();
        let handle = thread::Builder::new()
            .name("anitsu-cover".into())
            .spawn(move || worker(sink, rx))
            .context("cover: spawn worker")?;
        Ok(Self {
            tx,
            pending,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> ImageSender {
        ImageSender {
            tx: self.tx.clone(),
            pending: self.pending.clone(),
        }
    }

    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        while self.pending.try_recv().is_ok() {}
        let _ = self.tx.send(ImageRequest::Shutdown);
        let _ = handle.join();
    }
}

impl Drop for ImageChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone)]
pub struct ImageSender {
    tx: Sender<ImageRequest>,
    pending: Receiver<ImageRequest>,
}

impl ImageSender {
    pub fn send(&self, request: ImageRequest) {
        let mut request = request;
        loop {
            match self.tx.try_send(request) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    let _ = self.pending.try_recv();
                    request = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

fn worker(mut sink: Box<dyn ImageSink>, rx: Receiver<ImageRequest>) {
    for request in rx.iter() {
        let result = match &request {
            ImageRequest::Show(path) => sink.show(path),
            ImageRequest::Clear => sink.clear(),
            ImageRequest::Shutdown => {
                let _ = sink.clear();
                break;
            }
        };
        if let Err(err) = result {
            tracing::warn!(error = %format!("{err:#}"), ?request, "cover: request failed");
        }
    }
    tracing::debug!("cover: worker stopped");
}

pub fn sink_for(cfg: &ImageConfig) -> Option<Box<dyn ImageSink>> {
    match cfg.backend {
        ImageBackend::None => None,
        ImageBackend::Auto if !is_kitty_terminal() => None,
        ImageBackend::Auto | ImageBackend::Kitty => Some(Box::new(KittySink::new(cfg))),
        ImageBackend::Command if cfg.command.is_empty() => {
            tracing::warn!("cover: command backend selected without image.command");
            None
        }
        ImageBackend::Command => Some(Box::new(CommandSink::new(cfg))),
    }
}

pub struct KittySink {
    col: u16,
    row: u16,
    cols: u16,
    rows: u16,
    image_id: u32,
    wrap_tmux: bool,
    tty: Option<File>,
    visible: bool,
}

impl KittySink {
    pub fn new(cfg: &ImageConfig) -> Self {
        Self {
            col: cfg.col,
            row: cfg.row,
            cols: cfg.cols.max(1),
            rows: cfg.rows.max(1),
            image_id: rand::thread_rng().gen_range(1..=0x00ff_ffff),
            wrap_tmux: tmux_passthrough_enabled(),
            tty: None,
            visible: false,
        }
    }

    fn tty(&mut self) -> Result<&mut File> {
        if self.tty.is_none() {
            let tty = OpenOptions::new()
                .write(true)
                .open("/dev/tty")
                .context("cover: open /dev/tty")?;
            self.tty = Some(tty);
        }
        self.tty.as_mut().context("cover: terminal unavailable")
    }
}

impl ImageSink for KittySink {
    fn show(&mut self, path: &Path) -> Result<()> {
        let bytes = fs::read(path).with_context(|| format!("cover: read {}", path.display()))?;
        let chunks = kitty_transmit_chunks(&bytes, self.image_id, self.cols, self.rows, self.wrap_tmux)?;
        let delete = kitty_delete_sequence(self.image_id, self.wrap_tmux);
        let (col, row, visible) = (self.col, self.row, self.visible);

        let tty = self.tty()?;
        if visible {
            tty.write_all(delete.as_bytes())?;
        }
        tty.queue(SavePosition)?;
        tty.queue(MoveTo(col, row))?;
        for chunk in &chunks {
            tty.write_all(chunk.as_bytes())?;
        }
        tty.queue(RestorePosition)?;
        tty.flush()?;
        self.visible = true;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if !self.visible {
            return Ok(());
        }
        let delete = kitty_delete_sequence(self.image_id, self.wrap_tmux);
        let tty = self.tty()?;
        tty.write_all(delete.as_bytes())?;
        tty.flush()?;
        self.visible = false;
        Ok(())
    }
}

fn encode_png_for_kitty(bytes: &[u8]) -> Result<Cow<'_, [u8]>> {
    if bytes.is_empty() {
        bail!("cover image had no bytes");
    }

    if matches!(image::guess_format(bytes), Ok(ImageFormat::Png)) {
        return Ok(Cow::Borrowed(bytes));
    }

    let image = image::load_from_memory(bytes).context("decode cover image")?;
    let mut png_bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .context("encode cover as png")?;
    Ok(Cow::Owned(png_bytes))
}

fn kitty_transmit_chunks(
    bytes: &[u8],
    image_id: u32,
    cols: u16,
    rows: u16,
    wrap_tmux: bool,
) -> Result<Vec<String>> {
    let png_data = encode_png_for_kitty(bytes)?;
    let encoded = general_purpose::STANDARD.encode(png_data.as_ref());
    if encoded.is_empty() {
        bail!("failed to encode cover image");
    }

    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < encoded.len() {
        let end = usize::min(offset + KITTY_CHUNK_SIZE, encoded.len());
        let more = if end < encoded.len() { 1 } else { 0 };
        let mut out = String::new();
        if offset == 0 {
            out.push_str(&format!(
                "\x1b_Ga=T,q=2,C=1,i={image_id},f=100,c={cols},r={rows},m={more};"
            ));
        } else {
            out.push_str(&format!("\x1b_Gm={more};"));
        }
        out.push_str(&encoded[offset..end]);
        out.push_str("\x1b\\");
        chunks.push(tmux_wrap(out, wrap_tmux));
        offset = end;
    }
    Ok(chunks)
}

fn kitty_delete_sequence(image_id: u32, wrap_tmux: bool) -> String {
    tmux_wrap(format!("\x1b_Ga=d,q=2,d=I,i={image_id};\x1b\\"), wrap_tmux)
}

fn tmux_wrap(sequence: String, wrap_tmux: bool) -> String {
    if wrap_tmux {
        format!("\x1bPtmux;\x1b{sequence}\x1b\\")
    } else {
        sequence
    }
}

pub struct CommandSink {
    argv: Vec<String>,
    cols: u16,
    rows: u16,
}

impl CommandSink {
    pub fn new(cfg: &ImageConfig) -> Self {
        Self {
            argv: cfg.command.clone(),
            cols: cfg.cols,
            rows: cfg.rows,
        }
    }
}

impl ImageSink for CommandSink {
    fn show(&mut self, path: &Path) -> Result<()> {
        let argv = expand_command(&self.argv, path, self.cols, self.rows);
        let Some((program, args)) = argv.split_first() else {
            bail!("cover: empty command");
        };
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("cover: run {program}"))?;
        if !status.success() {
            bail!("cover: {program} exited with {status}");
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}

fn expand_command(argv: &[String], path: &Path, cols: u16, rows: u16) -> Vec<String> {
    let path = path.to_string_lossy();
    argv.iter()
        .map(|arg| {
            arg.replace("%PATH%", &path)
                .replace("%COLS%", &cols.to_string())
                .replace("%ROWS%", &rows.to_string())
        })
        .collect()
}

fn env_truthy(name: &str) -> bool {
    env::var(name)
        .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(false)
}

fn tmux_passthrough_enabled() -> bool {
    env::var("TMUX").map(|v| !v.is_empty()).unwrap_or(false)
}

fn is_kitty_terminal() -> bool {
    if env_truthy("ANITSU_DISABLE_KITTY") {
        return false;
    }
    if env_truthy("ANITSU_FORCE_KITTY") {
        return true;
    }
    if env::var("KITTY_WINDOW_ID")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
    {
        return true;
    }
    if env::var("WEZTERM_PANE")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
    {
        return true;
    }
    env::var("TERM")
        .map(|term| {
            let lower = term.to_lowercase();
            lower.contains("kitty") || lower.contains("wezterm")
        })
        .unwrap_or(false)
}
