use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

use crate::bridge::{self, ChannelKind, Handler, Listener, Request, SessionPaths};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::cover::{self, ImageChannel, ImageRequest, ImageSender};
use crate::finder::Finder;
use crate::navigation::{Navigator, Outcome, Selection, Snapshot};
use crate::preview::Renderer;

#[derive(Debug)]
pub enum SessionEvent {
    Selected(Selection),
    FinderExited(ExitStatus),
    Interrupted,
}

type SharedSnapshot = Arc<RwLock<Arc<Snapshot>>>;

struct ReloadHandler {
    navigator: Navigator,
    snapshot: SharedSnapshot,
    events: Sender<SessionEvent>,
}

impl ReloadHandler {
    fn lines(&self, outcome: Outcome) -> Vec<String> {
        match outcome {
            Outcome::Level { keys, has_back } => Outcome::level_lines(&keys, has_back),
            Outcome::Selection(selection) => {
                tracing::info!(files = selection.len(), "session: selection resolved");
                let _ = self.events.send(SessionEvent::Selected(selection));
                Vec::new()
            }
            Outcome::NoOp => match self.navigator.level() {
                Outcome::Level { keys, has_back } => Outcome::level_lines(&keys, has_back),
                _ => Vec::new(),
            },
        }
    }
}

impl Handler for ReloadHandler {
    fn handle(&mut self, request: Request) -> Result<Vec<String>> {
        let outcome = match request {
            Request::Reload(keys) => self.navigator.advance(keys.as_slice()),
            Request::DownloadFolder(keys) => self.navigator.download_folder(keys.as_slice()),
            Request::FilesOnly => self.navigator.toggle_files_only(),
            Request::Preview(_) => bail!("session: preview request on the reload channel"),
        };
        *self.snapshot.write() = Arc::new(self.navigator.snapshot());
        tracing::debug!(depth = self.navigator.depth(), "session: navigation updated");
        Ok(self.lines(outcome))
    }
}

struct PreviewHandler {
    renderer: Renderer,
    snapshot: SharedSnapshot,
    cover: Option<ImageSender>,
}

impl Handler for PreviewHandler {
    fn handle(&mut self, request: Request) -> Result<Vec<String>> {
        let Request::Preview(key) = request else {
            bail!("session: navigation request on the preview channel");
        };
        let snapshot = self.snapshot.read().clone();
        let preview = self.renderer.render(&key, &snapshot);
        if let Some(cover) = &self.cover {
            match &preview.image {
                Some(path) => cover.send(ImageRequest::Show(path.clone())),
                None => cover.send(ImageRequest::Clear),
            }
        }
        Ok(preview.lines)
    }
}

pub struct Session {
    paths: SessionPaths,
    initial: Vec<String>,
    events_tx: Sender<SessionEvent>,
    events: Receiver<SessionEvent>,
    sockets: Vec<PathBuf>,
    listeners: Vec<thread::JoinHandle<()>>,
    cover: Option<ImageChannel>,
    finder: Option<Finder>,
}

impl Session {
    pub fn start(cfg: &Config, catalog: Arc<Catalog>, paths: SessionPaths) -> Result<Self> {
        let navigator = Navigator::new(catalog);
        let initial = match navigator.level() {
            Outcome::Level { keys, has_back } => Outcome::level_lines(&keys, has_back),
            _ => Vec::new(),
        };
        let snapshot: SharedSnapshot = Arc::new(RwLock::new(Arc::new(navigator.snapshot())));
        let (events_tx, events) = unbounded();

        let mut session = Self {
            paths,
            initial,
            events_tx: events_tx.clone(),
            events,
            sockets: Vec::new(),
            listeners: Vec::new(),
            cover: None,
            finder: None,
        };

        if let Some(sink) = cover::sink_for(&cfg.image) {
            session.cover = Some(ImageChannel::spawn(sink)?);
        }
        let cover_sender = session.cover.as_ref().map(ImageChannel::sender);
        let padding = if cover_sender.is_some() {
            usize::from(cfg.image.rows)
        } else {
            0
        };

        session.spawn_listener(
            ChannelKind::Reload,
            ReloadHandler {
                navigator,
                snapshot: snapshot.clone(),
                events: events_tx,
            },
        )?;
        session.spawn_listener(
            ChannelKind::Preview,
            PreviewHandler {
                renderer: Renderer::new(&cfg.preview).with_image_padding(padding),
                snapshot,
                cover: cover_sender,
            },
        )?;

        tracing::info!(session = %session.paths.prefix().display(), "session: started");
        Ok(session)
    }

    fn spawn_listener<H: Handler + 'static>(&mut self, kind: ChannelKind, handler: H) -> Result<()> {
        let path = self.paths.socket(kind);
        let listener = Listener::bind(kind, path.clone())?;
        self.sockets.push(path);
        let handle = thread::Builder::new()
            .name(format!("anitsu-{}", kind.name()))
            .spawn(move || listener.serve(handler))
            .with_context(|| format!("session: spawn {} listener", kind.name()))?;
        self.listeners.push(handle);
        Ok(())
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn initial_keys(&self) -> &[String] {
        &self.initial
    }

    pub fn notifier(&self) -> Sender<SessionEvent> {
        self.events_tx.clone()
    }

    pub fn launch_finder(&mut self, cfg: &Config, exe: &Path) -> Result<()> {
        let events = self.events_tx.clone();
        let finder = Finder::launch(
            &cfg.finder,
            exe,
            &self.paths,
            self.initial.clone(),
            move |status| {
                let _ = events.send(SessionEvent::FinderExited(status));
            },
        )?;
        self.finder = Some(finder);
        Ok(())
    }

    pub fn wait(&self) -> Result<SessionEvent> {
        self.events.recv().context("session: event channel closed")
    }

    fn teardown(&mut self) {
        if let Some(finder) = self.finder.take() {
            drop(finder);
        }
        for path in &self.sockets {
            if let Err(err) = bridge::shutdown(path) {
                tracing::warn!(error = %format!("{err:#}"), "session: stop listener");
            }
        }
        for handle in self.listeners.drain(..) {
            let _ = handle.join();
        }
        for path in self.sockets.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "session: remove socket"),
            }
        }
        if let Some(mut cover) = self.cover.take() {
            cover.shutdown();
        }
        tracing::info!("session: closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}
