use std::path::PathBuf;

use crate::catalog::{Entry, Label, Node};
use crate::config::PreviewConfig;
use crate::navigation::{Snapshot, BACK_MARKER};

const SIZE_UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
const COLOR_DIRECTORY: &str = "\x1b[1;34m";
const COLOR_FILE: &str = "\x1b[1;35m";
const COLOR_RESET: &str = "\x1b[m";

pub fn human_size(bytes: u64) -> String {
    let mut out = format!("{bytes} B");
    let mut size = bytes as f64;
    for unit in SIZE_UNITS {
        if size < 1000.0 {
            break;
        }
        size /= 1000.0;
        out = format!("{size:.2} {unit}");
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preview {
    pub lines: Vec<String>,
    pub total_bytes: u64,
    pub image: Option<PathBuf>,
}

impl Preview {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    limit: usize,
    color: bool,
    covers_dir: Option<PathBuf>,
    image_padding: usize,
}

impl Renderer {
    pub fn new(cfg: &PreviewConfig) -> Self {
        Self {
            limit: cfg.limit,
            color: cfg.color,
            covers_dir: cfg.covers_dir.clone(),
            image_padding: 0,
        }
    }

    pub fn with_image_padding(mut self, rows: usize) -> Self {
        self.image_padding = rows;
        self
    }

    pub fn render(&self, key: &str, snapshot: &Snapshot) -> Preview {
        let (children, image) = self.resolve(key, snapshot);

        let mut items: Vec<&Node> = children.iter().collect();
        items.sort_by_key(|node| node.entry.is_file());
        items.truncate(self.limit);

        let mut total = 0u64;
        let mut listing = Vec::with_capacity(items.len());
        for node in &items {
            match &node.entry {
                Entry::Directory(_) => {
                    listing.push(self.paint(COLOR_DIRECTORY, node.label.title()));
                }
                Entry::File(_) => {
                    let size = match node.label.size() {
                        Some(bytes) => {
                            total += bytes;
                            human_size(bytes)
                        }
                        None => String::new(),
                    };
                    listing.push(format!(
                        "{size:<9} {}",
                        self.paint(COLOR_FILE, node.label.title())
                    ));
                }
            }
        }

        let mut lines = Vec::with_capacity(listing.len() + self.image_padding + 1);
        if image.is_some() {
            lines.extend(std::iter::repeat(String::new()).take(self.image_padding));
        }
        if total > 0 {
            lines.push(format!("Total size: {}", human_size(total)));
        }
        lines.extend(listing);

        Preview {
            lines,
            total_bytes: total,
            image,
        }
    }

    fn resolve(&self, key: &str, snapshot: &Snapshot) -> (Vec<Node>, Option<PathBuf>) {
        if key == BACK_MARKER {
            let children = snapshot
                .parent
                .as_ref()
                .map(|parent| parent.nodes().to_vec())
                .unwrap_or_default();
            return (children, None);
        }

        let node = snapshot
            .current
            .get(key)
            .or_else(|| snapshot.root.find(key));
        let Some(node) = node else {
            tracing::debug!(key, "preview: key not found in snapshot");
            return (
                vec![Node {
                    label: Label::parse(key),
                    entry: Entry::File(String::new()),
                }],
                None,
            );
        };

        let image = self.cover_for(&node.label);
        let children = match &node.entry {
            Entry::Directory(child) => child.nodes().to_vec(),
            Entry::File(_) => vec![node.clone()],
        };
        (children, image)
    }

    fn cover_for(&self, label: &Label) -> Option<PathBuf> {
        let post_id = label.post_id()?;
        let path = self.covers_dir.as_ref()?.join(format!("{post_id}.jpg"));
        path.is_file().then_some(path)
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.color {
            format!("{color}{text}{COLOR_RESET}")
        } else {
            text.to_string()
        }
    }
}
