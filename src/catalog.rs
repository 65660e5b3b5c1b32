use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::config::CatalogOrder;

static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" \(size-(\d+)\)$").expect("size annotation pattern"));
static POST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" \(post-(\d+)\)$").expect("post annotation pattern"));
static ANNOTATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" \((?:size|post)-.*$").expect("annotation pattern"));

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog root must be a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    raw: String,
    title: String,
    size: Option<u64>,
    post_id: Option<String>,
}

impl Label {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let size = SIZE_RE
            .captures(&raw)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok());
        let post_id = POST_RE
            .captures(&raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        let title = ANNOTATION_RE.replace(&raw, "").into_owned();
        Self {
            raw,
            title,
            size,
            post_id,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn post_id(&self) -> Option<&str> {
        self.post_id.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Directory(Arc<Catalog>),
    File(String),
}

impl Entry {
    pub fn is_file(&self) -> bool {
        matches!(self, Entry::File(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub label: Label,
    pub entry: Entry,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(pos, node)| (node.label.raw().to_string(), pos))
            .collect();
        Self { nodes, index }
    }

    pub fn from_json(value: Value) -> Result<Self, CatalogError> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            _ => Err(CatalogError::NotAnObject),
        }
    }

    fn from_map(map: Map<String, Value>) -> Self {
        let mut nodes = Vec::with_capacity(map.len());
        for (key, value) in map {
            let entry = match value {
                Value::Object(child) => Entry::Directory(Arc::new(Self::from_map(child))),
                Value::String(uri) => Entry::File(uri),
                other => {
                    tracing::warn!(key = %key, kind = %json_kind(&other), "catalog: skipping malformed entry");
                    continue;
                }
            };
            nodes.push(Node {
                label: Label::parse(key),
                entry,
            });
        }
        Self::from_nodes(nodes)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.index.get(key).map(|&pos| &self.nodes[pos])
    }

    pub fn keys(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|node| node.label.raw().to_string())
            .collect()
    }

    pub fn find(&self, key: &str) -> Option<&Node> {
        if let Some(node) = self.get(key) {
            return Some(node);
        }
        self.nodes.iter().find_map(|node| match &node.entry {
            Entry::Directory(child) => child.find(key),
            Entry::File(_) => None,
        })
    }

    pub fn file_uris(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_uris(&mut out);
        out
    }

    fn collect_uris(&self, out: &mut Vec<String>) {
        for node in &self.nodes {
            match &node.entry {
                Entry::File(uri) => out.push(uri.clone()),
                Entry::Directory(child) => child.collect_uris(out),
            }
        }
    }

    pub fn files_only(&self) -> Catalog {
        let mut nodes = Vec::new();
        let mut seen = HashSet::new();
        self.collect_leaves("", &mut nodes, &mut seen);
        Catalog::from_nodes(nodes)
    }

    fn collect_leaves(&self, prefix: &str, out: &mut Vec<Node>, seen: &mut HashSet<String>) {
        for node in &self.nodes {
            match &node.entry {
                Entry::File(uri) => {
                    let key = unique_key(&format!("{prefix}{}", node.label.raw()), seen);
                    out.push(Node {
                        label: Label::parse(key),
                        entry: Entry::File(uri.clone()),
                    });
                }
                Entry::Directory(child) => {
                    let nested = format!("{prefix}{}/", node.label.title());
                    child.collect_leaves(&nested, out, seen);
                }
            }
        }
    }

    pub fn sorted_newest_first(&self) -> Catalog {
        let mut nodes = self.nodes.clone();
        nodes.sort_by_key(|node| {
            std::cmp::Reverse(node.label.post_id().and_then(|id| id.parse::<u64>().ok()))
        });
        Catalog::from_nodes(nodes)
    }
}

fn unique_key(candidate: &str, seen: &mut HashSet<String>) -> String {
    if seen.insert(candidate.to_string()) {
        return candidate.to_string();
    }
    // Insert the counter before the annotations so they stay parseable.
    let split = ANNOTATION_RE
        .find(candidate)
        .map(|m| m.start())
        .unwrap_or(candidate.len());
    let (stem, annotations) = candidate.split_at(split);
    let mut counter = 1;
    loop {
        let key = format!("{stem}.{counter}{annotations}");
        if seen.insert(key.clone()) {
            return key;
        }
        counter += 1;
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn load(path: &Path, order: CatalogOrder) -> Result<Catalog> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("catalog: read snapshot {}", path.display()))?;
    let value: Value = serde_json::from_str(&data)
        .with_context(|| format!("catalog: parse snapshot {}", path.display()))?;
    let catalog = Catalog::from_json(value)
        .with_context(|| format!("catalog: load snapshot {}", path.display()))?;
    tracing::info!(entries = catalog.len(), path = %path.display(), "catalog loaded");
    Ok(match order {
        CatalogOrder::File => catalog,
        CatalogOrder::Newest => catalog.sorted_newest_first(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample() -> Catalog {
        Catalog::from_json(json!({
            "Show (post-12)": {
                "S01": {
                    "e01.mkv (size-1000)": "http://x/1",
                    "e02.mkv (size-2000)": "http://x/2"
                },
                "extra.mkv (size-5)": "http://x/3"
            },
            "Movie (post-40)": {
                "movie.mkv (size-700)": "http://x/4"
            },
            "loose.mp4": "http://x/5"
        }))
        .unwrap()
    }

    #[test]
    fn label_parses_annotations() {
        let label = Label::parse("Episode 01.mkv (size-123456)");
        assert_eq!(label.title(), "Episode 01.mkv");
        assert_eq!(label.size(), Some(123456));
        assert_eq!(label.post_id(), None);

        let label = Label::parse("Some Show (post-991)");
        assert_eq!(label.title(), "Some Show");
        assert_eq!(label.post_id(), Some("991"));
        assert_eq!(label.size(), None);
    }

    #[test]
    fn malformed_annotation_falls_back_to_none() {
        let label = Label::parse("big.mkv (size-99999999999999999999999)");
        assert_eq!(label.size(), None);
        assert_eq!(label.title(), "big.mkv");

        let label = Label::parse("weird (size-abc)");
        assert_eq!(label.size(), None);
        assert_eq!(label.title(), "weird");
    }

    #[test]
    fn keeps_snapshot_order_and_types() {
        let catalog = sample();
        assert_eq!(
            catalog.keys(),
            vec!["Show (post-12)", "Movie (post-40)", "loose.mp4"]
        );
        assert!(matches!(
            catalog.get("Show (post-12)").unwrap().entry,
            Entry::Directory(_)
        ));
        assert!(catalog.get("loose.mp4").unwrap().entry.is_file());
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn rejects_non_object_root_and_skips_bad_values() {
        assert!(matches!(
            Catalog::from_json(json!(["a"])),
            Err(CatalogError::NotAnObject)
        ));
        let catalog = Catalog::from_json(json!({"a": 1, "b": "http://x/b", "c": null})).unwrap();
        assert_eq!(catalog.keys(), vec!["b"]);
    }

    #[test]
    fn file_uris_are_depth_first() {
        assert_eq!(
            sample().file_uris(),
            vec!["http://x/1", "http://x/2", "http://x/3", "http://x/4", "http://x/5"]
        );
    }

    #[test]
    fn find_searches_nested_levels() {
        let catalog = sample();
        let node = catalog.find("e02.mkv (size-2000)").unwrap();
        assert_eq!(node.entry, Entry::File("http://x/2".into()));
        assert!(catalog.find("nothing").is_none());
    }

    #[test]
    fn files_only_projection_prefixes_paths() {
        let projection = sample().files_only();
        assert_eq!(
            projection.keys(),
            vec![
                "Show/S01/e01.mkv (size-1000)",
                "Show/S01/e02.mkv (size-2000)",
                "Show/extra.mkv (size-5)",
                "Movie/movie.mkv (size-700)",
                "loose.mp4",
            ]
        );
        assert_eq!(
            projection.get("Show/S01/e02.mkv (size-2000)").unwrap().label.size(),
            Some(2000)
        );
    }

    #[test]
    fn files_only_disambiguates_collisions() {
        let catalog = Catalog::from_json(json!({
            "A (post-1)": {"x.mkv (size-1)": "http://x/1"},
            "A (post-2)": {"x.mkv (size-2)": "http://x/2"}
        }))
        .unwrap();
        let projection = catalog.files_only();
        assert_eq!(
            projection.keys(),
            vec!["A/x.mkv (size-1)", "A/x.mkv (size-2)"]
        );

        let catalog = Catalog::from_json(json!({
            "A (post-1)": {"x.mkv (size-1)": "http://x/1"},
            "A (post-2)": {"x.mkv (size-1)": "http://x/2"}
        }))
        .unwrap();
        let projection = catalog.files_only();
        assert_eq!(
            projection.keys(),
            vec!["A/x.mkv (size-1)", "A/x.mkv.1 (size-1)"]
        );
        assert_eq!(
            projection.get("A/x.mkv.1 (size-1)").unwrap().label.size(),
            Some(1)
        );
    }

    #[test]
    fn newest_first_sorts_by_post_id() {
        let sorted = sample().sorted_newest_first();
        assert_eq!(
            sorted.keys(),
            vec!["Movie (post-40)", "Show (post-12)", "loose.mp4"]
        );
    }

    #[test]
    fn newest_first_handles_the_largest_post_id() {
        let catalog = Catalog::from_json(json!({
            "loose.mkv": "http://x/0",
            "Old (post-1)": {},
            "Huge (post-18446744073709551615)": {}
        }))
        .unwrap();
        assert_eq!(
            catalog.sorted_newest_first().keys(),
            vec!["Huge (post-18446744073709551615)", "Old (post-1)", "loose.mkv"]
        );
    }

    #[test]
    fn load_reads_snapshot_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anitsu_files.json");
        fs::write(&path, r#"{"B": "http://x/2", "A": {"f (size-1)": "http://x/1"}}"#).unwrap();
        let catalog = load(&path, CatalogOrder::File).unwrap();
        assert_eq!(catalog.keys(), vec!["B", "A"]);

        let err = load(&dir.path().join("missing.json"), CatalogOrder::File).unwrap_err();
        assert!(err.to_string().contains("catalog: read snapshot"));
    }
}
