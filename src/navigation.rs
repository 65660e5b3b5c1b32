use std::collections::HashSet;
use std::sync::Arc;

use crate::catalog::{Catalog, Entry};

pub const BACK_MARKER: &str = "..";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Tree,
    FilesOnly,
}

#[derive(Debug, Clone, PartialEq)]
struct Frame {
    catalog: Arc<Catalog>,
    view: View,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    uris: Vec<String>,
}

impl Selection {
    pub fn from_uris<I>(uris: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = HashSet::new();
        let uris = uris
            .into_iter()
            .filter(|uri| seen.insert(uri.clone()))
            .collect();
        Self { uris }
    }

    pub fn uris(&self) -> &[String] {
        &self.uris
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Level { keys: Vec<String>, has_back: bool },
    Selection(Selection),
    NoOp,
}

impl Outcome {
    pub fn level_lines(keys: &[String], has_back: bool) -> Vec<String> {
        let mut lines = keys.to_vec();
        if has_back {
            lines.push(BACK_MARKER.to_string());
        }
        lines
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub root: Arc<Catalog>,
    pub current: Arc<Catalog>,
    pub parent: Option<Arc<Catalog>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Navigator {
    root: Arc<Catalog>,
    current: Arc<Catalog>,
    view: View,
    stack: Vec<Frame>,
}

impl Navigator {
    pub fn new(root: Arc<Catalog>) -> Self {
        Self {
            current: root.clone(),
            root,
            view: View::Tree,
            stack: Vec::new(),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            root: self.root.clone(),
            current: self.current.clone(),
            parent: self.stack.last().map(|frame| frame.catalog.clone()),
        }
    }

    pub fn level(&self) -> Outcome {
        Outcome::Level {
            keys: self.current.keys(),
            has_back: !self.stack.is_empty(),
        }
    }

    pub fn advance<S: AsRef<str>>(&mut self, selected: &[S]) -> Outcome {
        let keys: Vec<&str> = selected
            .iter()
            .map(AsRef::as_ref)
            .filter(|key| !key.is_empty())
            .collect();

        if keys == [BACK_MARKER] {
            return self.back();
        }

        let mut files = Vec::new();
        let mut descend = None;
        for key in keys.into_iter().filter(|key| *key != BACK_MARKER) {
            match self.current.get(key).map(|node| &node.entry) {
                Some(Entry::File(uri)) => files.push(uri.clone()),
                Some(Entry::Directory(child)) => descend = Some(child.clone()),
                None => tracing::debug!(key, "navigation: dropping stale key"),
            }
        }

        if !files.is_empty() {
            return Outcome::Selection(Selection::from_uris(files));
        }

        match descend {
            Some(child) => {
                self.push(child, View::Tree);
                self.level()
            }
            None => Outcome::NoOp,
        }
    }

    pub fn back(&mut self) -> Outcome {
        if let Some(frame) = self.stack.pop() {
            self.current = frame.catalog;
            self.view = frame.view;
        }
        self.level()
    }

    pub fn download_folder<S: AsRef<str>>(&self, selected: &[S]) -> Outcome {
        let mut uris = Vec::new();
        for key in selected.iter().map(AsRef::as_ref) {
            match self.current.get(key).map(|node| &node.entry) {
                Some(Entry::File(uri)) => uris.push(uri.clone()),
                Some(Entry::Directory(child)) => uris.extend(child.file_uris()),
                None => {}
            }
        }
        if uris.is_empty() {
            Outcome::NoOp
        } else {
            Outcome::Selection(Selection::from_uris(uris))
        }
    }

    pub fn toggle_files_only(&mut self) -> Outcome {
        match self.view {
            View::FilesOnly => self.back(),
            View::Tree => {
                let projection = Arc::new(self.current.files_only());
                self.push(projection, View::FilesOnly);
                self.level()
            }
        }
    }

    fn push(&mut self, next: Arc<Catalog>, view: View) {
        let previous = std::mem::replace(&mut self.current, next);
        self.stack.push(Frame {
            catalog: previous,
            view: self.view,
        });
        self.view = view;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog(value: serde_json::Value) -> Arc<Catalog> {
        Arc::new(Catalog::from_json(value).unwrap())
    }

    fn scenario() -> Navigator {
        Navigator::new(catalog(json!({
            "A": {"f1.mkv (size-1000)": "http://x/1"},
            "B": "http://x/2"
        })))
    }

    fn deep() -> Navigator {
        Navigator::new(catalog(json!({
            "Show": {
                "S01": {
                    "Extras": {"ncop.mkv (size-10)": "http://x/ncop"},
                    "e01.mkv (size-100)": "http://x/e01",
                    "e02.mkv (size-200)": "http://x/e02"
                },
                "S02": {"e01.mkv (size-300)": "http://x/s2e01"}
            },
            "Movie": {"movie.mkv (size-700)": "http://x/movie"}
        })))
    }

    fn selection(uris: &[&str]) -> Outcome {
        Outcome::Selection(Selection::from_uris(uris.iter().map(|u| u.to_string())))
    }

    #[test]
    fn descend_then_select_leaf() {
        let mut nav = scenario();
        assert_eq!(
            nav.advance(&["A"]),
            Outcome::Level {
                keys: vec!["f1.mkv (size-1000)".into()],
                has_back: true
            }
        );
        assert_eq!(nav.advance(&["f1.mkv (size-1000)"]), selection(&["http://x/1"]));
    }

    #[test]
    fn select_file_from_root() {
        let mut nav = scenario();
        assert_eq!(nav.advance(&["B"]), selection(&["http://x/2"]));
        assert_eq!(nav.depth(), 0);
    }

    #[test]
    fn path_to_leaf_yields_its_uri() {
        let mut nav = deep();
        nav.advance(&["Show"]);
        nav.advance(&["S01"]);
        nav.advance(&["Extras"]);
        assert_eq!(nav.advance(&["ncop.mkv (size-10)"]), selection(&["http://x/ncop"]));
    }

    #[test]
    fn back_restores_exact_state() {
        let mut nav = deep();
        nav.advance(&["Show"]);
        let before = nav.clone();
        nav.advance(&["S01"]);
        assert_ne!(nav, before);
        nav.advance(&[".."]);
        assert_eq!(nav, before);
    }

    #[test]
    fn back_from_two_levels_deep() {
        let mut nav = deep();
        nav.advance(&["Show"]);
        nav.advance(&["S01"]);
        assert_eq!(
            nav.advance(&[".."]),
            Outcome::Level {
                keys: vec!["S01".into(), "S02".into()],
                has_back: true
            }
        );
        assert_eq!(
            nav.advance(&[".."]),
            Outcome::Level {
                keys: vec!["Show".into(), "Movie".into()],
                has_back: false
            }
        );
    }

    #[test]
    fn back_at_root_redisplays_root() {
        let mut nav = scenario();
        let before = nav.clone();
        assert_eq!(
            nav.advance(&[".."]),
            Outcome::Level {
                keys: vec!["A".into(), "B".into()],
                has_back: false
            }
        );
        assert_eq!(nav, before);
    }

    #[test]
    fn stale_key_is_a_noop() {
        let mut nav = scenario();
        let before = nav.clone();
        assert_eq!(nav.advance(&["gone"]), Outcome::NoOp);
        assert_eq!(nav.advance(&[""]), Outcome::NoOp);
        assert_eq!(nav, before);
    }

    #[test]
    fn mixed_batch_selects_files_and_ignores_directories() {
        let mut nav = deep();
        nav.advance(&["Show"]);
        nav.advance(&["S01"]);
        let outcome = nav.advance(&["Extras", "e02.mkv (size-200)", "gone", "e01.mkv (size-100)"]);
        assert_eq!(outcome, selection(&["http://x/e02", "http://x/e01"]));
        assert_eq!(nav.depth(), 2);
    }

    #[test]
    fn several_directories_enter_the_last() {
        let mut nav = deep();
        nav.advance(&["Show"]);
        assert_eq!(
            nav.advance(&["S01", "S02"]),
            Outcome::Level {
                keys: vec!["e01.mkv (size-300)".into()],
                has_back: true
            }
        );
    }

    #[test]
    fn back_marker_in_a_batch_is_ignored() {
        let mut nav = deep();
        nav.advance(&["Show"]);
        let outcome = nav.advance(&["..", "S02"]);
        assert_eq!(
            outcome,
            Outcome::Level {
                keys: vec!["e01.mkv (size-300)".into()],
                has_back: true
            }
        );
        assert_eq!(nav.depth(), 2);
    }

    #[test]
    fn download_folder_flattens_directories() {
        let mut nav = deep();
        nav.advance(&["Show"]);
        let before = nav.clone();
        assert_eq!(
            nav.download_folder(&["S01", "S02", "gone"]),
            selection(&["http://x/ncop", "http://x/e01", "http://x/e02", "http://x/s2e01"])
        );
        assert_eq!(nav, before);
        assert_eq!(nav.download_folder(&["gone", ".."]), Outcome::NoOp);
    }

    #[test]
    fn files_only_toggle_is_reversible() {
        let mut nav = deep();
        nav.advance(&["Show"]);
        let before = nav.clone();

        let outcome = nav.toggle_files_only();
        assert_eq!(nav.view(), View::FilesOnly);
        assert_eq!(
            outcome,
            Outcome::Level {
                keys: vec![
                    "S01/Extras/ncop.mkv (size-10)".into(),
                    "S01/e01.mkv (size-100)".into(),
                    "S01/e02.mkv (size-200)".into(),
                    "S02/e01.mkv (size-300)".into(),
                ],
                has_back: true
            }
        );
        assert_eq!(
            nav.advance(&["S01/e02.mkv (size-200)"]),
            selection(&["http://x/e02"])
        );

        nav.toggle_files_only();
        assert_eq!(nav, before);
    }

    #[test]
    fn back_leaves_files_only_view() {
        let mut nav = deep();
        let before = nav.clone();
        nav.toggle_files_only();
        nav.advance(&[".."]);
        assert_eq!(nav, before);
        assert_eq!(nav.view(), View::Tree);
    }

    #[test]
    fn snapshot_tracks_parent() {
        let mut nav = deep();
        assert!(nav.snapshot().parent.is_none());
        nav.advance(&["Show"]);
        let snap = nav.snapshot();
        assert_eq!(snap.parent.unwrap().keys(), vec!["Show", "Movie"]);
        assert_eq!(snap.current.keys(), vec!["S01", "S02"]);
    }

    #[test]
    fn selection_deduplicates() {
        let sel = Selection::from_uris(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(sel.uris(), ["a".to_string(), "b".to_string()]);
        assert_eq!(
            Outcome::level_lines(&["x".into()], true),
            vec!["x".to_string(), "..".to_string()]
        );
    }
}
