use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "ANITSU";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub finder: FinderConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub update: UpdateConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CatalogOrder {
    #[default]
    File,
    Newest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub order: CatalogOrder,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
            order: CatalogOrder::default(),
        }
    }
}

fn default_catalog_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("anitsu_files.json")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinderConfig {
    #[serde(default = "default_finder_command")]
    pub command: String,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_preview_window")]
    pub preview_window: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            command: default_finder_command(),
            prompt: default_prompt(),
            preview_window: default_preview_window(),
            extra_args: Vec::new(),
        }
    }
}

fn default_finder_command() -> String {
    "fzf".into()
}

fn default_prompt() -> String {
    "anitsu> ".into()
}

fn default_preview_window() -> String {
    "left:52%:border-none".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_limit")]
    pub limit: usize,
    #[serde(default = "default_true")]
    pub color: bool,
    #[serde(default = "default_covers_dir")]
    pub covers_dir: Option<PathBuf>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            limit: default_preview_limit(),
            color: true,
            covers_dir: default_covers_dir(),
        }
    }
}

fn default_preview_limit() -> usize {
    80
}

fn default_true() -> bool {
    true
}

fn default_covers_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("anitsu_covers"))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackend {
    #[default]
    Auto,
    None,
    Kitty,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageConfig {
    #[serde(default)]
    pub backend: ImageBackend,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub col: u16,
    #[serde(default)]
    pub row: u16,
    #[serde(default = "default_image_cols")]
    pub cols: u16,
    #[serde(default = "default_image_rows")]
    pub rows: u16,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            backend: ImageBackend::default(),
            command: Vec::new(),
            col: 0,
            row: 0,
            cols: default_image_cols(),
            rows: default_image_rows(),
        }
    }
}

fn default_image_cols() -> u16 {
    32
}

fn default_image_rows() -> u16 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadConfig {
    #[serde(default = "default_download_command")]
    pub command: String,
    #[serde(default = "default_download_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
    #[serde(default)]
    pub rpc: RpcConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            command: default_download_command(),
            dir: default_download_dir(),
            concurrency: default_concurrency(),
            runtime_dir: default_runtime_dir(),
            rpc: RpcConfig::default(),
        }
    }
}

fn default_download_command() -> String {
    "aria2c".into()
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_concurrency() -> usize {
    2
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rpc_url")]
    pub url: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_rpc_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_rpc_url(),
            secret: String::new(),
            timeout: default_rpc_timeout(),
        }
    }
}

fn default_rpc_url() -> String {
    "http://localhost:6800/jsonrpc".into()
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(2)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateConfig {
    #[serde(default = "default_update_steps")]
    pub steps: Vec<Vec<String>>,
    #[serde(default = "default_image_steps")]
    pub image_steps: Vec<Vec<String>>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            steps: default_update_steps(),
            image_steps: default_image_steps(),
        }
    }
}

fn default_update_steps() -> Vec<Vec<String>> {
    vec![
        vec!["anitsu-get-posts".into()],
        vec!["anitsu-get-files".into()],
        vec!["anitsu-gen-files".into()],
    ]
}

fn default_image_steps() -> Vec<Vec<String>> {
    vec![vec!["anitsu-download-images".into()]]
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        cfg = read_config_file(path)?;
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "catalog.path" => cfg.catalog.path = PathBuf::from(value),
        "catalog.order" => match value.trim().to_ascii_lowercase().as_str() {
            "newest" => cfg.catalog.order = CatalogOrder::Newest,
            "file" => cfg.catalog.order = CatalogOrder::File,
            _ => {}
        },
        "finder.command" => cfg.finder.command = value,
        "finder.prompt" => cfg.finder.prompt = value,
        "finder.preview_window" => cfg.finder.preview_window = value,
        "finder.extra_args" => cfg.finder.extra_args = split_list(&value),
        "preview.limit" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.preview.limit = parsed;
            }
        }
        "preview.color" => cfg.preview.color = truthy(&value),
        "preview.covers_dir" => cfg.preview.covers_dir = Some(PathBuf::from(value)),
        "image.backend" => match value.trim().to_ascii_lowercase().as_str() {
            "auto" => cfg.image.backend = ImageBackend::Auto,
            "none" => cfg.image.backend = ImageBackend::None,
            "kitty" => cfg.image.backend = ImageBackend::Kitty,
            "command" => cfg.image.backend = ImageBackend::Command,
            _ => {}
        },
        "image.command" => cfg.image.command = split_list(&value),
        "download.command" => cfg.download.command = value,
        "download.dir" => cfg.download.dir = PathBuf::from(value),
        "download.concurrency" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.download.concurrency = parsed;
            }
        }
        "download.runtime_dir" => cfg.download.runtime_dir = PathBuf::from(value),
        "download.rpc.enabled" => cfg.download.rpc.enabled = truthy(&value),
        "download.rpc.url" => cfg.download.rpc.url = value,
        "download.rpc.secret" => cfg.download.rpc.secret = value,
        "download.rpc.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.download.rpc.timeout = duration;
            }
        }
        _ => {}
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("anitsu").join("config.yaml"))
}
