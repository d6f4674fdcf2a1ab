use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::UPSTREAM_PAGE_LIMIT;
use crate::pagination::MAX_ATTEMPTS;

const DEFAULT_ENV_PREFIX: &str = "GIFREEL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: None,
        }
    }
}

fn default_base_url() -> String {
    crate::reddit::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("gifreel/{} (+https://github.com/danielmerja/gifreel)", crate::VERSION)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_upstream_limit")]
    pub upstream_limit: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            upstream_limit: default_upstream_limit(),
            max_attempts: default_max_attempts(),
            debounce: default_debounce(),
        }
    }
}

fn default_collection() -> String {
    "gifs".into()
}

fn default_upstream_limit() -> u32 {
    UPSTREAM_PAGE_LIMIT
}

fn default_max_attempts() -> usize {
    MAX_ATTEMPTS
}

fn default_debounce() -> Duration {
    Duration::from_millis(300)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
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

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.reddit.base_url.is_empty() {
        base.reddit.base_url = other.reddit.base_url;
    }
    if !other.reddit.user_agent.is_empty() {
        base.reddit.user_agent = other.reddit.user_agent;
    }
    if other.reddit.timeout.is_some() {
        base.reddit.timeout = other.reddit.timeout;
    }

    if !other.feed.collection.trim().is_empty() {
        base.feed.collection = other.feed.collection;
    }
    if other.feed.upstream_limit != 0 {
        base.feed.upstream_limit = other.feed.upstream_limit;
    }
    if other.feed.max_attempts != 0 {
        base.feed.max_attempts = other.feed.max_attempts;
    }
    base.feed.debounce = other.feed.debounce;

    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "reddit.base_url" => cfg.reddit.base_url = value,
        "reddit.user_agent" => cfg.reddit.user_agent = value,
        "reddit.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.reddit.timeout = Some(duration);
            }
        }
        "feed.collection" => cfg.feed.collection = value,
        "feed.upstream_limit" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.feed.upstream_limit = parsed;
            }
        }
        "feed.max_attempts" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.feed.max_attempts = parsed;
            }
        }
        "feed.debounce" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.feed.debounce = duration;
            }
        }
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gifreel").join("config.yaml"))
}
