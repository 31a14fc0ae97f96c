use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "MARKLASTREAD";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub markup: MarkupConfig,
    #[serde(default)]
    pub scroll: ScrollConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_settings_key")]
    pub settings_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            settings_key: default_settings_key(),
        }
    }
}

fn default_storage_path() -> Option<PathBuf> {
    crate::storage::default_path()
}

fn default_settings_key() -> String {
    "tmlr".into()
}

/// Selectors and marker texts describing the host page's markup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkupConfig {
    #[serde(default = "default_observe_root")]
    pub observe_root: String,
    #[serde(default = "default_item_root")]
    pub item_root: String,
    #[serde(default = "default_timestamp")]
    pub timestamp: String,
    #[serde(default = "default_permalink")]
    pub permalink: String,
    #[serde(default = "default_permalink_attribute")]
    pub permalink_attribute: String,
    #[serde(default = "default_reshare_marker")]
    pub reshare_marker: String,
    #[serde(default = "default_reshare_text")]
    pub reshare_text: String,
    #[serde(default = "default_promoted_marker")]
    pub promoted_marker: String,
    #[serde(default = "default_promoted_text")]
    pub promoted_text: String,
    #[serde(default = "default_more_options")]
    pub more_options: String,
    #[serde(default = "default_menu")]
    pub menu: String,
    #[serde(default = "default_menu_item")]
    pub menu_item: String,
    #[serde(default = "default_heading_watch")]
    pub heading_watch: String,
    #[serde(default = "default_heading")]
    pub heading: String,
    #[serde(default = "default_heading_text")]
    pub heading_text: String,
    #[serde(default = "default_button")]
    pub button: String,
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self {
            observe_root: default_observe_root(),
            item_root: default_item_root(),
            timestamp: default_timestamp(),
            permalink: default_permalink(),
            permalink_attribute: default_permalink_attribute(),
            reshare_marker: default_reshare_marker(),
            reshare_text: default_reshare_text(),
            promoted_marker: default_promoted_marker(),
            promoted_text: default_promoted_text(),
            more_options: default_more_options(),
            menu: default_menu(),
            menu_item: default_menu_item(),
            heading_watch: default_heading_watch(),
            heading: default_heading(),
            heading_text: default_heading_text(),
            button: default_button(),
        }
    }
}

fn default_observe_root() -> String {
    "#react-root".into()
}

fn default_item_root() -> String {
    "article".into()
}

fn default_timestamp() -> String {
    "time".into()
}

fn default_permalink() -> String {
    "a".into()
}

fn default_permalink_attribute() -> String {
    "href".into()
}

fn default_reshare_marker() -> String {
    "a span".into()
}

fn default_reshare_text() -> String {
    " Retweeted".into()
}

fn default_promoted_marker() -> String {
    "span".into()
}

fn default_promoted_text() -> String {
    "Promoted".into()
}

fn default_more_options() -> String {
    r#"[role="button"][aria-haspopup="true"][aria-label="More"]"#.into()
}

fn default_menu() -> String {
    r#"[role="menu"]"#.into()
}

fn default_menu_item() -> String {
    r#"[role="menuitem"]"#.into()
}

fn default_heading_watch() -> String {
    r#"h2[role="heading"]"#.into()
}

fn default_heading() -> String {
    "h2".into()
}

fn default_heading_text() -> String {
    "Following".into()
}

fn default_button() -> String {
    r#"[role="button"]"#.into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrollConfig {
    #[serde(default = "default_fuse_delay", with = "humantime_serde")]
    pub fuse_delay: Duration,
    #[serde(default = "default_settle_delay", with = "humantime_serde")]
    pub settle_delay: Duration,
    #[serde(default = "default_menu_settle_delay", with = "humantime_serde")]
    pub menu_settle_delay: Duration,
    #[serde(default = "default_padding")]
    pub padding: i64,
    #[serde(default = "default_stall_limit")]
    pub stall_limit: u32,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            fuse_delay: default_fuse_delay(),
            settle_delay: default_settle_delay(),
            menu_settle_delay: default_menu_settle_delay(),
            padding: default_padding(),
            stall_limit: default_stall_limit(),
        }
    }
}

fn default_fuse_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_menu_settle_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_padding() -> i64 {
    -100
}

fn default_stall_limit() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebugConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_level")]
    pub level: String,
    /// Regex applied to debug messages when `enabled`.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: default_level(),
            filter: None,
        }
    }
}

fn default_level() -> String {
    "warn".into()
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
    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }
    if !other.storage.settings_key.is_empty() {
        base.storage.settings_key = other.storage.settings_key;
    }

    let markup = &mut base.markup;
    let fields = [
        (&mut markup.observe_root, other.markup.observe_root),
        (&mut markup.item_root, other.markup.item_root),
        (&mut markup.timestamp, other.markup.timestamp),
        (&mut markup.permalink, other.markup.permalink),
        (&mut markup.permalink_attribute, other.markup.permalink_attribute),
        (&mut markup.reshare_marker, other.markup.reshare_marker),
        (&mut markup.reshare_text, other.markup.reshare_text),
        (&mut markup.promoted_marker, other.markup.promoted_marker),
        (&mut markup.promoted_text, other.markup.promoted_text),
        (&mut markup.more_options, other.markup.more_options),
        (&mut markup.menu, other.markup.menu),
        (&mut markup.menu_item, other.markup.menu_item),
        (&mut markup.heading_watch, other.markup.heading_watch),
        (&mut markup.heading, other.markup.heading),
        (&mut markup.heading_text, other.markup.heading_text),
        (&mut markup.button, other.markup.button),
    ];
    for (slot, value) in fields {
        if !value.is_empty() {
            *slot = value;
        }
    }

    base.scroll.fuse_delay = other.scroll.fuse_delay;
    base.scroll.settle_delay = other.scroll.settle_delay;
    base.scroll.menu_settle_delay = other.scroll.menu_settle_delay;
    base.scroll.padding = other.scroll.padding;
    if other.scroll.stall_limit != 0 {
        base.scroll.stall_limit = other.scroll.stall_limit;
    }

    base.debug.enabled = other.debug.enabled;
    if !other.debug.level.is_empty() {
        base.debug.level = other.debug.level;
    }
    if other.debug.filter.is_some() {
        base.debug.filter = other.debug.filter;
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
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        "storage.settings_key" => cfg.storage.settings_key = value,
        "markup.observe_root" => cfg.markup.observe_root = value,
        "markup.item_root" => cfg.markup.item_root = value,
        "markup.timestamp" => cfg.markup.timestamp = value,
        "markup.permalink" => cfg.markup.permalink = value,
        "markup.permalink_attribute" => cfg.markup.permalink_attribute = value,
        "markup.reshare_marker" => cfg.markup.reshare_marker = value,
        "markup.reshare_text" => cfg.markup.reshare_text = value,
        "markup.promoted_marker" => cfg.markup.promoted_marker = value,
        "markup.promoted_text" => cfg.markup.promoted_text = value,
        "markup.more_options" => cfg.markup.more_options = value,
        "markup.menu" => cfg.markup.menu = value,
        "markup.menu_item" => cfg.markup.menu_item = value,
        "markup.heading_watch" => cfg.markup.heading_watch = value,
        "markup.heading" => cfg.markup.heading = value,
        "markup.heading_text" => cfg.markup.heading_text = value,
        "markup.button" => cfg.markup.button = value,
        "scroll.fuse_delay" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.scroll.fuse_delay = duration;
            }
        }
        "scroll.settle_delay" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.scroll.settle_delay = duration;
            }
        }
        "scroll.menu_settle_delay" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.scroll.menu_settle_delay = duration;
            }
        }
        "scroll.padding" => {
            if let Ok(parsed) = value.parse::<i64>() {
                cfg.scroll.padding = parsed;
            }
        }
        "scroll.stall_limit" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.scroll.stall_limit = parsed;
            }
        }
        "debug.enabled" => {
            cfg.debug.enabled = matches!(value.as_str(), "1" | "true" | "TRUE" | "True");
        }
        "debug.level" => cfg.debug.level = value,
        "debug.filter" => cfg.debug.filter = Some(value).filter(|v| !v.is_empty()),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("marklastread").join("config.yaml"))
}
