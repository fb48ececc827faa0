use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::decode::{DEFAULT_MAX_PIXELS, DEFAULT_THUMBNAIL_SIZE};
use crate::present::DEFAULT_DATE_FORMAT;

const DEFAULT_ENV_PREFIX: &str = "MAP_PICKER";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub maps: MapsConfig,
    #[serde(default)]
    pub decode: DecodeConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapsConfig {
    #[serde(default = "default_maps_dir")]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_rescan_interval", with = "humantime_serde")]
    pub rescan_interval: Duration,
    #[serde(default)]
    pub show_dates: bool,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            dir: default_maps_dir(),
            rescan_interval: default_rescan_interval(),
            show_dates: false,
        }
    }
}

fn default_maps_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("map-picker").join("maps"))
}

fn default_rescan_interval() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecodeConfig {
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
    #[serde(default = "default_cache_previews")]
    pub cache_previews: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_pixels: default_max_pixels(),
            thumbnail_size: default_thumbnail_size(),
            cache_previews: default_cache_previews(),
        }
    }
}

fn default_max_pixels() -> u64 {
    DEFAULT_MAX_PIXELS
}

fn default_thumbnail_size() -> u32 {
    DEFAULT_THUMBNAIL_SIZE
}

fn default_cache_previews() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            date_format: default_date_format(),
        }
    }
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("map-picker").join("map-picker.log"))
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        let from_file = read_config_file(path)?;
        cfg = merge_config(cfg, from_file);
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
    if other.maps.dir.is_some() {
        base.maps.dir = other.maps.dir;
    }
    base.maps.rescan_interval = other.maps.rescan_interval;
    base.maps.show_dates = other.maps.show_dates;

    if other.decode.workers != 0 {
        base.decode.workers = other.decode.workers;
    }
    if other.decode.max_pixels != 0 {
        base.decode.max_pixels = other.decode.max_pixels;
    }
    base.decode.thumbnail_size = other.decode.thumbnail_size;
    base.decode.cache_previews = other.decode.cache_previews;

    if !other.ui.date_format.trim().is_empty() {
        base.ui.date_format = other.ui.date_format;
    }

    if !other.log.level.trim().is_empty() {
        base.log.level = other.log.level;
    }
    if other.log.file.is_some() {
        base.log.file = other.log.file;
    }

    base
}

// Env values override the file; keys look like MAP_PICKER_MAPS__SHOW_DATES.
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
        "maps.dir" => cfg.maps.dir = Some(PathBuf::from(value)),
        "maps.rescan_interval" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.maps.rescan_interval = duration;
            }
        }
        "maps.show_dates" => cfg.maps.show_dates = parse_bool(&value),
        "decode.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.decode.workers = parsed;
            }
        }
        "decode.max_pixels" => {
            if let Ok(parsed) = value.parse::<u64>() {
                cfg.decode.max_pixels = parsed;
            }
        }
        "decode.thumbnail_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.decode.thumbnail_size = parsed;
            }
        }
        "decode.cache_previews" => cfg.decode.cache_previews = parse_bool(&value),
        "ui.date_format" => cfg.ui.date_format = value,
        "log.level" => cfg.log.level = value,
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        _ => {}
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("map-picker").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_from_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "{}\n").unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("MAP_PICKER_TEST_DEFAULTS".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.date_format, "%Y-%m-%d");
        assert_eq!(cfg.maps.rescan_interval, Duration::from_secs(5));
        assert!(cfg.decode.cache_previews);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "maps:\n  dir: /srv/maps\n  rescan_interval: 30s\n  show_dates: true\ndecode:\n  workers: 3\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("MAP_PICKER_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.maps.dir, Some(PathBuf::from("/srv/maps")));
        assert_eq!(cfg.maps.rescan_interval, Duration::from_secs(30));
        assert!(cfg.maps.show_dates);
        assert_eq!(cfg.decode.workers, 3);
        assert_eq!(cfg.decode.thumbnail_size, DEFAULT_THUMBNAIL_SIZE);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = load(LoadOptions {
            config_file: Some(dir.path().join("absent.yaml")),
            env_prefix: Some("MAP_PICKER_TEST_MISSING".into()),
        });
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides() {
        env::set_var("MAP_PICKER_TEST_ENV_MAPS__SHOW_DATES", "true");
        env::set_var("MAP_PICKER_TEST_ENV_DECODE__WORKERS", "6");
        let cfg = load(LoadOptions {
            config_file: None,
            env_prefix: Some("MAP_PICKER_TEST_ENV".into()),
        })
        .unwrap();
        assert!(cfg.maps.show_dates);
        assert_eq!(cfg.decode.workers, 6);
        env::remove_var("MAP_PICKER_TEST_ENV_MAPS__SHOW_DATES");
        env::remove_var("MAP_PICKER_TEST_ENV_DECODE__WORKERS");
    }
}
