use std::env;
use std::fs::{self, OpenOptions};

use anyhow::{Context, Result};
use env_logger::{Builder, Target};

use crate::config::LogConfig;

pub const LOG_ENV: &str = "MAP_PICKER_LOG";

/// Sends `log` output to the configured file; the terminal belongs to the UI.
/// Without a log file, logging stays disabled.
pub fn init(cfg: &LogConfig) -> Result<()> {
    let Some(path) = cfg.file.as_ref() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("logging: create directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("logging: open {}", path.display()))?;

    let mut builder = Builder::new();
    builder.parse_filters(&cfg.level);
    if let Ok(filters) = env::var(LOG_ENV) {
        builder.parse_filters(&filters);
    }
    builder
        .format_timestamp_millis()
        .target(Target::Pipe(Box::new(file)))
        .try_init()
        .context("logging: install logger")?;
    Ok(())
}
