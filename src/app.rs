use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::config;
use crate::decode::PreviewDecoder;
use crate::library::{self, MapLibrary};
use crate::list::{self, MapList};
use crate::logging;
use crate::map::MapDefinition;
use crate::present::{ChosenMap, DateFormat, PreviewBoard};
use crate::ui;
use crate::worker::{self, DecodePool};

/// Command-line overrides layered on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub maps_dir: Option<PathBuf>,
    pub show_dates: bool,
}

pub fn run(opts: RunOptions) -> Result<Option<MapDefinition>> {
    let mut cfg = config::load(config::LoadOptions {
        config_file: opts.config_file,
        env_prefix: None,
    })
    .context("load config")?;
    if let Some(dir) = opts.maps_dir {
        cfg.maps.dir = Some(dir);
    }
    if opts.show_dates {
        cfg.maps.show_dates = true;
    }

    logging::init(&cfg.log).context("init logging")?;

    let dir = cfg
        .maps
        .dir
        .clone()
        .context("no maps directory configured; pass --maps DIR")?;
    if !dir.is_dir() {
        anyhow::bail!("maps directory {} does not exist", dir.display());
    }
    info!("map-picker {} starting on {}", crate::VERSION, dir.display());

    let library = Arc::new(
        MapLibrary::open(library::Config {
            dir: dir.clone(),
            rescan_interval: cfg.maps.rescan_interval,
        })
        .context("open map library")?,
    );

    let decoder = Arc::new(PreviewDecoder::new(
        cfg.decode.max_pixels,
        cfg.decode.thumbnail_size,
    ));
    let pool = Arc::new(
        DecodePool::new(
            decoder,
            worker::Config {
                workers: cfg.decode.workers,
            },
        )
        .context("start decode workers")?,
    );

    let board = Arc::new(PreviewBoard::default());
    let chosen = Arc::new(ChosenMap::default());

    let mut list = MapList::new(
        list::Options {
            show_dates: cfg.maps.show_dates,
            date_format: DateFormat::new(cfg.ui.date_format.clone()),
            cache_previews: cfg.decode.cache_previews,
            ..list::Options::default()
        },
        pool,
        board.clone(),
        chosen.clone(),
    );
    list.attach(library.source());

    let mut model = ui::Model::new(ui::Options {
        list,
        board,
        library: Some(library.clone()),
        source_label: friendly_path(&dir),
    });
    let picked = model.run()?;
    drop(model);
    drop(library);

    Ok(picked.or_else(|| chosen.take()))
}

fn friendly_path(path: &std::path::Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            let mut display = String::from("~");
            if !stripped.as_os_str().is_empty() {
                display.push_str(&format!("/{}", stripped.display()));
            }
            return display;
        }
    }
    path.display().to_string()
}
