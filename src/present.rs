use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};
use log::warn;
use parking_lot::Mutex;

use crate::decode::Bitmap;
use crate::map::MapDefinition;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone)]
pub enum Presented {
    Placeholder,
    Bitmap(Bitmap),
}

impl Presented {
    pub fn bitmap(&self) -> Option<&Bitmap> {
        match self {
            Presented::Bitmap(bitmap) => Some(bitmap),
            Presented::Placeholder => None,
        }
    }
}

/// Applies a decoded preview (or the neutral placeholder) to a visible row.
pub trait ImagePresenter: Send + Sync {
    fn present(&self, slot: usize, image: Presented);
    /// Drops whatever the row was showing.
    fn release(&self, slot: usize);
}

/// Receives maps the user activated.
pub trait SelectionSink: Send + Sync {
    fn on_item_activated(&self, map: &MapDefinition);
}

#[derive(Debug, Clone)]
pub struct DateFormat {
    pattern: String,
}

impl Default for DateFormat {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT)
    }
}

impl DateFormat {
    pub fn new<S: Into<String>>(pattern: S) -> Self {
        let pattern = pattern.into();
        let invalid = StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error));
        if invalid {
            warn!("present: invalid date format {pattern:?}, using {DEFAULT_DATE_FORMAT}");
        }
        if invalid || pattern.trim().is_empty() {
            return Self {
                pattern: DEFAULT_DATE_FORMAT.to_string(),
            };
        }
        Self { pattern }
    }

    pub fn format(&self, at: &DateTime<Utc>) -> String {
        at.with_timezone(&Local).format(&self.pattern).to_string()
    }
}

/// Presenter that keeps the latest image per row; the terminal UI draws from it.
#[derive(Debug, Default)]
pub struct PreviewBoard {
    rows: Mutex<HashMap<usize, Presented>>,
    revision: AtomicU64,
}

impl PreviewBoard {
    pub fn get(&self, slot: usize) -> Option<Presented> {
        self.rows.lock().get(&slot).cloned()
    }

    /// Bumped on every change so the UI can tell when to redraw.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl ImagePresenter for PreviewBoard {
    fn present(&self, slot: usize, image: Presented) {
        self.rows.lock().insert(slot, image);
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, slot: usize) {
        if self.rows.lock().remove(&slot).is_some() {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Selection sink that remembers the last activated map.
#[derive(Debug, Default)]
pub struct ChosenMap {
    chosen: Mutex<Option<MapDefinition>>,
}

impl ChosenMap {
    pub fn get(&self) -> Option<MapDefinition> {
        self.chosen.lock().clone()
    }

    pub fn take(&self) -> Option<MapDefinition> {
        self.chosen.lock().take()
    }
}

impl SelectionSink for ChosenMap {
    fn on_item_activated(&self, map: &MapDefinition) {
        *self.chosen.lock() = Some(map.clone());
    }
}
