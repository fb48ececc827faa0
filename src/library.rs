use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::map::{self, MapDefinition, Snapshot};
use crate::source::{ChangingList, MapSource};

const MAX_SCAN_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub struct Config {
    pub dir: PathBuf,
    /// Zero disables periodic rescans.
    pub rescan_interval: Duration,
}

enum Command {
    Rescan,
    Stop,
}

/// Map source backed by a directory of descriptors, scanned on a background thread.
pub struct MapLibrary {
    maps: Arc<ChangingList>,
    commands: Sender<Command>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MapLibrary {
    /// Starts with an empty list; the first scan runs immediately on the scanner thread.
    pub fn open(cfg: Config) -> Result<Self> {
        let maps = Arc::new(ChangingList::default());
        let (commands, rx) = unbounded();
        let scanner_maps = maps.clone();
        let handle = thread::Builder::new()
            .name("map-scanner".into())
            .spawn(move || scanner(cfg, scanner_maps, rx))
            .context("library: spawn scanner thread")?;

        Ok(Self {
            maps,
            commands,
            handle: Some(handle),
        })
    }

    pub fn source(&self) -> Arc<dyn MapSource> {
        self.maps.clone()
    }

    pub fn rescan(&self) {
        let _ = self.commands.send(Command::Rescan);
    }
}

impl Drop for MapLibrary {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn scanner(cfg: Config, maps: Arc<ChangingList>, commands: Receiver<Command>) {
    publish(&cfg.dir, &maps);
    loop {
        let next = if cfg.rescan_interval.is_zero() {
            commands.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            commands.recv_timeout(cfg.rescan_interval)
        };
        match next {
            Ok(Command::Rescan) | Err(RecvTimeoutError::Timeout) => publish(&cfg.dir, &maps),
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("library: scanner stopped");
}

fn publish(dir: &Path, maps: &ChangingList) {
    let next = Snapshot::from(scan(dir));
    if next.same_items(&maps.current_snapshot()) {
        return;
    }
    info!("library: {} maps in {}", next.len(), dir.display());
    maps.replace(next);
}

/// Loads every descriptor under `dir`, sorted by name. Unreadable files are skipped.
pub fn scan(dir: &Path) -> Vec<MapDefinition> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(true)
        .max_depth(MAX_SCAN_DEPTH)
        .into_iter()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("library: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !map::is_descriptor(entry.path()) {
            continue;
        }
        match MapDefinition::load(entry.path()) {
            Ok(map) => found.push(map),
            Err(err) => warn!("library: skipping map: {err}"),
        }
    }
    found.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;
    use tempfile::tempdir;

    fn descriptor(dir: &Path, file: &str, name: &str) {
        fs::write(
            dir.join(file),
            format!("name: {name}\nmin_players: 2\nmax_players: 4\n"),
        )
        .unwrap();
    }

    fn wait_for_len(source: &Arc<dyn MapSource>, len: usize) -> Snapshot {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let snapshot = source.current_snapshot();
            if snapshot.len() == len || Instant::now() > deadline {
                return snapshot;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn scan_sorts_and_skips_invalid() {
        let dir = tempdir().unwrap();
        descriptor(dir.path(), "b.map.yaml", "beta");
        descriptor(dir.path(), "a.map.yml", "Alpha");
        fs::write(dir.path().join("broken.map.yaml"), "name: [").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let names: Vec<_> = scan(dir.path()).iter().map(|m| m.name.clone()).collect();
        assert_eq!(names, vec!["Alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn rescan_publishes_changes() {
        let dir = tempdir().unwrap();
        descriptor(dir.path(), "a.map.yaml", "Alpha");
        let library = MapLibrary::open(Config {
            dir: dir.path().to_path_buf(),
            rescan_interval: Duration::ZERO,
        })
        .unwrap();
        let source = library.source();
        assert_eq!(wait_for_len(&source, 1).len(), 1);

        descriptor(dir.path(), "b.map.yaml", "Beta");
        library.rescan();
        let snapshot = wait_for_len(&source, 2);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(1).map(|m| m.name.as_str()), Some("Beta"));
    }
}
