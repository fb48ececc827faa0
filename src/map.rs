use std::fmt;
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

pub const DESCRIPTOR_SUFFIXES: [&str; 2] = [".map.yaml", ".map.yml"];

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path}: preview is not valid base64: {source}")]
    Base64 {
        path: PathBuf,
        #[source]
        source: base64::DecodeError,
    },
    #[error("{path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// Stable identity of a map. Two definitions with the same id are the same item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MapId(String);

impl MapId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    fn digest(path: &Path, contents: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(contents);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw preview payload as stored with the map. Decoding happens later, off the UI thread.
#[derive(Clone, Default)]
pub enum Preview {
    Encoded(Arc<[u8]>),
    Rgba5551 {
        width: u32,
        height: u32,
        pixels: Arc<[u16]>,
    },
    #[default]
    Missing,
}

impl fmt::Debug for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preview::Encoded(bytes) => write!(f, "Encoded({} bytes)", bytes.len()),
            Preview::Rgba5551 { width, height, .. } => write!(f, "Rgba5551({width}x{height})"),
            Preview::Missing => f.write_str("Missing"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MapInfo {
    pub id: MapId,
    pub name: String,
    pub min_players: u8,
    pub max_players: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip)]
    pub preview: Preview,
}

/// Immutable, cheaply clonable handle to a map. Shared read-only between the list and decode tasks.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct MapDefinition(Arc<MapInfo>);

impl MapDefinition {
    pub fn new(info: MapInfo) -> Self {
        Self(Arc::new(info))
    }

    pub fn is_same(&self, other: &MapDefinition) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.id == other.0.id
    }

    pub fn player_range(&self) -> String {
        format!("{}-{}", self.min_players, self.max_players)
    }

    pub fn preview(&self) -> &Preview {
        &self.0.preview
    }

    pub fn load(path: &Path) -> Result<Self, MapError> {
        let contents = fs::read(path).map_err(|source| MapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let descriptor: MapDescriptor =
            serde_yaml::from_slice(&contents).map_err(|source| MapError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let name = descriptor.name.trim().to_string();
        if name.is_empty() {
            return Err(invalid(path, "name is empty"));
        }
        if descriptor.min_players == 0 || descriptor.min_players > descriptor.max_players {
            return Err(invalid(
                path,
                format!(
                    "player range {}-{} is invalid",
                    descriptor.min_players, descriptor.max_players
                ),
            ));
        }

        let created_at = match descriptor.created {
            Some(created) => created,
            None => fs::metadata(path)
                .and_then(|meta| meta.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
        };

        let preview = match descriptor.preview {
            Some(preview) => preview.resolve(path)?,
            None => Preview::Missing,
        };

        Ok(Self::new(MapInfo {
            id: MapId::digest(path, &contents),
            name,
            min_players: descriptor.min_players,
            max_players: descriptor.max_players,
            created_at,
            path: Some(path.to_path_buf()),
            preview,
        }))
    }
}

impl Deref for MapDefinition {
    type Target = MapInfo;

    fn deref(&self) -> &MapInfo {
        &self.0
    }
}

pub fn is_descriptor(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| {
            let lower = name.to_ascii_lowercase();
            DESCRIPTOR_SUFFIXES
                .iter()
                .any(|suffix| lower.ends_with(suffix))
        })
        .unwrap_or(false)
}

fn invalid<M: Into<String>>(path: &Path, message: M) -> MapError {
    MapError::Invalid {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

#[derive(Debug, Deserialize)]
struct MapDescriptor {
    name: String,
    min_players: u8,
    max_players: u8,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    preview: Option<PreviewDescriptor>,
}

#[derive(Debug, Default, Deserialize)]
struct PreviewDescriptor {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(default)]
    rgba5551: Option<PackedPreview>,
}

#[derive(Debug, Deserialize)]
struct PackedPreview {
    width: u32,
    height: u32,
    pixels: String,
}

impl PreviewDescriptor {
    fn resolve(self, path: &Path) -> Result<Preview, MapError> {
        let given = [
            self.image.is_some(),
            self.file.is_some(),
            self.rgba5551.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if given > 1 {
            return Err(invalid(
                path,
                "preview must set only one of image, file or rgba5551",
            ));
        }

        if let Some(encoded) = self.image {
            let bytes = decode_base64(path, &encoded)?;
            return Ok(Preview::Encoded(bytes.into()));
        }

        if let Some(file) = self.file {
            let resolved = match path.parent() {
                Some(parent) if file.is_relative() => parent.join(&file),
                _ => file,
            };
            let bytes = fs::read(&resolved).map_err(|source| MapError::Io {
                path: resolved.clone(),
                source,
            })?;
            return Ok(Preview::Encoded(bytes.into()));
        }

        if let Some(packed) = self.rgba5551 {
            let bytes = decode_base64(path, &packed.pixels)?;
            if bytes.len() % 2 != 0 {
                return Err(invalid(path, "rgba5551 pixel data has an odd byte count"));
            }
            let pixels: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            return Ok(Preview::Rgba5551 {
                width: packed.width,
                height: packed.height,
                pixels: pixels.into(),
            });
        }

        Ok(Preview::Missing)
    }
}

fn decode_base64(path: &Path, encoded: &str) -> Result<Vec<u8>, MapError> {
    let compact: String = encoded.split_whitespace().collect();
    general_purpose::STANDARD
        .decode(compact)
        .map_err(|source| MapError::Base64 {
            path: path.to_path_buf(),
            source,
        })
}

/// A complete, ordered list of maps. Replaces the previous snapshot wholesale.
#[derive(Debug, Clone, Default)]
pub struct Snapshot(Arc<[MapDefinition]>);

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MapDefinition> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MapDefinition> {
        self.0.iter()
    }

    pub fn contains(&self, id: &MapId) -> bool {
        self.0.iter().any(|map| &map.id == id)
    }

    /// True when both snapshots list the same ids in the same order.
    pub fn same_items(&self, other: &Snapshot) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(left, right)| left.is_same(right))
    }
}

impl From<Vec<MapDefinition>> for Snapshot {
    fn from(maps: Vec<MapDefinition>) -> Self {
        Self(maps.into())
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a MapDefinition;
    type IntoIter = std::slice::Iter<'a, MapDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_descriptor_with_packed_preview() {
        let dir = tempdir().unwrap();
        let pixels = general_purpose::STANDARD.encode([0x01u8, 0xf8, 0xff, 0xff]);
        let path = write(
            dir.path(),
            "valley.map.yaml",
            &format!(
                "name: Green Valley\nmin_players: 2\nmax_players: 4\ncreated: 2024-03-01T10:00:00Z\npreview:\n  rgba5551:\n    width: 2\n    height: 1\n    pixels: {pixels}\n"
            ),
        );

        let map = MapDefinition::load(&path).unwrap();
        assert_eq!(map.name, "Green Valley");
        assert_eq!(map.player_range(), "2-4");
        assert_eq!(map.created_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        match map.preview() {
            Preview::Rgba5551 {
                width,
                height,
                pixels,
            } => {
                assert_eq!((*width, *height), (2, 1));
                assert_eq!(pixels.as_ref(), &[0xf801, 0xffff]);
            }
            other => panic!("unexpected preview {other:?}"),
        }
    }

    #[test]
    fn preview_file_is_relative_to_descriptor() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("valley.png"), b"not really a png").unwrap();
        let path = write(
            dir.path(),
            "valley.map.yml",
            "name: Valley\nmin_players: 1\nmax_players: 2\npreview:\n  file: valley.png\n",
        );

        let map = MapDefinition::load(&path).unwrap();
        match map.preview() {
            Preview::Encoded(bytes) => assert_eq!(bytes.as_ref(), b"not really a png"),
            other => panic!("unexpected preview {other:?}"),
        }
    }

    #[test]
    fn rejects_inverted_player_range() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "bad.map.yaml",
            "name: Bad\nmin_players: 4\nmax_players: 2\n",
        );
        let err = MapDefinition::load(&path).unwrap_err();
        assert!(matches!(err, MapError::Invalid { .. }), "{err}");
    }

    #[test]
    fn identity_follows_file_contents() {
        let dir = tempdir().unwrap();
        let body = "name: Island\nmin_players: 2\nmax_players: 2\n";
        let path = write(dir.path(), "island.map.yaml", body);
        let first = MapDefinition::load(&path).unwrap();
        let again = MapDefinition::load(&path).unwrap();
        assert!(first.is_same(&again));

        write(dir.path(), "island.map.yaml", "name: Island\nmin_players: 2\nmax_players: 3\n");
        let edited = MapDefinition::load(&path).unwrap();
        assert!(!first.is_same(&edited));
    }

    #[test]
    fn recognises_descriptor_names() {
        assert!(is_descriptor(Path::new("maps/a.map.yaml")));
        assert!(is_descriptor(Path::new("maps/A.MAP.YML")));
        assert!(!is_descriptor(Path::new("maps/config.yaml")));
    }
}
