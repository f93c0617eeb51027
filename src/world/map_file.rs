use crate::world::position::MapId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawNpcPlacement")]
pub struct NpcPlacement {
    pub vnum: u32,
    pub x: i32,
    pub y: i32,
}

/// Placements name the entity `vnum`, older dumps only `id`; `vnum` wins when both exist.
#[derive(Deserialize)]
struct RawNpcPlacement {
    vnum: Option<u32>,
    id: Option<u32>,
    x: i32,
    y: i32,
}

impl TryFrom<RawNpcPlacement> for NpcPlacement {
    type Error = String;

    fn try_from(raw: RawNpcPlacement) -> Result<Self, Self::Error> {
        let vnum = raw
            .vnum
            .or(raw.id)
            .ok_or_else(|| "npc placement missing vnum".to_string())?;
        Ok(Self {
            vnum,
            x: raw.x,
            y: raw.y,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portal {
    pub destination_map_id: MapId,
    pub source_map_x: i32,
    pub source_map_y: i32,
}

/// Structural description of one map. Unknown fields in the file are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapFile {
    #[serde(default)]
    pub npcs: Vec<NpcPlacement>,
    #[serde(default)]
    pub portals: Vec<Portal>,
}

impl MapFile {
    pub fn npc(&self, vnum: u32) -> Option<&NpcPlacement> {
        self.npcs.iter().find(|npc| npc.vnum == vnum)
    }

    /// First portal in file order leading to `destination`.
    pub fn portal_to(&self, destination: MapId) -> Option<&Portal> {
        self.portals
            .iter()
            .find(|portal| portal.destination_map_id == destination)
    }
}

/// Source of per-map structural files. Every call reads afresh.
pub trait MapSource: Send + Sync {
    fn load_map(&self, map_id: MapId) -> Result<Option<MapFile>, MapFileError>;
}

/// Directory of `c_map_<id>.json` files.
#[derive(Debug, Clone)]
pub struct MapDirectory {
    dir: PathBuf,
}

impl MapDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn map_path(&self, map_id: MapId) -> PathBuf {
        self.dir.join(format!("c_map_{map_id}.json"))
    }

    /// Number of `c_map_*.json` files present; 0 when the directory is unreadable.
    pub fn count_files(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "maps directory unreadable");
                return 0;
            }
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| name.starts_with("c_map_") && name.ends_with(".json"))
                    .unwrap_or(false)
            })
            .count()
    }
}

impl MapSource for MapDirectory {
    fn load_map(&self, map_id: MapId) -> Result<Option<MapFile>, MapFileError> {
        let path = self.map_path(map_id);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(MapFileError::Read(path, err)),
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|err| MapFileError::Parse(path, err))
    }
}

#[derive(Debug, Error)]
pub enum MapFileError {
    #[error("map file read failed for {}: {}", .0.display(), .1)]
    Read(PathBuf, #[source] std::io::Error),
    #[error("map file parse failed for {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_json::Error),
}
