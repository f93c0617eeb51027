//! Read-only game data: NPC and monster definitions, map names, and the per-map files.
//!
//! Indexes are `BTreeMap`s keyed by identifier, so name searches walk records in ascending
//! id order and the "first match" they return is reproducible across runs.

use crate::world::map_file::{MapDirectory, MapFile, MapSource, Portal};
use crate::world::position::MapId;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub type LocalizedName = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntityRecord {
    pub id: u32,
    #[serde(default)]
    pub name: LocalizedName,
    /// Gameplay attributes the navigation core does not interpret.
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, Value>,
}

impl EntityRecord {
    pub fn localized_name(&self, language: &str) -> Option<&str> {
        self.name.get(language).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MapInfo {
    #[serde(default)]
    pub name: LocalizedName,
}

#[derive(Debug, Clone)]
pub struct DatasetPaths {
    pub npcs_file: PathBuf,
    pub monsters_file: PathBuf,
    pub maps_file: PathBuf,
    pub maps_dir: PathBuf,
}

pub struct GameDataset {
    npcs: BTreeMap<u32, EntityRecord>,
    monsters: BTreeMap<u32, EntityRecord>,
    maps_info: BTreeMap<MapId, MapInfo>,
    maps: Box<dyn MapSource>,
    map_files: usize,
    language: String,
    map_count: MapId,
}

impl std::fmt::Debug for GameDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameDataset")
            .field("npcs", &self.npcs.len())
            .field("monsters", &self.monsters.len())
            .field("maps_info", &self.maps_info.len())
            .field("map_files", &self.map_files)
            .field("language", &self.language)
            .field("map_count", &self.map_count)
            .finish()
    }
}

impl GameDataset {
    pub fn load(paths: &DatasetPaths, language: &str, map_count: MapId) -> Result<Self, DatasetError> {
        let npcs = load_entities(&paths.npcs_file, "npcs")?;
        let monsters = load_entities(&paths.monsters_file, "monsters")?;
        let maps_info = load_map_info(&paths.maps_file)?;
        let maps = MapDirectory::new(&paths.maps_dir);
        let map_files = if paths.maps_dir.is_dir() {
            let files = maps.count_files();
            info!(files, dir = %paths.maps_dir.display(), "map files available");
            files
        } else {
            warn!(dir = %paths.maps_dir.display(), "maps directory not found");
            0
        };
        Ok(Self {
            npcs,
            monsters,
            maps_info,
            maps: Box::new(maps),
            map_files,
            language: language.to_string(),
            map_count,
        })
    }

    /// Empty dataset reading map files from `maps`.
    pub fn with_source(maps: impl MapSource + 'static, language: &str, map_count: MapId) -> Self {
        Self {
            npcs: BTreeMap::new(),
            monsters: BTreeMap::new(),
            maps_info: BTreeMap::new(),
            maps: Box::new(maps),
            map_files: 0,
            language: language.to_string(),
            map_count,
        }
    }

    pub fn insert_npc(&mut self, record: EntityRecord) {
        self.npcs.insert(record.id, record);
    }

    pub fn insert_monster(&mut self, record: EntityRecord) {
        self.monsters.insert(record.id, record);
    }

    pub fn insert_map_info(&mut self, map_id: MapId, info: MapInfo) {
        self.maps_info.insert(map_id, info);
    }

    pub fn npc_count(&self) -> usize {
        self.npcs.len()
    }

    pub fn monster_count(&self) -> usize {
        self.monsters.len()
    }

    pub fn map_info_count(&self) -> usize {
        self.maps_info.len()
    }

    /// `c_map_*.json` files counted when the dataset was loaded.
    pub fn map_file_count(&self) -> usize {
        self.map_files
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Every map id the corpus may contain, ascending.
    pub fn map_ids(&self) -> RangeInclusive<MapId> {
        1..=self.map_count
    }

    pub fn npc(&self, id: u32) -> Option<&EntityRecord> {
        self.npcs.get(&id)
    }

    pub fn find_npc_by_name(&self, pattern: &str) -> Option<&EntityRecord> {
        find_by_name(&self.npcs, pattern, &self.language)
    }

    pub fn find_monster_by_name(&self, pattern: &str) -> Option<&EntityRecord> {
        find_by_name(&self.monsters, pattern, &self.language)
    }

    /// Name in the configured language, falling back to `fallback`.
    pub fn display_name<'a>(&'a self, record: &'a EntityRecord, fallback: &'a str) -> &'a str {
        record.localized_name(&self.language).unwrap_or(fallback)
    }

    pub fn map_name(&self, map_id: MapId) -> String {
        self.maps_info
            .get(&map_id)
            .and_then(|info| info.name.get(&self.language))
            .cloned()
            .unwrap_or_else(|| format!("Map {map_id}"))
    }

    /// Reads the map file from disk. Missing or broken files come back as `None`.
    pub fn load_map_file(&self, map_id: MapId) -> Option<MapFile> {
        match self.maps.load_map(map_id) {
            Ok(map) => map,
            Err(err) => {
                warn!(map_id, error = %err, "map file unusable");
                None
            }
        }
    }

    pub fn find_npc_on_map(&self, map_id: MapId, vnum: u32) -> Option<(i32, i32)> {
        let map = self.load_map_file(map_id)?;
        map.npc(vnum).map(|npc| (npc.x, npc.y))
    }

    pub fn portal_to(&self, from: MapId, to: MapId) -> Option<Portal> {
        let map = self.load_map_file(from)?;
        map.portal_to(to).copied()
    }
}

/// Case-insensitive substring match in either direction, first hit in id order.
fn find_by_name<'a>(
    records: &'a BTreeMap<u32, EntityRecord>,
    pattern: &str,
    language: &str,
) -> Option<&'a EntityRecord> {
    let pattern = pattern.trim().to_lowercase();
    if pattern.is_empty() {
        return None;
    }
    records.values().find(|record| {
        let name = match record.localized_name(language) {
            Some(name) if !name.trim().is_empty() => name.to_lowercase(),
            _ => return false,
        };
        name.contains(&pattern) || pattern.contains(&name)
    })
}

fn read_optional_json(path: &Path, label: &str) -> Result<Option<Value>, DatasetError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(source = label, path = %path.display(), "data source missing, using empty index");
            return Ok(None);
        }
        Err(err) => return Err(DatasetError::Read(path.to_path_buf(), err)),
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|err| DatasetError::Parse(path.to_path_buf(), err))
}

/// Entity sources are either an array of records or an object keyed by id.
fn load_entities(path: &Path, label: &str) -> Result<BTreeMap<u32, EntityRecord>, DatasetError> {
    let Some(value) = read_optional_json(path, label)? else {
        return Ok(BTreeMap::new());
    };
    let mut index = BTreeMap::new();
    match value {
        Value::Array(items) => {
            for item in items {
                let record: EntityRecord = serde_json::from_value(item)
                    .map_err(|err| DatasetError::Parse(path.to_path_buf(), err))?;
                index.insert(record.id, record);
            }
        }
        Value::Object(entries) => {
            for (key, mut item) in entries {
                if let Value::Object(fields) = &mut item {
                    if !fields.contains_key("id") {
                        let id: u32 = key
                            .parse()
                            .map_err(|_| DatasetError::InvalidId(path.to_path_buf(), key.clone()))?;
                        fields.insert("id".to_string(), Value::from(id));
                    }
                }
                let record: EntityRecord = serde_json::from_value(item)
                    .map_err(|err| DatasetError::Parse(path.to_path_buf(), err))?;
                index.insert(record.id, record);
            }
        }
        _ => return Err(DatasetError::Shape(path.to_path_buf())),
    }
    info!(source = label, count = index.len(), "entities loaded");
    Ok(index)
}

fn load_map_info(path: &Path) -> Result<BTreeMap<MapId, MapInfo>, DatasetError> {
    let Some(value) = read_optional_json(path, "maps")? else {
        return Ok(BTreeMap::new());
    };
    let entries: BTreeMap<String, MapInfo> = serde_json::from_value(value)
        .map_err(|err| DatasetError::Parse(path.to_path_buf(), err))?;
    let mut index = BTreeMap::new();
    for (key, info) in entries {
        let map_id: MapId = key
            .parse()
            .map_err(|_| DatasetError::InvalidId(path.to_path_buf(), key.clone()))?;
        index.insert(map_id, info);
    }
    info!(count = index.len(), "map metadata loaded");
    Ok(index)
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("data read failed for {}: {}", .0.display(), .1)]
    Read(PathBuf, #[source] std::io::Error),
    #[error("data parse failed for {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_json::Error),
    #[error("data file {} has invalid id key {:?}", .0.display(), .1)]
    InvalidId(PathBuf, String),
    #[error("data file {} is neither a list nor an object", .0.display())]
    Shape(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: u32, fr: &str) -> EntityRecord {
        serde_json::from_value(json!({"id": id, "name": {"fr": fr, "en": "x"}})).unwrap()
    }

    fn paths(dir: &Path) -> DatasetPaths {
        DatasetPaths {
            npcs_file: dir.join("npcs.json"),
            monsters_file: dir.join("monsters.json"),
            maps_file: dir.join("maps.json"),
            maps_dir: dir.join("maps"),
        }
    }

    fn write_json(path: &Path, value: Value) {
        fs::write(path, serde_json::to_string(&value).unwrap()).unwrap();
    }

    #[test]
    fn missing_sources_give_empty_indexes() {
        let dir = TempDir::new().unwrap();
        let dataset = GameDataset::load(&paths(dir.path()), "fr", 412).unwrap();
        assert_eq!(dataset.npc_count(), 0);
        assert_eq!(dataset.monster_count(), 0);
        assert_eq!(dataset.map_info_count(), 0);
        assert_eq!(dataset.map_file_count(), 0);
        assert!(dataset.find_npc_by_name("Koaren").is_none());
    }

    #[test]
    fn loads_list_and_object_shapes() {
        let dir = TempDir::new().unwrap();
        write_json(
            &dir.path().join("npcs.json"),
            json!([
                {"id": 317, "name": {"fr": "Chef Koaren"}, "level": 40},
                {"id": 318, "name": {"fr": "Colly"}}
            ]),
        );
        write_json(
            &dir.path().join("monsters.json"),
            json!({"24": {"name": {"fr": "Kenko"}}, "25": {"id": 25, "name": {"fr": "Mukraju"}}}),
        );
        write_json(
            &dir.path().join("maps.json"),
            json!({"1": {"name": {"fr": "Nosville"}}, "20": {"name": {"fr": "Camp"}}}),
        );

        let dataset = GameDataset::load(&paths(dir.path()), "fr", 412).unwrap();
        assert_eq!(dataset.npc_count(), 2);
        assert_eq!(dataset.monster_count(), 2);
        assert_eq!(dataset.npc(317).unwrap().attributes["level"], json!(40));
        assert_eq!(dataset.find_monster_by_name("kenko").unwrap().id, 24);
        assert_eq!(dataset.map_name(20), "Camp");
    }

    #[test]
    fn unparseable_source_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("npcs.json"), "{").unwrap();
        assert!(matches!(
            GameDataset::load(&paths(dir.path()), "fr", 412),
            Err(DatasetError::Parse(..))
        ));
    }

    #[test]
    fn name_search_matches_both_directions() {
        let mut dataset = GameDataset::with_source(MapDirectory::new("unused"), "fr", 1);
        dataset.insert_npc(record(10, "Chef Koaren"));
        dataset.insert_npc(record(11, "Mimi"));

        assert_eq!(dataset.find_npc_by_name("KOAREN").unwrap().id, 10);
        // Pattern longer than the stored name.
        assert_eq!(dataset.find_npc_by_name("Mimi Mentor").unwrap().id, 11);
        assert!(dataset.find_npc_by_name("Slugg").is_none());
        assert!(dataset.find_npc_by_name("  ").is_none());
    }

    #[test]
    fn name_search_takes_lowest_id_first() {
        let mut dataset = GameDataset::with_source(MapDirectory::new("unused"), "fr", 1);
        dataset.insert_npc(record(900, "Annie la garde"));
        dataset.insert_npc(record(5, "Annie"));

        assert_eq!(dataset.find_npc_by_name("Annie").unwrap().id, 5);
    }

    #[test]
    fn records_without_name_never_match() {
        let mut dataset = GameDataset::with_source(MapDirectory::new("unused"), "fr", 1);
        dataset.insert_npc(serde_json::from_value(json!({"id": 1})).unwrap());
        dataset.insert_npc(record(2, ""));
        dataset.insert_npc(record(3, "Slugg"));

        assert_eq!(dataset.find_npc_by_name("Slugg").unwrap().id, 3);
    }

    #[test]
    fn map_name_placeholder() {
        let mut dataset = GameDataset::with_source(MapDirectory::new("unused"), "fr", 1);
        dataset.insert_map_info(
            1,
            MapInfo {
                name: [("en".to_string(), "Nosville".to_string())].into(),
            },
        );
        assert_eq!(dataset.map_name(1), "Map 1");
        assert_eq!(dataset.map_name(77), "Map 77");
    }

    #[test]
    fn map_queries_read_files() {
        let dir = TempDir::new().unwrap();
        let maps = dir.path().join("maps");
        fs::create_dir_all(&maps).unwrap();
        write_json(
            &maps.join("c_map_1.json"),
            json!({
                "npcs": [{"vnum": 4013, "x": 45, "y": 60}],
                "portals": [{"destination_map_id": 2, "source_map_x": 10, "source_map_y": 11}]
            }),
        );
        fs::write(maps.join("c_map_2.json"), "oops").unwrap();
        let dataset = GameDataset::load(&paths(dir.path()), "fr", 2).unwrap();

        assert_eq!(dataset.find_npc_on_map(1, 4013), Some((45, 60)));
        assert_eq!(dataset.find_npc_on_map(1, 1), None);
        assert_eq!(dataset.portal_to(1, 2).map(|p| p.source_map_x), Some(10));
        assert!(dataset.load_map_file(2).is_none());
        assert!(dataset.load_map_file(3).is_none());
        assert_eq!(dataset.map_ids(), 1..=2);
        assert_eq!(dataset.map_file_count(), 2);
    }
}
