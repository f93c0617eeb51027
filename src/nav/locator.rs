use crate::persistence::cache::{CacheStore, NPC_LOCATIONS};
use crate::world::dataset::GameDataset;
use crate::world::position::MapId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Cached answer to "which map is this NPC on".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcLocation {
    pub map_id: MapId,
    pub npc_vnum: u32,
    pub x: i32,
    pub y: i32,
}

pub fn location_key(vnum: u32) -> String {
    format!("npc_location_{vnum}")
}

/// Finds the map holding an NPC by scanning every map file once, then remembering it.
#[derive(Debug, Clone)]
pub struct LocationResolver {
    cache: Arc<CacheStore>,
    dataset: Arc<GameDataset>,
}

impl LocationResolver {
    pub fn new(cache: Arc<CacheStore>, dataset: Arc<GameDataset>) -> Self {
        Self { cache, dataset }
    }

    pub fn search_entity_location(&self, vnum: u32) -> Option<MapId> {
        self.locate(vnum).map(|location| location.map_id)
    }

    /// Full placement record. A hit in the cache is trusted without re-reading the map.
    /// Misses are not remembered, so the next call scans again.
    pub fn locate(&self, vnum: u32) -> Option<NpcLocation> {
        let key = location_key(vnum);
        if let Some(location) = self.cache.get::<NpcLocation>(NPC_LOCATIONS, &key) {
            info!(vnum, map_id = location.map_id, "npc location from cache");
            return Some(location);
        }

        info!(vnum, maps = *self.dataset.map_ids().end(), "scanning map files for npc");
        for map_id in self.dataset.map_ids() {
            let Some(map) = self.dataset.load_map_file(map_id) else {
                continue;
            };
            let Some(npc) = map.npc(vnum) else {
                continue;
            };
            let location = NpcLocation {
                map_id,
                npc_vnum: vnum,
                x: npc.x,
                y: npc.y,
            };
            info!(
                vnum,
                map_id,
                map = %self.dataset.map_name(map_id),
                x = npc.x,
                y = npc.y,
                "npc found"
            );
            self.cache.set(NPC_LOCATIONS, &key, &location);
            return Some(location);
        }

        warn!(vnum, "npc not found on any map");
        None
    }
}
