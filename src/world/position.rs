use serde::{Deserialize, Serialize};

pub type MapId = u32;

/// Live snapshot of where the character stands. Always polled, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerPosition {
    pub map_id: MapId,
    pub x: i32,
    pub y: i32,
}

impl PlayerPosition {
    pub fn new(map_id: MapId, x: i32, y: i32) -> Self {
        Self { map_id, x, y }
    }

    /// Manhattan distance to a tile on the current map.
    pub fn distance_to(self, x: i32, y: i32) -> u32 {
        self.x.abs_diff(x) + self.y.abs_diff(y)
    }
}
