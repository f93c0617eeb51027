pub mod phoenix;

use crate::world::position::PlayerPosition;
use serde::Deserialize;
use thiserror::Error;

pub const ENTITY_TYPE_MONSTER: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ScenePoint {
    pub x: i32,
    pub y: i32,
}

/// An entity currently visible in the character's scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SceneEntity {
    /// Per-scene entity id used to address the entity in commands.
    pub id: u32,
    pub vnum: u32,
    pub position: ScenePoint,
}

/// Operations consumed from the game-control API of the running client.
pub trait GameControl {
    fn player_position(&mut self) -> Result<PlayerPosition, ControlError>;
    fn walk(&mut self, x: i32, y: i32) -> Result<(), ControlError>;
    fn scene_npcs(&mut self) -> Result<Vec<SceneEntity>, ControlError>;
    fn scene_monsters(&mut self) -> Result<Vec<SceneEntity>, ControlError>;
    fn attack(&mut self, entity_type: u8, entity_id: u32, skill_id: u32) -> Result<(), ControlError>;
    /// Raw game protocol command, e.g. `npc_req 2 <entity id>`.
    fn send_packet(&mut self, packet: &str) -> Result<(), ControlError>;
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("game control connection failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("game control io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("game control closed the connection")]
    Closed,
    #[error("game control message malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("game control rejected {method}: {message}")]
    Rejected { method: String, message: String },
    #[error("character mismatch: expected {expected}, connected to {actual}")]
    CharacterMismatch { expected: String, actual: String },
}
