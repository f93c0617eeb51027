//! Line-delimited JSON client for the game-control bridge injected into the game client.
//!
//! Each request is one JSON object terminated by `\n`:
//! `{"method": "walk", "params": {"x": 10, "y": 12}}`. Each reply is one line holding
//! `{"data": ...}` or `{"error": "..."}`.

use crate::client::{ControlError, GameControl, SceneEntity};
use crate::world::position::{MapId, PlayerPosition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
enum Request<'a> {
    PlayerInfo,
    Walk { x: i32, y: i32 },
    SceneNpcs,
    SceneMonsters,
    Attack {
        entity_type: u8,
        entity_id: u32,
        skill_id: u32,
    },
    SendPacket { packet: &'a str },
}

impl Request<'_> {
    fn method(&self) -> &'static str {
        match self {
            Request::PlayerInfo => "player_info",
            Request::Walk { .. } => "walk",
            Request::SceneNpcs => "scene_npcs",
            Request::SceneMonsters => "scene_monsters",
            Request::Attack { .. } => "attack",
            Request::SendPacket { .. } => "send_packet",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlayerInfo {
    player: PlayerSection,
    position: PositionSection,
}

#[derive(Debug, Deserialize)]
struct PlayerSection {
    #[serde(default)]
    name: Option<String>,
    current_map_id: MapId,
}

#[derive(Debug, Deserialize)]
struct PositionSection {
    x: i32,
    y: i32,
}

#[derive(Debug, Deserialize)]
struct NpcList {
    #[serde(default)]
    npcs: Vec<SceneEntity>,
}

#[derive(Debug, Deserialize)]
struct MonsterList {
    #[serde(default)]
    monsters: Vec<SceneEntity>,
}

/// A failed or partial exchange leaves the reply stream out of step with the
/// requests, so the client refuses further calls once one has happened.
pub struct PhoenixClient<S: Read + Write = TcpStream> {
    stream: BufReader<S>,
    closed: bool,
}

impl PhoenixClient<TcpStream> {
    /// Connects to the bridge and checks that it drives `character` when the bridge
    /// reports a character name.
    pub fn connect(addr: &str, character: &str, timeout: Duration) -> Result<Self, ControlError> {
        let mut last_err = None;
        let addrs = addr.to_socket_addrs().map_err(ControlError::Connect)?;
        for socket_addr in addrs {
            match TcpStream::connect_timeout(&socket_addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    let mut client = Self::from_stream(stream);
                    client.verify_character(character)?;
                    info!(addr, character, "connected to game control");
                    return Ok(client);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(ControlError::Connect(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no address for {addr}"))
        })))
    }
}

impl<S: Read + Write> PhoenixClient<S> {
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    fn verify_character(&mut self, character: &str) -> Result<(), ControlError> {
        let info: PlayerInfo = self.call(&Request::PlayerInfo)?;
        match info.player.name {
            Some(actual) if !actual.eq_ignore_ascii_case(character) => {
                Err(ControlError::CharacterMismatch {
                    expected: character.to_string(),
                    actual,
                })
            }
            _ => Ok(()),
        }
    }

    fn call<T: DeserializeOwned>(&mut self, request: &Request<'_>) -> Result<T, ControlError> {
        if self.closed {
            return Err(ControlError::Closed);
        }
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');

        let reply = match self.exchange(&line) {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                self.closed = true;
                return Err(ControlError::Closed);
            }
            Err(err) => {
                self.closed = true;
                warn!(method = request.method(), error = %err, "game control exchange failed, closing");
                return Err(err.into());
            }
        };
        let reply: Reply = serde_json::from_str(reply.trim_end())?;
        if let Some(message) = reply.error {
            return Err(ControlError::Rejected {
                method: request.method().to_string(),
                message,
            });
        }
        debug!(method = request.method(), "game control reply");
        Ok(serde_json::from_value(reply.data)?)
    }

    /// Writes one request line and reads one reply line. `None` on end of stream.
    fn exchange(&mut self, line: &[u8]) -> std::io::Result<Option<String>> {
        let writer = self.stream.get_mut();
        writer.write_all(line)?;
        writer.flush()?;

        let mut reply = String::new();
        if self.stream.read_line(&mut reply)? == 0 {
            return Ok(None);
        }
        Ok(Some(reply))
    }

    fn command(&mut self, request: &Request<'_>) -> Result<(), ControlError> {
        self.call::<Value>(request).map(|_| ())
    }
}

impl<S: Read + Write> GameControl for PhoenixClient<S> {
    fn player_position(&mut self) -> Result<PlayerPosition, ControlError> {
        let info: PlayerInfo = self.call(&Request::PlayerInfo)?;
        Ok(PlayerPosition::new(
            info.player.current_map_id,
            info.position.x,
            info.position.y,
        ))
    }

    fn walk(&mut self, x: i32, y: i32) -> Result<(), ControlError> {
        self.command(&Request::Walk { x, y })
    }

    fn scene_npcs(&mut self) -> Result<Vec<SceneEntity>, ControlError> {
        let list: NpcList = self.call(&Request::SceneNpcs)?;
        Ok(list.npcs)
    }

    fn scene_monsters(&mut self) -> Result<Vec<SceneEntity>, ControlError> {
        let list: MonsterList = self.call(&Request::SceneMonsters)?;
        Ok(list.monsters)
    }

    fn attack(&mut self, entity_type: u8, entity_id: u32, skill_id: u32) -> Result<(), ControlError> {
        self.command(&Request::Attack {
            entity_type,
            entity_id,
            skill_id,
        })
    }

    fn send_packet(&mut self, packet: &str) -> Result<(), ControlError> {
        self.command(&Request::SendPacket { packet })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ScenePoint;
    use serde_json::json;
    use std::io::Cursor;

    /// Canned replies in, recorded requests out.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        stalled_reads: usize,
    }

    impl Duplex {
        fn with_replies(replies: &[Value]) -> Self {
            let mut input = Vec::new();
            for reply in replies {
                input.extend(serde_json::to_vec(reply).unwrap());
                input.push(b'\n');
            }
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
                stalled_reads: 0,
            }
        }

        fn requests(&self) -> Vec<Value> {
            String::from_utf8(self.output.clone())
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.stalled_reads > 0 {
                self.stalled_reads -= 1;
                return Err(std::io::Error::new(std::io::ErrorKind::WouldBlock, "timed out"));
            }
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn player_reply(name: &str, map_id: MapId, x: i32, y: i32) -> Value {
        json!({"data": {
            "player": {"name": name, "current_map_id": map_id},
            "position": {"x": x, "y": y}
        }})
    }

    #[test]
    fn polls_player_position() {
        let mut client =
            PhoenixClient::from_stream(Duplex::with_replies(&[player_reply("Khaliste", 145, 50, 71)]));

        assert_eq!(client.player_position().unwrap(), PlayerPosition::new(145, 50, 71));
        assert_eq!(client.into_inner().requests(), vec![json!({"method": "player_info"})]);
    }

    #[test]
    fn sends_commands_with_params() {
        let mut client = PhoenixClient::from_stream(Duplex::with_replies(&[
            json!({"data": null}),
            json!({"data": null}),
            json!({}),
        ]));

        client.walk(12, 34).unwrap();
        client.attack(2, 1500, 0).unwrap();
        client.send_packet("npc_req 2 9001").unwrap();

        assert_eq!(
            client.into_inner().requests(),
            vec![
                json!({"method": "walk", "params": {"x": 12, "y": 34}}),
                json!({"method": "attack", "params": {"entity_type": 2, "entity_id": 1500, "skill_id": 0}}),
                json!({"method": "send_packet", "params": {"packet": "npc_req 2 9001"}}),
            ]
        );
    }

    #[test]
    fn parses_scene_lists() {
        let mut client = PhoenixClient::from_stream(Duplex::with_replies(&[
            json!({"data": {"npcs": [{"id": 9001, "vnum": 317, "position": {"x": 3, "y": 4}}]}}),
            json!({"data": {"monsters": []}}),
        ]));

        assert_eq!(
            client.scene_npcs().unwrap(),
            vec![SceneEntity {
                id: 9001,
                vnum: 317,
                position: ScenePoint { x: 3, y: 4 },
            }]
        );
        assert!(client.scene_monsters().unwrap().is_empty());
    }

    #[test]
    fn error_reply_is_rejected() {
        let mut client =
            PhoenixClient::from_stream(Duplex::with_replies(&[json!({"error": "not in game"})]));

        match client.walk(1, 1) {
            Err(ControlError::Rejected { method, message }) => {
                assert_eq!(method, "walk");
                assert_eq!(message, "not in game");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn closed_stream_is_reported() {
        let mut client = PhoenixClient::from_stream(Duplex::with_replies(&[]));
        assert!(matches!(client.player_position(), Err(ControlError::Closed)));
    }

    #[test]
    fn character_name_is_checked() {
        let mut client =
            PhoenixClient::from_stream(Duplex::with_replies(&[player_reply("Other", 1, 0, 0)]));
        assert!(matches!(
            client.verify_character("Khaliste"),
            Err(ControlError::CharacterMismatch { .. })
        ));

        let mut client =
            PhoenixClient::from_stream(Duplex::with_replies(&[player_reply("khaliste", 1, 0, 0)]));
        assert!(client.verify_character("Khaliste").is_ok());
    }

    #[test]
    fn timed_out_reply_closes_the_client() {
        let mut stream = Duplex::with_replies(&[player_reply("Khaliste", 145, 50, 71), json!({"data": null})]);
        stream.stalled_reads = 1;
        let mut client = PhoenixClient::from_stream(stream);

        assert!(matches!(client.player_position(), Err(ControlError::Io(_))));
        assert!(client.is_closed());
        // The late position reply must never be taken as the answer to a later request.
        assert!(matches!(client.walk(3, 4), Err(ControlError::Closed)));
        assert!(matches!(client.player_position(), Err(ControlError::Closed)));
        assert_eq!(client.into_inner().requests(), vec![json!({"method": "player_info"})]);
    }

    #[test]
    fn end_of_stream_closes_the_client() {
        let mut client = PhoenixClient::from_stream(Duplex::with_replies(&[]));
        assert!(matches!(client.walk(1, 1), Err(ControlError::Closed)));
        assert!(client.is_closed());
        assert!(matches!(client.walk(1, 1), Err(ControlError::Closed)));
        assert_eq!(client.into_inner().requests().len(), 1);
    }
}
