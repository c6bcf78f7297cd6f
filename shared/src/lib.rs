use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const MSG_MOVE: &str = "move";
pub const MSG_ATTACK: &str = "attack";
pub const MSG_USE_POTION: &str = "use_potion";

/// Errors raised while turning envelopes into typed messages and back.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Terrain of a single map cell. Travels over the wire as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileKind {
    Grass,
    Stone,
}

impl TileKind {
    pub fn code(self) -> u8 {
        match self {
            TileKind::Grass => 0,
            TileKind::Stone => 1,
        }
    }
}

impl Serialize for TileKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for TileKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(TileKind::Grass),
            1 => Ok(TileKind::Stone),
            other => Err(serde::de::Error::custom(format!(
                "unknown tile code {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonsterKind {
    Goblin,
    Orc,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Player,
    Monster,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
}

// Inbound payloads

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct MovePayload {
    pub dx: i32,
    pub dy: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AttackPayload {
    pub target_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsePotionPayload {}

/// Commands a client may send.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Move(MovePayload),
    Attack(AttackPayload),
    UsePotion(UsePotionPayload),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl ClientMessage {
    /// Decodes an inbound envelope, dispatching on its `type` tag.
    ///
    /// `use_potion` carries no fields, so a missing or null payload is accepted
    /// for it. The other commands require a payload of the right shape.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        match envelope.kind.as_str() {
            MSG_MOVE => Ok(ClientMessage::Move(serde_json::from_value(
                envelope.payload,
            )?)),
            MSG_ATTACK => Ok(ClientMessage::Attack(serde_json::from_value(
                envelope.payload,
            )?)),
            MSG_USE_POTION => Ok(ClientMessage::UsePotion(UsePotionPayload {})),
            _ => Err(ProtocolError::UnknownType(envelope.kind)),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|source| ProtocolError::Encode {
            kind: self.kind(),
            source,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Move(_) => MSG_MOVE,
            ClientMessage::Attack(_) => MSG_ATTACK,
            ClientMessage::UsePotion(_) => MSG_USE_POTION,
        }
    }
}

// Outbound payloads

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TileData {
    #[serde(rename = "type")]
    pub kind: TileKind,
}

/// Map snapshot. Positions are implicit: `tiles[y][x]`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MapData {
    pub width: usize,
    pub height: usize,
    pub tiles: Vec<Vec<TileData>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerData {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub level: u32,
    pub max_hp: i32,
    pub current_hp: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MonsterData {
    pub id: String,
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub kind: MonsterKind,
    pub name: String,
    pub max_hp: i32,
    pub current_hp: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InitialStatePayload {
    pub player_id: String,
    pub map: MapData,
    pub players: Vec<PlayerData>,
    pub monsters: Vec<MonsterData>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerLeftPayload {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EntityMovedPayload {
    pub id: String,
    pub entity_type: EntityType,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EntityRemovedPayload {
    pub id: String,
    pub entity_type: EntityType,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CombatInitiatedPayload {
    pub player_id: String,
    pub monster_id: String,
    pub player_x: i32,
    pub player_y: i32,
    pub monster_x: i32,
    pub monster_y: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CombatUpdatePayload {
    pub attacker_id: String,
    pub defender_id: String,
    pub damage_dealt: i32,
    pub defender_current_hp: i32,
    pub is_defender_defeated: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerStatUpdatePayload {
    pub player_id: String,
    pub level: u32,
    pub xp: i32,
    pub xp_to_next_level: i32,
    pub max_hp: i32,
    pub current_hp: i32,
    pub attack: i32,
    pub defense: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub message: String,
    pub level: NotificationLevel,
}

/// Events the server sends, wrapped as `{"type": ..., "payload": ...}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    InitialState(InitialStatePayload),
    PlayerJoined(PlayerData),
    PlayerLeft(PlayerLeftPayload),
    EntityMoved(EntityMovedPayload),
    MonsterSpawned(MonsterData),
    EntityRemoved(EntityRemovedPayload),
    CombatInitiated(CombatInitiatedPayload),
    CombatUpdate(CombatUpdatePayload),
    PlayerStatUpdate(PlayerStatUpdatePayload),
    Notification(NotificationPayload),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::InitialState(_) => "initial_state",
            ServerMessage::PlayerJoined(_) => "player_joined",
            ServerMessage::PlayerLeft(_) => "player_left",
            ServerMessage::EntityMoved(_) => "entity_moved",
            ServerMessage::MonsterSpawned(_) => "monster_spawned",
            ServerMessage::EntityRemoved(_) => "entity_removed",
            ServerMessage::CombatInitiated(_) => "combat_initiated",
            ServerMessage::CombatUpdate(_) => "combat_update",
            ServerMessage::PlayerStatUpdate(_) => "player_stat_update",
            ServerMessage::Notification(_) => "notification",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|source| ProtocolError::Encode {
            kind: self.kind(),
            source,
        })
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
