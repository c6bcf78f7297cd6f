//! Per-session command execution.
//!
//! A [`CommandProcessor`] belongs to one session and acts for that session's
//! player. Each command runs under a single world lock acquisition and yields
//! the events it caused; those are delivered only after the lock is gone.

use crate::combat::{self, AttackRound};
use crate::hub::{HubHandle, SessionId};
use crate::world::{MoveOutcome, World};
use log::debug;
use shared::{
    AttackPayload, ClientMessage, EntityMovedPayload, EntityType, MovePayload, ServerMessage,
};
use std::sync::Arc;

/// Where an event produced by a command goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Broadcast(ServerMessage),
    /// Only to the session that issued the command.
    Private(ServerMessage),
}

pub struct CommandProcessor {
    world: Arc<World>,
    player_id: String,
}

impl CommandProcessor {
    pub fn new(world: Arc<World>, player_id: impl Into<String>) -> Self {
        Self {
            world,
            player_id: player_id.into(),
        }
    }

    /// Executes a command and delivers its events through the hub.
    pub async fn handle(&self, command: ClientMessage, hub: &HubHandle, session: SessionId) {
        for dispatch in self.execute(command).await {
            match dispatch {
                Dispatch::Broadcast(message) => hub.broadcast_message(&message),
                Dispatch::Private(message) => hub.send_message(session, &message),
            }
        }
    }

    /// Applies a command to the world and returns the resulting events.
    /// Invalid commands return nothing and leave the world untouched.
    pub async fn execute(&self, command: ClientMessage) -> Vec<Dispatch> {
        match command {
            ClientMessage::Move(payload) => self.move_player(payload).await,
            ClientMessage::Attack(payload) => self.attack(payload).await,
            ClientMessage::UsePotion(_) => self.use_potion().await,
        }
    }

    async fn move_player(&self, MovePayload { dx, dy }: MovePayload) -> Vec<Dispatch> {
        let mut state = self.world.lock().await;

        match state.move_player(&self.player_id, dx, dy) {
            MoveOutcome::Moved { x, y } => {
                vec![Dispatch::Broadcast(ServerMessage::EntityMoved(
                    EntityMovedPayload {
                        id: self.player_id.clone(),
                        entity_type: EntityType::Player,
                        x,
                        y,
                    },
                ))]
            }
            MoveOutcome::Engaged { monster_id } => {
                match state.engage(&self.player_id, &monster_id) {
                    Some(payload) => {
                        debug!("{} engaged {}", self.player_id, monster_id);
                        vec![Dispatch::Broadcast(ServerMessage::CombatInitiated(payload))]
                    }
                    None => Vec::new(),
                }
            }
            MoveOutcome::Rejected(reason) => {
                debug!("Move ({}, {}) by {} rejected: {:?}", dx, dy, self.player_id, reason);
                Vec::new()
            }
        }
    }

    async fn attack(&self, AttackPayload { target_id }: AttackPayload) -> Vec<Dispatch> {
        let mut state = self.world.lock().await;

        match combat::resolve_attack(&mut state, &self.player_id, &target_id) {
            Ok(AttackRound::MonsterDefeated {
                blow,
                removed,
                stats,
                leveled_up,
            }) => {
                debug!(
                    "{} defeated {}{}",
                    self.player_id,
                    removed.id,
                    if leveled_up { " and leveled up" } else { "" }
                );
                vec![
                    Dispatch::Broadcast(ServerMessage::CombatUpdate(blow)),
                    Dispatch::Broadcast(ServerMessage::EntityRemoved(removed)),
                    Dispatch::Broadcast(ServerMessage::PlayerStatUpdate(stats)),
                ]
            }
            Ok(AttackRound::Exchanged {
                blow,
                retaliation,
                respawn,
            }) => {
                let mut dispatches = vec![
                    Dispatch::Broadcast(ServerMessage::CombatUpdate(blow)),
                    Dispatch::Broadcast(ServerMessage::CombatUpdate(retaliation)),
                ];
                if let Some(stats) = respawn {
                    debug!("{} was defeated by {} and reset", self.player_id, target_id);
                    dispatches.push(Dispatch::Broadcast(ServerMessage::PlayerStatUpdate(stats)));
                }
                dispatches
            }
            Err(reason) => {
                debug!("Attack by {} rejected: {}", self.player_id, reason);
                Vec::new()
            }
        }
    }

    async fn use_potion(&self) -> Vec<Dispatch> {
        let mut state = self.world.lock().await;

        match combat::use_potion(&mut state, &self.player_id) {
            Some(outcome) => vec![
                Dispatch::Broadcast(ServerMessage::PlayerStatUpdate(outcome.stats)),
                Dispatch::Private(ServerMessage::Notification(outcome.notice)),
            ],
            None => {
                debug!("Potion for unknown player {}", self.player_id);
                Vec::new()
            }
        }
    }
}
