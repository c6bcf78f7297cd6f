//! Combat rounds and potions.
//!
//! Both operate on an already locked [`WorldState`], so a whole round
//! (blow, retaliation, rewards, respawn) is one atomic step. The returned
//! payloads are emitted by the caller after the lock is released.

use crate::actor::{damage, POTION_HEAL};
use crate::world::WorldState;
use shared::{
    CombatUpdatePayload, EntityRemovedPayload, EntityType, NotificationLevel,
    NotificationPayload, PlayerStatUpdatePayload,
};
use thiserror::Error;

/// Why an attack command was refused. Nothing was mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttackRejection {
    #[error("player {0} does not exist")]
    UnknownPlayer(String),
    #[error("player {0} is not in combat")]
    NotInCombat(String),
    #[error("player is fighting {expected}, not {requested}")]
    WrongTarget { expected: String, requested: String },
    #[error("monster {0} is gone or not fighting this player")]
    TargetUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackRound {
    /// The player's blow finished the monster. No retaliation.
    MonsterDefeated {
        blow: CombatUpdatePayload,
        removed: EntityRemovedPayload,
        stats: PlayerStatUpdatePayload,
        leveled_up: bool,
    },
    /// The monster survived and struck back.
    Exchanged {
        blow: CombatUpdatePayload,
        retaliation: CombatUpdatePayload,
        /// Present when the retaliation reset the player to level one.
        respawn: Option<PlayerStatUpdatePayload>,
    },
}

/// Resolves one attack round from `player_id` against `target_id`.
pub fn resolve_attack(
    state: &mut WorldState,
    player_id: &str,
    target_id: &str,
) -> Result<AttackRound, AttackRejection> {
    let player = state
        .player(player_id)
        .ok_or_else(|| AttackRejection::UnknownPlayer(player_id.to_string()))?;
    let expected = player
        .combat_target
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AttackRejection::NotInCombat(player_id.to_string()))?;
    if expected != target_id {
        return Err(AttackRejection::WrongTarget {
            expected: expected.to_string(),
            requested: target_id.to_string(),
        });
    }
    let monster = state
        .monster(target_id)
        .filter(|m| m.combat_target.as_deref() == Some(player_id))
        .ok_or_else(|| AttackRejection::TargetUnavailable(target_id.to_string()))?;

    let player_attack = player.attack;
    let player_defense = player.defense;
    let monster_attack = monster.attack;

    let dealt = damage(player_attack, monster.defense);
    let (monster_hp, monster_defeated) = match state.monster_mut(target_id) {
        Some(monster) => {
            let defeated = monster.take_damage(dealt);
            (monster.current_hp, defeated)
        }
        None => return Err(AttackRejection::TargetUnavailable(target_id.to_string())),
    };

    let blow = CombatUpdatePayload {
        attacker_id: player_id.to_string(),
        defender_id: target_id.to_string(),
        damage_dealt: dealt,
        defender_current_hp: monster_hp,
        is_defender_defeated: monster_defeated,
    };

    if monster_defeated {
        let xp_value = state
            .remove_monster(target_id)
            .map(|m| m.xp_value)
            .unwrap_or_default();
        let Some(player) = state.player_mut(player_id) else {
            return Err(AttackRejection::UnknownPlayer(player_id.to_string()));
        };
        player.combat_target = None;
        let leveled_up = player.gain_xp(xp_value);

        return Ok(AttackRound::MonsterDefeated {
            blow,
            removed: EntityRemovedPayload {
                id: target_id.to_string(),
                entity_type: EntityType::Monster,
            },
            stats: player.stat_update(),
            leveled_up,
        });
    }

    let returned = damage(monster_attack, player_defense);
    let Some(player) = state.player_mut(player_id) else {
        return Err(AttackRejection::UnknownPlayer(player_id.to_string()));
    };
    let player_defeated = player.take_damage(returned);
    let retaliation = CombatUpdatePayload {
        attacker_id: target_id.to_string(),
        defender_id: player_id.to_string(),
        damage_dealt: returned,
        defender_current_hp: player.current_hp,
        is_defender_defeated: player_defeated,
    };

    let respawn = if player_defeated {
        player.reset_to_level_one();
        player.combat_target = None;
        let stats = player.stat_update();
        if let Some(monster) = state.monster_mut(target_id) {
            monster.combat_target = None;
        }
        Some(stats)
    } else {
        None
    };

    Ok(AttackRound::Exchanged {
        blow,
        retaliation,
        respawn,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotionOutcome {
    pub healed: i32,
    pub stats: PlayerStatUpdatePayload,
    pub notice: NotificationPayload,
}

/// Drinks a potion. Returns `None` only for an unknown player.
pub fn use_potion(state: &mut WorldState, player_id: &str) -> Option<PotionOutcome> {
    let player = state.player_mut(player_id)?;

    let (healed, notice) = if player.current_hp <= 0 {
        (0, notice("You are defeated and cannot use a potion.", NotificationLevel::Info))
    } else if player.current_hp >= player.max_hp {
        (0, notice("You are already at full health.", NotificationLevel::Info))
    } else {
        let healed = player.heal(POTION_HEAL);
        (
            healed,
            notice(&format!("You healed for {} HP.", healed), NotificationLevel::Success),
        )
    };

    Some(PotionOutcome {
        healed,
        stats: player.stat_update(),
        notice,
    })
}

fn notice(message: &str, level: NotificationLevel) -> NotificationPayload {
    NotificationPayload {
        message: message.to_string(),
        level,
    }
}
