//! Player and monster records.
//!
//! Combat linkage is a single `combat_target` field: an actor is in combat
//! exactly when it names a target. Keeping the two sides symmetric is the
//! world's job, since it needs both records at once.

use shared::{MonsterData, MonsterKind, PlayerData, PlayerStatUpdatePayload};
use tokio_util::sync::CancellationToken;

pub const PLAYER_BASE_MAX_HP: i32 = 100;
pub const PLAYER_BASE_ATTACK: i32 = 10;
pub const PLAYER_BASE_DEFENSE: i32 = 5;

pub const LEVEL_UP_MAX_HP: i32 = 10;
pub const LEVEL_UP_ATTACK: i32 = 2;
pub const LEVEL_UP_DEFENSE: i32 = 1;

pub const POTION_HEAL: i32 = 30;

/// XP required to leave levels 1 through 5.
const XP_THRESHOLDS: [i32; 5] = [100, 150, 225, 340, 500];
const XP_THRESHOLD_STEP: i32 = 200;

/// XP needed to advance from `level` to `level + 1`.
pub fn xp_to_next_level(level: u32) -> i32 {
    let index = level.saturating_sub(1) as usize;
    match XP_THRESHOLDS.get(index) {
        Some(&threshold) => threshold,
        None => {
            let beyond = (index + 1 - XP_THRESHOLDS.len()).min(i32::MAX as usize) as i32;
            XP_THRESHOLDS[XP_THRESHOLDS.len() - 1]
                .saturating_add(beyond.saturating_mul(XP_THRESHOLD_STEP))
        }
    }
}

/// Damage dealt by one blow. Never negative.
pub fn damage(attack: i32, defense: i32) -> i32 {
    attack.saturating_sub(defense).max(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub level: u32,
    pub xp: i32,
    pub xp_to_next_level: i32,
    pub max_hp: i32,
    pub current_hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub combat_target: Option<String>,
}

impl Player {
    pub fn new(id: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            level: 1,
            xp: 0,
            xp_to_next_level: xp_to_next_level(1),
            max_hp: PLAYER_BASE_MAX_HP,
            current_hp: PLAYER_BASE_MAX_HP,
            attack: PLAYER_BASE_ATTACK,
            defense: PLAYER_BASE_DEFENSE,
            combat_target: None,
        }
    }

    pub fn is_in_combat(&self) -> bool {
        self.combat_target.is_some()
    }

    /// Applies damage, flooring HP at zero. Returns true when defeated.
    pub fn take_damage(&mut self, amount: i32) -> bool {
        self.current_hp = (self.current_hp - amount.max(0)).clamp(0, self.max_hp);
        self.current_hp == 0
    }

    /// Restores up to `amount` HP without exceeding the cap. Returns HP restored.
    pub fn heal(&mut self, amount: i32) -> i32 {
        let before = self.current_hp;
        self.current_hp = (self.current_hp + amount.max(0)).min(self.max_hp);
        self.current_hp - before
    }

    /// Adds XP and applies every level-up it pays for. Returns true if the
    /// player gained at least one level.
    pub fn gain_xp(&mut self, amount: i32) -> bool {
        if amount <= 0 {
            return false;
        }

        self.xp = self.xp.saturating_add(amount);
        let mut leveled = false;

        while self.xp >= self.xp_to_next_level {
            self.xp -= self.xp_to_next_level;
            self.level += 1;
            self.max_hp += LEVEL_UP_MAX_HP;
            self.current_hp = self.max_hp;
            self.attack += LEVEL_UP_ATTACK;
            self.defense += LEVEL_UP_DEFENSE;
            self.xp_to_next_level = xp_to_next_level(self.level);
            leveled = true;
        }

        leveled
    }

    /// Puts the player back to level-one stats. Identity and position persist.
    pub fn reset_to_level_one(&mut self) {
        self.level = 1;
        self.xp = 0;
        self.xp_to_next_level = xp_to_next_level(1);
        self.max_hp = PLAYER_BASE_MAX_HP;
        self.current_hp = PLAYER_BASE_MAX_HP;
        self.attack = PLAYER_BASE_ATTACK;
        self.defense = PLAYER_BASE_DEFENSE;
    }

    pub fn to_data(&self) -> PlayerData {
        PlayerData {
            id: self.id.clone(),
            x: self.x,
            y: self.y,
            level: self.level,
            max_hp: self.max_hp,
            current_hp: self.current_hp,
        }
    }

    pub fn stat_update(&self) -> PlayerStatUpdatePayload {
        PlayerStatUpdatePayload {
            player_id: self.id.clone(),
            level: self.level,
            xp: self.xp,
            xp_to_next_level: self.xp_to_next_level,
            max_hp: self.max_hp,
            current_hp: self.current_hp,
            attack: self.attack,
            defense: self.defense,
        }
    }
}

/// Base stats for a monster kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonsterStats {
    pub name: &'static str,
    pub max_hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub xp_value: i32,
}

pub fn monster_stats(kind: MonsterKind) -> MonsterStats {
    match kind {
        MonsterKind::Goblin => MonsterStats {
            name: "Goblin",
            max_hp: 30,
            attack: 8,
            defense: 3,
            xp_value: 10,
        },
        MonsterKind::Orc => MonsterStats {
            name: "Orc",
            max_hp: 70,
            attack: 15,
            defense: 8,
            xp_value: 25,
        },
    }
}

#[derive(Debug, Clone)]
pub struct Monster {
    pub id: String,
    pub kind: MonsterKind,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub max_hp: i32,
    pub current_hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub xp_value: i32,
    pub combat_target: Option<String>,
    /// Stops this monster's behavior loop once cancelled.
    stop: CancellationToken,
}

impl Monster {
    pub fn new(id: impl Into<String>, kind: MonsterKind, x: i32, y: i32) -> Self {
        let stats = monster_stats(kind);
        Self {
            id: id.into(),
            kind,
            name: stats.name.to_string(),
            x,
            y,
            max_hp: stats.max_hp,
            current_hp: stats.max_hp,
            attack: stats.attack,
            defense: stats.defense,
            xp_value: stats.xp_value,
            combat_target: None,
            stop: CancellationToken::new(),
        }
    }

    pub fn is_in_combat(&self) -> bool {
        self.combat_target.is_some()
    }

    /// Applies damage, flooring HP at zero. Returns true when defeated.
    pub fn take_damage(&mut self, amount: i32) -> bool {
        self.current_hp = (self.current_hp - amount.max(0)).clamp(0, self.max_hp);
        self.current_hp == 0
    }

    pub fn stop_signal(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn to_data(&self) -> MonsterData {
        MonsterData {
            id: self.id.clone(),
            x: self.x,
            y: self.y,
            kind: self.kind,
            name: self.name.clone(),
            max_hp: self.max_hp,
            current_hp: self.current_hp,
        }
    }
}
