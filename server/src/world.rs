//! Shared world state.
//!
//! [`World`] owns the terrain and a single lock over every actor. Operations
//! come in two tiers:
//! - [`WorldState`] methods assume the lock is held. Callers get a state
//!   guard from [`World::lock`] and can compose several steps atomically.
//! - [`World`] methods take the lock themselves and release it before any
//!   event leaves the process.
//!
//! The world never owns the broadcaster it reports to. It keeps a weak
//! handle so the hub can own the world without a reference cycle.

use crate::actor::{Monster, Player};
use crate::behavior::{self, BehaviorTiming};
use crate::grid::Grid;
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{
    CombatInitiatedPayload, EntityMovedPayload, EntityType, InitialStatePayload, MonsterData,
    MonsterKind, ServerMessage, TileKind,
};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Serialized event ready for fan-out.
pub type Payload = Arc<str>;

/// Capability to fan out a serialized event to every connected viewer.
///
/// Implementations must not block: a full queue drops the payload.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, payload: Payload);
}

/// Borrowed view of whichever actor stands on a cell.
#[derive(Debug, Clone, Copy)]
pub enum ActorRef<'a> {
    Player(&'a Player),
    Monster(&'a Monster),
}

impl ActorRef<'_> {
    pub fn id(&self) -> &str {
        match self {
            ActorRef::Player(p) => &p.id,
            ActorRef::Monster(m) => &m.id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            ActorRef::Player(_) => EntityType::Player,
            ActorRef::Monster(_) => EntityType::Monster,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved { x: i32, y: i32 },
    /// The destination holds a monster that is free to fight. Nobody moved.
    Engaged { monster_id: String },
    Rejected(MoveRejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    UnknownPlayer,
    InCombat,
    TargetBusy,
    Blocked,
}

/// Actor collections. Only reachable through [`World::lock`].
#[derive(Debug)]
pub struct WorldState {
    grid: Arc<Grid>,
    players: HashMap<String, Player>,
    monsters: HashMap<String, Monster>,
}

impl WorldState {
    fn new(grid: Arc<Grid>) -> Self {
        Self {
            grid,
            players: HashMap::new(),
            monsters: HashMap::new(),
        }
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    pub fn monster(&self, id: &str) -> Option<&Monster> {
        self.monsters.get(id)
    }

    pub fn monster_mut(&mut self, id: &str) -> Option<&mut Monster> {
        self.monsters.get_mut(id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn monsters(&self) -> impl Iterator<Item = &Monster> {
        self.monsters.values()
    }

    pub fn insert_player(&mut self, player: Player) {
        self.players.insert(player.id.clone(), player);
    }

    /// Removes a player and releases any monster still locked in combat with it.
    pub fn remove_player(&mut self, id: &str) -> Option<Player> {
        let player = self.players.remove(id)?;
        if let Some(target) = player.combat_target.as_deref() {
            if let Some(monster) = self.monsters.get_mut(target) {
                if monster.combat_target.as_deref() == Some(id) {
                    monster.combat_target = None;
                }
            }
        }
        Some(player)
    }

    /// Inserts a monster record without starting its behavior loop.
    pub fn insert_monster(&mut self, monster: Monster) {
        self.monsters.insert(monster.id.clone(), monster);
    }

    /// Removes a monster, signals its behavior loop to stop and releases its
    /// opponent, if any.
    pub fn remove_monster(&mut self, id: &str) -> Option<Monster> {
        let monster = self.monsters.remove(id)?;
        monster.stop_signal().cancel();
        if let Some(target) = monster.combat_target.as_deref() {
            if let Some(player) = self.players.get_mut(target) {
                if player.combat_target.as_deref() == Some(id) {
                    player.combat_target = None;
                }
            }
        }
        Some(monster)
    }

    pub fn monster_at(&self, x: i32, y: i32) -> Option<&Monster> {
        self.monsters.values().find(|m| m.x == x && m.y == y)
    }

    pub fn player_at(&self, x: i32, y: i32) -> Option<&Player> {
        self.players.values().find(|p| p.x == x && p.y == y)
    }

    /// First actor found on a cell. Monsters take precedence over players.
    pub fn actor_at(&self, x: i32, y: i32) -> Option<ActorRef<'_>> {
        self.monster_at(x, y)
            .map(ActorRef::Monster)
            .or_else(|| self.player_at(x, y).map(ActorRef::Player))
    }

    pub fn is_occupied(&self, x: i32, y: i32) -> bool {
        self.actor_at(x, y).is_some()
    }

    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        self.grid.is_walkable(x, y)
    }

    /// Walkable cells with nobody on them.
    pub fn free_cells(&self) -> Vec<(i32, i32)> {
        self.grid
            .walkable_cells()
            .filter(|&(x, y)| !self.is_occupied(x, y))
            .collect()
    }

    pub fn random_free_cell<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(i32, i32)> {
        self.free_cells().choose(rng).copied()
    }

    /// Attempts a single step for a player.
    ///
    /// Stepping onto a monster is checked before terrain and other players,
    /// so it always yields an engagement attempt rather than a block.
    pub fn move_player(&mut self, id: &str, dx: i32, dy: i32) -> MoveOutcome {
        let Some(player) = self.players.get(id) else {
            return MoveOutcome::Rejected(MoveRejection::UnknownPlayer);
        };
        if player.is_in_combat() {
            return MoveOutcome::Rejected(MoveRejection::InCombat);
        }

        let (Some(x), Some(y)) = (player.x.checked_add(dx), player.y.checked_add(dy)) else {
            return MoveOutcome::Rejected(MoveRejection::Blocked);
        };

        if let Some(monster) = self.monster_at(x, y) {
            if monster.is_in_combat() {
                return MoveOutcome::Rejected(MoveRejection::TargetBusy);
            }
            return MoveOutcome::Engaged {
                monster_id: monster.id.clone(),
            };
        }

        if !self.is_walkable(x, y) {
            return MoveOutcome::Rejected(MoveRejection::Blocked);
        }
        if matches!(self.player_at(x, y), Some(other) if other.id != id) {
            return MoveOutcome::Rejected(MoveRejection::Blocked);
        }

        match self.players.get_mut(id) {
            Some(player) => {
                player.x = x;
                player.y = y;
                MoveOutcome::Moved { x, y }
            }
            None => MoveOutcome::Rejected(MoveRejection::UnknownPlayer),
        }
    }

    /// Links a player and a monster in combat, both ways.
    ///
    /// Returns `None` without touching either record if one side is missing
    /// or already fighting.
    pub fn engage(&mut self, player_id: &str, monster_id: &str) -> Option<CombatInitiatedPayload> {
        let player = self.players.get(player_id)?;
        let monster = self.monsters.get(monster_id)?;
        if player.is_in_combat() || monster.is_in_combat() {
            return None;
        }

        let payload = CombatInitiatedPayload {
            player_id: player.id.clone(),
            monster_id: monster.id.clone(),
            player_x: player.x,
            player_y: player.y,
            monster_x: monster.x,
            monster_y: monster.y,
        };

        if let Some(player) = self.players.get_mut(player_id) {
            player.combat_target = Some(monster_id.to_string());
        }
        if let Some(monster) = self.monsters.get_mut(monster_id) {
            monster.combat_target = Some(player_id.to_string());
        }

        Some(payload)
    }

    /// Moves a monster onto a walkable cell no other actor holds.
    ///
    /// Returns the movement event for the caller to emit once the lock is
    /// released.
    pub fn move_monster(&mut self, id: &str, x: i32, y: i32) -> Option<EntityMovedPayload> {
        if !self.is_walkable(x, y) {
            return None;
        }
        if self.monsters.values().any(|m| m.id != id && m.x == x && m.y == y) {
            return None;
        }
        if self.player_at(x, y).is_some() {
            return None;
        }

        let monster = self.monsters.get_mut(id)?;
        monster.x = x;
        monster.y = y;

        Some(EntityMovedPayload {
            id: monster.id.clone(),
            entity_type: EntityType::Monster,
            x,
            y,
        })
    }

    /// Full state a newly joined viewer needs.
    pub fn snapshot(&self, player_id: &str) -> InitialStatePayload {
        InitialStatePayload {
            player_id: player_id.to_string(),
            map: self.grid.to_map_data(),
            players: self.players.values().map(Player::to_data).collect(),
            monsters: self.monsters.values().map(Monster::to_data).collect(),
        }
    }

    /// ASCII picture of the map with actors drawn over it.
    pub fn render(&self) -> String {
        let width = self.grid.width();
        let height = self.grid.height();
        let mut rows: Vec<Vec<char>> = (0..height)
            .map(|y| {
                (0..width)
                    .map(|x| match self.grid.cell(x as i32, y as i32) {
                        Some(cell) if cell.kind == TileKind::Grass => '.',
                        Some(_) => '#',
                        None => '?',
                    })
                    .collect()
            })
            .collect();

        let mut draw = |x: i32, y: i32, glyph: char| {
            if self.grid.is_walkable(x, y) {
                rows[y as usize][x as usize] = glyph;
            }
        };

        for monster in self.monsters.values() {
            let glyph = match monster.kind {
                MonsterKind::Goblin => 'g',
                MonsterKind::Orc => 'O',
            };
            draw(monster.x, monster.y, glyph);
        }
        for player in self.players.values() {
            draw(player.x, player.y, '@');
        }

        let mut out = String::with_capacity((width + 1) * height);
        for row in rows {
            out.extend(row);
            out.push('\n');
        }
        out
    }
}

/// Owner of the grid, the actors and their single lock.
pub struct World {
    grid: Arc<Grid>,
    state: Mutex<WorldState>,
    broadcaster: OnceLock<Weak<dyn Broadcaster>>,
    timing: BehaviorTiming,
}

impl World {
    pub fn new(grid: Grid) -> Self {
        Self::with_timing(grid, BehaviorTiming::default())
    }

    pub fn with_timing(grid: Grid, timing: BehaviorTiming) -> Self {
        let grid = Arc::new(grid);
        Self {
            state: Mutex::new(WorldState::new(Arc::clone(&grid))),
            grid,
            broadcaster: OnceLock::new(),
            timing,
        }
    }

    /// Terrain is immutable, so this needs no lock.
    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        self.grid.is_walkable(x, y)
    }

    pub async fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().await
    }

    /// Registers where movement side effects are reported. Only the first
    /// call takes effect.
    pub fn attach_broadcaster(&self, broadcaster: &Arc<dyn Broadcaster>) {
        if self.broadcaster.set(Arc::downgrade(broadcaster)).is_err() {
            warn!("World already has a broadcaster attached; ignoring");
        }
    }

    /// Encodes and hands an event to the attached broadcaster, if it is
    /// still alive. Must not be called with the state lock held.
    pub fn broadcast(&self, message: &ServerMessage) {
        let Some(broadcaster) = self.broadcaster.get().and_then(Weak::upgrade) else {
            return;
        };
        match message.encode() {
            Ok(text) => broadcaster.broadcast(Payload::from(text)),
            Err(e) => error!("Dropping {} broadcast: {}", message.kind(), e),
        }
    }

    pub async fn add_player(&self, player: Player) {
        self.lock().await.insert_player(player);
    }

    pub async fn remove_player(&self, id: &str) -> Option<Player> {
        self.lock().await.remove_player(id)
    }

    /// Creates a level-one player on a random free cell.
    pub async fn spawn_player(&self, id: &str) -> Option<Player> {
        let mut state = self.lock().await;
        let (x, y) = state.random_free_cell(&mut rand::thread_rng())?;
        let player = Player::new(id, x, y);
        state.insert_player(player.clone());
        info!("Spawned player {} at ({}, {})", id, x, y);
        Some(player)
    }

    /// Inserts a monster and starts its behavior loop.
    pub async fn add_monster(self: &Arc<Self>, monster: Monster) {
        let id = monster.id.clone();
        let stop = monster.stop_signal();
        self.lock().await.insert_monster(monster);
        self.start_behavior(id, stop);
    }

    fn start_behavior(self: &Arc<Self>, id: String, stop: CancellationToken) {
        tokio::spawn(behavior::run_monster(
            Arc::clone(self),
            id,
            stop,
            self.timing.clone(),
        ));
    }

    /// Stops a monster's behavior loop and deletes it.
    pub async fn remove_monster(&self, id: &str) -> bool {
        let removed = self.lock().await.remove_monster(id).is_some();
        if removed {
            info!("Monster {} removed", id);
        }
        removed
    }

    /// Places a new monster on a random free cell and announces it.
    pub async fn spawn_monster(self: &Arc<Self>, id: &str, kind: MonsterKind) -> Option<MonsterData> {
        let (data, stop) = {
            let mut state = self.lock().await;
            let (x, y) = state.random_free_cell(&mut rand::thread_rng())?;
            let monster = Monster::new(id, kind, x, y);
            let spawned = (monster.to_data(), monster.stop_signal());
            state.insert_monster(monster);
            spawned
        };

        self.start_behavior(id.to_string(), stop);
        debug!("Started behavior loop for {}", id);
        self.broadcast(&ServerMessage::MonsterSpawned(data.clone()));
        Some(data)
    }

    /// Spawns `count` monsters, each a coin flip between goblin and orc.
    /// Returns how many were placed.
    pub async fn spawn_initial_monsters(self: &Arc<Self>, count: usize) -> usize {
        let mut spawned = 0;
        for i in 0..count {
            let kind = if rand::thread_rng().gen_bool(0.5) {
                MonsterKind::Goblin
            } else {
                MonsterKind::Orc
            };
            let id = format!("monster-{:03}", i);
            match self.spawn_monster(&id, kind).await {
                Some(data) => {
                    info!("Spawned {} {} at ({}, {})", data.name, id, data.x, data.y);
                    spawned += 1;
                }
                None => warn!("No free cell left for {}", id),
            }
        }
        spawned
    }

    pub async fn is_occupied(&self, x: i32, y: i32) -> bool {
        self.lock().await.is_occupied(x, y)
    }

    /// Moves a monster and reports the move through the broadcaster.
    pub async fn move_monster(&self, id: &str, x: i32, y: i32) -> bool {
        let moved = self.lock().await.move_monster(id, x, y);
        match moved {
            Some(event) => {
                self.broadcast(&ServerMessage::EntityMoved(event));
                true
            }
            None => false,
        }
    }

    pub async fn render(&self) -> String {
        self.lock().await.render()
    }
}
