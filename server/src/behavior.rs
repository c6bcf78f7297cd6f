//! Autonomous monster wandering.
//!
//! Each monster runs one loop: wait a random initial delay, then every tick
//! take one random axis-aligned step. A monster locked in combat stays put.
//! The loop exits when the monster's stop signal fires or its record is gone.

use crate::world::World;
use log::debug;
use rand::Rng;
use shared::ServerMessage;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Axis-aligned offsets a monster may step to.
const STEPS: [(i32, i32); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];

/// Randomized timing of a behavior loop, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorTiming {
    pub initial_delay_ms: Range<u64>,
    pub interval_ms: Range<u64>,
}

impl Default for BehaviorTiming {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250..1000,
            interval_ms: 250..1000,
        }
    }
}

impl BehaviorTiming {
    /// Timing whose first tick lies far beyond any test or session.
    pub fn idle() -> Self {
        let hour = 60 * 60 * 1000;
        Self {
            initial_delay_ms: hour..hour + 1,
            interval_ms: hour..hour + 1,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        sample(&self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        sample(&self.interval_ms)
    }
}

fn sample(range: &Range<u64>) -> Duration {
    if range.is_empty() {
        return Duration::from_millis(range.start);
    }
    Duration::from_millis(rand::thread_rng().gen_range(range.clone()))
}

pub fn random_step() -> (i32, i32) {
    STEPS[rand::thread_rng().gen_range(0..STEPS.len())]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Moved,
    Blocked,
    /// In combat; no movement attempted.
    Passive,
    /// Stop signal fired or the monster no longer exists.
    Stopped,
}

/// Runs one monster's loop until it is stopped or removed.
pub async fn run_monster(
    world: Arc<World>,
    monster_id: String,
    stop: CancellationToken,
    timing: BehaviorTiming,
) {
    tokio::select! {
        _ = stop.cancelled() => {
            debug!("Behavior loop for {} cancelled before start", monster_id);
            return;
        }
        _ = sleep(timing.initial_delay()) => {}
    }

    let period = timing.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if tick(&world, &monster_id, &stop).await == TickOutcome::Stopped {
                    break;
                }
            }
        }
    }

    debug!("Behavior loop for {} stopped", monster_id);
}

/// One wandering step. The world lock is released before the move is
/// broadcast.
pub async fn tick(world: &World, monster_id: &str, stop: &CancellationToken) -> TickOutcome {
    let moved = {
        let mut state = world.lock().await;
        if stop.is_cancelled() {
            return TickOutcome::Stopped;
        }
        let Some(monster) = state.monster(monster_id) else {
            return TickOutcome::Stopped;
        };
        if monster.is_in_combat() {
            debug!("{} is in combat, holding position", monster_id);
            return TickOutcome::Passive;
        }

        let (dx, dy) = random_step();
        let (x, y) = (monster.x + dx, monster.y + dy);
        state.move_monster(monster_id, x, y)
    };

    match moved {
        Some(event) => {
            world.broadcast(&ServerMessage::EntityMoved(event));
            TickOutcome::Moved
        }
        None => TickOutcome::Blocked,
    }
}
