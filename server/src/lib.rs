//! # Grid Realm Server Library
//!
//! This library provides the authoritative server for a small multiplayer
//! grid game. Players connect over WebSocket, walk a tile map, bump into
//! wandering monsters and fight them in turn-based rounds.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative World
//! The server holds the only copy of the world. Clients send intents
//! (`move`, `attack`, `use_potion`) and receive the resulting events; they
//! never report positions or HP themselves.
//!
//! ### Session Management
//! Handles the lifecycle of every connection:
//! - Handshake on `/ws` and player creation
//! - Private initial snapshot, public join announcement
//! - Disconnection cleanup and departure announcement
//! - Dropping clients that cannot keep up with the event stream
//!
//! ### Event Broadcasting
//! Every visible change is pushed to all sessions as a JSON envelope
//! `{"type": ..., "payload": ...}`.
//!
//! ## Architecture Design
//!
//! ### One Lock, Short Critical Sections
//! All actors live behind a single world lock. Commands and monster ticks
//! mutate under the lock, collect the events they caused, release, and only
//! then hand the events to the hub. Network backpressure can never hold
//! gameplay hostage.
//!
//! ### Concurrent Tasks
//! - One hub task owns the session registry and serializes fan-out
//! - One task per monster drives its wandering
//! - One reader and one writer task per connected session
//!
//! ## Module Organization
//!
//! ### Grid Module (`grid`)
//! Immutable terrain with a stone border.
//!
//! ### Actor Module (`actor`)
//! Player and monster records, stats, leveling and the monster catalogue.
//!
//! ### World Module (`world`)
//! Actor collections, movement rules, combat linkage and the broadcaster
//! capability the world reports monster movement through.
//!
//! ### Combat Module (`combat`)
//! Attack rounds with retaliation, rewards and respawn; potions.
//!
//! ### Behavior Module (`behavior`)
//! Cancellable per-monster wandering loops.
//!
//! ### Hub Module (`hub`)
//! Session registry and the single control loop for joins, leaves and fan-out.
//!
//! ### Commands Module (`commands`)
//! Turns decoded client commands into world changes and outgoing events.
//!
//! ### Network Module (`network`)
//! WebSocket accept loop, read and write pumps, keep-alive.
//!
//! ### Config Module (`config`)
//! Command line options.

pub mod actor;
pub mod behavior;
pub mod combat;
pub mod commands;
pub mod config;
pub mod grid;
pub mod hub;
pub mod network;
pub mod world;

#[cfg(test)]
mod testing;
