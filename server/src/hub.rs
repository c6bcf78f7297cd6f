//! Session registry and event fan-out.
//!
//! The hub is a single task draining one control queue. Joins, leaves,
//! broadcasts and private sends are applied in the order they arrive, so the
//! registry never changes while a fan-out is in progress.
//!
//! Backpressure never stalls the loop. A session whose outbound queue is full
//! is dropped from the registry. Producers that cannot enqueue onto the
//! control queue drop the event and log it.

use crate::world::{Broadcaster, Payload, World};
use log::{debug, error, info, warn};
use shared::{PlayerLeftPayload, ServerMessage};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type SessionId = u32;

/// The hub's end of one connected session.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub player_id: String,
    pub addr: SocketAddr,
    outbound: mpsc::Sender<Payload>,
}

impl SessionHandle {
    /// Creates a handle and the receiving end its writer task drains.
    pub fn new(
        id: SessionId,
        player_id: impl Into<String>,
        addr: SocketAddr,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Payload>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id,
                player_id: player_id.into(),
                addr,
                outbound,
            },
            receiver,
        )
    }
}

#[derive(Debug)]
pub enum HubEvent {
    Join(SessionHandle),
    Leave {
        session: SessionId,
        player_id: String,
    },
    Broadcast(Payload),
    Direct {
        session: SessionId,
        payload: Payload,
    },
}

/// Cloneable producer side of the hub's control queue.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Registers a session. Waits for room on the control queue; returns
    /// false only if the hub has stopped.
    pub async fn join(&self, session: SessionHandle) -> bool {
        self.events.send(HubEvent::Join(session)).await.is_ok()
    }

    /// Unregisters a session and removes its player from the world.
    pub async fn leave(&self, session: SessionId, player_id: impl Into<String>) {
        let event = HubEvent::Leave {
            session,
            player_id: player_id.into(),
        };
        if self.events.send(event).await.is_err() {
            debug!("Hub stopped before session {} could leave", session);
        }
    }

    /// Queues a payload for a single session without waiting.
    pub fn send_to(&self, session: SessionId, payload: Payload) {
        self.offer(HubEvent::Direct { session, payload });
    }

    /// Encodes a message and queues it for every session.
    pub fn broadcast_message(&self, message: &ServerMessage) {
        if let Some(payload) = encode(message) {
            self.broadcast(payload);
        }
    }

    /// Encodes a message and queues it for a single session.
    pub fn send_message(&self, session: SessionId, message: &ServerMessage) {
        if let Some(payload) = encode(message) {
            self.send_to(session, payload);
        }
    }

    fn offer(&self, event: HubEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Hub control queue is full, dropping event"),
            Err(TrySendError::Closed(_)) => debug!("Hub stopped, dropping event"),
        }
    }
}

impl Broadcaster for HubHandle {
    fn broadcast(&self, payload: Payload) {
        self.offer(HubEvent::Broadcast(payload));
    }
}

/// Encodes a message for the wire, logging instead of failing.
pub fn encode(message: &ServerMessage) -> Option<Payload> {
    match message.encode() {
        Ok(text) => Some(Payload::from(text)),
        Err(e) => {
            error!("Failed to encode {}: {}", message.kind(), e);
            None
        }
    }
}

/// Owns the session registry. Run it with [`Hub::run`].
pub struct Hub {
    world: Arc<World>,
    sessions: HashMap<SessionId, SessionHandle>,
    events: mpsc::Receiver<HubEvent>,
}

impl Hub {
    pub fn new(world: Arc<World>, capacity: usize) -> (Self, HubHandle) {
        let (sender, events) = mpsc::channel(capacity.max(1));
        (
            Self {
                world,
                sessions: HashMap::new(),
                events,
            },
            HubHandle { events: sender },
        )
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drains the control queue until every [`HubHandle`] is dropped.
    pub async fn run(mut self) {
        info!("Hub started");
        while let Some(event) = self.events.recv().await {
            self.handle_event(event).await;
        }
        info!("Hub stopped with {} sessions registered", self.sessions.len());
    }

    /// Applies a single control event.
    pub async fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Join(session) => self.join(session).await,
            HubEvent::Leave { session, player_id } => self.leave(session, &player_id).await,
            HubEvent::Broadcast(payload) => self.fan_out(&payload),
            HubEvent::Direct { session, payload } => self.deliver(session, payload),
        }
    }

    async fn join(&mut self, session: SessionHandle) {
        let id = session.id;
        let player_id = session.player_id.clone();
        info!("Session {} joined from {} as {}", id, session.addr, player_id);
        self.sessions.insert(id, session);

        let (snapshot, joined) = {
            let state = self.world.lock().await;
            let joined = state.player(&player_id).map(|p| p.to_data());
            (state.snapshot(&player_id), joined)
        };

        if let Some(payload) = encode(&ServerMessage::InitialState(snapshot)) {
            self.deliver(id, payload);
        }

        match joined {
            Some(player) => {
                if let Some(payload) = encode(&ServerMessage::PlayerJoined(player)) {
                    self.fan_out(&payload);
                }
            }
            None => debug!("Player {} left before join completed", player_id),
        }
    }

    async fn leave(&mut self, session: SessionId, player_id: &str) {
        if self.sessions.remove(&session).is_some() {
            info!("Session {} left", session);
        }

        if self.world.remove_player(player_id).await.is_some() {
            info!("Player {} removed from world", player_id);
            let message = ServerMessage::PlayerLeft(PlayerLeftPayload {
                id: player_id.to_string(),
            });
            if let Some(payload) = encode(&message) {
                self.fan_out(&payload);
            }
        }
    }

    fn fan_out(&mut self, payload: &Payload) {
        let mut slow = Vec::new();
        for (id, session) in &self.sessions {
            if let Err(e) = session.outbound.try_send(Arc::clone(payload)) {
                slow.push((*id, e));
            }
        }
        for (id, e) in slow {
            self.drop_session(id, &e);
        }
    }

    fn deliver(&mut self, session: SessionId, payload: Payload) {
        let Some(handle) = self.sessions.get(&session) else {
            debug!("No session {} for private message", session);
            return;
        };
        if let Err(e) = handle.outbound.try_send(payload) {
            self.drop_session(session, &e);
        }
    }

    /// Removes a session whose queue refused a payload. Dropping the handle
    /// closes the queue, which ends the session's writer.
    fn drop_session<T>(&mut self, session: SessionId, reason: &TrySendError<T>) {
        if let Some(handle) = self.sessions.remove(&session) {
            match reason {
                TrySendError::Full(_) => warn!(
                    "Dropping slow session {} ({}): outbound queue full",
                    session, handle.player_id
                ),
                TrySendError::Closed(_) => debug!(
                    "Dropping session {} ({}): outbound queue closed",
                    session, handle.player_id
                ),
            }
        }
    }
}
