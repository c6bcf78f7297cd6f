//! Test doubles shared by unit tests.

use crate::world::{Broadcaster, Payload};
use shared::ServerMessage;
use std::sync::Mutex;

/// Broadcaster that keeps every payload it is handed.
#[derive(Default)]
pub struct RecordingBroadcaster {
    payloads: Mutex<Vec<Payload>>,
}

impl RecordingBroadcaster {
    pub fn messages(&self) -> Vec<ServerMessage> {
        self.payloads
            .lock()
            .unwrap()
            .iter()
            .map(|p| ServerMessage::decode(p).unwrap())
            .collect()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, payload: Payload) {
        self.payloads.lock().unwrap().push(payload);
    }
}
