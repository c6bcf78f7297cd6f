//! WebSocket transport: accepting connections and pumping frames.
//!
//! Each connection gets a reader (the connection task itself) and a writer
//! task. The writer drains the session's outbound queue and sends keep-alive
//! pings. The reader decodes commands and runs them. When either side ends,
//! the session leaves the hub, which closes the queue and stops the writer.

use crate::commands::CommandProcessor;
use crate::hub::{HubHandle, SessionHandle, SessionId};
use crate::world::{Payload, World};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::ClientMessage;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};

/// Path clients must upgrade on.
pub const WS_PATH: &str = "/ws";
/// Time allowed to write a frame.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Time allowed between inbound frames, pongs included.
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Pings go out a little more often than the read deadline.
pub const PING_PERIOD: Duration = Duration::from_secs(54);
/// Largest inbound message accepted.
pub const MAX_MESSAGE_SIZE: usize = 512;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] io::Error),
}

/// Accepts WebSocket sessions and wires them to the world and hub.
pub struct Server {
    listener: TcpListener,
    world: Arc<World>,
    hub: HubHandle,
    queue_capacity: usize,
    next_session_id: SessionId,
}

impl Server {
    pub async fn bind(
        addr: &str,
        world: Arc<World>,
        hub: HubHandle,
        queue_capacity: usize,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self::from_listener(listener, world, hub, queue_capacity))
    }

    pub fn from_listener(
        listener: TcpListener,
        world: Arc<World>,
        hub: HubHandle,
        queue_capacity: usize,
    ) -> Self {
        Self {
            listener,
            world,
            hub,
            queue_capacity,
            next_session_id: 1,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener.local_addr().map_err(NetworkError::LocalAddr)
    }

    /// Accept loop. Per-connection failures are logged and never end it.
    pub async fn run(mut self) {
        match self.local_addr() {
            Ok(addr) => info!("Server listening on ws://{}{}", addr, WS_PATH),
            Err(e) => warn!("{}", e),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let session_id = self.next_session_id;
                    self.next_session_id = self.next_session_id.wrapping_add(1);
                    tokio::spawn(handle_connection(
                        stream,
                        addr,
                        session_id,
                        Arc::clone(&self.world),
                        self.hub.clone(),
                        self.queue_capacity,
                    ));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Only upgrades on [`WS_PATH`]; anything else gets a plain 404.
fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == WS_PATH {
        return Ok(response);
    }
    let mut rejection = ErrorResponse::new(Some(format!(
        "Game server is running. Connect via WebSocket on {}.",
        WS_PATH
    )));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}

fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);
    config
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    session_id: SessionId,
    world: Arc<World>,
    hub: HubHandle,
    queue_capacity: usize,
) {
    let mut ws = match accept_hdr_async_with_config(stream, check_path, Some(ws_config())).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let player_id = format!("player-{}", session_id);
    let Some(player) = world.spawn_player(&player_id).await else {
        warn!("No free cell for {}, refusing {}", player_id, addr);
        let _ = timeout(WRITE_WAIT, ws.close(None)).await;
        return;
    };
    info!("Client connected: {} as {} at ({}, {})", addr, player.id, player.x, player.y);

    let (session, outbound) = SessionHandle::new(session_id, player_id.clone(), addr, queue_capacity);
    if !hub.join(session).await {
        warn!("Hub is not running, dropping {}", addr);
        world.remove_player(&player_id).await;
        return;
    }

    let (sink, stream) = ws.split();
    let mut writer = tokio::spawn(write_pump(sink, outbound, session_id));

    let processor = CommandProcessor::new(Arc::clone(&world), player_id.clone());
    let writer_done = read_pump(stream, &mut writer, &processor, &hub, session_id).await;

    hub.leave(session_id, player_id).await;
    if !writer_done {
        let _ = timeout(WRITE_WAIT, writer).await;
    }
    info!("Client disconnected: {}", addr);
}

/// Reads frames until the peer goes away, the read deadline passes, or the
/// writer stops. Returns true if the writer finished first.
async fn read_pump(
    mut stream: WsStream,
    writer: &mut JoinHandle<()>,
    processor: &CommandProcessor,
    hub: &HubHandle,
    session: SessionId,
) -> bool {
    loop {
        tokio::select! {
            _ = &mut *writer => return true,
            frame = timeout(PONG_WAIT, stream.next()) => {
                let message = match frame {
                    Err(_) => {
                        warn!("Session {} missed its read deadline", session);
                        return false;
                    }
                    Ok(None) => return false,
                    Ok(Some(Err(e))) => {
                        debug!("Session {} read error: {}", session, e);
                        return false;
                    }
                    Ok(Some(Ok(message))) => message,
                };

                let text = match message {
                    Message::Text(text) => text,
                    Message::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Session {} sent non UTF-8 binary frame", session);
                            continue;
                        }
                    },
                    Message::Close(_) => return false,
                    _ => continue,
                };

                match ClientMessage::decode(&text) {
                    Ok(command) => {
                        debug!("Session {} issued {}", session, command.kind());
                        processor.handle(command, hub, session).await;
                    }
                    Err(e) => warn!("Ignoring message from session {}: {}", session, e),
                }
            }
        }
    }
}

/// Drains the outbound queue and keeps the connection alive with pings.
/// Ends when the hub closes the queue or a write fails.
async fn write_pump(mut sink: WsSink, mut outbound: mpsc::Receiver<Payload>, session: SessionId) {
    let mut ping = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if !send(&mut sink, Message::Text(payload.to_string()), session).await {
                        break;
                    }
                }
                None => {
                    debug!("Outbound queue for session {} closed", session);
                    let _ = timeout(WRITE_WAIT, sink.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ping.tick() => {
                if !send(&mut sink, Message::Ping(Vec::new()), session).await {
                    break;
                }
            }
        }
    }
}

async fn send(sink: &mut WsSink, message: Message, session: SessionId) -> bool {
    match timeout(WRITE_WAIT, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Write to session {} failed: {}", session, e);
            false
        }
        Err(_) => {
            warn!("Write to session {} timed out", session);
            false
        }
    }
}
