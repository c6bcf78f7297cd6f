//! Integration tests for the game server
//!
//! These tests run the real hub and WebSocket server on an ephemeral port and
//! talk to it with ordinary WebSocket clients.

use futures_util::{SinkExt, StreamExt};
use server::actor::Monster;
use server::behavior::BehaviorTiming;
use server::grid::Grid;
use server::hub::{Hub, HubHandle, SessionHandle};
use server::network::Server;
use server::world::{Broadcaster, World};
use shared::{
    AttackPayload, ClientMessage, InitialStatePayload, MonsterKind, MovePayload,
    NotificationLevel, NotificationPayload, ServerMessage, UsePotionPayload,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    world: Arc<World>,
    hub: HubHandle,
    _broadcaster: Arc<dyn Broadcaster>,
}

/// Starts hub and server. Monsters placed in these worlds never wander.
async fn start_server(grid: Grid) -> TestServer {
    start_server_with_queue(grid, 64).await
}

async fn start_server_with_queue(grid: Grid, queue_capacity: usize) -> TestServer {
    let world = Arc::new(World::with_timing(grid, BehaviorTiming::idle()));
    let (hub, handle) = Hub::new(Arc::clone(&world), 256);
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(handle.clone());
    world.attach_broadcaster(&broadcaster);
    tokio::spawn(hub.run());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server =
        Server::from_listener(listener, Arc::clone(&world), handle.clone(), queue_capacity);
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    TestServer {
        addr,
        world,
        hub: handle,
        _broadcaster: broadcaster,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    client
}

/// Next game event, or `None` once the server closes the connection.
async fn next_message(client: &mut Client) -> Option<ServerMessage> {
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for server");
        match frame {
            Some(Ok(Message::Text(text))) => return Some(ServerMessage::decode(&text).unwrap()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

/// Skips events until one of the given kind arrives.
async fn next_of_kind(client: &mut Client, kind: &str) -> ServerMessage {
    loop {
        let message = next_message(client)
            .await
            .unwrap_or_else(|| panic!("connection closed while waiting for {}", kind));
        if message.kind() == kind {
            return message;
        }
    }
}

async fn send(client: &mut Client, command: ClientMessage) {
    client
        .send(Message::Text(command.encode().unwrap()))
        .await
        .unwrap();
}

/// Connects and consumes the join handshake.
async fn join(addr: SocketAddr) -> (Client, InitialStatePayload) {
    let mut client = connect(addr).await;
    let initial = match next_message(&mut client).await {
        Some(ServerMessage::InitialState(state)) => state,
        other => panic!("Expected initial_state, got {:?}", other),
    };
    match next_message(&mut client).await {
        Some(ServerMessage::PlayerJoined(player)) => assert_eq!(player.id, initial.player_id),
        other => panic!("Expected player_joined, got {:?}", other),
    }
    (client, initial)
}

async fn position_of(world: &World, player_id: &str) -> (i32, i32) {
    let state = world.lock().await;
    let player = state.player(player_id).unwrap();
    (player.x, player.y)
}

/// SESSION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    /// Joining yields a private snapshot followed by the public announcement
    #[tokio::test]
    async fn join_receives_snapshot_then_announcement() {
        let server = start_server(Grid::open(7, 6)).await;
        let (_client, initial) = join(server.addr).await;

        assert_eq!(initial.player_id, "player-1");
        assert_eq!(initial.map.width, 7);
        assert_eq!(initial.map.height, 6);
        assert_eq!(initial.map.tiles.len(), 6);
        assert_eq!(initial.players.len(), 1);
        assert!(initial.monsters.is_empty());
    }

    /// Other sessions see arrivals and departures
    #[tokio::test]
    async fn join_and_leave_are_broadcast() {
        let server = start_server(Grid::open(7, 7)).await;
        let (mut first, _) = join(server.addr).await;
        let (mut second, initial) = join(server.addr).await;
        assert_eq!(initial.players.len(), 2);

        match next_of_kind(&mut first, "player_joined").await {
            ServerMessage::PlayerJoined(player) => assert_eq!(player.id, "player-2"),
            other => panic!("Unexpected {:?}", other),
        }

        second.close(None).await.unwrap();
        match next_of_kind(&mut first, "player_left").await {
            ServerMessage::PlayerLeft(left) => assert_eq!(left.id, "player-2"),
            other => panic!("Unexpected {:?}", other),
        }
        assert!(server.world.lock().await.player("player-2").is_none());
    }

    /// A move with absurd offsets is ignored and the session still leaves cleanly
    #[tokio::test]
    async fn oversized_move_then_disconnect_announces_leave() {
        let server = start_server(Grid::open(7, 7)).await;
        let (mut watcher, _) = join(server.addr).await;
        let (mut mover, initial) = join(server.addr).await;
        next_of_kind(&mut watcher, "player_joined").await;

        let position = position_of(&server.world, &initial.player_id).await;
        assert_ok!(
            mover
                .send(Message::Text(
                    r#"{"type":"move","payload":{"dx":2147483647,"dy":0}}"#.to_string()
                ))
                .await
        );
        send(&mut mover, ClientMessage::Move(MovePayload { dx: i32::MIN, dy: 0 })).await;
        send(&mut mover, ClientMessage::UsePotion(UsePotionPayload {})).await;
        next_of_kind(&mut mover, "notification").await;
        assert_eq!(position_of(&server.world, &initial.player_id).await, position);

        mover.close(None).await.unwrap();
        match next_of_kind(&mut watcher, "player_left").await {
            ServerMessage::PlayerLeft(left) => assert_eq!(left.id, initial.player_id),
            other => panic!("Unexpected {:?}", other),
        }
        assert!(server.world.lock().await.player(&initial.player_id).is_none());
    }

    /// A client that cannot keep up is dropped, removed and announced once
    #[tokio::test]
    async fn slow_client_is_dropped_and_announced_once() {
        let server = start_server_with_queue(Grid::open(7, 7), 1).await;

        let (observer, mut observed) =
            SessionHandle::new(9000, "observer", "127.0.0.1:1".parse().unwrap(), 256);
        assert!(server.hub.join(observer).await);

        // Never read from this client.
        let _slow = connect(server.addr).await;
        let joined = timeout(Duration::from_secs(5), async {
            loop {
                let payload = observed.recv().await.expect("hub closed observer");
                let message = ServerMessage::decode(&payload).unwrap();
                if let ServerMessage::PlayerJoined(player) = message {
                    return player.id;
                }
            }
        })
        .await
        .expect("slow client never joined");

        // Overflow the one-slot queue in a single hub pass.
        for i in 0..8 {
            let notice = ServerMessage::Notification(NotificationPayload {
                message: format!("flood {}", i),
                level: NotificationLevel::Info,
            });
            server.hub.broadcast_message(&notice);
        }

        let left = timeout(Duration::from_secs(5), async {
            loop {
                let payload = observed.recv().await.expect("hub closed observer");
                let message = ServerMessage::decode(&payload).unwrap();
                if let ServerMessage::PlayerLeft(left) = message {
                    return left.id;
                }
            }
        })
        .await
        .expect("player_left never arrived");
        assert_eq!(left, joined);
        assert!(server.world.lock().await.player(&joined).is_none());

        // No second departure follows.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let repeats = std::iter::from_fn(|| observed.try_recv().ok())
            .filter_map(|payload| ServerMessage::decode(&payload).ok())
            .filter(|message| matches!(message, ServerMessage::PlayerLeft(_)))
            .count();
        assert_eq!(repeats, 0);
    }

    /// Upgrades are only accepted on /ws
    #[tokio::test]
    async fn wrong_path_is_rejected() {
        let server = start_server(Grid::open(5, 5)).await;
        let result = connect_async(format!("ws://{}/", server.addr)).await;
        assert_err!(result);
    }

    /// A full map refuses new players instead of stacking them
    #[tokio::test]
    async fn full_map_refuses_connection() {
        let server = start_server(Grid::open(3, 3)).await;
        let (_first, _) = join(server.addr).await;

        let mut second = connect(server.addr).await;
        assert!(next_message(&mut second).await.is_none());
        assert_eq!(server.world.lock().await.players().count(), 1);
    }
}

/// GAMEPLAY TESTS
mod gameplay_tests {
    use super::*;

    /// Moving onto grass is broadcast with the new position
    #[tokio::test]
    async fn move_is_broadcast() {
        let server = start_server(Grid::open(7, 7)).await;
        let (mut client, initial) = join(server.addr).await;

        let (x, y) = position_of(&server.world, &initial.player_id).await;
        let dx = if x < 3 { 1 } else { -1 };
        send(&mut client, ClientMessage::Move(MovePayload { dx, dy: 0 })).await;

        match next_of_kind(&mut client, "entity_moved").await {
            ServerMessage::EntityMoved(event) => {
                assert_eq!(event.id, initial.player_id);
                assert_eq!((event.x, event.y), (x + dx, y));
            }
            other => panic!("Unexpected {:?}", other),
        }
    }

    /// Monsters spawned after a join reach connected sessions
    #[tokio::test]
    async fn monster_spawn_reaches_clients() {
        let server = start_server(Grid::open(7, 7)).await;
        let (mut client, _) = join(server.addr).await;

        let spawned = server
            .world
            .spawn_monster("monster-100", MonsterKind::Orc)
            .await
            .unwrap();
        match next_of_kind(&mut client, "monster_spawned").await {
            ServerMessage::MonsterSpawned(monster) => {
                assert_eq!(monster, spawned);
                assert_eq!(monster.name, "Orc");
            }
            other => panic!("Unexpected {:?}", other),
        }
    }

    /// Bump into a monster, trade blows, then finish it off
    #[tokio::test]
    async fn combat_round_trip() {
        let server = start_server(Grid::open(7, 7)).await;
        let (mut client, initial) = join(server.addr).await;
        let player_id = initial.player_id.clone();

        let (x, y) = position_of(&server.world, &player_id).await;
        let dx = if x < 3 { 1 } else { -1 };
        server
            .world
            .lock()
            .await
            .insert_monster(Monster::new("monster-007", MonsterKind::Goblin, x + dx, y));

        send(&mut client, ClientMessage::Move(MovePayload { dx, dy: 0 })).await;
        match next_of_kind(&mut client, "combat_initiated").await {
            ServerMessage::CombatInitiated(combat) => {
                assert_eq!(combat.player_id, player_id);
                assert_eq!(combat.monster_id, "monster-007");
                assert_eq!((combat.player_x, combat.player_y), (x, y));
            }
            other => panic!("Unexpected {:?}", other),
        }

        let attack = || {
            ClientMessage::Attack(AttackPayload {
                target_id: "monster-007".to_string(),
            })
        };

        send(&mut client, attack()).await;
        let blow = next_of_kind(&mut client, "combat_update").await;
        let retaliation = next_of_kind(&mut client, "combat_update").await;
        match (blow, retaliation) {
            (ServerMessage::CombatUpdate(blow), ServerMessage::CombatUpdate(back)) => {
                assert_eq!(blow.attacker_id, player_id);
                assert_eq!(blow.damage_dealt, 7);
                assert_eq!(back.attacker_id, "monster-007");
                assert_eq!(back.damage_dealt, 3);
            }
            other => panic!("Unexpected {:?}", other),
        }

        server
            .world
            .lock()
            .await
            .monster_mut("monster-007")
            .unwrap()
            .current_hp = 1;
        send(&mut client, attack()).await;

        match next_of_kind(&mut client, "combat_update").await {
            ServerMessage::CombatUpdate(update) => assert!(update.is_defender_defeated),
            other => panic!("Unexpected {:?}", other),
        }
        match next_message(&mut client).await {
            Some(ServerMessage::EntityRemoved(removed)) => assert_eq!(removed.id, "monster-007"),
            other => panic!("Expected entity_removed, got {:?}", other),
        }
        match next_message(&mut client).await {
            Some(ServerMessage::PlayerStatUpdate(stats)) => {
                assert_eq!(stats.player_id, player_id);
                assert_eq!(stats.xp, 10);
                assert_eq!(stats.current_hp, 97);
            }
            other => panic!("Expected player_stat_update, got {:?}", other),
        }

        let state = server.world.lock().await;
        assert!(state.monster("monster-007").is_none());
        assert!(!state.player(&player_id).unwrap().is_in_combat());
    }

    /// Garbage is ignored and the connection keeps working
    #[tokio::test]
    async fn malformed_messages_are_ignored() {
        let server = start_server(Grid::open(6, 6)).await;
        let (mut client, _) = join(server.addr).await;

        assert_ok!(client.send(Message::Text("not json".to_string())).await);
        assert_ok!(
            client
                .send(Message::Text(r#"{"type":"dance","payload":{}}"#.to_string()))
                .await
        );
        assert_ok!(
            client
                .send(Message::Text(r#"{"type":"move","payload":{"dx":"left"}}"#.to_string()))
                .await
        );

        send(&mut client, ClientMessage::UsePotion(UsePotionPayload {})).await;
        match next_of_kind(&mut client, "notification").await {
            ServerMessage::Notification(notice) => {
                assert_eq!(notice.message, "You are already at full health.");
            }
            other => panic!("Unexpected {:?}", other),
        }
    }
}

/// WIRE FORMAT TESTS
mod protocol_tests {
    use super::*;

    /// Raw client JSON in the documented envelope shape decodes
    #[test]
    fn documented_envelopes_decode() {
        let commands = [
            r#"{"type":"move","payload":{"dx":0,"dy":-1}}"#,
            r#"{"type":"attack","payload":{"target_id":"monster-001"}}"#,
            r#"{"type":"use_potion","payload":{}}"#,
        ];
        for raw in commands {
            assert_ok!(ClientMessage::decode(raw));
        }
        assert_err!(ClientMessage::decode(r#"{"payload":{}}"#));
    }

    /// Tokio runtime helpers work for synchronous callers
    #[test]
    fn world_render_from_blocking_context() {
        let world = World::new(Grid::open(4, 3));
        let picture = tokio_test::block_on(world.render());
        assert_eq!(picture, "####\n#..#\n####\n");
    }
}
