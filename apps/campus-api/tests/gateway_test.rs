mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use campus_api::error::{codes, GatewayError};
use campus_api::gateway::events::ServerFrame;
use campus_api::gateway::session::Connection;
use campus_api::gateway::{Gateway, GatewayStores};
use campus_api::models::chat_message::{ChatMessage, NewChatMessage};
use campus_api::models::position::{Direction, Position};
use campus_api::models::room::Room;
use campus_api::models::user::{DirectoryUser, Role};
use campus_api::stores::memory::{MemoryPositionStore, MemoryRoomStore};
use campus_api::stores::{MessageStore, PositionStore, RoomStore, StoreError};

use common::{drain, drain_events, mint_expired_token, mint_token, room, test_env, test_env_with, TestEnv};

type Rx = mpsc::Receiver<Arc<ServerFrame>>;

async fn join(env: &TestEnv, user_id: &str, name: &str) -> (Arc<Connection>, Rx) {
    env.add_user(user_id, name);
    env.gateway()
        .connect(Some(&mint_token(user_id, name)))
        .await
        .expect("connect")
}

async fn send(gateway: &Gateway, conn: &Arc<Connection>, event: &str, data: Value) {
    let text = json!({ "event": event, "data": data }).to_string();
    gateway.handle_text(conn, &text).await;
}

fn errors(frames: &[Arc<ServerFrame>]) -> Vec<String> {
    frames
        .iter()
        .filter(|f| f.event == "error")
        .map(|f| f.data["code"].as_str().unwrap_or_default().to_string())
        .collect()
}

struct FailingMessageStore;

#[async_trait]
impl MessageStore for FailingMessageStore {
    async fn append(&self, _message: NewChatMessage) -> Result<ChatMessage, StoreError> {
        Err(StoreError::Unavailable("database offline".into()))
    }

    async fn query_recent(&self, _room_id: Option<&str>, _limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        Err(StoreError::Unavailable("database offline".into()))
    }
}

struct FailingPositionStore;

#[async_trait]
impl PositionStore for FailingPositionStore {
    async fn upsert(&self, _user_id: &str, _position: &Position) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database offline".into()))
    }

    async fn read(&self, _user_id: &str) -> Result<Option<Position>, StoreError> {
        Err(StoreError::Unavailable("database offline".into()))
    }
}

// ---------------------------------------------------------------------------
// Connect / authenticate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_announces_user_and_sends_snapshot() {
    let env = test_env();
    let (_a, mut rx_a) = join(&env, "u1", "Aiko").await;

    let frames = drain(&mut rx_a);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "users:online");
    assert_eq!(frames[0].data[0]["userId"], "u1");
    assert_eq!(frames[0].data[0]["mapId"], "main");
    assert_eq!(frames[0].data[0]["x"], 400.0);

    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    let joined = drain(&mut rx_a);
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].event, "user:joined");
    assert_eq!(joined[0].data["user"]["userId"], "u2");
    assert_eq!(joined[0].data["position"]["mapId"], "main");

    let snapshot = drain(&mut rx_b);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].event, "users:online");
    assert_eq!(snapshot[0].data.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn connect_uses_persisted_position_or_stores_spawn() {
    let env = test_env();
    let saved = Position {
        x: 12.0,
        y: 34.0,
        map_id: "library".into(),
        direction: Direction::Left,
        is_moving: false,
    };
    env.positions.upsert("u1", &saved).await.unwrap();

    let (_a, _rx_a) = join(&env, "u1", "Aiko").await;
    assert_eq!(env.gateway().presence.get("u1").unwrap().position, saved);

    let (_b, _rx_b) = join(&env, "u2", "Ben").await;
    let stored = env.positions.read("u2").await.unwrap().unwrap();
    assert_eq!(stored, Position::spawn(400.0, 300.0, "main"));
}

#[tokio::test]
async fn rejected_credentials_create_no_state() {
    let env = test_env();
    env.add_user("u1", "Aiko");
    env.users.insert(DirectoryUser {
        id: "u9".into(),
        name: "Gone".into(),
        role: Role::Student,
        is_active: false,
    });
    let gateway = env.gateway();

    let attempts = [
        None,
        Some(String::new()),
        Some("garbage".to_string()),
        Some(mint_expired_token("u1", "Aiko")),
        Some(mint_token("nobody", "Nobody")),
        Some(mint_token("u9", "Gone")),
    ];
    for token in attempts {
        let result = gateway.connect(token.as_deref()).await;
        assert!(matches!(result, Err(GatewayError::Authentication(_))));
    }

    assert!(gateway.registry.is_empty());
    assert!(gateway.presence.is_empty());
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn move_reaches_same_map_once_and_not_sender() {
    let env = test_env();
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    send(gw, &a, "move", json!({"x": 10, "y": 20, "mapId": "main"})).await;

    assert!(drain(&mut rx_a).is_empty());
    let frames = drain(&mut rx_b);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "moved");
    assert_eq!(frames[0].data["userId"], "u1");
    assert_eq!(frames[0].data["x"], 10.0);
    assert_eq!(frames[0].data["y"], 20.0);
    assert_eq!(frames[0].data["direction"], "down");

    let entry = gw.presence.get("u1").unwrap();
    assert_eq!((entry.position.x, entry.position.y), (10.0, 20.0));
    assert_eq!(env.positions.read("u1").await.unwrap().unwrap().x, 10.0);
}

#[tokio::test]
async fn move_between_maps_notifies_both_maps() {
    let env = test_env();
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    let (c, mut rx_c) = join(&env, "u3", "Chen").await;

    send(gw, &c, "move", json!({"x": 1, "y": 1, "mapId": "library"})).await;
    drain(&mut rx_a);
    drain(&mut rx_b);
    drain(&mut rx_c);

    send(gw, &a, "move", json!({"x": 5, "y": 5, "mapId": "library", "isMoving": true})).await;

    assert_eq!(drain_events(&mut rx_b), ["moved"]);
    assert_eq!(drain_events(&mut rx_c), ["moved"]);
    assert!(drain(&mut rx_a).is_empty());

    let on_library: Vec<_> = gw
        .presence
        .snapshot_for_map("library")
        .into_iter()
        .map(|e| e.user_id)
        .collect();
    assert_eq!(on_library, ["u3", "u1"]);
}

#[tokio::test]
async fn invalid_move_is_scoped_error_and_connection_survives() {
    let env = test_env();
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    send(gw, &a, "move", json!({"x": 1, "y": 1, "mapId": ""})).await;
    send(gw, &a, "move", json!({"x": 1, "y": 1, "mapId": "main", "teleport": true})).await;
    send(gw, &a, "dance", json!({})).await;
    gw.handle_text(&a, "not json").await;

    let frames = drain(&mut rx_a);
    assert_eq!(
        errors(&frames),
        [codes::INVALID_POSITION, codes::INVALID_PAYLOAD, codes::INVALID_EVENT, codes::INVALID_PAYLOAD]
    );
    assert!(drain(&mut rx_b).is_empty());
    assert!(a.is_open());
    assert_eq!(gw.presence.get("u1").unwrap().position.x, 400.0);
}

#[tokio::test]
async fn move_survives_position_store_failure() {
    let env = test_env_with(|stores| GatewayStores {
        positions: Arc::new(FailingPositionStore),
        ..stores
    });
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    send(gw, &a, "move", json!({"x": 7, "y": 8, "mapId": "main"})).await;

    assert_eq!(drain_events(&mut rx_b), ["moved"]);
    assert!(errors(&drain(&mut rx_a)).is_empty());
    assert_eq!(gw.presence.get("u1").unwrap().position.x, 7.0);
}

// ---------------------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_runs_exactly_once() {
    let env = test_env();
    let gw = env.gateway();
    let (a, _rx_a) = join(&env, "u1", "Aiko").await;
    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    drain(&mut rx_b);

    assert!(gw.close(&a));
    assert!(!gw.close(&a));

    assert!(gw.presence.get("u1").is_none());
    assert!(gw.registry.lookup(&a.id).is_none());
    assert_eq!(gw.registry.len(), 1);

    let frames = drain(&mut rx_b);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "user:left");
    assert_eq!(frames[0].data["userId"], "u1");
}

#[tokio::test]
async fn events_after_close_are_dropped() {
    let env = test_env();
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    gw.close(&a);
    drain(&mut rx_a);
    drain(&mut rx_b);

    send(gw, &a, "move", json!({"x": 1, "y": 1, "mapId": "main"})).await;
    send(gw, &a, "chat:send", json!({"content": "ghost"})).await;

    assert!(drain(&mut rx_a).is_empty());
    assert!(drain(&mut rx_b).is_empty());
    assert!(gw.presence.get("u1").is_none());
    assert!(env.messages.is_empty());
}

#[tokio::test]
async fn close_notifies_prior_room() {
    let env = test_env();
    let gw = env.gateway();
    env.rooms.insert_room(room("r1", 10));
    let (a, _rx_a) = join(&env, "u1", "Aiko").await;
    let (b, mut rx_b) = join(&env, "u2", "Ben").await;
    send(gw, &a, "room:enter", json!({"roomId": "r1"})).await;
    send(gw, &b, "room:enter", json!({"roomId": "r1"})).await;
    drain(&mut rx_b);

    gw.close(&a);

    let events = drain_events(&mut rx_b);
    assert_eq!(events, ["user:left", "room:user_left"]);
}

#[tokio::test]
async fn second_tab_keeps_connection_and_restores_presence_on_move() {
    let env = test_env();
    let gw = env.gateway();
    env.add_user("u1", "Aiko");
    let token = mint_token("u1", "Aiko");
    let (tab1, _rx1) = gw.connect(Some(&token)).await.unwrap();
    let (tab2, _rx2) = gw.connect(Some(&token)).await.unwrap();
    assert_eq!(gw.registry.find_connections_by_user_id("u1").len(), 2);

    gw.close(&tab1);

    assert!(gw.presence.get("u1").is_none());
    assert!(gw.registry.lookup(&tab2.id).is_some());
    assert_eq!(
        gw.registry.find_connections_by_user_id("u1"),
        HashSet::from([tab2.id.clone()])
    );

    send(gw, &tab2, "move", json!({"x": 3, "y": 4, "mapId": "main"})).await;
    assert_eq!(gw.presence.get("u1").unwrap().position.x, 3.0);
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_is_persisted_then_broadcast_including_sender() {
    let env = test_env();
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    send(gw, &a, "chat:send", json!({"content": "  hello class  "})).await;

    assert_eq!(env.messages.len(), 1);
    for rx in [&mut rx_a, &mut rx_b] {
        let frames = drain(rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "chat:message");
        assert_eq!(frames[0].data["content"], "hello class");
        assert_eq!(frames[0].data["userName"], "Aiko");
        assert!(frames[0].data["roomId"].is_null());
        assert!(frames[0].data["id"].is_string());
    }
}

#[tokio::test]
async fn failed_chat_append_is_never_broadcast() {
    let env = test_env_with(|stores| GatewayStores {
        messages: Arc::new(FailingMessageStore),
        ..stores
    });
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    send(gw, &a, "chat:send", json!({"content": "lost"})).await;

    let frames = drain(&mut rx_a);
    assert_eq!(errors(&frames), [codes::CHAT_MESSAGE_ERROR]);
    assert_eq!(frames.len(), 1);
    assert!(frames[0].data["message"].as_str().is_some_and(|m| !m.contains("offline")));
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn chat_content_is_validated() {
    let env = test_env();
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    drain(&mut rx_a);

    send(gw, &a, "chat:send", json!({"content": "   "})).await;
    send(gw, &a, "chat:send", json!({"content": "x".repeat(1001)})).await;
    send(gw, &a, "chat:send", json!({"content": "x".repeat(1000)})).await;

    let frames = drain(&mut rx_a);
    assert_eq!(errors(&frames), [codes::INVALID_MESSAGE, codes::INVALID_MESSAGE]);
    assert_eq!(frames.last().unwrap().event, "chat:message");
    assert_eq!(env.messages.len(), 1);
}

#[tokio::test]
async fn room_chat_requires_entering_the_room() {
    let env = test_env();
    let gw = env.gateway();
    env.rooms.insert_room(room("r1", 10));
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (b, mut rx_b) = join(&env, "u2", "Ben").await;
    let (_c, mut rx_c) = join(&env, "u3", "Chen").await;

    send(gw, &a, "chat:send", json!({"content": "hi", "roomId": "r1"})).await;
    assert_eq!(errors(&drain(&mut rx_a)), [codes::NOT_IN_ROOM]);
    assert!(env.messages.is_empty());

    send(gw, &a, "room:enter", json!({"roomId": "r1"})).await;
    send(gw, &b, "room:enter", json!({"roomId": "r1"})).await;
    drain(&mut rx_a);
    drain(&mut rx_b);
    drain(&mut rx_c);

    send(gw, &a, "chat:send", json!({"content": "hi room", "roomId": "r1"})).await;
    assert_eq!(drain_events(&mut rx_a), ["chat:message"]);
    assert_eq!(drain_events(&mut rx_b), ["chat:message"]);
    assert!(drain(&mut rx_c).is_empty());
}

#[tokio::test]
async fn typing_goes_to_others_only() {
    let env = test_env();
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    send(gw, &a, "chat:typing", json!({"isTyping": true})).await;

    assert!(drain(&mut rx_a).is_empty());
    let frames = drain(&mut rx_b);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "chat:user_typing");
    assert_eq!(frames[0].data["isTyping"], true);
    assert!(env.messages.is_empty());
}

#[tokio::test]
async fn history_is_unicast_in_chronological_order() {
    let env = test_env();
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    for i in 0..3 {
        send(gw, &a, "chat:send", json!({"content": format!("m{i}")})).await;
    }
    drain(&mut rx_a);
    drain(&mut rx_b);

    send(gw, &a, "chat:history", json!({"limit": 2})).await;

    assert!(drain(&mut rx_b).is_empty());
    let frames = drain(&mut rx_a);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "chat:history");
    let contents: Vec<_> = frames[0]
        .data
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(contents, ["m1", "m2"]);
}

#[tokio::test]
async fn history_failure_reports_history_error() {
    let env = test_env_with(|stores| GatewayStores {
        messages: Arc::new(FailingMessageStore),
        ..stores
    });
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    drain(&mut rx_a);

    send(gw, &a, "chat:history", Value::Null).await;
    assert_eq!(errors(&drain(&mut rx_a)), [codes::CHAT_HISTORY_ERROR]);
}

#[tokio::test]
async fn user_join_resends_snapshot() {
    let env = test_env();
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    drain(&mut rx_a);

    send(gw, &a, "user:join", json!({})).await;
    let frames = drain(&mut rx_a);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "users:online");
}

#[tokio::test]
async fn repeated_auth_frame_is_rejected_without_closing() {
    let env = test_env();
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    drain(&mut rx_a);

    send(gw, &a, "auth", json!({"token": "again"})).await;
    assert_eq!(errors(&drain(&mut rx_a)), [codes::ALREADY_AUTHENTICATED]);
    assert!(a.is_open());
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enter_twice_then_leave_yields_two_notifications() {
    let env = test_env();
    let gw = env.gateway();
    env.rooms.insert_room(room("r1", 10));
    let (observer, mut rx_o) = join(&env, "u0", "Obs").await;
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    send(gw, &observer, "room:enter", json!({"roomId": "r1"})).await;
    drain(&mut rx_o);
    drain(&mut rx_a);

    send(gw, &a, "room:enter", json!({"roomId": "r1"})).await;
    send(gw, &a, "room:enter", json!({"roomId": "r1"})).await;
    send(gw, &a, "room:leave", json!({"roomId": "r1"})).await;

    assert_eq!(drain_events(&mut rx_o), ["room:user_entered", "room:user_left"]);
    assert!(errors(&drain(&mut rx_a)).is_empty());
    assert!(gw.registry.current_room(&a.id).is_none());
}

#[tokio::test]
async fn full_room_is_refused_without_side_effects() {
    let env = test_env();
    let gw = env.gateway();
    env.rooms.insert_room(room("r1", 2));
    let (observer, mut rx_o) = join(&env, "u0", "Obs").await;
    send(gw, &observer, "room:enter", json!({"roomId": "r1"})).await;
    assert_eq!(gw.registry.current_room(&observer.id).as_deref(), Some("r1"));
    // u0 is both a durable member and connected; it holds one seat.
    env.rooms.set_members("r1", ["u0", "u7"]);

    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    drain(&mut rx_o);
    drain(&mut rx_a);
    let before = gw.presence.get("u1");

    send(gw, &a, "room:enter", json!({"roomId": "r1"})).await;

    assert_eq!(errors(&drain(&mut rx_a)), [codes::ROOM_FULL]);
    assert!(gw.registry.current_room(&a.id).is_none());
    assert_eq!(gw.presence.get("u1"), before);
    assert!(drain(&mut rx_o).is_empty());
}

#[tokio::test]
async fn live_entrants_fill_capacity() {
    let env = test_env();
    let gw = env.gateway();
    env.rooms.insert_room(room("r1", 1));
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (b, mut rx_b) = join(&env, "u2", "Ben").await;
    let (c, mut rx_c) = join(&env, "u3", "Chen").await;
    drain(&mut rx_a);
    drain(&mut rx_b);
    drain(&mut rx_c);

    for conn in [&a, &b, &c] {
        send(gw, conn, "room:enter", json!({"roomId": "r1"})).await;
    }

    assert!(errors(&drain(&mut rx_a)).is_empty());
    assert_eq!(errors(&drain(&mut rx_b)), [codes::ROOM_FULL]);
    assert_eq!(errors(&drain(&mut rx_c)), [codes::ROOM_FULL]);
    assert_eq!(gw.registry.room_users("r1"), HashSet::from(["u1".to_string()]));

    // A second tab of an occupant shares the occupant's seat.
    let (a2, mut rx_a2) = gw.connect(Some(&mint_token("u1", "Aiko"))).await.unwrap();
    drain(&mut rx_a2);
    send(gw, &a2, "room:enter", json!({"roomId": "r1"})).await;
    assert!(errors(&drain(&mut rx_a2)).is_empty());

    // Leaving frees the seat.
    send(gw, &a, "room:leave", json!({"roomId": "r1"})).await;
    send(gw, &a2, "room:leave", json!({"roomId": "r1"})).await;
    send(gw, &b, "room:enter", json!({"roomId": "r1"})).await;
    assert!(errors(&drain(&mut rx_b)).is_empty());
    assert_eq!(gw.registry.current_room(&b.id).as_deref(), Some("r1"));
}

/// Room store whose membership lookup yields, so concurrent entrants
/// interleave between their checks and their subscriptions.
struct SlowRoomStore(Arc<MemoryRoomStore>);

#[async_trait]
impl RoomStore for SlowRoomStore {
    async fn get(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        self.0.get(room_id).await
    }

    async fn member_ids(&self, room_id: &str) -> Result<HashSet<String>, StoreError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.0.member_ids(room_id).await
    }
}

#[tokio::test]
async fn concurrent_entrants_cannot_share_the_last_seat() {
    let rooms = Arc::new(MemoryRoomStore::new());
    rooms.insert_room(room("r1", 1));
    let env = test_env_with(|stores| GatewayStores {
        rooms: Arc::new(SlowRoomStore(rooms)),
        ..stores
    });
    let gw = env.gateway();
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    let (b, mut rx_b) = join(&env, "u2", "Ben").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    tokio::join!(
        send(gw, &a, "room:enter", json!({"roomId": "r1"})),
        send(gw, &b, "room:enter", json!({"roomId": "r1"})),
    );

    let mut rejected = errors(&drain(&mut rx_a));
    rejected.extend(errors(&drain(&mut rx_b)));
    assert_eq!(rejected, [codes::ROOM_FULL]);
    assert_eq!(gw.registry.room_users("r1").len(), 1);
}

#[tokio::test]
async fn room_checks_run_in_order() {
    let env = test_env();
    let gw = env.gateway();
    let mut closed = room("closed", 10);
    closed.is_active = false;
    env.rooms.insert_room(closed);
    let mut locked = room("locked", 10);
    locked.password_hash = Some(common::hash_password("sesame"));
    env.rooms.insert_room(locked);

    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    drain(&mut rx_a);

    send(gw, &a, "room:enter", json!({"roomId": "nowhere"})).await;
    send(gw, &a, "room:enter", json!({"roomId": "closed"})).await;
    send(gw, &a, "room:enter", json!({"roomId": "locked"})).await;
    send(gw, &a, "room:enter", json!({"roomId": "locked", "password": "guess"})).await;
    assert_eq!(
        errors(&drain(&mut rx_a)),
        [
            codes::ROOM_NOT_FOUND,
            codes::ROOM_INACTIVE,
            codes::PASSWORD_REQUIRED,
            codes::INVALID_PASSWORD
        ]
    );
    assert!(gw.registry.current_room(&a.id).is_none());

    send(gw, &a, "room:enter", json!({"roomId": "locked", "password": "sesame"})).await;
    assert!(errors(&drain(&mut rx_a)).is_empty());
    assert_eq!(gw.registry.current_room(&a.id).as_deref(), Some("locked"));
}

#[tokio::test]
async fn entering_another_room_leaves_the_first() {
    let env = test_env();
    let gw = env.gateway();
    env.rooms.insert_room(room("r1", 10));
    env.rooms.insert_room(room("r2", 10));
    let (observer, mut rx_o) = join(&env, "u0", "Obs").await;
    let (a, _rx_a) = join(&env, "u1", "Aiko").await;
    send(gw, &observer, "room:enter", json!({"roomId": "r1"})).await;
    send(gw, &a, "room:enter", json!({"roomId": "r1"})).await;
    drain(&mut rx_o);

    send(gw, &a, "room:enter", json!({"roomId": "r2"})).await;

    let frames = drain(&mut rx_o);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "room:user_left");
    assert_eq!(frames[0].data["roomId"], "r1");
    assert_eq!(gw.registry.current_room(&a.id).as_deref(), Some("r2"));
}

#[tokio::test]
async fn leaving_a_room_not_entered_is_a_no_op() {
    let env = test_env();
    let gw = env.gateway();
    env.rooms.insert_room(room("r1", 10));
    let (observer, mut rx_o) = join(&env, "u0", "Obs").await;
    let (a, mut rx_a) = join(&env, "u1", "Aiko").await;
    send(gw, &observer, "room:enter", json!({"roomId": "r1"})).await;
    drain(&mut rx_o);
    drain(&mut rx_a);

    send(gw, &a, "room:leave", json!({"roomId": "r1"})).await;

    assert!(drain(&mut rx_o).is_empty());
    assert!(drain(&mut rx_a).is_empty());
}

// ---------------------------------------------------------------------------
// Disconnect while a handler is awaiting storage
// ---------------------------------------------------------------------------

type CloseTarget = Mutex<Option<(Arc<Gateway>, Arc<Connection>)>>;

/// Closes a chosen connection from inside the store call, the way a
/// disconnect lands while a handler is waiting on the database.
#[derive(Default)]
struct ClosingStores {
    target: CloseTarget,
    positions: MemoryPositionStore,
    rooms: MemoryRoomStore,
}

impl ClosingStores {
    fn close_during_next_call(&self, gateway: Arc<Gateway>, conn: Arc<Connection>) {
        *self.target.lock() = Some((gateway, conn));
    }

    fn fire(&self) {
        if let Some((gateway, conn)) = self.target.lock().take() {
            gateway.close(&conn);
        }
    }
}

struct ClosingPositionStore(Arc<ClosingStores>);

#[async_trait]
impl PositionStore for ClosingPositionStore {
    async fn upsert(&self, user_id: &str, position: &Position) -> Result<(), StoreError> {
        self.0.fire();
        self.0.positions.upsert(user_id, position).await
    }

    async fn read(&self, user_id: &str) -> Result<Option<Position>, StoreError> {
        self.0.positions.read(user_id).await
    }
}

struct ClosingRoomStore(Arc<ClosingStores>);

#[async_trait]
impl RoomStore for ClosingRoomStore {
    async fn get(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        self.0.rooms.get(room_id).await
    }

    async fn member_ids(&self, room_id: &str) -> Result<HashSet<String>, StoreError> {
        self.0.fire();
        self.0.rooms.member_ids(room_id).await
    }
}

fn closing_env() -> (TestEnv, Arc<ClosingStores>) {
    let closing = Arc::new(ClosingStores::default());
    let env = test_env_with(|stores| GatewayStores {
        positions: Arc::new(ClosingPositionStore(closing.clone())),
        rooms: Arc::new(ClosingRoomStore(closing.clone())),
        ..stores
    });
    (env, closing)
}

#[tokio::test]
async fn move_racing_disconnect_leaves_no_presence() {
    let (env, closing) = closing_env();
    let gw = env.gateway();
    let (a, _rx_a) = join(&env, "u1", "Aiko").await;
    let (_b, mut rx_b) = join(&env, "u2", "Ben").await;
    drain(&mut rx_b);

    closing.close_during_next_call(env.state.gateway.clone(), a.clone());
    send(gw, &a, "move", json!({"x": 10, "y": 20, "mapId": "main"})).await;

    assert!(gw.presence.get("u1").is_none());
    assert_eq!(drain_events(&mut rx_b), ["user:left"]);
}

#[tokio::test]
async fn room_enter_racing_disconnect_joins_nothing() {
    let (env, closing) = closing_env();
    let gw = env.gateway();
    closing.rooms.insert_room(room("r1", 10));
    let (observer, mut rx_o) = join(&env, "u0", "Obs").await;
    send(gw, &observer, "room:enter", json!({"roomId": "r1"})).await;
    let (a, _rx_a) = join(&env, "u1", "Aiko").await;
    drain(&mut rx_o);

    closing.close_during_next_call(env.state.gateway.clone(), a.clone());
    send(gw, &a, "room:enter", json!({"roomId": "r1"})).await;

    assert_eq!(gw.registry.room_users("r1"), HashSet::from(["u0".to_string()]));
    assert_eq!(drain_events(&mut rx_o), ["user:left"]);
}
