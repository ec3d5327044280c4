#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use argon2::Argon2;
use axum::Router;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHasher, SaltString};
use tokio::sync::mpsc;

use campus_api::auth::jwt::{AccessClaims, CredentialVerifier, JwtVerifier};
use campus_api::config::Config;
use campus_api::gateway::events::ServerFrame;
use campus_api::gateway::{Gateway, GatewaySettings, GatewayStores};
use campus_api::models::room::Room;
use campus_api::models::user::{DirectoryUser, Role};
use campus_api::stores::memory::{
    MemoryMessageStore, MemoryPositionStore, MemoryRoomStore, MemoryUserDirectory,
};
use campus_api::AppState;

pub const JWT_SECRET: &str = "campus-test-secret";

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused/campus_test".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        db_pool_size: 1,
        port: 0,
        auth_timeout_secs: 2,
        ping_interval_secs: 25,
        spawn_x: 400.0,
        spawn_y: 300.0,
        spawn_map: "main".to_string(),
        chat_max_length: 1000,
        outbound_buffer: 64,
        worker_id: 0,
    }
}

/// In-memory application state plus handles to the stores behind it.
pub struct TestEnv {
    pub state: AppState,
    pub users: Arc<MemoryUserDirectory>,
    pub positions: Arc<MemoryPositionStore>,
    pub messages: Arc<MemoryMessageStore>,
    pub rooms: Arc<MemoryRoomStore>,
}

impl TestEnv {
    pub fn gateway(&self) -> &Gateway {
        &self.state.gateway
    }

    /// Add an active student to the directory.
    pub fn add_user(&self, user_id: &str, name: &str) {
        self.users.insert(DirectoryUser {
            id: user_id.to_string(),
            name: name.to_string(),
            role: Role::Student,
            is_active: true,
        });
    }
}

pub fn test_env() -> TestEnv {
    test_env_with(|stores| stores)
}

/// Build a test environment, letting the caller swap any gateway store
/// (for example one that always fails).
pub fn test_env_with(customize: impl FnOnce(GatewayStores) -> GatewayStores) -> TestEnv {
    test_env_configured(test_config(), customize)
}

pub fn test_env_configured(
    config: Config,
    customize: impl FnOnce(GatewayStores) -> GatewayStores,
) -> TestEnv {
    let users = Arc::new(MemoryUserDirectory::new());
    let positions = Arc::new(MemoryPositionStore::new());
    let messages = Arc::new(MemoryMessageStore::new());
    let rooms = Arc::new(MemoryRoomStore::new());

    let verifier: Arc<dyn CredentialVerifier> =
        Arc::new(JwtVerifier::new(&config.jwt_secret, users.clone()));

    let stores = customize(GatewayStores {
        positions: positions.clone(),
        messages: messages.clone(),
        rooms: rooms.clone(),
    });
    let http_messages = stores.messages.clone();

    let gateway = Arc::new(Gateway::new(
        verifier.clone(),
        stores,
        GatewaySettings::from_config(&config),
    ));

    let state = AppState {
        config: Arc::new(config),
        gateway,
        verifier,
        messages: http_messages,
    };

    TestEnv {
        state,
        users,
        positions,
        messages,
        rooms,
    }
}

pub fn mint_token(user_id: &str, name: &str) -> String {
    let now = Utc::now().timestamp();
    sign(user_id, name, now, now + 3600)
}

pub fn mint_expired_token(user_id: &str, name: &str) -> String {
    let now = Utc::now().timestamp();
    sign(user_id, name, now - 7200, now - 3600)
}

fn sign(user_id: &str, name: &str, iat: i64, exp: i64) -> String {
    let claims = AccessClaims {
        id: user_id.to_string(),
        email: format!("{user_id}@school.test"),
        name: name.to_string(),
        role: "STUDENT".to_string(),
        iat,
        exp,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("mint test token")
}

pub fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("hash password")
        .to_string()
}

pub fn room(id: &str, capacity: i32) -> Room {
    Room {
        id: id.to_string(),
        name: format!("Room {id}"),
        type_: "PUBLIC".to_string(),
        capacity,
        password_hash: None,
        is_active: true,
        updated_at: Utc::now(),
    }
}

/// Everything currently queued for a connection.
pub fn drain(rx: &mut mpsc::Receiver<Arc<ServerFrame>>) -> Vec<Arc<ServerFrame>> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

/// Names of everything currently queued for a connection.
pub fn drain_events(rx: &mut mpsc::Receiver<Arc<ServerFrame>>) -> Vec<String> {
    drain(rx).iter().map(|f| f.event.clone()).collect()
}

/// Build the full application router wired to the test state.
pub fn test_app(state: &AppState) -> Router {
    campus_api::routes::router().with_state(state.clone())
}

/// Start an actual TCP server for WebSocket testing.
pub async fn start_server(state: &AppState) -> SocketAddr {
    let app = test_app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    addr
}
