use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use campus_common::SnowflakeGenerator;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use campus_api::auth::jwt::{CredentialVerifier, JwtVerifier};
use campus_api::config::Config;
use campus_api::gateway::{Gateway, GatewaySettings, GatewayStores};
use campus_api::stores::postgres::{PgMessageStore, PgPositionStore, PgRoomStore, PgUserDirectory};
use campus_api::stores::MessageStore;
use campus_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let db = match campus_api::db::pool::connect(&config.database_url, config.db_pool_size) {
        Ok(db) => db,
        Err(err) => {
            tracing::error!(?err, "failed to build database pool");
            std::process::exit(1);
        }
    };

    let snowflake = Arc::new(SnowflakeGenerator::new(config.worker_id));
    let directory = Arc::new(PgUserDirectory::new(db.clone()));
    let verifier: Arc<dyn CredentialVerifier> =
        Arc::new(JwtVerifier::new(&config.jwt_secret, directory));
    let messages: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(db.clone(), snowflake));

    let stores = GatewayStores {
        positions: Arc::new(PgPositionStore::new(db.clone())),
        messages: messages.clone(),
        rooms: Arc::new(PgRoomStore::new(db)),
    };
    let gateway = Arc::new(Gateway::new(
        verifier.clone(),
        stores,
        GatewaySettings::from_config(&config),
    ));

    tracing::info!(
        spawn_map = %config.spawn_map,
        auth_timeout_secs = config.auth_timeout_secs,
        ping_interval_secs = config.ping_interval_secs,
        "campus-api configured"
    );

    let state = AppState {
        config: Arc::new(config),
        gateway,
        verifier,
        messages,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(campus_api::routes::router())
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", campus_api::routes::ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(?err, %addr, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "campus-api listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(?err, "server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
