pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;
pub mod stores;

use std::sync::Arc;

use auth::jwt::CredentialVerifier;
use config::Config;
use gateway::Gateway;
use stores::MessageStore;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gateway: Arc<Gateway>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub messages: Arc<dyn MessageStore>,
}
