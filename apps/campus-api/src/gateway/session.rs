//! Per-connection gateway session state.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use super::events::ServerFrame;
use crate::models::user::Role;

/// Identity attached to an authenticated connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub user_id: String,
    #[serde(rename = "userName")]
    pub display_name: String,
    pub role: Role,
}

/// Lifecycle of a registered connection. Only moves forward.
///
/// Pending authentication happens in the server task before a `Connection`
/// exists, so every `Connection` starts out authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Authenticated = 0,
    Closed = 1,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Authenticated,
            _ => Self::Closed,
        }
    }
}

/// Why an outbound frame was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    Closed,
    Full,
}

/// An authenticated connection as seen by the registry and router.
///
/// The socket itself lives in the server task; this side only holds the
/// sending half of the connection's outbound queue.
pub struct Connection {
    pub id: String,
    pub user: SessionUser,
    state: AtomicU8,
    outbound: mpsc::Sender<Arc<ServerFrame>>,
}

impl Connection {
    pub fn new(id: String, user: SessionUser, outbound: mpsc::Sender<Arc<ServerFrame>>) -> Self {
        Self {
            id,
            user,
            state: AtomicU8::new(ConnectionState::Authenticated as u8),
            outbound,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    /// Transition to `Closed`. Returns `true` only for the caller that
    /// performed the transition.
    pub fn mark_closed(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Authenticated as u8,
                ConnectionState::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: Arc<ServerFrame>) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(conn_id = %self.id, "outbound queue full, dropping event");
                SendError::Full
            }
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}
