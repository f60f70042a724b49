//! Host-facing client.

use std::sync::Arc;

use livepush_core::LiveEvent;
use livepush_settings::ClientSettings;
use tokio::sync::broadcast;
use tracing::info;

use crate::connection::ConnectionController;
use crate::error::{ClientError, Result};
use crate::state::ConnectionState;

/// Counters observable by the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Reconnect sequences started.
    pub reconnect_triggers: u64,
    /// Reloads performed.
    pub reloads: u64,
    /// Attempt number of the current or last reconnect sequence.
    pub attempt: u32,
    /// Whether reconnecting gave up.
    pub exhausted: bool,
}

/// Open-push client.
///
/// Cloning is cheap; every clone drives the same connection.
#[derive(Clone)]
pub struct LivePushClient {
    inner: Arc<ConnectionController>,
}

impl LivePushClient {
    /// Client for `settings`. Call [`start`](Self::start) to connect.
    pub fn new(settings: ClientSettings) -> Result<Self> {
        Ok(Self {
            inner: ConnectionController::new(settings, String::new())?,
        })
    }

    /// Open a session for `code` and connect.
    ///
    /// Fails only when the session cannot be started; connection failures
    /// after that are retried in the background.
    pub async fn start(&self, code: &str) -> Result<()> {
        if self.inner.is_shutting_down() {
            return Err(ClientError::ShutdownInProgress);
        }
        if self.inner.state() == ConnectionState::Disconnected {
            self.inner.session().set_code(code);
        }
        self.inner.start().await
    }

    /// End the session and stop. The client cannot be restarted.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Reconnect now with a fresh session, skipping backoff.
    pub async fn reload(&self) {
        self.inner.reload().await;
    }

    /// Replace the identity code used by the next session start.
    pub fn set_code(&self, code: &str) {
        info!("identity code updated");
        self.inner.session().set_code(code);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// One-line status for display.
    pub fn status(&self) -> String {
        let engine = self.inner.engine();
        match self.inner.state() {
            ConnectionState::Connected => match self.inner.session().game_id() {
                Some(game_id) => format!("connected (game {game_id})"),
                None => "connected".to_string(),
            },
            ConnectionState::Reconnecting => format!(
                "reconnecting (attempt {}/{})",
                engine.attempts(),
                engine.policy().max_attempts
            ),
            ConnectionState::Disconnected => match self.inner.failure() {
                Some(reason) => format!("disconnected: {reason}"),
                None => "disconnected".to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ClientStats {
        let engine = self.inner.engine();
        ClientStats {
            reconnect_triggers: engine.trigger_count(),
            reloads: self.inner.reload_count(),
            attempt: engine.attempts(),
            exhausted: engine.is_exhausted(),
        }
    }

    /// Receiver for decoded events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.inner.subscribe()
    }
}
