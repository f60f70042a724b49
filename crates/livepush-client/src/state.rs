//! Connection state machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of the push connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// No link and no reconnect in progress.
    Disconnected = 0,
    /// Opening the socket.
    Connecting = 1,
    /// Socket open, waiting for the auth reply.
    Authenticating = 2,
    /// Authenticated and receiving events.
    Connected = 3,
    /// Link lost; the reconnect engine is working.
    Reconnecting = 4,
    /// Closing for good.
    ShuttingDown = 5,
}

impl ConnectionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Authenticating,
            3 => Self::Connected,
            4 => Self::Reconnecting,
            5 => Self::ShuttingDown,
            _ => Self::Disconnected,
        }
    }

    /// Lowercase name, as shown in status lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::ShuttingDown => "shutting down",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// [`ConnectionState`] in a single atomic.
///
/// `ShuttingDown` is terminal: once stored, no other state replaces it.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    /// Cell holding `state`.
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Current state.
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store `state` unless shutting down. Returns whether it was stored.
    pub fn set(&self, state: ConnectionState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ConnectionState::ShuttingDown as u8).then_some(state as u8)
            })
            .is_ok()
    }

    /// Move from `from` to `to` only if the current state is `from`.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        from != ConnectionState::ShuttingDown
            && self
                .0
                .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}
