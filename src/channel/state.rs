//! Connection state and the status view published to consumers.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::events::DataSource;

/// Connection state, owned by the channel actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Push is down; a reconnect is scheduled and the fallback poller runs.
    Reconnecting,
    /// Push is down and polled data is flowing.
    Degraded,
    /// Reconnect attempts exhausted. Only `retry()` leaves this state.
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Error => "error",
        }
    }

    /// Push is unavailable and data comes from polling, if at all.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            ConnectionState::Reconnecting | ConnectionState::Degraded | ConnectionState::Error
        )
    }

    /// States from which an operator `retry()` is honoured.
    pub fn accepts_retry(&self) -> bool {
        matches!(
            self,
            ConnectionState::Error
                | ConnectionState::Reconnecting
                | ConnectionState::Degraded
                | ConnectionState::Disconnected
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a UI needs to render the connection indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub polling: bool,
    pub last_source: Option<DataSource>,
    /// Age of the cached polled snapshot.
    pub cache_age: Option<Duration>,
}

impl ChannelStatus {
    pub(crate) fn initial() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            polling: false,
            last_source: None,
            cache_age: None,
        }
    }
}
