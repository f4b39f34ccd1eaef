//! Session bookkeeping for the single live connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the bridge's session.
///
/// ```text
/// Disconnected -> Connecting -> Authenticated -> Active -> Stale
///                                                  ^         |
///                                                  +--(deep recheck ok)
///                        Disconnected <--(deep recheck fails)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticated,
    Active,
    Stale,
}

impl SessionState {
    /// Whether a shell is believed to be attached.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Authenticated | Self::Active | Self::Stale)
    }
}

/// The single live connection to the intermediary host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Host the session is attached to.
    pub host: String,

    /// SSH port.
    pub port: u16,

    /// Identity file or other credentials reference, never the secret itself.
    pub credentials: Option<String>,

    /// When authentication completed.
    pub authenticated_at: DateTime<Utc>,

    /// Last successful command.
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Record a freshly authenticated session.
    pub fn new(host: impl Into<String>, port: u16, credentials: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            host: host.into(),
            port,
            credentials,
            authenticated_at: now,
            last_activity: now,
        }
    }

    /// Mark the session as used just now.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Seconds since the last successful command.
    pub fn idle_secs(&self) -> u64 {
        let idle = Utc::now() - self.last_activity;
        u64::try_from(idle.num_seconds()).unwrap_or(0)
    }
}
