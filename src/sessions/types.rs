use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::app::NetworkToolsConfig;

/// Lifecycle of one iperf3 server session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Port reserved, helper not yet spawned
    Starting,
    Running,
    /// Termination in progress
    Stopping,
    Stopped,
}

impl SessionState {
    /// Whether the session still holds its port
    pub fn is_live(self) -> bool {
        !matches!(self, SessionState::Stopped)
    }
}

/// Returned to the caller that started a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStart {
    pub port: u16,
    pub duration_secs: u64,
    pub connection_hint_v4: String,
    pub connection_hint_v6: String,
}

impl SessionStart {
    pub(crate) fn new(port: u16, duration: Duration) -> Self {
        Self {
            port,
            duration_secs: duration.as_secs(),
            connection_hint_v4: format!("iperf3 -c <server_ip> -p {}", port),
            connection_hint_v6: format!("iperf3 -c <server_ipv6> -p {}", port),
        }
    }
}

/// Read-only description of a live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub port: u16,
    pub state: SessionState,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
}

/// Knobs for the session manager, derived from `[network_tools]`
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub binary: String,
    /// Inclusive port range
    pub port_range: (u16, u16),
    pub port_attempts: u32,
    pub stop_timeout: Duration,
    pub default_duration: Duration,
}

impl From<&NetworkToolsConfig> for SessionSettings {
    fn from(config: &NetworkToolsConfig) -> Self {
        Self {
            binary: config.iperf3_binary.clone(),
            port_range: config.iperf3_port_range,
            port_attempts: config.port_attempts,
            stop_timeout: config.stop_timeout(),
            default_duration: config.session_duration(),
        }
    }
}
