//! Configuration system.
//!
//! Loads realm configuration from JSON strings (file IO left to the app).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::{SessionConfig, DEFAULT_RECV_IV, DEFAULT_SEND_IV, MAX_FRAME_LEN};

/// Root configuration for a realm server. Version and IVs must match what
/// the peer negotiated out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmConfig {
    /// Server listen address, e.g. `127.0.0.1:8484`.
    pub server_addr: String,
    /// Protocol version both peers must share.
    pub version: u16,
    #[serde(default = "default_send_iv")]
    pub send_iv: [u8; 4],
    #[serde(default = "default_recv_iv")]
    pub recv_iv: [u8; 4],
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Seconds of silence before an idle session is disconnected.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_send_iv() -> [u8; 4] {
    DEFAULT_SEND_IV
}

fn default_recv_iv() -> [u8; 4] {
    DEFAULT_RECV_IV
}

fn default_max_frame_len() -> usize {
    MAX_FRAME_LEN
}

fn default_idle_timeout_secs() -> u64 {
    300
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8484".to_string(),
            version: 1,
            send_iv: default_send_iv(),
            recv_iv: default_recv_iv(),
            max_frame_len: default_max_frame_len(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl RealmConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Projection handed to each accepted session's transport.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            version: self.version,
            send_iv: self.send_iv,
            recv_iv: self.recv_iv,
            max_frame_len: self.max_frame_len,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}
