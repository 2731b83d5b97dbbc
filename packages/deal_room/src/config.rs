use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Session config (figment-deserialized from defaults / dealroom.toml / env)
// =============================================================================
//
// Two equivalent ways to override:
//
//   dealroom.toml:   [reconnect]
//                    cap_ms = 15000
//
//   env var:         DEALROOM_RECONNECT__CAP_MS=15000   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Realtime channel endpoint (ws:// or wss://).
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,
    /// HTTP collaborator base url (read markers, presence snapshots,
    /// workflow refetches).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Join/send acknowledgment window in seconds; past it the message or
    /// action is marked failed rather than hanging.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Minimum spacing between presence snapshot refetches per session.
    #[serde(default = "default_snapshot_min_interval_secs")]
    pub snapshot_min_interval_secs: u64,
    /// Outbound command queue depth.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// Reconnect backoff tunables (lives under `[reconnect]` in dealroom.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub cap_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            realtime_url: default_realtime_url(),
            api_base_url: default_api_base_url(),
            reconnect: ReconnectConfig::default(),
            ack_timeout_secs: default_ack_timeout_secs(),
            snapshot_min_interval_secs: default_snapshot_min_interval_secs(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl SessionConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn snapshot_min_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_min_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.reconnect.base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect.cap_ms)
    }
}

fn default_realtime_url() -> String {
    "ws://127.0.0.1:8080/realtime".to_string()
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_ack_timeout_secs() -> u64 {
    10
}

fn default_snapshot_min_interval_secs() -> u64 {
    5
}

fn default_outbound_queue() -> usize {
    256
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

/// Load config by layering struct defaults, `dealroom.toml` in `data_dir`,
/// and `DEALROOM_`-prefixed env vars (double underscore for section nesting).
pub fn load_config(data_dir: &Path) -> Result<SessionConfig> {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(SessionConfig::default()))
        .merge(Toml::file(data_dir.join("dealroom.toml")))
        .merge(Env::prefixed("DEALROOM_").split("__"))
        .extract()
        .context("failed to load session config")
}
