use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration from tasknest.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_events_path")]
    pub events_path: String,
    #[serde(default = "default_socket_namespace")]
    pub socket_namespace: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Identity sent when joining the socket namespace
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            base_url: default_base_url(),
            events_path: default_events_path(),
            socket_namespace: default_socket_namespace(),
            request_timeout_secs: default_request_timeout_secs(),
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Silence longer than this on the event stream counts as a dead connection
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Reconnect attempts before giving up and reporting an error
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_true")]
    pub sse: bool,
    #[serde(default = "default_true")]
    pub socket: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        RealtimeConfig {
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            sse: true,
            socket: true,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Join `path` onto the base URL without doubling the slash
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl RealtimeConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// What to do with an optimistic change whose persistence call failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackPolicy {
    /// Leave the optimistic value until a corrective event arrives
    #[default]
    Keep,
    /// Restore the tasks the intent touched to their prior values
    Revert,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub rollback: RollbackPolicy,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_events_path() -> String {
    "/events".to_string()
}

fn default_socket_namespace() -> String {
    "/todo".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}
