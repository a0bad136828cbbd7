use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub aria2: Aria2Config,
    #[serde(default)]
    pub qbittorrent: QbConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub trackers: TrackerConfig,
}

/// aria2 RPC engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Aria2Config {
    #[serde(default = "default_aria2_host")]
    pub host: String,
    #[serde(default = "default_aria2_port")]
    pub port: u16,
    #[serde(default = "default_aria2_secret")]
    pub secret: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

impl Aria2Config {
    /// JSON-RPC endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/jsonrpc", self.host.trim_end_matches('/'), self.port)
    }
}

impl Default for Aria2Config {
    fn default() -> Self {
        Self {
            host: default_aria2_host(),
            port: default_aria2_port(),
            secret: default_aria2_secret(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_aria2_host() -> String {
    "http://localhost".to_string()
}

fn default_aria2_port() -> u16 {
    6800
}

fn default_aria2_secret() -> String {
    "testing123".to_string()
}

/// qBittorrent WebUI configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QbConfig {
    #[serde(default = "default_qb_url")]
    pub url: String,
    /// WebUI credentials; login is skipped when no username is set
    /// (local instances with authentication bypass enabled).
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

impl Default for QbConfig {
    fn default() -> Self {
        Self {
            url: default_qb_url(),
            username: None,
            password: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_qb_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_timeout() -> u32 {
    30
}

/// Admission queue configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Maximum concurrently running downloads (unlimited when absent).
    #[serde(default)]
    pub max_downloads: Option<usize>,
    /// Maximum concurrently running uploads (unlimited when absent).
    #[serde(default)]
    pub max_uploads: Option<usize>,
}

/// Tracker-list refresh configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
    /// URLs of newline-separated announce-list sources.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Hours between refreshes.
    #[serde(default = "default_refresh_interval_hours")]
    pub refresh_interval_hours: u32,
    /// Delay before the first refresh after startup, in seconds.
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            refresh_interval_hours: default_refresh_interval_hours(),
            initial_delay_secs: default_initial_delay_secs(),
        }
    }
}

fn default_refresh_interval_hours() -> u32 {
    12
}

fn default_initial_delay_secs() -> u32 {
    60
}
