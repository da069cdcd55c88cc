use crate::error::{Result, SelfTestError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default address of the playback server hosting `/jsonrpc.js`
pub const DEFAULT_SERVER_URL: &str = "http://localhost:9000/";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the helper app (e.g. "http://127.0.0.1:24879/")
    pub helper_url: Option<String>,

    /// Base URL of the playback server receiving player commands
    pub server_url: String,

    /// Player to stream to; empty skips the player streaming step
    pub player_id: String,

    /// Time allowed for the helper to answer the first status request (ms)
    pub connect_timeout_ms: u64,

    /// Time allowed for the toplist metadata request (ms)
    pub metadata_timeout_ms: u64,

    /// Time allowed for the login status request (ms)
    pub login_timeout_ms: u64,

    /// Time allowed before the first streaming progress update (ms)
    pub stream_start_timeout_ms: u64,

    /// Longest gap between streaming progress updates (ms)
    pub stall_timeout_ms: u64,

    /// Time allowed for the player status query (ms)
    pub rpc_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            helper_url: None,
            server_url: DEFAULT_SERVER_URL.to_string(),
            player_id: String::new(),
            connect_timeout_ms: 5000,
            metadata_timeout_ms: 15000,
            login_timeout_ms: 5000,
            stream_start_timeout_ms: 10000,
            stall_timeout_ms: 5000,
            rpc_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Load a YAML config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| SelfTestError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| SelfTestError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validated helper URL, always ending with '/'
    pub fn helper_base(&self) -> Result<String> {
        let url = self
            .helper_url
            .as_deref()
            .ok_or(SelfTestError::MissingHelperUrl)?;
        normalize_base_url(url)
    }

    /// Validated server URL, always ending with '/'
    pub fn server_base(&self) -> Result<String> {
        normalize_base_url(&self.server_url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    pub fn stream_start_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_start_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Check that `url` is an absolute http(s) URL and append a trailing slash,
/// so endpoint names can be concatenated onto it.
pub fn normalize_base_url(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url.trim()).map_err(|e| SelfTestError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SelfTestError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    let mut base = parsed.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(base)
}
