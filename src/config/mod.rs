use crate::session::FlushTimings;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "LIVE_BRIDGE_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub gifts: GiftConfig,
    pub likes: LikeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Relay feed base URL; the stream id is appended as the last path segment.
    pub feed_url: String,
    pub event_buffer: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            feed_url: "ws://127.0.0.1:8081/live".to_string(),
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GiftConfig {
    pub flush_tick_ms: u64,
    pub idle_flush_ms: u64,
}

impl Default for GiftConfig {
    fn default() -> Self {
        Self {
            flush_tick_ms: 1000,
            idle_flush_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LikeConfig {
    pub flush_tick_ms: u64,
    pub window_ms: u64,
}

impl Default for LikeConfig {
    fn default() -> Self {
        Self {
            flush_tick_ms: 2000,
            window_ms: 5000,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&raw) {
                Ok(file_config) => config = file_config,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), error = %err, "ignoring unreadable config file");
                }
            }
        }

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var(format!("{}SERVER_HOST", ENV_PREFIX)) {
            self.server.host = val;
        }
        if let Ok(val) = env::var(format!("{}SERVER_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var(format!("{}FEED_URL", ENV_PREFIX)) {
            self.upstream.feed_url = val;
        }
        if let Ok(val) = env::var(format!("{}EVENT_BUFFER", ENV_PREFIX)) {
            if let Ok(size) = val.parse() {
                self.upstream.event_buffer = size;
            }
        }

        if let Ok(val) = env::var(format!("{}GIFT_IDLE_FLUSH_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.gifts.idle_flush_ms = ms;
            }
        }
        if let Ok(val) = env::var(format!("{}LIKE_WINDOW_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.likes.window_ms = ms;
            }
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.server.port == 0 {
            return Err("server.port must be non-zero".into());
        }
        if self.server.host.trim().is_empty() {
            return Err("server.host must be set".into());
        }
        if self.upstream.feed_url.trim().is_empty() {
            return Err("upstream.feed_url must be set".into());
        }
        if self.upstream.event_buffer == 0 {
            return Err("upstream.event_buffer must be non-zero".into());
        }
        if self.gifts.flush_tick_ms == 0 || self.gifts.idle_flush_ms == 0 {
            return Err("gifts.flush_tick_ms and gifts.idle_flush_ms must be non-zero".into());
        }
        if self.likes.flush_tick_ms == 0 || self.likes.window_ms == 0 {
            return Err("likes.flush_tick_ms and likes.window_ms must be non-zero".into());
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(format!("{}:{}", self.server.host.trim(), self.server.port).parse()?)
    }

    pub fn flush_timings(&self) -> FlushTimings {
        FlushTimings {
            gift_tick: Duration::from_millis(self.gifts.flush_tick_ms),
            gift_idle: Duration::from_millis(self.gifts.idle_flush_ms),
            like_tick: Duration::from_millis(self.likes.flush_tick_ms),
            like_window: Duration::from_millis(self.likes.window_ms),
        }
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    PathBuf::from(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = Config::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        parsed.validate().unwrap();
    }

    #[test]
    fn defaults_match_flush_cadence() {
        assert_eq!(Config::default().flush_timings(), FlushTimings::default());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let cfg: Config = toml::from_str("[server]\nport = 9001\n").unwrap();
        assert_eq!(cfg.server.port, 9001);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.likes.window_ms, 5000);
        assert_eq!(cfg.listen_addr().unwrap().port(), 9001);
    }

    #[test]
    fn validate_rejects_zero_port_and_empty_feed() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        assert!(cfg.validate().is_err());
        cfg.server.port = 8080;
        cfg.upstream.feed_url = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let mut cfg = Config::default();
        cfg.gifts.idle_flush_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.likes.flush_tick_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn write_default_refuses_to_overwrite() {
        let dir = std::env::temp_dir().join(format!("live-bridge-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");
        Config::write_default(&path).unwrap();
        assert!(Config::write_default(&path).is_err());
        let written: Config = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        written.validate().unwrap();
        let _ = fs::remove_dir_all(dir);
    }
}
