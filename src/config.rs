//! Application configuration
//!
//! Loaded from a TOML file at startup. Every section carries defaults, so
//! the server runs without any file at all. A handful of environment
//! variables override the file afterwards.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DEFAULT_HTTP_PORT, MAX_SILENCE_MS, PLAYLIST_NAME};
use crate::error::{Error, Result};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub session: SessionConfig,
    pub live: LiveConfig,
    pub keepalive: KeepAliveConfig,
    pub logging: LoggingConfig,
}

/// HTTP/WebSocket listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub http_port: u16,
    /// Directory served at `/` for the browser client
    pub static_dir: PathBuf,
    /// Per-connection outbound queue length
    pub outbox_capacity: usize,
    /// Hub command mailbox length
    pub mailbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            http_port: DEFAULT_HTTP_PORT,
            static_dir: PathBuf::from("public"),
            outbox_capacity: 256,
            mailbox_capacity: 1024,
        }
    }
}

/// Shared-secret login. Every listed password is equivalent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub passwords: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            passwords: vec!["password123".into(), "admin".into(), "user2024".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Answer ignored actions with `action_rejected` instead of dropping them silently
    pub report_rejections: bool,
    /// Display names are clipped to this many characters
    pub max_name_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            report_rejections: false,
            max_name_len: 48,
        }
    }
}

/// HLS mirror settings (ffmpeg)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub enabled: bool,
    pub ffmpeg_path: String,
    /// Directory holding `index.m3u8` and its segments, served at `/live`
    pub output_dir: PathBuf,
    /// Container of the chunks clients send (`-f` for the input side)
    pub input_format: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub bitrate: String,
    pub segment_seconds: u32,
    pub playlist_size: u32,
    /// Chunks buffered towards the encoder before new ones are dropped
    pub queue_capacity: usize,
    /// Time the encoder gets to flush after stdin closes
    pub shutdown_grace_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ffmpeg_path: "ffmpeg".into(),
            output_dir: PathBuf::from("live"),
            input_format: "webm".into(),
            audio_codec: "aac".into(),
            sample_rate: 48_000,
            bitrate: "96k".into(),
            segment_seconds: 2,
            playlist_size: 10,
            queue_capacity: 64,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl LiveConfig {
    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join(PLAYLIST_NAME)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Idle heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub jitter_secs: u64,
    /// Lower bound on any single delay, whatever the jitter draws
    pub min_interval_secs: u64,
    /// Duration of the silent payload
    pub silence_ms: u64,
    /// Gap between the synthetic start and end notifications
    pub end_delay_ms: u64,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            jitter_secs: 5,
            min_interval_secs: 15,
            silence_ms: 500,
            end_delay_ms: 700,
        }
    }
}

impl KeepAliveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn end_delay(&self) -> Duration {
        Duration::from_millis(self.end_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "trace", "debug", "info", "warn" or "error"
    pub level: String,
    /// "text" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    /// Falls back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Resolve the config file location.
    ///
    /// Order: explicit argument, `PTT_CONFIG`, `./config.toml`, then the
    /// platform config directory.
    pub fn locate(explicit: Option<String>) -> PathBuf {
        if let Some(path) = explicit.or_else(|| std::env::var("PTT_CONFIG").ok()) {
            return PathBuf::from(path);
        }

        let local = PathBuf::from("config.toml");
        if local.exists() {
            return local;
        }

        ProjectDirs::from("org", "ptt", "ptt-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or(local)
    }

    /// Apply environment overrides (`PORT`, `PTT_PASSWORDS`).
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.http_port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("PORT is not a valid port: {port}")))?;
        }

        if let Some(list) = lookup("PTT_PASSWORDS") {
            self.auth.passwords = list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(())
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.auth.passwords.iter().all(|p| p.is_empty()) {
            return Err(Error::Config("auth.passwords is empty; nobody could log in".into()));
        }
        if self.server.outbox_capacity == 0 || self.server.mailbox_capacity == 0 {
            return Err(Error::Config("queue capacities must be non-zero".into()));
        }
        if self.live.enabled {
            if self.live.queue_capacity == 0 {
                return Err(Error::Config("live.queue_capacity must be non-zero".into()));
            }
            if self.live.segment_seconds == 0 || self.live.playlist_size == 0 {
                return Err(Error::Config(
                    "live.segment_seconds and live.playlist_size must be non-zero".into(),
                ));
            }
        }
        if self.keepalive.min_interval_secs == 0 {
            return Err(Error::Config("keepalive.min_interval_secs must be non-zero".into()));
        }
        if self.keepalive.silence_ms > MAX_SILENCE_MS {
            return Err(Error::Config(format!(
                "keepalive.silence_ms must be at most {MAX_SILENCE_MS}"
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.server.http_port, 3000);
        assert_eq!(cfg.auth.passwords.len(), 3);
        assert_eq!(cfg.keepalive.interval(), Duration::from_secs(60));
        assert_eq!(cfg.live.playlist_path(), PathBuf::from("live/index.m3u8"));
        assert_eq!(cfg.bind_address(), "0.0.0.0:3000");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = AppConfig::from_toml(
            r#"
            [auth]
            passwords = ["hunter2"]

            [keepalive]
            interval_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(cfg.auth.passwords, vec!["hunter2".to_string()]);
        assert_eq!(cfg.keepalive.interval_secs, 30);
        assert_eq!(cfg.keepalive.jitter_secs, 5);
        assert_eq!(cfg.server.http_port, 3000);
        assert!(cfg.live.enabled);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = AppConfig::from_toml("[server]\nhttp_port = \"nope\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.server.http_port, 3000);
    }

    #[test]
    fn env_overrides_port_and_passwords() {
        let env: HashMap<&str, &str> =
            HashMap::from([("PORT", "8081"), ("PTT_PASSWORDS", "alpha, beta,,")]);
        let mut cfg = AppConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.server.http_port, 8081);
        assert_eq!(cfg.auth.passwords, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let mut cfg = AppConfig::default();
        let result = cfg.apply_overrides(|k| (k == "PORT").then(|| "http".to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn empty_password_set_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.auth.passwords.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_keepalive_floor_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.keepalive.min_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_silence_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.keepalive.silence_ms = MAX_SILENCE_MS;
        assert!(cfg.validate().is_ok());

        cfg.keepalive.silence_ms = u64::MAX;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
