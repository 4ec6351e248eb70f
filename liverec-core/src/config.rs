use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub room: RoomConfig,
    pub recorder: RecorderConfig,
    pub protocol: ProtocolConfig,
    pub tools: ToolsConfig,
    pub notify: NotifyConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Room page URL or bare room number
    pub url: String,
    /// Browser cookie export holding `SESSDATA`
    pub cookie_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub save_dir: String,
    /// File name prefix, usually the streamer's name
    pub prefix: String,
    /// Pause between sessions and HTTP live-status poll interval
    pub check_interval_seconds: u64,
    /// Silence threshold: no valid segment for this long ends the session
    pub no_stream_timeout_seconds: u64,
    /// Attempts per capture or mux step before the unit is abandoned
    pub capture_attempts: u32,
    pub retry_delay_seconds: u64,
    /// Segments at or below this size are discarded
    pub min_segment_bytes: u64,
    /// End the session as soon as the room reports `PREPARING`
    pub end_on_preparing: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            save_dir: String::new(),
            prefix: String::new(),
            check_interval_seconds: 10,
            no_stream_timeout_seconds: 600,
            capture_attempts: 3,
            retry_delay_seconds: 5,
            min_segment_bytes: 1_048_576,
            end_on_preparing: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Use the danmaku socket; when off, live detection is HTTP polling only
    pub enabled: bool,
    pub heartbeat_interval_seconds: u64,
    pub reconnect_delay_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval_seconds: 30,
            reconnect_delay_seconds: 5,
            connect_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub streamlink_path: String,
    pub ffmpeg_path: String,
    pub quality: String,
    pub retry_streams: u32,
    pub retry_max: u32,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            streamlink_path: "streamlink".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            quality: "best".to_string(),
            retry_streams: 5,
            retry_max: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Protocol client timings as runtime durations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimings {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientTimings {
    fn default() -> Self {
        Self::from(&ProtocolConfig::default())
    }
}

impl From<&ProtocolConfig> for ClientTimings {
    fn from(config: &ProtocolConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_seconds),
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds),
        }
    }
}

/// Session orchestration settings as runtime values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub save_dir: PathBuf,
    pub prefix: String,
    pub no_stream_timeout: Duration,
    pub capture_attempts: u32,
    pub retry_delay: Duration,
    pub min_segment_bytes: u64,
    pub end_on_preparing: bool,
}

impl From<&RecorderConfig> for SessionSettings {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            save_dir: PathBuf::from(&config.save_dir),
            prefix: config.prefix.clone(),
            no_stream_timeout: Duration::from_secs(config.no_stream_timeout_seconds),
            capture_attempts: config.capture_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            min_segment_bytes: config.min_segment_bytes,
            end_on_preparing: config.end_on_preparing,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (LIVEREC_RECORDER__SAVE_DIR, etc.)
        builder = builder.add_source(
            Environment::with_prefix("LIVEREC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for settings the recorder cannot run without.
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.room.url.trim().is_empty() {
            errors.push("room.url must be set".to_string());
        }
        if self.recorder.save_dir.trim().is_empty() {
            errors.push("recorder.save_dir must be set".to_string());
        }
        if self.recorder.check_interval_seconds == 0 {
            errors.push("recorder.check_interval_seconds must be greater than 0".to_string());
        }
        if self.recorder.no_stream_timeout_seconds == 0 {
            errors.push("recorder.no_stream_timeout_seconds must be greater than 0".to_string());
        }
        if self.recorder.capture_attempts == 0 {
            errors.push("recorder.capture_attempts must be at least 1".to_string());
        }
        if self.protocol.heartbeat_interval_seconds == 0 {
            errors.push("protocol.heartbeat_interval_seconds must be greater than 0".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Poll interval for HTTP live-status checks and the pause between sessions
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.recorder.check_interval_seconds)
    }

    /// Telegram credentials, when both halves are configured
    #[must_use]
    pub fn telegram(&self) -> Option<(&str, &str)> {
        match (&self.notify.telegram_bot_token, &self.notify.telegram_chat_id) {
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty() => {
                Some((token.as_str(), chat.as_str()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.recorder.check_interval_seconds, 10);
        assert_eq!(config.recorder.no_stream_timeout_seconds, 600);
        assert_eq!(config.recorder.capture_attempts, 3);
        assert_eq!(config.recorder.min_segment_bytes, 1024 * 1024);
        assert!(!config.recorder.end_on_preparing);
        assert!(config.protocol.enabled);
        assert_eq!(config.tools.quality, "best");
        assert!(config.telegram().is_none());
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let mut config = Config::default();
        config.recorder.capture_attempts = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("room.url")));
        assert!(errors.iter().any(|e| e.contains("save_dir")));
        assert!(errors.iter().any(|e| e.contains("capture_attempts")));

        config.room.url = "https://live.bilibili.com/299".to_string();
        config.recorder.save_dir = "/srv/rec".to_string();
        config.recorder.capture_attempts = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "room:\n  url: \"299\"\nrecorder:\n  save_dir: /tmp/rec\n  no_stream_timeout_seconds: 120\nnotify:\n  telegram_bot_token: abc\n  telegram_chat_id: \"42\"\n",
        )
        .unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.room.url, "299");
        assert_eq!(config.recorder.save_dir, "/tmp/rec");
        assert_eq!(config.recorder.no_stream_timeout_seconds, 120);
        // untouched sections keep their defaults
        assert_eq!(config.recorder.retry_delay_seconds, 5);
        assert_eq!(config.protocol.heartbeat_interval_seconds, 30);
        assert_eq!(config.telegram(), Some(("abc", "42")));
    }

    #[test]
    fn test_runtime_conversions() {
        let config = Config::default();
        let timings = ClientTimings::from(&config.protocol);
        assert_eq!(timings.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(timings.reconnect_delay, Duration::from_secs(5));

        let settings = SessionSettings::from(&config.recorder);
        assert_eq!(settings.no_stream_timeout, Duration::from_secs(600));
        assert_eq!(settings.retry_delay, Duration::from_secs(5));
        assert_eq!(settings.capture_attempts, 3);
    }
}
