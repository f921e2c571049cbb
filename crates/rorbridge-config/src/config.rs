//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name inside the config directory.
pub const CONFIG_FILE: &str = "config.ron";

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Game server to join.
    pub server: ServerConfig,
    /// Identity the bot logs in with.
    pub bot: BotConfig,
    /// Wire-level settings.
    pub protocol: ProtocolConfig,
    /// Keepalive cadence.
    pub heartbeat: HeartbeatConfig,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Chat relay behaviour.
    pub chat: ChatConfig,
    /// Per-source flood limits.
    pub rate_limit: RateLimitConfig,
    /// Rotating in-game announcements.
    pub announcements: AnnouncementsConfig,
    /// Logging and development settings.
    pub debug: DebugConfig,
}

/// Game server address and password.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Server password, empty for none.
    pub password: String,
}

impl ServerConfig {
    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Bot identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    /// In-game name.
    pub username: String,
    /// Multiplayer portal token, empty for a guest login.
    pub user_token: String,
    /// Language tag reported to the server.
    pub language: String,
}

/// Frame-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest payload accepted or sent, in bytes.
    pub max_frame_size: u32,
    /// Frames carry a CRC32 trailer.
    pub checksum: bool,
    /// Skip frames with unknown type codes instead of dropping the connection.
    pub ignore_unknown_types: bool,
    /// Limit for the HELLO/WELCOME exchange, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Limit for the goodbye on disconnect, in milliseconds.
    pub disconnect_timeout_ms: u64,
}

/// Keepalive settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Time between keepalive frames, in milliseconds.
    pub interval_ms: u64,
    /// Silence from the server after which the connection is dead, in milliseconds.
    pub timeout_ms: u64,
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Upper bound on the delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Attempts before giving up. `None` retries forever at the cap.
    pub max_attempts: Option<u32>,
    /// Random extra delay, as a fraction of the base delay.
    pub jitter: f64,
}

/// Chat relay settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    /// Bridged chat-platform channel.
    pub channel: String,
    /// Longest relayed line, in characters.
    pub max_relay_len: usize,
    /// Prefix of platform commands.
    pub command_prefix: char,
    /// Prefix of in-game bot commands.
    pub game_command_prefix: char,
    /// Relayed lines remembered per player for echo suppression.
    pub dedup_depth: usize,
    /// How long a relayed line suppresses repeats, in milliseconds.
    pub dedup_window_ms: u64,
    /// Post connection status changes in the channel.
    pub announce_lifecycle: bool,
}

/// Token-bucket settings, applied per source in each direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Burst size.
    pub capacity: u32,
    /// Tokens per second.
    pub refill_rate: f64,
    /// Messages held per source once the bucket is empty.
    pub queue_depth: usize,
}

/// Rotating announcements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnnouncementsConfig {
    pub enabled: bool,
    /// Time between announcements, in seconds.
    pub interval_secs: u64,
    pub messages: Vec<String>,
    /// RoR colour code put in front of each announcement.
    pub colour: String,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Also write JSON logs to the log directory.
    pub file_logging: bool,
    /// Log directory; the platform data directory when unset.
    pub log_dir: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12000,
            password: String::new(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            username: "RoR Bridge".to_string(),
            user_token: String::new(),
            language: "en_US".to_string(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 8192,
            checksum: true,
            ignore_unknown_types: false,
            handshake_timeout_ms: 10_000,
            disconnect_timeout_ms: 2_000,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            timeout_ms: 30_000,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            max_attempts: Some(20),
            jitter: 0.25,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            channel: "ror".to_string(),
            max_relay_len: 400,
            command_prefix: '/',
            game_command_prefix: '>',
            dedup_depth: 5,
            dedup_window_ms: 10_000,
            announce_lifecycle: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            refill_rate: 1.0,
            queue_depth: 10,
        }
    }
}

impl Default for AnnouncementsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 300,
            messages: Vec::new(),
            colour: "#FFFF00".to_string(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            file_logging: false,
            log_dir: None,
        }
    }
}

// --- Durations ---

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// --- Load / Save / Reload ---

fn read(config_dir: &Path) -> Result<Config, ConfigError> {
    let path = config_dir.join(CONFIG_FILE);
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    ron::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

impl Config {
    /// Default config directory: `<platform config dir>/rorbridge`.
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rorbridge")
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = read(config_dir)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let write_error = |source| ConfigError::Write {
            path: config_path.clone(),
            source,
        };
        std::fs::create_dir_all(config_dir).map_err(write_error)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(&config_path, serialized).map_err(write_error)?;
        Ok(())
    }

    /// Re-read the file: `Some(new_config)` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = read(config_dir)?;
        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
        if self.server.host.trim().is_empty() {
            return invalid("server.host", "must not be empty");
        }
        if self.server.port == 0 {
            return invalid("server.port", "must not be 0");
        }
        if self.bot.username.trim().is_empty() {
            return invalid("bot.username", "must not be empty");
        }
        if self.heartbeat.interval_ms == 0 {
            return invalid("heartbeat.interval_ms", "must not be 0");
        }
        if self.heartbeat.timeout_ms <= self.heartbeat.interval_ms {
            return invalid("heartbeat.timeout_ms", "must be longer than heartbeat.interval_ms");
        }
        if self.reconnect.multiplier < 1.0 {
            return invalid("reconnect.multiplier", "must be at least 1.0");
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return invalid("reconnect.max_delay_ms", "must not be below reconnect.initial_delay_ms");
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return invalid("reconnect.jitter", "must be between 0.0 and 1.0");
        }
        if self.rate_limit.capacity == 0 {
            return invalid("rate_limit.capacity", "must not be 0");
        }
        if self.rate_limit.refill_rate <= 0.0 {
            return invalid("rate_limit.refill_rate", "must be positive");
        }
        if self.chat.max_relay_len < 16 {
            return invalid("chat.max_relay_len", "must be at least 16");
        }
        if self.chat.command_prefix == self.chat.game_command_prefix {
            return invalid("chat.game_command_prefix", "must differ from chat.command_prefix");
        }
        if self.announcements.enabled && self.announcements.interval_secs == 0 {
            return invalid("announcements.interval_secs", "must not be 0");
        }
        Ok(())
    }
}
