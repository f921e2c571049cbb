//! Configuration for rorbridge.
//!
//! Settings persist to disk as a RON file, can be overridden from the command
//! line via clap, and can be re-read at runtime to pick up edits.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    AnnouncementsConfig, BotConfig, CONFIG_FILE, ChatConfig, Config, DebugConfig, HeartbeatConfig, ProtocolConfig,
    RateLimitConfig, ReconnectConfig, ServerConfig,
};
pub use error::ConfigError;
