//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// rorbridge command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "rorbridge", about = "Bridges a Rigs of Rods multiplayer server to a chat channel")]
pub struct CliArgs {
    /// Game server host.
    #[arg(long)]
    pub server: Option<String>,

    /// Game server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Game server password.
    #[arg(long)]
    pub password: Option<String>,

    /// In-game name of the bot.
    #[arg(long)]
    pub username: Option<String>,

    /// Bridged chat channel.
    #[arg(long)]
    pub channel: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl CliArgs {
    /// Directory holding `config.ron`.
    pub fn config_dir(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_dir)
    }
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref host) = args.server {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref password) = args.password {
            self.server.password = password.clone();
        }
        if let Some(ref username) = args.username {
            self.bot.username = username.clone();
        }
        if let Some(ref channel) = args.channel {
            self.chat.channel = channel.clone();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs::parse_from([
            "rorbridge",
            "--server",
            "ror.example.org",
            "--username",
            "Relay",
            "--channel",
            "ror-eu",
        ]);
        config.apply_cli_overrides(&args);
        assert_eq!(config.server.host, "ror.example.org");
        assert_eq!(config.bot.username, "Relay");
        assert_eq!(config.chat.channel, "ror-eu");
        // Non-overridden fields retain defaults
        assert_eq!(config.server.port, 12000);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_dir_flag() {
        let args = CliArgs::parse_from(["rorbridge", "--config", "/tmp/rorbridge-test"]);
        assert_eq!(args.config_dir(), PathBuf::from("/tmp/rorbridge-test"));
    }
}
