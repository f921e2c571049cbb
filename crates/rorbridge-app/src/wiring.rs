//! Turns the on-disk [`Config`] into the runtime settings of each layer.

use std::time::Duration;

use rorbridge_bridge::{AnnouncementConfig, BridgeConfig, RateLimitConfig};
use rorbridge_config::Config;
use rorbridge_net::{Credentials, FrameConfig, ReconnectConfig, SessionConfig, TcpConnector, UnknownTypePolicy};

pub fn credentials(config: &Config) -> Credentials {
    Credentials {
        username: config.bot.username.clone(),
        password: config.server.password.clone(),
        user_token: config.bot.user_token.clone(),
        language: config.bot.language.clone(),
    }
}

pub fn session_config(config: &Config) -> SessionConfig {
    let protocol = &config.protocol;
    SessionConfig {
        frame: FrameConfig {
            max_payload_size: protocol.max_frame_size,
            checksum: protocol.checksum,
            unknown_types: if protocol.ignore_unknown_types {
                UnknownTypePolicy::Ignore
            } else {
                UnknownTypePolicy::Reject
            },
        },
        heartbeat_interval: config.heartbeat.interval(),
        heartbeat_timeout: config.heartbeat.timeout(),
        handshake_timeout: Duration::from_millis(protocol.handshake_timeout_ms),
        disconnect_timeout: Duration::from_millis(protocol.disconnect_timeout_ms),
        ..SessionConfig::default()
    }
}

pub fn reconnect_config(config: &Config) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: config.reconnect.initial_delay(),
        backoff_multiplier: config.reconnect.multiplier,
        max_delay: config.reconnect.max_delay(),
        max_attempts: config.reconnect.max_attempts,
        jitter: config.reconnect.jitter,
    }
}

pub fn bridge_config(config: &Config) -> BridgeConfig {
    let chat = &config.chat;
    BridgeConfig {
        channel: chat.channel.clone(),
        max_relay_len: chat.max_relay_len,
        command_prefix: chat.command_prefix,
        game_command_prefix: chat.game_command_prefix,
        dedup_depth: chat.dedup_depth,
        dedup_window: Duration::from_millis(chat.dedup_window_ms),
        rate_limit: RateLimitConfig {
            capacity: config.rate_limit.capacity,
            refill_per_sec: config.rate_limit.refill_rate,
            queue_depth: config.rate_limit.queue_depth,
        },
        announce_lifecycle: chat.announce_lifecycle,
        announcements: AnnouncementConfig {
            enabled: config.announcements.enabled,
            interval: Duration::from_secs(config.announcements.interval_secs),
            messages: config.announcements.messages.clone(),
            colour: config.announcements.colour.clone(),
        },
        ..BridgeConfig::default()
    }
}

pub fn connector(config: &Config) -> TcpConnector {
    TcpConnector {
        address: config.server.address(),
        credentials: credentials(config),
        config: session_config(config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_carry_through() {
        let config = Config::default();

        let session = session_config(&config);
        assert_eq!(session.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(session.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(session.frame.max_payload_size, 8192);
        assert_eq!(session.frame.unknown_types, UnknownTypePolicy::Reject);

        let reconnect = reconnect_config(&config);
        assert_eq!(reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(reconnect.max_attempts, Some(20));

        assert_eq!(bridge_config(&config), BridgeConfig::default());
    }

    #[test]
    fn test_overrides_carry_through() {
        let mut config = Config::default();
        config.server.host = "ror.example.org".to_string();
        config.server.password = "secret".to_string();
        config.protocol.checksum = false;
        config.protocol.ignore_unknown_types = true;
        config.chat.channel = "ror-eu".to_string();
        config.rate_limit.queue_depth = 3;

        let connector = connector(&config);
        assert_eq!(connector.address, "ror.example.org:12000");
        assert_eq!(connector.credentials.password, "secret");
        assert!(!connector.config.frame.checksum);
        assert_eq!(connector.config.frame.unknown_types, UnknownTypePolicy::Ignore);

        let bridge = bridge_config(&config);
        assert_eq!(bridge.channel, "ror-eu");
        assert_eq!(bridge.rate_limit.queue_depth, 3);
    }
}
