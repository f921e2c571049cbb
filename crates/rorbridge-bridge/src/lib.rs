//! Bridges a RoRnet game session to a text-chat platform.
//!
//! Game events become channel posts, channel messages become game chat, and
//! slash commands from privileged users become server moderation commands.

pub mod announce;
pub mod bridge;
pub mod commands;
pub mod dedup;
pub mod format;
pub mod platform;
pub mod rate_limit;
pub mod stats;

pub use announce::AnnouncementConfig;
pub use bridge::{Action, Bridge, BridgeConfig, BridgeError, BridgeMessage, BridgeState, Direction, Outbound, Source};
pub use commands::{Command, CommandError, CommandKind, PendingCommand};
pub use platform::{ChatPlatform, InboundChat, LevelPolicy, PermissionLevel, PermissionPolicy, PlatformError};
pub use rate_limit::RateLimitConfig;
pub use stats::{DistanceStats, StatsTracker};
