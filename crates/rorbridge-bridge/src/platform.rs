//! Chat-platform seam: the outbound [`ChatPlatform`] trait, the inbound
//! message shape, and the permission predicate moderators pass through.

use std::future::Future;

use crate::commands::CommandKind;

/// Privilege of a chat-platform user, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PermissionLevel {
    /// Anyone in the channel.
    #[default]
    Guest,
    /// Known community member.
    Member,
    /// May kick, ban, and speak as the server.
    Moderator,
    /// Everything.
    Admin,
}

/// A message arriving from the chat platform.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundChat {
    /// Channel it was posted in.
    pub channel: String,
    /// Display name of the author.
    pub author: String,
    /// Author's privilege as reported by the platform.
    pub permission: PermissionLevel,
    /// Raw message text.
    pub text: String,
}

/// Chat-platform failures.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The platform connection is gone for good.
    #[error("chat platform closed")]
    Closed,
    /// The platform refused this one message.
    #[error("chat platform rejected message: {0}")]
    Rejected(String),
    /// Transport failure.
    #[error("chat platform I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlatformError {
    /// Whether the bridge can keep using the platform after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Outbound half of a chat-platform client.
pub trait ChatPlatform: Send + Sync {
    /// Post `text` to `channel`.
    fn send(&self, channel: &str, text: &str) -> impl Future<Output = Result<(), PlatformError>> + Send;
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// Decides whether the author of `message` may run a command of `kind`.
pub trait PermissionPolicy: Send + Sync {
    /// `true` to allow.
    fn permits(&self, message: &InboundChat, kind: CommandKind) -> bool;
}

/// Blanket implementation so closures can be used as policies.
impl<F> PermissionPolicy for F
where
    F: Fn(&InboundChat, CommandKind) -> bool + Send + Sync,
{
    fn permits(&self, message: &InboundChat, kind: CommandKind) -> bool {
        self(message, kind)
    }
}

/// Allows a command when the author's level reaches
/// [`CommandKind::required_level`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelPolicy;

impl PermissionPolicy for LevelPolicy {
    fn permits(&self, message: &InboundChat, kind: CommandKind) -> bool {
        message.permission >= kind.required_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(permission: PermissionLevel) -> InboundChat {
        InboundChat {
            channel: "ror".to_string(),
            author: "mallory".to_string(),
            permission,
            text: "/kick 3".to_string(),
        }
    }

    #[test]
    fn test_level_policy_gates_moderation() {
        let policy = LevelPolicy;
        assert!(!policy.permits(&message(PermissionLevel::Member), CommandKind::Kick));
        assert!(policy.permits(&message(PermissionLevel::Moderator), CommandKind::Kick));
        assert!(policy.permits(&message(PermissionLevel::Admin), CommandKind::Ban));
        assert!(policy.permits(&message(PermissionLevel::Guest), CommandKind::Players));
    }

    #[test]
    fn test_closure_policy() {
        let only_alice = |m: &InboundChat, _: CommandKind| m.author == "alice";
        assert!(!only_alice.permits(&message(PermissionLevel::Admin), CommandKind::Say));
    }
}
