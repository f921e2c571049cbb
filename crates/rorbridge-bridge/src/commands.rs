//! Command parsing for both sides of the bridge.
//!
//! Platform users issue slash commands (`/kick 3 griefing`) that become
//! server chat commands or private messages. Game players issue `>` commands
//! (`>ping`) that the bot answers in game chat.

use std::fmt;

use rorbridge_net::Slot;

use crate::platform::PermissionLevel;

// ---------------------------------------------------------------------------
// CommandError
// ---------------------------------------------------------------------------

/// Why a command could not be turned into an action. The text is shown to
/// the user who sent it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// No command has this name.
    #[error("unknown command `{0}`, try /help")]
    Unknown(String),
    /// Missing or extra arguments.
    #[error("usage: {usage}")]
    Usage {
        /// Usage line of the command.
        usage: &'static str,
    },
    /// The slot argument is not a number.
    #[error("`{0}` is not a slot number")]
    InvalidSlot(String),
    /// Nobody is in the named slot.
    #[error("no player in slot {0}")]
    NoSuchPlayer(Slot),
    /// The issuer may not use the command.
    #[error("permission denied")]
    PermissionDenied,
}

// ---------------------------------------------------------------------------
// Platform slash commands
// ---------------------------------------------------------------------------

/// Command verbs, used for permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `/kick`
    Kick,
    /// `/ban`
    Ban,
    /// `/say`
    Say,
    /// `/info`
    Info,
    /// `/players`
    Players,
    /// `/stats`
    Stats,
    /// `/msg`
    Msg,
    /// `/help`
    Help,
}

impl CommandKind {
    /// Every command, in help order.
    pub const ALL: [CommandKind; 8] = [
        Self::Kick,
        Self::Ban,
        Self::Say,
        Self::Info,
        Self::Players,
        Self::Stats,
        Self::Msg,
        Self::Help,
    ];

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// Name as typed after the prefix.
    pub fn name(self) -> &'static str {
        match self {
            Self::Kick => "kick",
            Self::Ban => "ban",
            Self::Say => "say",
            Self::Info => "info",
            Self::Players => "players",
            Self::Stats => "stats",
            Self::Msg => "msg",
            Self::Help => "help",
        }
    }

    /// Usage line shown on errors and in help.
    pub fn usage(self) -> &'static str {
        match self {
            Self::Kick => "/kick <slot> [reason]",
            Self::Ban => "/ban <slot> [reason]",
            Self::Say => "/say <text>",
            Self::Info => "/info [slot]",
            Self::Players => "/players",
            Self::Stats => "/stats",
            Self::Msg => "/msg <slot> <text>",
            Self::Help => "/help",
        }
    }

    /// Lowest level [`LevelPolicy`](crate::platform::LevelPolicy) accepts.
    pub fn required_level(self) -> PermissionLevel {
        match self {
            Self::Kick | Self::Ban | Self::Say | Self::Msg => PermissionLevel::Moderator,
            Self::Info | Self::Players | Self::Stats | Self::Help => PermissionLevel::Guest,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Kick a player.
    Kick {
        /// Target slot.
        slot: Slot,
        /// Shown to the player.
        reason: String,
    },
    /// Ban a player.
    Ban {
        /// Target slot.
        slot: Slot,
        /// Shown to the player.
        reason: String,
    },
    /// Broadcast as the server.
    Say {
        /// Broadcast text.
        text: String,
    },
    /// Server summary, or details of one player.
    Info {
        /// Player to describe; the server when absent.
        slot: Option<Slot>,
    },
    /// List who is online.
    Players,
    /// Travel totals for the session.
    Stats,
    /// Private message to one player.
    Msg {
        /// Recipient slot.
        slot: Slot,
        /// Message text.
        text: String,
    },
    /// List commands.
    Help,
}

/// Reason used when a moderator gives none.
pub const DEFAULT_REASON: &str = "No reason given";

impl Command {
    /// The verb, for permission checks.
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Kick { .. } => CommandKind::Kick,
            Self::Ban { .. } => CommandKind::Ban,
            Self::Say { .. } => CommandKind::Say,
            Self::Info { .. } => CommandKind::Info,
            Self::Players => CommandKind::Players,
            Self::Stats => CommandKind::Stats,
            Self::Msg { .. } => CommandKind::Msg,
            Self::Help => CommandKind::Help,
        }
    }

    /// The player the command acts on, if any.
    pub fn slot_target(&self) -> Option<Slot> {
        match self {
            Self::Kick { slot, .. } | Self::Ban { slot, .. } | Self::Msg { slot, .. } => Some(*slot),
            Self::Info { slot } => *slot,
            Self::Say { .. } | Self::Players | Self::Stats | Self::Help => None,
        }
    }

    /// Server chat line for moderation commands. The server acts on lines of
    /// the form `!kick <uid> <reason>`, `!ban <uid> <reason>` and
    /// `!say <uid> <text>`, where uid -1 addresses everyone.
    pub fn server_line(&self) -> Option<String> {
        match self {
            Self::Kick { slot, reason } => Some(format!("!kick {slot} {reason}")),
            Self::Ban { slot, reason } => Some(format!("!ban {slot} {reason}")),
            Self::Say { text } => Some(format!("!say -1 {text}")),
            _ => None,
        }
    }
}

/// A command together with who issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Chat-platform name of the issuer.
    pub issuer: String,
    /// What was asked for.
    pub command: Command,
}

fn parse_slot(arg: Option<&str>, usage: &'static str) -> Result<Slot, CommandError> {
    let arg = arg.ok_or(CommandError::Usage { usage })?;
    arg.parse().map_err(|_| CommandError::InvalidSlot(arg.to_string()))
}

fn rest(arg: Option<&str>) -> Option<String> {
    arg.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Parse `text` as a slash command. Returns `None` when `text` does not start
/// with `prefix`.
pub fn parse_command(text: &str, prefix: char) -> Option<Result<Command, CommandError>> {
    let body = text.trim().strip_prefix(prefix)?;
    Some(parse_body(body))
}

fn parse_body(body: &str) -> Result<Command, CommandError> {
    let mut parts = body.trim_start().splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let mut args = parts.next().unwrap_or_default().trim().splitn(2, char::is_whitespace);

    let kind = CommandKind::from_name(name).ok_or_else(|| CommandError::Unknown(name.to_string()))?;
    let usage = kind.usage();
    let command = match kind {
        CommandKind::Kick | CommandKind::Ban => {
            let slot = parse_slot(args.next().filter(|s| !s.is_empty()), usage)?;
            let reason = rest(args.next()).unwrap_or_else(|| DEFAULT_REASON.to_string());
            if kind == CommandKind::Kick {
                Command::Kick { slot, reason }
            } else {
                Command::Ban { slot, reason }
            }
        }
        CommandKind::Say => {
            let first = args.next().unwrap_or_default();
            let text = match rest(args.next()) {
                Some(more) => format!("{first} {more}"),
                None => first.to_string(),
            };
            if text.trim().is_empty() {
                return Err(CommandError::Usage { usage });
            }
            Command::Say { text }
        }
        CommandKind::Info => match args.next().filter(|s| !s.is_empty()) {
            Some(arg) => Command::Info {
                slot: Some(parse_slot(Some(arg), usage)?),
            },
            None => Command::Info { slot: None },
        },
        CommandKind::Players => Command::Players,
        CommandKind::Stats => Command::Stats,
        CommandKind::Msg => {
            let slot = parse_slot(args.next().filter(|s| !s.is_empty()), usage)?;
            let text = rest(args.next()).ok_or(CommandError::Usage { usage })?;
            Command::Msg { slot, text }
        }
        CommandKind::Help => Command::Help,
    };
    Ok(command)
}

/// One-line summary of every slash command.
pub fn help_text() -> String {
    let usages: Vec<_> = CommandKind::ALL.iter().map(|kind| kind.usage()).collect();
    format!("Commands: {}", usages.join(", "))
}

// ---------------------------------------------------------------------------
// In-game `>` commands
// ---------------------------------------------------------------------------

/// Status a player can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Be right back.
    Brb,
    /// Away from keyboard.
    Afk,
    /// Returned.
    Back,
    /// Got to go.
    Gtg,
}

impl Status {
    /// Chat line announcing `name`'s status.
    pub fn line(self, name: &str) -> String {
        match self {
            Self::Brb => format!("{name} will brb!"),
            Self::Afk => format!("{name} is afk!"),
            Self::Back => format!("{name} is back!"),
            Self::Gtg => format!("{name} is gtg"),
        }
    }
}

/// Bot commands typed in game chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameCommand {
    /// `>prefix`: tell the command prefix.
    Prefix,
    /// `>ping`: answer `pong`.
    Ping,
    /// `>help [command]`
    Help {
        /// Command to describe; all of them when absent.
        topic: Option<String>,
    },
    /// `>brb`, `>afk`, `>back` or `>gtg`.
    Status(Status),
    /// `>version`: bot version.
    Version,
}

const GAME_COMMANDS: [&str; 8] = ["prefix", "ping", "help", "brb", "afk", "back", "gtg", "version"];

fn game_command_info(name: &str) -> Option<(&'static str, &'static str)> {
    Some(match name {
        "prefix" => ("Get the prefix for commands.", ""),
        "ping" => ("Ping the bot.", ""),
        "help" => ("Get help for commands.", " [command]"),
        "brb" => ("Set your status to brb.", ""),
        "afk" => ("Set your status to afk.", ""),
        "back" => ("Set your status to back.", ""),
        "gtg" => ("Set your status to gtg.", ""),
        "version" => ("Get the version of the bot.", ""),
        _ => return None,
    })
}

/// Parse a game chat line. `None` if it is not addressed to the bot; an
/// error string (the reply) if it is but makes no sense.
pub fn parse_game_command(text: &str, prefix: char) -> Option<Result<GameCommand, String>> {
    let body = text.trim().strip_prefix(prefix)?;
    let mut words = body.split_whitespace();
    let Some(name) = words.next() else {
        return Some(Err(format!("Invalid command: {}", text.trim())));
    };
    let args: Vec<&str> = words.collect();
    let name = name.to_ascii_lowercase();

    let command = match name.as_str() {
        "prefix" => GameCommand::Prefix,
        "ping" => GameCommand::Ping,
        "version" => GameCommand::Version,
        "help" => {
            if args.len() > 1 {
                return Some(Err("Too many arguments".to_string()));
            }
            GameCommand::Help {
                topic: args.first().map(|s| s.to_ascii_lowercase()),
            }
        }
        "brb" | "afk" | "back" | "gtg" => {
            if !args.is_empty() {
                return Some(Err("Too many arguments".to_string()));
            }
            GameCommand::Status(match name.as_str() {
                "brb" => Status::Brb,
                "afk" => Status::Afk,
                "back" => Status::Back,
                _ => Status::Gtg,
            })
        }
        _ => return Some(Err(format!("Invalid command: {}", text.trim()))),
    };
    Some(Ok(command))
}

impl GameCommand {
    /// Reply for `player` (display name of the sender).
    pub fn reply(&self, prefix: char, player: &str) -> String {
        match self {
            Self::Prefix => format!("The prefix for commands is: {prefix}"),
            Self::Ping => "pong".to_string(),
            Self::Version => format!("rorbridge v{}", env!("CARGO_PKG_VERSION")),
            Self::Status(status) => status.line(player),
            Self::Help { topic: None } => format!(
                "Available commands: {}\nUse {prefix}help [command] for more information.",
                GAME_COMMANDS.join(", ")
            ),
            Self::Help { topic: Some(topic) } => match game_command_info(topic) {
                Some((description, args)) => format!(
                    "{prefix}help {topic}\nDescription: {description}\nUsage: {prefix}{topic}{args}"
                ),
                None => format!("Invalid command {topic}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Command, CommandError> {
        parse_command(text, '/').expect("slash command")
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert!(parse_command("hello there", '/').is_none());
        assert!(parse_game_command("hello there", '>').is_none());
    }

    #[test]
    fn test_kick_and_ban() {
        assert_eq!(
            parse("/kick 3 griefing at spawn"),
            Ok(Command::Kick {
                slot: 3,
                reason: "griefing at spawn".to_string()
            })
        );
        assert_eq!(
            parse("/ban 4"),
            Ok(Command::Ban {
                slot: 4,
                reason: DEFAULT_REASON.to_string()
            })
        );
        assert_eq!(parse("/KICK 3").map(|c| c.kind()), Ok(CommandKind::Kick));
    }

    #[test]
    fn test_malformed_commands() {
        assert_eq!(
            parse("/kick"),
            Err(CommandError::Usage {
                usage: "/kick <slot> [reason]"
            })
        );
        assert_eq!(parse("/kick alice"), Err(CommandError::InvalidSlot("alice".to_string())));
        assert_eq!(parse("/msg 3"), Err(CommandError::Usage { usage: "/msg <slot> <text>" }));
        assert_eq!(parse("/say   "), Err(CommandError::Usage { usage: "/say <text>" }));
        assert_eq!(parse("/teleport 3"), Err(CommandError::Unknown("teleport".to_string())));
    }

    #[test]
    fn test_server_lines() {
        let kick = parse("/kick 3 spam").unwrap();
        assert_eq!(kick.server_line().as_deref(), Some("!kick 3 spam"));
        assert_eq!(kick.slot_target(), Some(3));

        let say = parse("/say server restarts in 5 minutes").unwrap();
        assert_eq!(say.server_line().as_deref(), Some("!say -1 server restarts in 5 minutes"));
        assert_eq!(say.slot_target(), None);

        assert_eq!(parse("/info 7").unwrap().slot_target(), Some(7));
        assert_eq!(parse("/players").unwrap().server_line(), None);
        assert_eq!(parse("/Stats"), Ok(Command::Stats));
        assert_eq!(CommandKind::Stats.required_level(), PermissionLevel::Guest);
    }

    #[test]
    fn test_msg_keeps_text() {
        assert_eq!(
            parse("/msg 5 please stop ramming"),
            Ok(Command::Msg {
                slot: 5,
                text: "please stop ramming".to_string()
            })
        );
    }

    #[test]
    fn test_game_commands() {
        let ping = parse_game_command(">ping", '>').unwrap().unwrap();
        assert_eq!(ping.reply('>', "Alice"), "pong");

        let brb = parse_game_command(">brb", '>').unwrap().unwrap();
        assert_eq!(brb.reply('>', "Alice"), "Alice will brb!");

        let help = parse_game_command(">help ping", '>').unwrap().unwrap();
        assert_eq!(
            help.reply('>', "Alice"),
            ">help ping\nDescription: Ping the bot.\nUsage: >ping"
        );
        assert!(
            GameCommand::Help { topic: None }
                .reply('>', "Alice")
                .starts_with("Available commands: prefix, ping, help")
        );
        assert_eq!(
            GameCommand::Prefix.reply('>', "Alice"),
            "The prefix for commands is: >"
        );
    }

    #[test]
    fn test_bad_game_commands() {
        assert_eq!(
            parse_game_command(">dance", '>'),
            Some(Err("Invalid command: >dance".to_string()))
        );
        assert_eq!(
            parse_game_command(">afk now", '>'),
            Some(Err("Too many arguments".to_string()))
        );
        assert_eq!(
            GameCommand::Help {
                topic: Some("dance".to_string())
            }
            .reply('>', "Alice"),
            "Invalid command dance"
        );
    }
}
