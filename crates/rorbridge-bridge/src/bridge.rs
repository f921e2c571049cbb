//! The event bridge.
//!
//! [`BridgeState`] holds every decision: which supervisor events and inbound
//! chat messages turn into which [`Action`]s, subject to dedup, rate limits
//! and permissions. It does no I/O and takes the current time as an argument.
//! [`Bridge`] drives a `BridgeState` from the supervisor's event stream and
//! the platform's inbound stream and carries out the actions it returns.

use std::collections::BTreeMap;
use std::time::Duration;

use rorbridge_net::{Player, SessionEvent, Slot, SupervisorEvent, SupervisorHandle};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::announce::{AnnouncementConfig, Announcer};
use crate::commands::{self, Command, CommandError, PendingCommand};
use crate::dedup::DedupWindow;
use crate::format;
use crate::platform::{ChatPlatform, InboundChat, PermissionPolicy, PlatformError};
use crate::rate_limit::{Admission, RateLimitConfig, RateLimiter};
use crate::stats::{self, StatsTracker};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Bridge behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// The bridged chat-platform channel.
    pub channel: String,
    /// Longest line relayed in either direction, in characters.
    pub max_relay_len: usize,
    /// Prefix of platform commands.
    pub command_prefix: char,
    /// Prefix of in-game bot commands.
    pub game_command_prefix: char,
    /// Relayed lines remembered per slot for echo suppression.
    pub dedup_depth: usize,
    /// How long a relayed line suppresses identical ones.
    pub dedup_window: Duration,
    /// Per-source limits, applied separately in each direction.
    pub rate_limit: RateLimitConfig,
    /// Post connection status changes in the channel.
    pub announce_lifecycle: bool,
    /// Periodic in-game announcements.
    pub announcements: AnnouncementConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel: "ror".to_string(),
            max_relay_len: 400,
            command_prefix: '/',
            game_command_prefix: '>',
            dedup_depth: 5,
            dedup_window: Duration::from_secs(10),
            rate_limit: RateLimitConfig::default(),
            announce_lifecycle: true,
            announcements: AnnouncementConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Who a relayed message is accounted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    /// A player in the game.
    Slot(Slot),
    /// A chat-platform user.
    User(String),
}

/// Request for the game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Public game chat line.
    Chat(String),
    /// Private message to one player.
    PrivateChat {
        /// Recipient slot.
        slot: Slot,
        /// Message text.
        text: String,
    },
}

/// Something the bridge wants done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Post on the chat platform.
    Post {
        /// Channel to post in.
        channel: String,
        /// Line to post.
        text: String,
    },
    /// Send to the game server.
    Game(Outbound),
}

/// Which way a message crosses the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Game to chat platform.
    ToChat,
    /// Chat platform to game.
    ToGame,
}

/// A message held for rate limiting.
#[derive(Debug, Clone)]
pub struct BridgeMessage {
    /// Source the message is accounted to.
    pub origin: Source,
    /// What to do once released.
    pub action: Action,
    /// When the message was offered.
    pub timestamp: Instant,
}

impl BridgeMessage {
    /// Which limiter the message belongs to.
    pub fn direction(&self) -> Direction {
        match self.action {
            Action::Post { .. } => Direction::ToChat,
            Action::Game(_) => Direction::ToGame,
        }
    }
}

/// Bridge failures that end [`Bridge::run`].
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The chat platform failed for good.
    #[error(transparent)]
    Platform(#[from] PlatformError),
    /// The supervisor went away without saying so.
    #[error("supervisor event stream ended without a stop event")]
    EventsClosed,
}

// ---------------------------------------------------------------------------
// BridgeState
// ---------------------------------------------------------------------------

/// Decision core of the bridge.
pub struct BridgeState<Q> {
    config: BridgeConfig,
    policy: Q,
    players: BTreeMap<Slot, Player>,
    server_name: Option<String>,
    connected: bool,
    dedup: DedupWindow,
    to_chat: RateLimiter<Source, BridgeMessage>,
    to_game: RateLimiter<Source, BridgeMessage>,
    announcer: Option<Announcer>,
    stats: StatsTracker,
}

/// Reply to platform messages that would need the game server while it is away.
const NOT_CONNECTED: &str = "Not connected to the game server";

impl<Q: PermissionPolicy> BridgeState<Q> {
    /// A disconnected bridge with empty queues.
    pub fn new(config: BridgeConfig, policy: Q) -> Self {
        Self {
            dedup: DedupWindow::new(config.dedup_depth, config.dedup_window),
            to_chat: RateLimiter::new(config.rate_limit.clone()),
            to_game: RateLimiter::new(config.rate_limit.clone()),
            announcer: Announcer::new(&config.announcements),
            players: BTreeMap::new(),
            server_name: None,
            connected: false,
            stats: StatsTracker::new(),
            config,
            policy,
        }
    }

    /// Configuration the bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Players currently on the server, by slot.
    pub fn players(&self) -> &BTreeMap<Slot, Player> {
        &self.players
    }

    /// Messages waiting for rate-limit tokens, both directions.
    pub fn pending(&self) -> usize {
        self.to_chat.pending() + self.to_game.pending()
    }

    /// Travel statistics of the session.
    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    /// Whether the game server is reachable.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn post(&self, text: impl Into<String>) -> Action {
        Action::Post {
            channel: self.config.channel.clone(),
            text: text.into(),
        }
    }

    fn lifecycle(&self, text: impl Into<String>) -> Vec<Action> {
        if self.config.announce_lifecycle {
            vec![self.post(text)]
        } else {
            Vec::new()
        }
    }

    fn forget_session(&mut self) {
        self.players.clear();
        self.dedup.clear();
        self.stats.clear_players();
    }

    /// Queued game messages would reach a different session, if any.
    fn drop_game_queue(&mut self) {
        let dropped = self.to_game.clear();
        if dropped > 0 {
            tracing::warn!(dropped, "game server unavailable, dropping queued messages");
        }
    }

    /// Pass `action` through the limiter for its direction.
    fn limit(&mut self, origin: Source, action: Action, now: Instant, out: &mut Vec<Action>) {
        let message = BridgeMessage {
            origin: origin.clone(),
            action,
            timestamp: now,
        };
        let direction = message.direction();
        let limiter = match direction {
            Direction::ToChat => &mut self.to_chat,
            Direction::ToGame => &mut self.to_game,
        };
        match limiter.admit(origin.clone(), message, now) {
            Admission::Ready(message) => out.push(message.action),
            Admission::Queued => tracing::debug!(?origin, ?direction, "rate limited, queued"),
            Admission::Dropped { first: true } => {
                tracing::warn!(?origin, ?direction, "rate limit queue full, dropping messages");
                if let Source::User(user) = &origin {
                    out.push(self.post(format!("{user}: slow down, some of your messages were dropped")));
                }
            }
            Admission::Dropped { first: false } => {
                tracing::trace!(?origin, ?direction, "dropped");
            }
        }
    }

    // -- game side ----------------------------------------------------------

    /// React to a supervisor event.
    pub fn on_event(&mut self, event: SupervisorEvent, now: Instant) -> Vec<Action> {
        match event {
            SupervisorEvent::Connected { server_name, .. } => {
                self.forget_session();
                self.connected = true;
                let actions = self.lifecycle(format!("Connected to {}", format::display_name(&server_name)));
                self.server_name = Some(server_name);
                actions
            }
            SupervisorEvent::Reconnected { attempts, .. } => {
                self.forget_session();
                self.connected = true;
                self.lifecycle(format!("Reconnected to the game server after {attempts} attempt(s)"))
            }
            SupervisorEvent::ConnectionLost { reason } => {
                self.forget_session();
                self.connected = false;
                self.drop_game_queue();
                self.lifecycle(format!("Lost connection to the game server ({reason}), reconnecting"))
            }
            SupervisorEvent::GaveUp { attempts } => {
                self.connected = false;
                self.drop_game_queue();
                self.lifecycle(format!("Gave up reconnecting after {attempts} attempts"))
            }
            SupervisorEvent::Fatal { error } => {
                self.connected = false;
                self.drop_game_queue();
                self.lifecycle(format!("Game server refused the connection: {error}"))
            }
            SupervisorEvent::Stopped => {
                self.connected = false;
                let pending = self.pending();
                if pending > 0 {
                    tracing::warn!(pending, "bridge stopping with rate-limited messages still queued");
                }
                self.lifecycle("Bridge stopped")
            }
            SupervisorEvent::Session(event) => self.on_session_event(event, now),
        }
    }

    fn on_session_event(&mut self, event: SessionEvent, now: Instant) -> Vec<Action> {
        let mut out = Vec::new();
        match event {
            SessionEvent::PlayerJoined(player) => {
                let slot = player.slot;
                let line = format::joined(&format::display_name(&player.username));
                self.dedup.forget(slot);
                self.stats.join(slot, &player.username, now);
                self.players.insert(slot, player);
                let action = self.post(line);
                self.limit(Source::Slot(slot), action, now, &mut out);
            }
            SessionEvent::PlayerInfoUpdated(player) => {
                self.stats.join(player.slot, &player.username, now);
                self.players.insert(player.slot, player);
            }
            SessionEvent::PlayerLeft { player, reason } => {
                let slot = player.slot;
                tracing::debug!(slot, %reason, "player left");
                self.players.remove(&slot);
                self.dedup.forget(slot);
                let name = format::display_name(&player.username);
                let action = self.post(format::left(&name));
                self.limit(Source::Slot(slot), action, now, &mut out);
                if let Some(travelled) = self.stats.leave(slot, now)
                    && travelled.distance.total() > 0.0
                {
                    let online = now.saturating_duration_since(travelled.online_since);
                    let line = format!(
                        "{name} was online for {}: {}",
                        stats::format_duration(online),
                        travelled.distance
                    );
                    let action = self.post(line);
                    self.limit(Source::Slot(slot), action, now, &mut out);
                }
            }
            SessionEvent::ChatReceived { slot, username, text } => {
                self.on_game_chat(slot, &username, &text, now, &mut out);
            }
            SessionEvent::PrivateChatReceived { slot, username, text } => {
                tracing::debug!(slot, %username, %text, "private chat to the bot");
            }
            SessionEvent::NetQualityChanged { quality } => {
                tracing::info!(quality, "network quality changed");
            }
            SessionEvent::StreamRegistered(stream) => {
                tracing::debug!(
                    owner = stream.owner,
                    id = stream.id,
                    kind = ?stream.kind,
                    name = %stream.name,
                    "stream registered"
                );
                self.stats.stream_registered(&stream);
            }
            SessionEvent::StreamUnregistered(stream) => {
                self.stats.stream_unregistered(&stream);
            }
            SessionEvent::StreamData { slot, stream_id, payload } => {
                self.stats.stream_data(slot, stream_id, &payload);
            }
            SessionEvent::GameCommandReceived { slot, script } => {
                tracing::debug!(slot, %script, "game command from the server");
            }
            SessionEvent::Disconnected { .. } => {}
        }
        out
    }

    fn on_game_chat(&mut self, slot: Slot, username: &str, text: &str, now: Instant, out: &mut Vec<Action>) {
        let name = format::display_name(username);
        let prefix = self.config.game_command_prefix;

        if let Some(parsed) = commands::parse_game_command(text, prefix) {
            tracing::info!(slot, command = %text.trim(), "game command");
            let reply = match parsed {
                Ok(command) => command.reply(prefix, &name),
                Err(reply) => reply,
            };
            self.limit(Source::Slot(slot), Action::Game(Outbound::Chat(reply)), now, out);
            return;
        }

        let body = format::strip_colour_codes(text);
        let body = body.trim();
        if body.is_empty() {
            return;
        }
        if self.dedup.check(slot, body, now) {
            tracing::debug!(slot, "suppressed repeated chat line");
            return;
        }
        let line = format::truncate(&format::relay(&name, body), self.config.max_relay_len, format::TRUNCATION_MARKER);
        let action = self.post(line);
        self.limit(Source::Slot(slot), action, now, out);
    }

    // -- platform side ------------------------------------------------------

    /// React to a message from the chat platform.
    pub fn on_inbound(&mut self, message: InboundChat, now: Instant) -> Vec<Action> {
        let mut out = Vec::new();
        if message.channel != self.config.channel {
            tracing::trace!(channel = %message.channel, "ignoring message outside the bridged channel");
            return out;
        }
        let text = message.text.trim();
        if text.is_empty() {
            return out;
        }

        match commands::parse_command(text, self.config.command_prefix) {
            None if !self.connected => {
                tracing::warn!(author = %message.author, "game server unavailable, message not relayed");
                self.reply(&message, format!("{NOT_CONNECTED}, message not sent"), now, &mut out);
            }
            None => {
                let line = format::truncate(
                    &format::tagged(&message.author, text),
                    self.config.max_relay_len,
                    format::TRUNCATION_MARKER,
                );
                self.limit(Source::User(message.author.clone()), Action::Game(Outbound::Chat(line)), now, &mut out);
            }
            Some(Err(error)) => {
                tracing::debug!(author = %message.author, %error, "malformed command");
                self.reply(&message, error.to_string(), now, &mut out);
            }
            Some(Ok(command)) => {
                let kind = command.kind();
                if !self.policy.permits(&message, kind) {
                    tracing::warn!(author = %message.author, %kind, "permission denied");
                    self.reply(&message, CommandError::PermissionDenied.to_string(), now, &mut out);
                    return out;
                }
                let pending = PendingCommand {
                    issuer: message.author.clone(),
                    command,
                };
                match self.execute(&pending) {
                    Ok(actions) if !self.connected && actions.iter().any(|a| matches!(a, Action::Game(_))) => {
                        tracing::warn!(author = %message.author, %kind, "game server unavailable, command refused");
                        self.reply(&message, format!("{NOT_CONNECTED}, command not sent"), now, &mut out);
                    }
                    Ok(actions) => {
                        for action in actions {
                            self.limit(Source::User(message.author.clone()), action, now, &mut out);
                        }
                    }
                    Err(error) => self.reply(&message, error.to_string(), now, &mut out),
                }
            }
        }
        out
    }

    fn reply(&mut self, to: &InboundChat, text: String, now: Instant, out: &mut Vec<Action>) {
        let action = Action::Post {
            channel: to.channel.clone(),
            text,
        };
        self.limit(Source::User(to.author.clone()), action, now, out);
    }

    /// Translate a permitted command into actions.
    fn execute(&self, pending: &PendingCommand) -> Result<Vec<Action>, CommandError> {
        let target = match pending.command.slot_target() {
            Some(slot) => Some(self.players.get(&slot).ok_or(CommandError::NoSuchPlayer(slot))?),
            None => None,
        };
        let target_name = target.map(|p| format::display_name(&p.username)).unwrap_or_default();

        let actions = match &pending.command {
            Command::Kick { slot, reason } | Command::Ban { slot, reason } => {
                let verb = if matches!(pending.command, Command::Kick { .. }) {
                    "kicking"
                } else {
                    "banning"
                };
                tracing::info!(issuer = %pending.issuer, slot, %reason, "{verb} player");
                let mut actions = Vec::new();
                if let Some(line) = pending.command.server_line() {
                    actions.push(Action::Game(Outbound::Chat(line)));
                }
                actions.push(self.post(format!("{verb} {target_name} (slot {slot}): {reason}")));
                actions
            }
            Command::Say { .. } => pending
                .command
                .server_line()
                .map(|line| Action::Game(Outbound::Chat(line)))
                .into_iter()
                .collect(),
            Command::Msg { slot, text } => vec![Action::Game(Outbound::PrivateChat {
                slot: *slot,
                text: format::tagged(&pending.issuer, text),
            })],
            Command::Info { slot: None } => vec![self.post(self.server_summary())],
            Command::Info { slot: Some(_) } => match target {
                Some(player) => vec![self.post(self.player_details(player))],
                None => Vec::new(),
            },
            Command::Players => vec![self.post(self.player_list())],
            Command::Stats => vec![self.post(self.stats_summary())],
            Command::Help => vec![self.post(commands::help_text())],
        };
        Ok(actions)
    }

    fn server_summary(&self) -> String {
        match (&self.server_name, self.connected) {
            (Some(name), true) => format!(
                "Connected to {}, {} player(s) online",
                format::display_name(name),
                self.players.len()
            ),
            _ => NOT_CONNECTED.to_string(),
        }
    }

    fn player_details(&self, player: &Player) -> String {
        let tag = player.auth.tag();
        let tag = if tag.is_empty() { String::new() } else { format!(" [{tag}]") };
        let mut line = format!(
            "{} (slot {}){tag}, language {}, client {}",
            format::display_name(&player.username),
            player.slot,
            player.language,
            player.client_version
        );
        if let Some(vehicle) = self.stats.vehicle_of(player.slot) {
            line.push_str(&format!(", driving {vehicle}"));
        }
        if let Some(travelled) = self.stats.player(player.slot)
            && travelled.distance.total() > 0.0
        {
            line.push_str(&format!(", {}", travelled.distance));
        }
        line
    }

    fn stats_summary(&self) -> String {
        let global = self.stats.global();
        let mut line = format!(
            "{} join(s) by {} player(s), {}",
            global.user_count,
            global.usernames.len(),
            self.stats.total_distance()
        );
        if let Some(average) = global.average_connection_time() {
            line.push_str(&format!(", average stay {}", stats::format_duration(average)));
        }
        line
    }

    fn player_list(&self) -> String {
        if self.players.is_empty() {
            return "No players online".to_string();
        }
        let names: Vec<_> = self
            .players
            .values()
            .map(|p| format!("{} [{}]", format::display_name(&p.username), p.slot))
            .collect();
        format!("Players online ({}): {}", names.len(), names.join(", "))
    }

    // -- timers -------------------------------------------------------------

    /// Release rate-limited messages that have tokens again.
    pub fn drain(&mut self, now: Instant) -> Vec<Action> {
        let mut released = self.to_chat.drain_ready(now);
        released.extend(self.to_game.drain_ready(now));
        released
            .into_iter()
            .map(|(origin, message)| {
                tracing::trace!(
                    ?origin,
                    waited = ?now.saturating_duration_since(message.timestamp),
                    "released queued message"
                );
                message.action
            })
            .collect()
    }

    /// When [`drain`](Self::drain) next has something to release.
    pub fn next_release(&mut self, now: Instant) -> Option<Instant> {
        let wait = [self.to_chat.next_release(now), self.to_game.next_release(now)]
            .into_iter()
            .flatten()
            .min()?;
        Some(now + wait)
    }

    /// Next periodic announcement, if enabled and connected.
    pub fn announce(&mut self) -> Option<Action> {
        if !self.connected {
            return None;
        }
        let line = self.announcer.as_mut()?.next_line();
        Some(Action::Game(Outbound::Chat(line)))
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Runs a [`BridgeState`] against a live supervisor and chat platform.
pub struct Bridge<P, Q> {
    state: BridgeState<Q>,
    platform: P,
    handle: SupervisorHandle,
}

impl<P: ChatPlatform, Q: PermissionPolicy> Bridge<P, Q> {
    /// A bridge that sends game requests through `handle`.
    pub fn new(config: BridgeConfig, platform: P, policy: Q, handle: SupervisorHandle) -> Self {
        Self {
            state: BridgeState::new(config, policy),
            platform,
            handle,
        }
    }

    /// Pump events until the supervisor stops.
    ///
    /// When the inbound stream closes the supervisor is asked to shut down
    /// and the loop keeps going until its final event.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
        mut inbound: mpsc::Receiver<InboundChat>,
    ) -> Result<(), BridgeError> {
        let period = self.state.config.announcements.interval.max(Duration::from_secs(1));
        let mut announce = time::interval_at(Instant::now() + period, period);
        let announcing = self.state.announcer.is_some();
        let mut inbound_open = true;

        loop {
            let wake = self.state.next_release(Instant::now());
            let actions = tokio::select! {
                event = events.recv() => match event {
                    Some(SupervisorEvent::Stopped) => {
                        let actions = self.state.on_event(SupervisorEvent::Stopped, Instant::now());
                        self.dispatch(actions).await?;
                        tracing::info!("bridge stopped");
                        return Ok(());
                    }
                    Some(event) => self.state.on_event(event, Instant::now()),
                    None => return Err(BridgeError::EventsClosed),
                },
                message = inbound.recv(), if inbound_open => match message {
                    Some(message) => self.state.on_inbound(message, Instant::now()),
                    None => {
                        tracing::info!("chat platform closed, shutting down");
                        inbound_open = false;
                        self.handle.shutdown();
                        Vec::new()
                    }
                },
                _ = time::sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                    self.state.drain(Instant::now())
                }
                _ = announce.tick(), if announcing => self.state.announce().into_iter().collect(),
            };
            self.dispatch(actions).await?;
        }
    }

    async fn dispatch(&self, actions: Vec<Action>) -> Result<(), BridgeError> {
        for action in actions {
            match action {
                Action::Post { channel, text } => match self.platform.send(&channel, &text).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => {
                        tracing::error!(error = %e, "chat platform failed");
                        self.handle.shutdown();
                        return Err(e.into());
                    }
                    Err(e) => tracing::warn!(error = %e, "message not posted"),
                },
                Action::Game(outbound) => {
                    let result = match outbound {
                        Outbound::Chat(text) => self.handle.try_send_chat(text),
                        Outbound::PrivateChat { slot, text } => self.handle.try_send_private_chat(slot, text),
                    };
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "game request dropped");
                    }
                }
            }
        }
        Ok(())
    }
}
