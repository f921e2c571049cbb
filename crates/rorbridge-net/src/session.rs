//! Protocol session: one connection to a RoRnet server.
//!
//! [`Session::establish`] runs the HELLO / USER_INFO / WELCOME handshake
//! inline, registers the bot's own chat and character streams, then spawns a
//! single task that owns the socket, the [`StreamRegistry`] and the heartbeat
//! timer. Requests reach that task through one FIFO channel. Everything the
//! server says comes back as [`SessionEvent`]s. State changes are broadcast via
//! a [`watch`] channel so any number of consumers can react without polling.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Buf;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::codec::{Frame, FrameBuffer, FrameConfig, FrameError, MessageType, read_frame, write_frame};
use crate::messages::{
    MessageError, PRIVATE_CHAT_TEXT_LEN, RORNET_VERSION, ServerInfo, StreamPayload, StreamRegister, StreamType,
    UserInfo, Vector3, actor_status, decode_text, hash_password, private_chat_payload, private_chat_text,
};
use crate::registry::{Player, RegistryError, Slot, Stream, StreamDescriptor, StreamId, StreamRegistry};

/// Source id the server uses for its own chat lines.
pub const SERVER_SOURCE: Slot = u32::MAX;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Opening the socket and exchanging HELLO.
    Connecting,
    /// USER_INFO sent, waiting for WELCOME.
    Authenticating,
    /// Logged in; frames flow both ways.
    Connected,
    /// Saying goodbye and closing the socket.
    Disconnecting,
}

/// Observable connection state backed by a [`watch`] channel.
///
/// Multiple subscribers can observe state transitions without polling.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current connection state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// Login details sent in the USER_INFO frame.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Bot display name.
    pub username: String,
    /// Plain-text server password; hashed before sending.
    pub password: String,
    /// User token.
    pub user_token: String,
    /// Language tag.
    pub language: String,
}

impl Credentials {
    /// The USER_INFO record for these credentials.
    pub fn user_info(&self) -> UserInfo {
        UserInfo::bot(
            &self.username,
            &self.user_token,
            &hash_password(&self.password),
            &self.language,
        )
    }
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Framing settings.
    pub frame: FrameConfig,
    /// Time between heartbeats. Default: 2 s.
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is considered dead. Default: 30 s.
    pub heartbeat_timeout: Duration,
    /// Upper bound for TCP connect plus handshake. Default: 10 s.
    pub handshake_timeout: Duration,
    /// Upper bound for the USER_LEAVE goodbye. Default: 2 s.
    pub disconnect_timeout: Duration,
    /// Depth of the outbound request queue. Default: 64.
    pub command_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            heartbeat_interval: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(2),
            command_capacity: 64,
        }
    }
}

/// Why the server turned the login down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// No free slot.
    #[error("server is full")]
    ServerFull,
    /// Password hash did not match.
    #[error("wrong password")]
    WrongPassword,
    /// This client is banned.
    #[error("banned")]
    Banned,
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The server speaks a different protocol version.
    #[error("protocol version mismatch: expected {expected}, server has {actual}")]
    ProtocolVersion {
        /// Our version.
        expected: String,
        /// The server's version, or `unknown`.
        actual: String,
    },
    /// The server refused the login.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(RejectReason),
    /// Connect and handshake took too long.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    /// The server sent something that makes no sense during the handshake.
    #[error("unexpected {0:?} during handshake")]
    UnexpectedMessage(MessageType),
    /// Framing failure.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    /// A payload could not be parsed.
    #[error("malformed payload: {0}")]
    Message(#[from] MessageError),
    /// Socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Stream registration refused locally.
    #[error("stream registry: {0}")]
    Registry(#[from] RegistryError),
    /// The session loop has stopped.
    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Whether retrying with the same credentials is pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolVersion { .. } | Self::HandshakeRejected(_))
    }
}

/// Why a connected session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`Session::disconnect`] was called or every handle was dropped.
    Requested,
    /// Nothing arrived, or a write stayed blocked, for a whole heartbeat timeout.
    HeartbeatTimeout,
    /// Malformed frame, bad checksum or unknown type.
    ProtocolViolation(String),
    /// Socket error.
    Io(String),
    /// The server removed us; carries the server's reason.
    Kicked {
        /// Reason text from the USER_LEAVE frame.
        reason: String,
    },
    /// The server closed the socket.
    ServerClosed,
}

impl DisconnectReason {
    /// Whether the disconnect was asked for locally.
    pub fn is_requested(&self) -> bool {
        matches!(self, Self::Requested)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "disconnect requested"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::ProtocolViolation(detail) => write!(f, "protocol violation: {detail}"),
            Self::Io(detail) => write!(f, "I/O error: {detail}"),
            Self::Kicked { reason } => write!(f, "kicked: {reason}"),
            Self::ServerClosed => write!(f, "server closed the connection"),
        }
    }
}

/// Normalized events produced by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A player joined.
    PlayerJoined(Player),
    /// A player left.
    PlayerLeft {
        /// The departed player.
        player: Player,
        /// Reason text sent by the server.
        reason: String,
    },
    /// Details of a player changed, or a player already on the server was announced.
    PlayerInfoUpdated(Player),
    /// Public chat line.
    ChatReceived {
        /// Sender slot.
        slot: Slot,
        /// Sender name.
        username: String,
        /// Message text.
        text: String,
    },
    /// Private chat line addressed to the bot.
    PrivateChatReceived {
        /// Sender slot.
        slot: Slot,
        /// Sender name.
        username: String,
        /// Message text.
        text: String,
    },
    /// Script command.
    GameCommandReceived {
        /// Sender slot.
        slot: Slot,
        /// Script text.
        script: String,
    },
    /// A remote stream was registered.
    StreamRegistered(Stream),
    /// A remote stream went away.
    StreamUnregistered(Stream),
    /// Data on a remote stream.
    StreamData {
        /// Owner slot.
        slot: Slot,
        /// Stream id.
        stream_id: StreamId,
        /// Parsed payload.
        payload: StreamPayload,
    },
    /// The server's view of our connection quality changed.
    NetQualityChanged {
        /// New quality value.
        quality: u32,
    },
    /// The session ended. Always the last event.
    Disconnected {
        /// Why.
        reason: DisconnectReason,
    },
}

enum SessionCommand {
    Send(Frame),
    Chat(String),
    PrivateChat {
        slot: Slot,
        text: String,
    },
    GameCommand(String),
    RegisterStream {
        descriptor: StreamDescriptor,
        reply: oneshot::Sender<Result<StreamId, RegistryError>>,
    },
    UnregisterStream {
        id: StreamId,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Disconnect,
}

/// Handle to a logged-in session.
///
/// Created via [`Session::connect`] or [`Session::establish`]. The socket is
/// owned by a background task; dropping the handle disconnects.
pub struct Session {
    commands: mpsc::Sender<SessionCommand>,
    state: Arc<ConnectionStateWatch>,
    local_slot: Slot,
    server_info: ServerInfo,
    max_payload_size: u32,
    close_timeout: Duration,
    task: JoinHandle<()>,
}

impl Session {
    /// Connect to `address` over TCP and log in.
    ///
    /// `replay` lists streams to register right after the bot's own chat and
    /// character streams.
    pub async fn connect(
        address: &str,
        credentials: &Credentials,
        config: &SessionConfig,
        replay: &[StreamDescriptor],
        state: Arc<ConnectionStateWatch>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        state.set(ConnectionState::Connecting);
        tracing::info!(%address, "connecting");

        let stream = match time::timeout(config.handshake_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                state.set(ConnectionState::Disconnected);
                return Err(e.into());
            }
            Err(_) => {
                state.set(ConnectionState::Disconnected);
                return Err(SessionError::HandshakeTimeout(config.handshake_timeout));
            }
        };
        stream.set_nodelay(true)?;

        Self::establish(stream, credentials, config, replay, state).await
    }

    /// Log in over an already open byte stream.
    pub async fn establish<S>(
        mut io: S,
        credentials: &Credentials,
        config: &SessionConfig,
        replay: &[StreamDescriptor],
        state: Arc<ConnectionStateWatch>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        state.set(ConnectionState::Connecting);
        let mut buffer = FrameBuffer::new();

        let login = handshake(&mut io, &mut buffer, credentials, &config.frame, &state);
        let result = match time::timeout(config.handshake_timeout, login).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::HandshakeTimeout(config.handshake_timeout)),
        };
        let (server_info, me) = match result {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(error = %e, "handshake failed");
                state.set(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let local_slot = me.unique_id;
        tracing::info!(
            slot = local_slot,
            server = %server_info.server_name,
            terrain = %server_info.terrain_name,
            "logged in"
        );

        let mut registry = StreamRegistry::new();
        registry.add_player(&me, std::time::Instant::now());

        let announce = announce_own_streams(&mut io, &mut registry, local_slot, replay, &config.frame);
        let own_streams = match time::timeout(config.handshake_timeout, announce).await {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                state.set(ConnectionState::Disconnected);
                return Err(e);
            }
            Err(_) => {
                tracing::warn!("server stopped reading during stream registration");
                state.set(ConnectionState::Disconnected);
                return Err(SessionError::HandshakeTimeout(config.handshake_timeout));
            }
        };

        let (reader, writer) = tokio::io::split(io);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity.max(1));

        let session_loop = SessionLoop {
            reader,
            writer,
            buffer,
            frame_config: config.frame.clone(),
            registry,
            local_slot,
            chat_stream: own_streams.0,
            character_stream: own_streams.1,
            events: events_tx,
            state: Arc::clone(&state),
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_timeout: config.heartbeat_timeout,
            disconnect_timeout: config.disconnect_timeout,
            last_received: Instant::now(),
            last_heartbeat_sent: None,
            net_quality: None,
        };

        state.set(ConnectionState::Connected);
        let task = tokio::spawn(session_loop.run(commands_rx));

        Ok((
            Self {
                commands: commands_tx,
                state,
                local_slot,
                server_info,
                max_payload_size: config.frame.max_payload_size,
                close_timeout: config.heartbeat_timeout + config.disconnect_timeout,
                task,
            },
            events_rx,
        ))
    }

    /// Our slot, assigned by WELCOME.
    pub fn local_slot(&self) -> Slot {
        self.local_slot
    }

    /// The server's HELLO reply.
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Subscribe to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn check_size(&self, size: usize) -> Result<(), SessionError> {
        if size > self.max_payload_size as usize {
            return Err(FrameError::PayloadTooLarge {
                size: size as u64,
                max: self.max_payload_size,
            }
            .into());
        }
        Ok(())
    }

    async fn submit(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Closed)
    }

    /// Send a public chat line.
    pub async fn send_chat(&self, text: &str) -> Result<(), SessionError> {
        self.check_size(text.len())?;
        self.submit(SessionCommand::Chat(text.to_string())).await
    }

    /// Send a private chat line to `slot`.
    pub async fn send_private_chat(&self, slot: Slot, text: &str) -> Result<(), SessionError> {
        if text.len() > PRIVATE_CHAT_TEXT_LEN {
            return Err(FrameError::PayloadTooLarge {
                size: text.len() as u64,
                max: PRIVATE_CHAT_TEXT_LEN as u32,
            }
            .into());
        }
        self.check_size(4 + PRIVATE_CHAT_TEXT_LEN)?;
        self.submit(SessionCommand::PrivateChat {
            slot,
            text: text.to_string(),
        })
        .await
    }

    /// Send a script command.
    pub async fn send_game_command(&self, script: &str) -> Result<(), SessionError> {
        self.check_size(script.len())?;
        self.submit(SessionCommand::GameCommand(script.to_string())).await
    }

    /// Send an arbitrary frame.
    pub async fn send_command_frame(&self, frame: Frame) -> Result<(), SessionError> {
        self.check_size(frame.declared_length())?;
        self.submit(SessionCommand::Send(frame)).await
    }

    /// Register a local stream and announce it to the server.
    pub async fn register_stream(&self, descriptor: StreamDescriptor) -> Result<StreamId, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.submit(SessionCommand::RegisterStream { descriptor, reply }).await?;
        Ok(rx.await.map_err(|_| SessionError::Closed)??)
    }

    /// Unregister a local stream.
    pub async fn unregister_stream(&self, id: StreamId) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.submit(SessionCommand::UnregisterStream { id, reply }).await?;
        Ok(rx.await.map_err(|_| SessionError::Closed)??)
    }

    /// Say goodbye and close the connection.
    ///
    /// Waits for the session task for at most the heartbeat timeout plus the
    /// disconnect timeout, then aborts it.
    pub async fn disconnect(self) {
        let Self {
            commands,
            state,
            mut task,
            close_timeout,
            ..
        } = self;
        let finish = async {
            let _ = commands.send(SessionCommand::Disconnect).await;
            let _ = (&mut task).await;
        };
        if time::timeout(close_timeout, finish).await.is_err() {
            tracing::warn!(timeout = ?close_timeout, "session task did not stop, aborting it");
            task.abort();
            state.set(ConnectionState::Disconnected);
        }
    }
}

fn handshake_failure(frame: &Frame) -> SessionError {
    match frame.message_type {
        MessageType::WrongVersion => {
            let actual = decode_text(&frame.payload);
            SessionError::ProtocolVersion {
                expected: RORNET_VERSION.to_string(),
                actual: if actual.is_empty() { "unknown".to_string() } else { actual },
            }
        }
        MessageType::ServerFull => SessionError::HandshakeRejected(RejectReason::ServerFull),
        MessageType::WrongPassword => SessionError::HandshakeRejected(RejectReason::WrongPassword),
        MessageType::Banned => SessionError::HandshakeRejected(RejectReason::Banned),
        other => SessionError::UnexpectedMessage(other),
    }
}

async fn handshake<S>(
    io: &mut S,
    buffer: &mut FrameBuffer,
    credentials: &Credentials,
    config: &FrameConfig,
    state: &ConnectionStateWatch,
) -> Result<(ServerInfo, UserInfo), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = Frame::new(MessageType::Hello, 0, 0, RORNET_VERSION.as_bytes().to_vec());
    write_frame(io, &hello, config).await?;

    let reply = read_frame(io, buffer, config).await?;
    if reply.message_type != MessageType::Hello {
        return Err(handshake_failure(&reply));
    }
    let server_info = ServerInfo::from_bytes(&reply.payload)?;
    if server_info.protocol_version != RORNET_VERSION {
        return Err(SessionError::ProtocolVersion {
            expected: RORNET_VERSION.to_string(),
            actual: server_info.protocol_version,
        });
    }
    tracing::debug!(server = %server_info.server_name, "received server info");

    state.set(ConnectionState::Authenticating);
    let user_info = Frame::new(MessageType::UserInfo, 0, 0, credentials.user_info().to_bytes());
    write_frame(io, &user_info, config).await?;

    loop {
        let frame = read_frame(io, buffer, config).await?;
        match frame.message_type {
            MessageType::Welcome => {
                let me = UserInfo::from_bytes(&frame.payload)?;
                return Ok((server_info, me));
            }
            MessageType::ServerFull
            | MessageType::WrongPassword
            | MessageType::WrongVersion
            | MessageType::Banned => return Err(handshake_failure(&frame)),
            other => tracing::debug!(message_type = ?other, "ignoring frame before welcome"),
        }
    }
}

async fn announce_stream<W>(
    writer: &mut W,
    registry: &mut StreamRegistry,
    owner: Slot,
    descriptor: StreamDescriptor,
    config: &FrameConfig,
) -> Result<StreamId, SessionError>
where
    W: AsyncWrite + Unpin,
{
    let id = registry.register(owner, descriptor)?;
    let register = registry
        .stream(owner, id)
        .map(Stream::to_register)
        .ok_or(RegistryError::UnknownStream { owner, id })?;
    let frame = Frame::new(MessageType::StreamRegister, owner, id, register.to_bytes());
    write_frame(writer, &frame, config).await?;
    Ok(id)
}

async fn announce_own_streams<W>(
    writer: &mut W,
    registry: &mut StreamRegistry,
    local_slot: Slot,
    replay: &[StreamDescriptor],
    config: &FrameConfig,
) -> Result<(StreamId, StreamId), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let chat = announce_stream(writer, registry, local_slot, StreamDescriptor::chat(), config).await?;
    let character =
        announce_stream(writer, registry, local_slot, StreamDescriptor::character(), config).await?;

    for descriptor in replay {
        match announce_stream(writer, registry, local_slot, descriptor.clone(), config).await {
            Ok(id) => tracing::info!(stream = id, name = %descriptor.name, "replayed stream registration"),
            Err(SessionError::Registry(e)) => {
                tracing::warn!(error = %e, name = %descriptor.name, "could not replay stream")
            }
            Err(e) => return Err(e),
        }
    }
    Ok((chat, character))
}

fn parse_or_warn<T>(result: Result<T, MessageError>, what: &'static str, source: Slot) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, source, "dropping malformed {what}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Session loop
// ---------------------------------------------------------------------------

struct SessionLoop<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    buffer: FrameBuffer,
    frame_config: FrameConfig,
    registry: StreamRegistry,
    local_slot: Slot,
    chat_stream: StreamId,
    character_stream: StreamId,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: Arc<ConnectionStateWatch>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    disconnect_timeout: Duration,
    last_received: Instant,
    last_heartbeat_sent: Option<Instant>,
    net_quality: Option<u32>,
}

impl<S> SessionLoop<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let mut heartbeat = time::interval_at(Instant::now() + self.heartbeat_interval, self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            let deadline = self.last_received + self.heartbeat_timeout;
            let step = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => Err(DisconnectReason::Requested),
                },
                read = self.buffer.fill_from(&mut self.reader) => self.handle_read(read).await,
                _ = heartbeat.tick() => self.send_heartbeat().await,
                _ = time::sleep_until(deadline) => {
                    tracing::warn!(
                        timeout = ?self.heartbeat_timeout,
                        last_heartbeat_sent = ?self.last_heartbeat_sent.map(|t| t.elapsed()),
                        "no frame received within heartbeat timeout"
                    );
                    Err(DisconnectReason::HeartbeatTimeout)
                }
            };
            if let Err(reason) = step {
                break reason;
            }
        };

        commands.close();
        self.shutdown(reason).await;
    }

    async fn shutdown(mut self, reason: DisconnectReason) {
        tracing::info!(%reason, "disconnecting");
        self.state.set(ConnectionState::Disconnecting);

        let leave = Frame::empty(MessageType::UserLeave, self.local_slot, 0);
        let goodbye = async {
            write_frame(&mut self.writer, &leave, &self.frame_config).await?;
            self.writer.shutdown().await?;
            Ok::<_, FrameError>(())
        };
        match time::timeout(self.disconnect_timeout, goodbye).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "goodbye not delivered"),
            Err(_) => tracing::debug!("goodbye timed out"),
        }

        self.state.set(ConnectionState::Disconnected);
        let _ = self.events.send(SessionEvent::Disconnected { reason });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Write one frame. A peer that accepts nothing for a whole heartbeat
    /// timeout is treated like one that sends nothing.
    async fn write(&mut self, frame: Frame) -> Result<(), DisconnectReason> {
        let limit = self.heartbeat_timeout;
        match time::timeout(limit, write_frame(&mut self.writer, &frame, &self.frame_config)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "write failed");
                Err(DisconnectReason::Io(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(timeout = ?limit, "write stalled, peer is not reading");
                Err(DisconnectReason::HeartbeatTimeout)
            }
        }
    }

    async fn send_heartbeat(&mut self) -> Result<(), DisconnectReason> {
        let payload = StreamPayload::character_position(
            Vector3::default(),
            0.0,
            self.heartbeat_interval.as_secs_f32(),
        );
        let frame = Frame::new(MessageType::StreamData, self.local_slot, self.character_stream, payload);
        self.write(frame).await?;
        self.last_heartbeat_sent = Some(Instant::now());
        tracing::trace!("heartbeat sent");
        Ok(())
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Result<(), DisconnectReason> {
        match command {
            SessionCommand::Send(frame) => self.write(frame).await,
            SessionCommand::Chat(text) => {
                tracing::info!(message = %text, "[CHAT] sending");
                let frame = Frame::new(MessageType::Chat, self.local_slot, self.chat_stream, text.into_bytes());
                self.write(frame).await
            }
            SessionCommand::PrivateChat { slot, text } => {
                tracing::info!(to = slot, message = %text, "[PRIV] sending");
                let frame = Frame::new(
                    MessageType::PrivateChat,
                    self.local_slot,
                    self.chat_stream,
                    private_chat_payload(slot, &text),
                );
                self.write(frame).await
            }
            SessionCommand::GameCommand(script) => {
                tracing::debug!(script = %script, "sending game command");
                let frame = Frame::new(MessageType::GameCmd, self.local_slot, 0, script.into_bytes());
                self.write(frame).await
            }
            SessionCommand::RegisterStream { descriptor, reply } => {
                let announce = announce_stream(
                    &mut self.writer,
                    &mut self.registry,
                    self.local_slot,
                    descriptor,
                    &self.frame_config,
                );
                let Ok(result) = time::timeout(self.heartbeat_timeout, announce).await else {
                    tracing::warn!(timeout = ?self.heartbeat_timeout, "write stalled, peer is not reading");
                    return Err(DisconnectReason::HeartbeatTimeout);
                };
                match result {
                    Ok(id) => {
                        let _ = reply.send(Ok(id));
                        Ok(())
                    }
                    Err(SessionError::Registry(e)) => {
                        let _ = reply.send(Err(e));
                        Ok(())
                    }
                    Err(e) => Err(DisconnectReason::Io(e.to_string())),
                }
            }
            SessionCommand::UnregisterStream { id, reply } => match self.registry.unregister(self.local_slot, id) {
                Ok(_) => {
                    self.write(Frame::empty(MessageType::StreamUnregister, self.local_slot, id))
                        .await?;
                    let _ = reply.send(Ok(()));
                    Ok(())
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Ok(())
                }
            },
            SessionCommand::Disconnect => Err(DisconnectReason::Requested),
        }
    }

    async fn handle_read(&mut self, read: Result<usize, FrameError>) -> Result<(), DisconnectReason> {
        match read {
            Ok(_) => {}
            Err(FrameError::ConnectionClosed) => return Err(DisconnectReason::ServerClosed),
            Err(e) => return Err(DisconnectReason::Io(e.to_string())),
        }

        loop {
            match self.buffer.next_frame(&self.frame_config) {
                Ok(Some(frame)) => {
                    self.last_received = Instant::now();
                    self.handle_frame(frame).await?;
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    tracing::error!(error = %e, "protocol violation");
                    return Err(DisconnectReason::ProtocolViolation(e.to_string()));
                }
            }
        }
    }

    fn username(&self, slot: Slot) -> String {
        match self.registry.player(slot) {
            Some(player) => player.username.clone(),
            None if slot == SERVER_SOURCE => "server".to_string(),
            None => format!("uid {slot}"),
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), DisconnectReason> {
        let source = frame.source;
        let own = source == self.local_slot;

        match frame.message_type {
            MessageType::UserJoin => {
                if own {
                    return Ok(());
                }
                let Some(info) = parse_or_warn(UserInfo::from_bytes(&frame.payload), "user join", source) else {
                    return Ok(());
                };
                tracing::info!(slot = info.unique_id, username = %info.username, "player joined");
                let player = self.registry.add_player(&info, std::time::Instant::now()).clone();
                self.emit(SessionEvent::PlayerJoined(player));
            }
            MessageType::UserInfo => {
                let Some(info) = parse_or_warn(UserInfo::from_bytes(&frame.payload), "user info", source) else {
                    return Ok(());
                };
                let player = match self.registry.update_player(&info) {
                    Ok(player) => player.clone(),
                    Err(_) => self.registry.add_player(&info, std::time::Instant::now()).clone(),
                };
                if player.slot != self.local_slot {
                    self.emit(SessionEvent::PlayerInfoUpdated(player));
                }
            }
            MessageType::UserLeave => {
                let reason = decode_text(&frame.payload);
                if own {
                    return Err(DisconnectReason::Kicked { reason });
                }
                if let Some(player) = self.registry.remove_player(source) {
                    tracing::info!(slot = source, username = %player.username, %reason, "player left");
                    self.emit(SessionEvent::PlayerLeft { player, reason });
                }
            }
            MessageType::Chat => {
                let text = decode_text(&frame.payload);
                tracing::info!(from = source, message = %text, "[CHAT] received");
                if !own && !text.is_empty() {
                    let username = self.username(source);
                    self.emit(SessionEvent::ChatReceived {
                        slot: source,
                        username,
                        text,
                    });
                }
            }
            MessageType::PrivateChat => {
                let text = private_chat_text(&frame.payload);
                tracing::info!(from = source, message = %text, "[PRIV] received");
                if !own && !text.is_empty() {
                    let username = self.username(source);
                    self.emit(SessionEvent::PrivateChatReceived {
                        slot: source,
                        username,
                        text,
                    });
                }
            }
            MessageType::GameCmd => {
                let script = decode_text(&frame.payload);
                if !own && !script.is_empty() {
                    tracing::debug!(from = source, %script, "game command received");
                    self.emit(SessionEvent::GameCommandReceived { slot: source, script });
                }
            }
            MessageType::StreamRegister => {
                if own {
                    return Ok(());
                }
                let Some(register) =
                    parse_or_warn(StreamRegister::from_bytes(&frame.payload), "stream register", source)
                else {
                    return Ok(());
                };
                self.handle_stream_register(source, register).await?;
            }
            MessageType::StreamRegisterResult => {
                if let Some(result) = parse_or_warn(
                    StreamRegister::from_bytes(&frame.payload),
                    "stream register result",
                    source,
                ) {
                    tracing::debug!(
                        from = source,
                        stream = result.origin_stream_id,
                        status = result.status,
                        "stream register result"
                    );
                }
            }
            MessageType::StreamUnregister => {
                if own {
                    return Ok(());
                }
                match self.registry.unregister(source, frame.stream_id) {
                    Ok(stream) => self.emit(SessionEvent::StreamUnregistered(stream)),
                    Err(e) => tracing::debug!(error = %e, "ignoring unregister"),
                }
            }
            MessageType::StreamData | MessageType::StreamDataDiscardable => {
                if own {
                    return Ok(());
                }
                // Data may arrive before the registration it belongs to right after login.
                let Some(kind) = self.registry.stream(source, frame.stream_id).map(|s| s.kind) else {
                    tracing::trace!(source, stream = frame.stream_id, "data for unknown stream");
                    return Ok(());
                };
                let payload = StreamPayload::parse(kind, &frame.payload).unwrap_or_else(|e| {
                    tracing::debug!(error = %e, "keeping unparsed stream data");
                    StreamPayload::Raw(frame.payload.clone())
                });
                self.emit(SessionEvent::StreamData {
                    slot: source,
                    stream_id: frame.stream_id,
                    payload,
                });
            }
            MessageType::NetQuality => {
                if frame.payload.len() < 4 {
                    tracing::warn!(len = frame.payload.len(), "short net quality payload");
                    return Ok(());
                }
                let quality = (&frame.payload[..]).get_u32_le();
                if self.net_quality != Some(quality) {
                    tracing::debug!(previous = ?self.net_quality, quality, "net quality changed");
                    self.net_quality = Some(quality);
                    self.emit(SessionEvent::NetQualityChanged { quality });
                }
            }
            MessageType::ServerFull
            | MessageType::WrongPassword
            | MessageType::WrongVersion
            | MessageType::Banned => {
                tracing::warn!(message_type = ?frame.message_type, "login reply after login, ignoring");
            }
            MessageType::Hello
            | MessageType::Welcome
            | MessageType::ServerVersion
            | MessageType::ServerSettings
            | MessageType::MasterServerInfo
            | MessageType::UserInfoLegacy => {
                tracing::debug!(message_type = ?frame.message_type, "ignoring frame");
            }
        }
        Ok(())
    }

    async fn handle_stream_register(&mut self, owner: Slot, register: StreamRegister) -> Result<(), DisconnectReason> {
        let id = match self.registry.register(owner, StreamDescriptor::from_register(&register)) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting stream registration");
                return Ok(());
            }
        };
        tracing::info!(
            owner,
            stream = id,
            kind = register.stream_type.as_str(),
            name = %register.name,
            "stream registered"
        );

        if register.stream_type == StreamType::Actor {
            let mut result = register;
            result.status = actor_status::SUCCESS;
            let frame = Frame::new(
                MessageType::StreamRegisterResult,
                self.local_slot,
                id,
                result.to_bytes(),
            );
            self.write(frame).await?;
        }

        if let Some(stream) = self.registry.stream(owner, id) {
            self.emit(SessionEvent::StreamRegistered(stream.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::messages::StreamRegisterData;
    use crate::testing::{FakeServer, credentials, user};

    const UID: Slot = 7;

    fn quiet_config() -> SessionConfig {
        SessionConfig {
            frame: FrameConfig::default(),
            heartbeat_interval: Duration::from_secs(3600),
            heartbeat_timeout: Duration::from_secs(7200),
            ..SessionConfig::default()
        }
    }

    async fn connected(config: SessionConfig) -> (Session, mpsc::UnboundedReceiver<SessionEvent>, FakeServer) {
        let (client, mut server) = FakeServer::pair(config.frame.clone());
        let state = Arc::new(ConnectionStateWatch::new());
        let credentials = credentials();
        let (result, ()) = tokio::join!(
            Session::establish(client, &credentials, &config, &[], state),
            server.accept(UID)
        );
        let (session, events) = result.unwrap();
        (session, events, server)
    }

    #[tokio::test]
    async fn test_connection_state_starts_disconnected() {
        let watch = ConnectionStateWatch::new();
        assert_eq!(watch.current(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_handshake_logs_in_and_registers_streams() {
        let config = quiet_config();
        let (client, mut server) = FakeServer::pair(config.frame.clone());
        let state = Arc::new(ConnectionStateWatch::new());
        let credentials = credentials();
        let states = state.subscribe();

        let server_side = async {
            let hello = server.expect(MessageType::Hello).await;
            assert_eq!(&hello.payload[..], RORNET_VERSION.as_bytes());
            server.send_server_info(RORNET_VERSION).await;

            let login = server.expect(MessageType::UserInfo).await;
            let info = UserInfo::from_bytes(&login.payload).unwrap();
            assert_eq!(info.username, "Bridge");
            assert_eq!(info.server_password, hash_password("hunter2"));
            assert_eq!(info.session_type, "bot");
            server.send_welcome(UID).await;

            let chat = server.expect(MessageType::StreamRegister).await;
            let character = server.expect(MessageType::StreamRegister).await;
            (chat, character)
        };

        let (result, (chat, character)) = tokio::join!(
            Session::establish(client, &credentials, &config, &[], Arc::clone(&state)),
            server_side
        );
        let (session, _events) = result.unwrap();

        assert_eq!(session.local_slot(), UID);
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.server_info().server_name, "Test Server");
        assert!(states.has_changed().unwrap());

        assert_eq!((chat.source, chat.stream_id), (UID, 10));
        assert_eq!(StreamRegister::from_bytes(&chat.payload).unwrap().name, "chat");
        assert_eq!(character.stream_id, 11);
        let register = StreamRegister::from_bytes(&character.payload).unwrap();
        assert_eq!(register.stream_type, StreamType::Character);
        assert_eq!(register.name, "default");
    }

    #[tokio::test]
    async fn test_version_mismatch_fails_and_disconnects() {
        let config = quiet_config();
        let (client, mut server) = FakeServer::pair(config.frame.clone());
        let state = Arc::new(ConnectionStateWatch::new());
        let credentials = credentials();

        let server_side = async {
            server.expect(MessageType::Hello).await;
            server.send_server_info("RoRnet_2.38").await;
        };
        let (result, ()) = tokio::join!(
            Session::establish(client, &credentials, &config, &[], Arc::clone(&state)),
            server_side
        );

        let err = result.err().unwrap();
        assert!(
            matches!(&err, SessionError::ProtocolVersion { actual, .. } if actual == "RoRnet_2.38"),
            "got {err:?}"
        );
        assert!(err.is_fatal());
        assert_eq!(state.current(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_wrong_version_reply_is_version_error() {
        let config = quiet_config();
        let (client, mut server) = FakeServer::pair(config.frame.clone());
        let state = Arc::new(ConnectionStateWatch::new());
        let credentials = credentials();

        let server_side = async {
            server.expect(MessageType::Hello).await;
            server.send(Frame::empty(MessageType::WrongVersion, 0, 0)).await;
        };
        let (result, ()) = tokio::join!(
            Session::establish(client, &credentials, &config, &[], state),
            server_side
        );
        assert!(matches!(result.err(), Some(SessionError::ProtocolVersion { .. })));
    }

    #[tokio::test]
    async fn test_wrong_password_rejects_handshake() {
        let config = quiet_config();
        let (client, mut server) = FakeServer::pair(config.frame.clone());
        let state = Arc::new(ConnectionStateWatch::new());
        let credentials = credentials();

        let server_side = async {
            server.expect(MessageType::Hello).await;
            server.send_server_info(RORNET_VERSION).await;
            server.expect(MessageType::UserInfo).await;
            server.send(Frame::empty(MessageType::WrongPassword, 0, 0)).await;
        };
        let (result, ()) = tokio::join!(
            Session::establish(client, &credentials, &config, &[], Arc::clone(&state)),
            server_side
        );

        let err = result.err().unwrap();
        assert!(matches!(err, SessionError::HandshakeRejected(RejectReason::WrongPassword)));
        assert!(err.is_fatal());
        assert_eq!(state.current(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_server_times_out_handshake() {
        let config = quiet_config();
        let (client, _server) = FakeServer::pair(config.frame.clone());
        let state = Arc::new(ConnectionStateWatch::new());
        let credentials = credentials();

        let result = Session::establish(client, &credentials, &config, &[], state).await;
        assert!(matches!(result.err(), Some(SessionError::HandshakeTimeout(_))));
    }

    #[tokio::test]
    async fn test_presence_and_chat_events() {
        let (_session, mut events, mut server) = connected(quiet_config()).await;

        server.send(Frame::new(MessageType::UserJoin, 3, 0, user(3, "Alice").to_bytes())).await;
        server.send(Frame::new(MessageType::Chat, UID, 10, b"echo of my own line".to_vec())).await;
        server.send(Frame::new(MessageType::Chat, 3, 10, b"hello\0\0\0".to_vec())).await;
        server.send(Frame::new(MessageType::UserLeave, 3, 0, b"quit".to_vec())).await;

        let SessionEvent::PlayerJoined(player) = events.recv().await.unwrap() else {
            panic!("expected join");
        };
        assert_eq!((player.slot, player.username.as_str()), (3, "Alice"));

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::ChatReceived {
                slot: 3,
                username: "Alice".to_string(),
                text: "hello".to_string(),
            }
        );

        let SessionEvent::PlayerLeft { player, reason } = events.recv().await.unwrap() else {
            panic!("expected leave");
        };
        assert_eq!(player.username, "Alice");
        assert_eq!(reason, "quit");
    }

    #[tokio::test]
    async fn test_actor_registration_is_acknowledged() {
        let (_session, mut events, mut server) = connected(quiet_config()).await;

        server.send(Frame::new(MessageType::UserJoin, 3, 0, user(3, "Alice").to_bytes())).await;
        let register = StreamRegister {
            stream_type: StreamType::Actor,
            status: 0,
            origin_source_id: 3,
            origin_stream_id: 12,
            name: "agoras.truck".to_string(),
            data: StreamRegisterData::Actor {
                buffer_size: 256,
                timestamp: 1000,
                skin: String::new(),
                section_config: String::new(),
            },
        };
        server.send(Frame::new(MessageType::StreamRegister, 3, 12, register.to_bytes())).await;

        let result = server.expect(MessageType::StreamRegisterResult).await;
        assert_eq!(result.source, UID);
        let result = StreamRegister::from_bytes(&result.payload).unwrap();
        assert_eq!(result.status, actor_status::SUCCESS);
        assert_eq!(result.origin_stream_id, 12);

        assert!(matches!(events.recv().await, Some(SessionEvent::PlayerJoined(_))));
        let Some(SessionEvent::StreamRegistered(stream)) = events.recv().await else {
            panic!("expected stream registration");
        };
        assert_eq!((stream.owner, stream.id, stream.kind), (3, 12, StreamType::Actor));
    }

    #[tokio::test]
    async fn test_character_stream_data_is_parsed() {
        let (_session, mut events, mut server) = connected(quiet_config()).await;

        server.send(Frame::new(MessageType::UserJoin, 3, 0, user(3, "Alice").to_bytes())).await;
        let mut register = StreamRegister::character();
        register.origin_source_id = 3;
        register.origin_stream_id = 10;
        server.send(Frame::new(MessageType::StreamRegister, 3, 10, register.to_bytes())).await;
        let position = Vector3 { x: 1.0, y: 2.0, z: 3.0 };
        server
            .send(Frame::new(
                MessageType::StreamData,
                3,
                10,
                StreamPayload::character_position(position, 0.0, 0.0),
            ))
            .await;

        events.recv().await.unwrap();
        events.recv().await.unwrap();
        let Some(SessionEvent::StreamData { slot, stream_id, payload }) = events.recv().await else {
            panic!("expected stream data");
        };
        assert_eq!((slot, stream_id), (3, 10));
        assert!(matches!(payload, StreamPayload::CharacterPosition { position: p, .. } if p == position));
    }

    #[tokio::test]
    async fn test_outbound_requests_are_framed() {
        let (session, _events, mut server) = connected(quiet_config()).await;

        session.send_chat("hi all").await.unwrap();
        let chat = server.expect(MessageType::Chat).await;
        assert_eq!((chat.source, chat.stream_id), (UID, 10));
        assert_eq!(&chat.payload[..], b"hi all");

        session.send_private_chat(3, "psst").await.unwrap();
        let private = server.expect(MessageType::PrivateChat).await;
        assert_eq!(private_chat_text(&private.payload), "psst");
        assert_eq!(&private.payload[..4], &3u32.to_le_bytes());

        session.send_game_command("game.log('x');").await.unwrap();
        let script = server.expect(MessageType::GameCmd).await;
        assert_eq!(&script.payload[..], b"game.log('x');");

        let id = session
            .register_stream(StreamDescriptor::local(StreamType::Chat, "extra"))
            .await
            .unwrap();
        assert_eq!(id, 12);
        let register = server.expect(MessageType::StreamRegister).await;
        assert_eq!(register.stream_id, 12);

        session.unregister_stream(id).await.unwrap();
        let unregister = server.expect(MessageType::StreamUnregister).await;
        assert_eq!(unregister.stream_id, 12);

        let err = session.unregister_stream(id).await.unwrap_err();
        assert!(matches!(err, SessionError::Registry(RegistryError::UnknownStream { .. })));
    }

    #[tokio::test]
    async fn test_oversized_chat_is_refused_locally() {
        let (session, _events, _server) = connected(quiet_config()).await;
        let text = "x".repeat(9000);
        let err = session.send_chat(&text).await.unwrap_err();
        assert!(matches!(err, SessionError::Frame(FrameError::PayloadTooLarge { .. })));
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_oversized_private_chat_is_refused_locally() {
        let (session, _events, _server) = connected(quiet_config()).await;
        let err = session.send_private_chat(3, &"x".repeat(9000)).await.unwrap_err();
        assert!(matches!(err, SessionError::Frame(FrameError::PayloadTooLarge { .. })));

        let small = SessionConfig {
            frame: FrameConfig {
                max_payload_size: 6000,
                ..FrameConfig::default()
            },
            ..quiet_config()
        };
        let (session, _events, _server) = connected(small).await;
        let err = session.send_private_chat(3, "psst").await.unwrap_err();
        assert!(matches!(err, SessionError::Frame(FrameError::PayloadTooLarge { size: 8004, max: 6000 })));
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_that_stops_reading_times_out() {
        let config = SessionConfig {
            heartbeat_interval: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(30),
            ..quiet_config()
        };
        // The server end stays open but is never read again.
        let (session, mut events, _server) = connected(config).await;

        let text = "x".repeat(8000);
        let flood = async {
            for _ in 0..100 {
                if session.send_chat(&text).await.is_err() {
                    break;
                }
            }
        };
        let ((), event) = tokio::join!(flood, time::timeout(Duration::from_secs(300), events.recv()));
        assert_eq!(
            event.unwrap(),
            Some(SessionEvent::Disconnected {
                reason: DisconnectReason::HeartbeatTimeout
            })
        );

        assert!(time::timeout(Duration::from_secs(60), session.disconnect()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_is_character_position() {
        let config = SessionConfig {
            heartbeat_interval: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(30),
            ..quiet_config()
        };
        let (_session, _events, mut server) = connected(config).await;

        let beat = server.expect(MessageType::StreamData).await;
        assert_eq!((beat.source, beat.stream_id), (UID, 11));
        let payload = StreamPayload::parse(StreamType::Character, &beat.payload).unwrap();
        assert!(matches!(payload, StreamPayload::CharacterPosition { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_fires_exactly_once() {
        let config = SessionConfig {
            heartbeat_interval: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(30),
            ..quiet_config()
        };
        let (session, mut events, server) = connected(config).await;
        let drain = tokio::spawn(server.drain());

        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Disconnected {
                reason: DisconnectReason::HeartbeatTimeout
            })
        );
        assert_eq!(events.recv().await, None);
        assert_eq!(session.state(), ConnectionState::Disconnected);

        let frames = drain.await.unwrap();
        assert!(frames.iter().any(|f| f.message_type == MessageType::StreamData));
        assert_eq!(frames.last().map(|f| f.message_type), Some(MessageType::UserLeave));
    }

    #[tokio::test]
    async fn test_leave_for_own_slot_is_a_kick() {
        let (_session, mut events, mut server) = connected(quiet_config()).await;
        server.send(Frame::new(MessageType::UserLeave, UID, 0, b"kicked by admin".to_vec())).await;

        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Disconnected {
                reason: DisconnectReason::Kicked {
                    reason: "kicked by admin".to_string()
                }
            })
        );
    }

    #[tokio::test]
    async fn test_corrupt_frame_is_protocol_violation() {
        let (_session, mut events, mut server) = connected(quiet_config()).await;

        let mut bytes = encode(&Frame::new(MessageType::Chat, 3, 10, b"hi".to_vec()), &FrameConfig::default())
            .unwrap()
            .to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        server.send_raw(&bytes).await;

        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Disconnected {
                reason: DisconnectReason::ProtocolViolation(_)
            })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_sends_user_leave() {
        let (session, mut events, mut server) = connected(quiet_config()).await;
        let mut states = session.subscribe_state();

        session.disconnect().await;
        server.expect(MessageType::UserLeave).await;
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Disconnected {
                reason: DisconnectReason::Requested
            })
        );
    }

    #[tokio::test]
    async fn test_server_close_ends_session() {
        let (_session, mut events, server) = connected(quiet_config()).await;
        drop(server);
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Disconnected {
                reason: DisconnectReason::ServerClosed
            })
        );
    }
}
