//! Reconnection supervisor with exponential backoff.
//!
//! The [`Supervisor`] owns the current [`Session`] and re-establishes it when
//! it dies for any reason other than a local shutdown. [`ReconnectState`]
//! computes increasing delays with jitter. Streams registered through the
//! [`SupervisorHandle`] are recorded and replayed with their old ids after a
//! reconnect.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};

use crate::codec::Frame;
use crate::registry::{Slot, StreamDescriptor, StreamId};
use crate::session::{
    ConnectionState, ConnectionStateWatch, Credentials, DisconnectReason, Session, SessionConfig, SessionError,
    SessionEvent,
};

/// Configuration for reconnection behaviour.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1 s.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Maximum delay between reconnection attempts. Default: 30 s.
    pub max_delay: Duration,
    /// Attempts before giving up; `None` retries forever at the capped delay. Default: 20.
    pub max_attempts: Option<u32>,
    /// Jitter factor (0.0–1.0), applied upwards only. Default: 0.25.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: Some(20),
            jitter: 0.25,
        }
    }
}

/// Tracks reconnection attempt count and computes the next backoff delay.
///
/// Delays never decrease between two resets.
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
    last_delay: Duration,
}

impl ReconnectState {
    /// Create a new state from the given config.
    pub fn new(config: ReconnectConfig) -> Self {
        let initial = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay: initial,
            last_delay: Duration::ZERO,
        }
    }

    /// Compute the next delay and advance the attempt counter.
    /// Returns `None` if max attempts have been exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts.is_some_and(|max| self.attempts >= max) {
            return None;
        }

        let base = self.current_delay;
        self.attempts += 1;

        // Uniform in [base, base * (1 + jitter)].
        let jittered = if self.config.jitter > 0.0 {
            let factor = rand::rng().random_range(1.0..=(1.0 + self.config.jitter));
            base.mul_f64(factor)
        } else {
            base
        };

        self.current_delay = self
            .current_delay
            .mul_f64(self.config.backoff_multiplier)
            .min(self.config.max_delay);

        let delay = jittered.min(self.config.max_delay).max(self.last_delay);
        self.last_delay = delay;
        Some(delay)
    }

    /// Reset the reconnection state (called after a successful reconnection).
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
        self.last_delay = Duration::ZERO;
    }

    /// Return the number of attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// A live session and its event stream.
pub type Connection = (Session, mpsc::UnboundedReceiver<SessionEvent>);

/// Opens sessions for the supervisor.
pub trait Connect: Send + Sync + 'static {
    /// Open a connection, log in and register `replay` after the bot's own streams.
    fn connect(
        &self,
        replay: &[StreamDescriptor],
        state: Arc<ConnectionStateWatch>,
    ) -> impl Future<Output = Result<Connection, SessionError>> + Send;
}

/// Connects over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// `host:port` of the game server.
    pub address: String,
    /// Login details.
    pub credentials: Credentials,
    /// Session tuning.
    pub config: SessionConfig,
}

impl Connect for TcpConnector {
    async fn connect(
        &self,
        replay: &[StreamDescriptor],
        state: Arc<ConnectionStateWatch>,
    ) -> Result<Connection, SessionError> {
        Session::connect(&self.address, &self.credentials, &self.config, replay, state).await
    }
}

/// What the supervisor reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// First successful login.
    Connected {
        /// Our slot.
        slot: Slot,
        /// Server name from the HELLO reply.
        server_name: String,
    },
    /// Logged in again after a connection loss.
    Reconnected {
        /// Our new slot.
        slot: Slot,
        /// Attempts it took.
        attempts: u32,
    },
    /// Event from the live session.
    Session(SessionEvent),
    /// The live session died; a reconnect will be scheduled.
    ConnectionLost {
        /// Why it died.
        reason: DisconnectReason,
    },
    /// Reconnect attempts exhausted.
    GaveUp {
        /// Attempts made.
        attempts: u32,
    },
    /// The server refused us in a way retrying cannot fix.
    Fatal {
        /// Error text.
        error: String,
    },
    /// The supervisor loop has ended. Always the last event.
    Stopped,
}

/// Supervisor errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The supervisor is no longer running.
    #[error("supervisor stopped")]
    Stopped,
    /// No live session to deliver to.
    #[error("not connected to the game server")]
    NotConnected,
    /// The request queue is full.
    #[error("request queue is full")]
    Busy,
    /// The session refused the request.
    #[error(transparent)]
    Session(#[from] SessionError),
}

enum Request {
    Chat(String),
    PrivateChat {
        slot: Slot,
        text: String,
    },
    GameCommand(String),
    Frame(Frame),
    Register {
        descriptor: StreamDescriptor,
        reply: oneshot::Sender<Result<StreamId, SupervisorError>>,
    },
    Unregister {
        id: StreamId,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
}

/// Cloneable handle for talking to the game server through the supervisor.
///
/// Requests are queued in order and delivered to the live session. The
/// `send_*` methods wait in the queue while reconnecting; the `try_send_*`
/// methods refuse instead.
#[derive(Clone)]
pub struct SupervisorHandle {
    requests: mpsc::Sender<Request>,
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<ConnectionState>,
}

impl SupervisorHandle {
    async fn submit(&self, request: Request) -> Result<(), SupervisorError> {
        self.requests.send(request).await.map_err(|_| SupervisorError::Stopped)
    }

    fn try_submit(&self, request: Request) -> Result<(), SupervisorError> {
        if self.state() != ConnectionState::Connected {
            return Err(SupervisorError::NotConnected);
        }
        self.requests.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SupervisorError::Busy,
            mpsc::error::TrySendError::Closed(_) => SupervisorError::Stopped,
        })
    }

    /// Queue a public chat line.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), SupervisorError> {
        self.submit(Request::Chat(text.into())).await
    }

    /// Queue a private chat line.
    pub async fn send_private_chat(&self, slot: Slot, text: impl Into<String>) -> Result<(), SupervisorError> {
        self.submit(Request::PrivateChat {
            slot,
            text: text.into(),
        })
        .await
    }

    /// Queue a public chat line without waiting. Fails unless logged in
    /// with room in the queue.
    pub fn try_send_chat(&self, text: impl Into<String>) -> Result<(), SupervisorError> {
        self.try_submit(Request::Chat(text.into()))
    }

    /// Queue a private chat line without waiting. Same rules as
    /// [`try_send_chat`](Self::try_send_chat).
    pub fn try_send_private_chat(&self, slot: Slot, text: impl Into<String>) -> Result<(), SupervisorError> {
        self.try_submit(Request::PrivateChat {
            slot,
            text: text.into(),
        })
    }

    /// Queue a script command.
    pub async fn send_game_command(&self, script: impl Into<String>) -> Result<(), SupervisorError> {
        self.submit(Request::GameCommand(script.into())).await
    }

    /// Queue a raw frame.
    pub async fn send_command_frame(&self, frame: Frame) -> Result<(), SupervisorError> {
        self.submit(Request::Frame(frame)).await
    }

    /// Register a stream; it is replayed after every reconnect until unregistered.
    pub async fn register_stream(&self, descriptor: StreamDescriptor) -> Result<StreamId, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Request::Register { descriptor, reply }).await?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// Unregister a stream.
    pub async fn unregister_stream(&self, id: StreamId) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Request::Unregister { id, reply }).await?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// Stop the supervisor. Skips any pending backoff.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

enum Pump {
    Lost(DisconnectReason),
    Stop,
}

/// Keeps a session alive.
pub struct Supervisor<C> {
    connector: C,
    reconnect: ReconnectConfig,
    state: Arc<ConnectionStateWatch>,
    requests: mpsc::Receiver<Request>,
    shutdown: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    subscriptions: BTreeMap<StreamId, StreamDescriptor>,
}

impl<C: Connect> Supervisor<C> {
    /// Create a supervisor, its handle and its event stream.
    pub fn new(
        connector: C,
        reconnect: ReconnectConfig,
        request_capacity: usize,
    ) -> (Self, SupervisorHandle, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let state = Arc::new(ConnectionStateWatch::new());
        let (requests_tx, requests_rx) = mpsc::channel(request_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let handle = SupervisorHandle {
            requests: requests_tx,
            shutdown: Arc::new(shutdown_tx),
            state: state.subscribe(),
        };
        let supervisor = Self {
            connector,
            reconnect,
            state,
            requests: requests_rx,
            shutdown: shutdown_rx,
            events: events_tx,
            subscriptions: BTreeMap::new(),
        };
        (supervisor, handle, events_rx)
    }

    fn emit(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }

    fn replay(&self) -> Vec<StreamDescriptor> {
        self.subscriptions
            .iter()
            .map(|(id, descriptor)| StreamDescriptor {
                requested_id: Some(*id),
                ..descriptor.clone()
            })
            .collect()
    }

    /// Run until shutdown, a fatal rejection, or exhausted retries.
    pub async fn run(mut self) {
        let mut backoff = ReconnectState::new(self.reconnect.clone());
        let mut connected_before = false;

        loop {
            let replay = self.replay();
            let attempt = tokio::select! {
                _ = self.shutdown.changed() => break,
                result = self.connector.connect(&replay, Arc::clone(&self.state)) => result,
            };

            match attempt {
                Ok((session, events)) => {
                    let slot = session.local_slot();
                    if connected_before {
                        tracing::info!(slot, attempts = backoff.attempts(), "reconnected");
                        self.emit(SupervisorEvent::Reconnected {
                            slot,
                            attempts: backoff.attempts(),
                        });
                    } else {
                        tracing::info!(slot, "connected");
                        self.emit(SupervisorEvent::Connected {
                            slot,
                            server_name: session.server_info().server_name.clone(),
                        });
                    }
                    connected_before = true;
                    backoff.reset();

                    match self.pump(session, events).await {
                        Pump::Lost(reason) => {
                            tracing::warn!(%reason, "connection lost");
                            self.emit(SupervisorEvent::ConnectionLost { reason });
                        }
                        Pump::Stop => break,
                    }
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "server refused login, not retrying");
                    self.emit(SupervisorEvent::Fatal { error: e.to_string() });
                    break;
                }
                Err(e) => {
                    tracing::warn!(attempt = backoff.attempts(), error = %e, "connection attempt failed");
                }
            }

            let Some(delay) = backoff.next_delay() else {
                tracing::error!(attempts = backoff.attempts(), "giving up");
                self.emit(SupervisorEvent::GaveUp {
                    attempts: backoff.attempts(),
                });
                break;
            };
            tracing::info!(attempt = backoff.attempts(), ?delay, "reconnecting");
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.requests.close();
        self.state.set(ConnectionState::Disconnected);
        self.emit(SupervisorEvent::Stopped);
    }

    async fn pump(&mut self, session: Session, mut events: mpsc::UnboundedReceiver<SessionEvent>) -> Pump {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    self.finish(session, events).await;
                    return Pump::Stop;
                }
                event = events.recv() => match event {
                    Some(SessionEvent::Disconnected { reason }) if reason.is_requested() => return Pump::Stop,
                    Some(SessionEvent::Disconnected { reason }) => return Pump::Lost(reason),
                    Some(event) => self.emit(SupervisorEvent::Session(event)),
                    None => return Pump::Lost(DisconnectReason::Io("session task ended".to_string())),
                },
                request = self.requests.recv() => match request {
                    Some(request) => self.forward(&session, request).await,
                    None => {
                        self.finish(session, events).await;
                        return Pump::Stop;
                    }
                },
            }
        }
    }

    async fn finish(&self, session: Session, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        session.disconnect().await;
        while let Some(event) = events.recv().await {
            if !matches!(event, SessionEvent::Disconnected { .. }) {
                self.emit(SupervisorEvent::Session(event));
            }
        }
    }

    async fn forward(&mut self, session: &Session, request: Request) {
        let result = match request {
            Request::Chat(text) => session.send_chat(&text).await,
            Request::PrivateChat { slot, text } => session.send_private_chat(slot, &text).await,
            Request::GameCommand(script) => session.send_game_command(&script).await,
            Request::Frame(frame) => session.send_command_frame(frame).await,
            Request::Register { descriptor, reply } => {
                let result = session.register_stream(descriptor.clone()).await;
                if let Ok(id) = result {
                    self.subscriptions.insert(id, descriptor);
                }
                let _ = reply.send(result.map_err(SupervisorError::from));
                return;
            }
            Request::Unregister { id, reply } => {
                let result = session.unregister_stream(id).await;
                if result.is_ok() {
                    self.subscriptions.remove(&id);
                }
                let _ = reply.send(result.map_err(SupervisorError::from));
                return;
            }
        };
        // A dead session reports its own Disconnected event; nothing else to do here.
        if let Err(e) = result {
            tracing::warn!(error = %e, "request not delivered");
        }
    }
}
