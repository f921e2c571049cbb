//! RoRnet 2.44 client: wire codec, payload records, stream registry, session and reconnection.

pub mod codec;
pub mod messages;
pub mod registry;
pub mod session;
pub mod supervisor;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use codec::{Decoded, Frame, FrameBuffer, FrameConfig, FrameError, MessageType, UnknownTypePolicy};
pub use messages::{AuthStatus, MessageError, RORNET_VERSION, ServerInfo, StreamPayload, StreamType, UserInfo};
pub use registry::{Player, RegistryError, Slot, Stream, StreamDescriptor, StreamId, StreamRegistry};
pub use session::{
    ConnectionState, ConnectionStateWatch, Credentials, DisconnectReason, Session, SessionConfig, SessionError,
    SessionEvent,
};
pub use supervisor::{
    Connect, ReconnectConfig, Supervisor, SupervisorError, SupervisorEvent, SupervisorHandle, TcpConnector,
};
