//! In-memory RoRnet server for tests. Enabled for other crates by the
//! `test-util` feature.

use tokio::io::{AsyncWriteExt, DuplexStream, duplex};

use crate::codec::{Frame, FrameBuffer, FrameConfig, MessageType, read_frame, write_frame};
use crate::messages::{AuthStatus, ServerInfo, UserInfo};
use crate::registry::Slot;
use crate::session::Credentials;

pub fn credentials() -> Credentials {
    Credentials {
        username: "Bridge".to_string(),
        password: "hunter2".to_string(),
        user_token: String::new(),
        language: "en-US".to_string(),
    }
}

pub fn user(slot: Slot, name: &str) -> UserInfo {
    UserInfo {
        unique_id: slot,
        auth_status: AuthStatus::NONE,
        slot_num: slot as i32,
        color_num: 1,
        username: name.to_string(),
        language: "en-US".to_string(),
        client_name: "RoR".to_string(),
        client_version: "2022.12".to_string(),
        ..UserInfo::default()
    }
}

pub struct FakeServer {
    io: DuplexStream,
    buffer: FrameBuffer,
    config: FrameConfig,
}

impl FakeServer {
    /// A connected `(client end, server)` pair.
    pub fn pair(config: FrameConfig) -> (DuplexStream, Self) {
        let (client, server) = duplex(64 * 1024);
        (
            client,
            Self {
                io: server,
                buffer: FrameBuffer::new(),
                config,
            },
        )
    }

    pub async fn recv(&mut self) -> Frame {
        read_frame(&mut self.io, &mut self.buffer, &self.config).await.unwrap()
    }

    /// Receive frames until one of type `message_type` shows up. Heartbeats
    /// are skipped unless they are what the test waits for.
    pub async fn expect(&mut self, message_type: MessageType) -> Frame {
        loop {
            let frame = self.recv().await;
            if frame.message_type == message_type {
                return frame;
            }
            assert_eq!(
                frame.message_type,
                MessageType::StreamData,
                "expected {message_type:?}, got {frame:?}"
            );
        }
    }

    pub async fn send(&mut self, frame: Frame) {
        write_frame(&mut self.io, &frame, &self.config).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.unwrap();
    }

    pub async fn send_server_info(&mut self, version: &str) {
        let info = ServerInfo {
            protocol_version: version.to_string(),
            terrain_name: "simple2".to_string(),
            server_name: "Test Server".to_string(),
            has_password: true,
            info: String::new(),
        };
        self.send(Frame::new(MessageType::Hello, 0, 0, info.to_bytes())).await;
    }

    pub async fn send_welcome(&mut self, uid: Slot) {
        let mut me = user(uid, "Bridge");
        me.auth_status = AuthStatus::BOT;
        self.send(Frame::new(MessageType::Welcome, 0, 0, me.to_bytes())).await;
    }

    /// Play the server side of a successful login, including the two stream
    /// registrations that follow WELCOME.
    pub async fn accept(&mut self, uid: Slot) {
        self.expect(MessageType::Hello).await;
        self.send_server_info(crate::messages::RORNET_VERSION).await;
        self.expect(MessageType::UserInfo).await;
        self.send_welcome(uid).await;
        self.expect(MessageType::StreamRegister).await;
        self.expect(MessageType::StreamRegister).await;
    }

    /// Read frames until the client goes away and return them.
    pub async fn drain(mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = read_frame(&mut self.io, &mut self.buffer, &self.config).await {
            frames.push(frame);
        }
        frames
    }
}
