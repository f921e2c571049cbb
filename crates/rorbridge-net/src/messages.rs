//! Fixed-layout payload records carried inside RoRnet frames.
//!
//! All integers are little-endian. Strings are fixed-width, NUL-padded byte
//! fields; they are truncated on write and trimmed at the first NUL on read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

/// Protocol version string advertised in the HELLO frame.
pub const RORNET_VERSION: &str = "RoRnet_2.44";

/// Size of a private chat message field.
pub const PRIVATE_CHAT_TEXT_LEN: usize = 8000;

/// Errors produced while parsing payload records.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    /// The payload is shorter than the record layout requires.
    #[error("{record} payload too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Name of the record being parsed.
        record: &'static str,
        /// Minimum size of the record.
        expected: usize,
        /// Size of the payload.
        actual: usize,
    },
    /// Unknown stream type code.
    #[error("invalid stream type {0}")]
    InvalidStreamType(i32),
    /// Unknown character stream command.
    #[error("invalid character command {0}")]
    InvalidCharacterCommand(i32),
}

fn ensure_len(record: &'static str, data: &[u8], expected: usize) -> Result<(), MessageError> {
    if data.len() < expected {
        return Err(MessageError::TooShort {
            record,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn put_fixed_str(buf: &mut BytesMut, value: &str, width: usize) {
    let mut end = value.len().min(width);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_slice(&value.as_bytes()[..end]);
    buf.put_bytes(0, width - end);
}

fn get_fixed_str(data: &mut &[u8], width: usize) -> String {
    let field = &data[..width];
    let text = decode_text(field);
    data.advance(width);
    text
}

/// Decode a NUL-padded UTF-8 field, replacing invalid sequences.
pub fn decode_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Hash a plain-text server password the way RoRnet expects: uppercase hex SHA1.
pub fn hash_password(plain: &str) -> String {
    hex::encode_upper(Sha1::digest(plain.as_bytes()))
}

// ---------------------------------------------------------------------------
// ServerInfo
// ---------------------------------------------------------------------------

/// Server description returned in reply to HELLO.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerInfo {
    /// Protocol version the server speaks.
    pub protocol_version: String,
    /// Name of the loaded terrain.
    pub terrain_name: String,
    /// Human readable server name.
    pub server_name: String,
    /// Whether joining requires a password.
    pub has_password: bool,
    /// MOTD text.
    pub info: String,
}

impl ServerInfo {
    /// Encoded size of the record.
    pub const LEN: usize = 20 + 128 + 128 + 1 + 4096;

    /// Parse the record.
    pub fn from_bytes(mut data: &[u8]) -> Result<Self, MessageError> {
        ensure_len("server info", data, Self::LEN)?;
        Ok(Self {
            protocol_version: get_fixed_str(&mut data, 20),
            terrain_name: get_fixed_str(&mut data, 128),
            server_name: get_fixed_str(&mut data, 128),
            has_password: data.get_u8() != 0,
            info: get_fixed_str(&mut data, 4096),
        })
    }

    /// Encode the record.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        put_fixed_str(&mut buf, &self.protocol_version, 20);
        put_fixed_str(&mut buf, &self.terrain_name, 128);
        put_fixed_str(&mut buf, &self.server_name, 128);
        buf.put_u8(u8::from(self.has_password));
        put_fixed_str(&mut buf, &self.info, 4096);
        buf.freeze()
    }
}

// ---------------------------------------------------------------------------
// AuthStatus / UserInfo
// ---------------------------------------------------------------------------

/// Authentication flags assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AuthStatus(pub u32);

impl AuthStatus {
    /// No authentication.
    pub const NONE: Self = Self(0);
    /// Server administrator.
    pub const ADMIN: Self = Self(1);
    /// Ranked player.
    pub const RANKED: Self = Self(1 << 1);
    /// Moderator.
    pub const MOD: Self = Self(1 << 2);
    /// Bot client.
    pub const BOT: Self = Self(1 << 3);
    /// Banned.
    pub const BANNED: Self = Self(1 << 4);

    /// Whether every flag of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the user holds any authenticated role.
    pub fn is_authenticated(self) -> bool {
        self.0 & (Self::ADMIN.0 | Self::RANKED.0 | Self::MOD.0 | Self::BOT.0) != 0
    }

    /// One-letter tag used in player listings.
    pub fn tag(self) -> &'static str {
        if self.contains(Self::ADMIN) {
            "A"
        } else if self.contains(Self::MOD) {
            "M"
        } else if self.contains(Self::RANKED) {
            "R"
        } else if self.contains(Self::BOT) {
            "B"
        } else if self.contains(Self::BANNED) {
            "X"
        } else {
            ""
        }
    }
}

/// Per-user record exchanged during login and on join/info updates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserInfo {
    /// Server-assigned unique id; the `source` of this user's frames.
    pub unique_id: u32,
    /// Authentication flags.
    pub auth_status: AuthStatus,
    /// Slot number on the server, -1 while unassigned.
    pub slot_num: i32,
    /// Colour index, -1 while unassigned.
    pub color_num: i32,
    /// Display name.
    pub username: String,
    /// User token.
    pub user_token: String,
    /// Hashed server password.
    pub server_password: String,
    /// Language tag, e.g. `en-US`.
    pub language: String,
    /// Client name.
    pub client_name: String,
    /// Client version, e.g. `2022.12`.
    pub client_version: String,
    /// Client GUID.
    pub client_guid: String,
    /// Session type (`normal`, `bot`, `rcon`).
    pub session_type: String,
    /// Reserved.
    pub session_options: String,
}

impl UserInfo {
    /// Encoded size of the record.
    pub const LEN: usize = 16 + 40 + 40 + 40 + 10 + 10 + 25 + 40 + 10 + 128;

    /// User info a bot client sends while authenticating.
    pub fn bot(username: &str, user_token: &str, password_hash: &str, language: &str) -> Self {
        Self {
            unique_id: 0,
            auth_status: AuthStatus::BOT,
            slot_num: -2,
            color_num: -1,
            username: username.to_string(),
            user_token: user_token.to_string(),
            server_password: password_hash.to_string(),
            language: language.to_string(),
            client_name: "bot".to_string(),
            client_version: "2022.12".to_string(),
            client_guid: String::new(),
            session_type: "bot".to_string(),
            session_options: String::new(),
        }
    }

    /// Parse the record.
    pub fn from_bytes(mut data: &[u8]) -> Result<Self, MessageError> {
        ensure_len("user info", data, Self::LEN)?;
        Ok(Self {
            unique_id: data.get_u32_le(),
            auth_status: AuthStatus(data.get_i32_le() as u32),
            slot_num: data.get_i32_le(),
            color_num: data.get_i32_le(),
            username: get_fixed_str(&mut data, 40),
            user_token: get_fixed_str(&mut data, 40),
            server_password: get_fixed_str(&mut data, 40),
            language: get_fixed_str(&mut data, 10),
            client_name: get_fixed_str(&mut data, 10),
            client_version: get_fixed_str(&mut data, 25),
            client_guid: get_fixed_str(&mut data, 40),
            session_type: get_fixed_str(&mut data, 10),
            session_options: get_fixed_str(&mut data, 128),
        })
    }

    /// Encode the record.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u32_le(self.unique_id);
        buf.put_i32_le(self.auth_status.0 as i32);
        buf.put_i32_le(self.slot_num);
        buf.put_i32_le(self.color_num);
        put_fixed_str(&mut buf, &self.username, 40);
        put_fixed_str(&mut buf, &self.user_token, 40);
        put_fixed_str(&mut buf, &self.server_password, 40);
        put_fixed_str(&mut buf, &self.language, 10);
        put_fixed_str(&mut buf, &self.client_name, 10);
        put_fixed_str(&mut buf, &self.client_version, 25);
        put_fixed_str(&mut buf, &self.client_guid, 40);
        put_fixed_str(&mut buf, &self.session_type, 10);
        put_fixed_str(&mut buf, &self.session_options, 128);
        buf.freeze()
    }
}

// ---------------------------------------------------------------------------
// Stream registration
// ---------------------------------------------------------------------------

/// Kind of data a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// Vehicle (truck, car, boat, ...) telemetry.
    Actor,
    /// Walking character.
    Character,
    /// AI-driven actor.
    Ai,
    /// Chat.
    Chat,
}

impl StreamType {
    /// Map a wire code to a stream type.
    pub fn from_code(code: i32) -> Result<Self, MessageError> {
        match code {
            0 => Ok(Self::Actor),
            1 => Ok(Self::Character),
            2 => Ok(Self::Ai),
            3 => Ok(Self::Chat),
            other => Err(MessageError::InvalidStreamType(other)),
        }
    }

    /// The wire code of this stream type.
    pub fn code(self) -> i32 {
        match self {
            Self::Actor => 0,
            Self::Character => 1,
            Self::Ai => 2,
            Self::Chat => 3,
        }
    }

    /// Lowercase name used in log and chat output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Actor => "truck",
            Self::Character => "character",
            Self::Ai => "ai",
            Self::Chat => "chat",
        }
    }
}

/// Status values carried in STREAM_REGISTER_RESULT replies.
pub mod actor_status {
    /// Actor file hash mismatch.
    pub const MISMATCH: i32 = -2;
    /// Actor could not be loaded.
    pub const INVALID: i32 = -1;
    /// Not yet known.
    pub const UNKNOWN: i32 = 0;
    /// Actor loaded.
    pub const SUCCESS: i32 = 1;
}

/// Type-specific part of a stream registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRegisterData {
    /// Chat, character and AI streams carry a short registration string.
    Generic {
        /// Registration data.
        reg_data: String,
    },
    /// Actor streams describe the vehicle being spawned.
    Actor {
        /// Size of one stream data buffer.
        buffer_size: i32,
        /// Registration timestamp, -1 when sent by this client.
        timestamp: i32,
        /// Skin name.
        skin: String,
        /// Section config name.
        section_config: String,
    },
}

/// STREAM_REGISTER / STREAM_REGISTER_RESULT payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRegister {
    /// Stream kind.
    pub stream_type: StreamType,
    /// Registration status (see [`actor_status`]).
    pub status: i32,
    /// Owner of the stream.
    pub origin_source_id: i32,
    /// Stream id chosen by the owner.
    pub origin_stream_id: i32,
    /// Stream name; the actor file name for actor streams.
    pub name: String,
    /// Type-specific data.
    pub data: StreamRegisterData,
}

impl StreamRegister {
    /// Encoded size of the record (both layouts have the same size).
    pub const LEN: usize = 16 + 128 + 128;

    /// The chat stream every client registers after login.
    pub fn chat() -> Self {
        Self {
            stream_type: StreamType::Chat,
            status: 0,
            origin_source_id: 0,
            origin_stream_id: 0,
            name: "chat".to_string(),
            data: StreamRegisterData::Generic {
                reg_data: "0".to_string(),
            },
        }
    }

    /// The character stream every client registers after login.
    pub fn character() -> Self {
        Self {
            stream_type: StreamType::Character,
            status: 0,
            origin_source_id: 0,
            origin_stream_id: 0,
            name: "default".to_string(),
            data: StreamRegisterData::Generic {
                reg_data: "\u{2}".to_string(),
            },
        }
    }

    /// Parse the record; the layout is chosen by the leading stream type.
    pub fn from_bytes(mut data: &[u8]) -> Result<Self, MessageError> {
        ensure_len("stream register", data, Self::LEN)?;
        let stream_type = StreamType::from_code(data.get_i32_le())?;
        let status = data.get_i32_le();
        let origin_source_id = data.get_i32_le();
        let origin_stream_id = data.get_i32_le();
        let name = get_fixed_str(&mut data, 128);
        let register_data = match stream_type {
            StreamType::Actor => StreamRegisterData::Actor {
                buffer_size: data.get_i32_le(),
                timestamp: data.get_i32_le(),
                skin: get_fixed_str(&mut data, 60),
                section_config: get_fixed_str(&mut data, 60),
            },
            _ => StreamRegisterData::Generic {
                reg_data: get_fixed_str(&mut data, 128),
            },
        };
        Ok(Self {
            stream_type,
            status,
            origin_source_id,
            origin_stream_id,
            name,
            data: register_data,
        })
    }

    /// Encode the record.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_i32_le(self.stream_type.code());
        buf.put_i32_le(self.status);
        buf.put_i32_le(self.origin_source_id);
        buf.put_i32_le(self.origin_stream_id);
        put_fixed_str(&mut buf, &self.name, 128);
        match &self.data {
            StreamRegisterData::Generic { reg_data } => put_fixed_str(&mut buf, reg_data, 128),
            StreamRegisterData::Actor {
                buffer_size,
                timestamp,
                skin,
                section_config,
            } => {
                buf.put_i32_le(*buffer_size);
                buf.put_i32_le(*timestamp);
                put_fixed_str(&mut buf, skin, 60);
                put_fixed_str(&mut buf, section_config, 60);
            }
        }
        buf.freeze()
    }
}

// ---------------------------------------------------------------------------
// Stream data
// ---------------------------------------------------------------------------

/// Position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Vector3 {
    fn read(data: &mut &[u8]) -> Self {
        Self {
            x: data.get_f32_le(),
            y: data.get_f32_le(),
            z: data.get_f32_le(),
        }
    }

    /// Straight-line distance to `other`.
    pub fn distance(&self, other: &Vector3) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Vehicle state broadcast on actor streams.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    /// Sender time in milliseconds.
    pub time: i32,
    /// Engine RPM.
    pub engine_rpm: f32,
    /// Engine acceleration.
    pub engine_acceleration: f32,
    /// Clutch position.
    pub engine_clutch: f32,
    /// Selected gear.
    pub engine_gear: i32,
    /// Steering input.
    pub steering: f32,
    /// Brake input.
    pub brake: f32,
    /// Wheel speed in m/s.
    pub wheel_speed: f32,
    /// State flags (horn, parking brake, engine mode...).
    pub flag_mask: u32,
    /// Light flags.
    pub light_mask: u32,
    /// Reference node position.
    pub position: Vector3,
    /// Compressed node positions, left opaque.
    pub node_data: Bytes,
}

impl VehicleState {
    /// Size of the fixed part of the record.
    pub const HEADER_LEN: usize = 52;
}

/// Character animation sent with the heartbeat.
pub const IDLE_ANIMATION: &str = "Idle_sway";

/// Parsed STREAM_DATA payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPayload {
    /// Character moved.
    CharacterPosition {
        /// Position in meters.
        position: Vector3,
        /// Heading in radians.
        rotation: f32,
        /// Animation clock.
        animation_time: f32,
        /// Animation name.
        animation_mode: String,
    },
    /// Character got into a vehicle.
    CharacterAttach {
        /// Owner of the vehicle stream.
        source_id: i32,
        /// Vehicle stream id.
        stream_id: i32,
        /// Seat index.
        position: i32,
    },
    /// Character left its vehicle.
    CharacterDetach,
    /// Vehicle telemetry.
    Vehicle(VehicleState),
    /// Chat stream data or anything else left unparsed.
    Raw(Bytes),
}

const CHARACTER_POSITION: i32 = 1;
const CHARACTER_ATTACH: i32 = 2;
const CHARACTER_DETACH: i32 = 3;

impl StreamPayload {
    /// Encoded size of a character position record.
    pub const CHARACTER_POSITION_LEN: usize = 4 + 12 + 4 + 4 + 10;

    /// Parse stream data according to the type of the stream it arrived on.
    pub fn parse(stream_type: StreamType, mut data: &[u8]) -> Result<Self, MessageError> {
        match stream_type {
            StreamType::Character => {
                ensure_len("character stream data", data, 4)?;
                match data.get_i32_le() {
                    CHARACTER_POSITION => {
                        ensure_len("character position", data, Self::CHARACTER_POSITION_LEN - 4)?;
                        Ok(Self::CharacterPosition {
                            position: Vector3::read(&mut data),
                            rotation: data.get_f32_le(),
                            animation_time: data.get_f32_le(),
                            animation_mode: get_fixed_str(&mut data, 10),
                        })
                    }
                    CHARACTER_ATTACH => {
                        ensure_len("character attach", data, 12)?;
                        Ok(Self::CharacterAttach {
                            source_id: data.get_i32_le(),
                            stream_id: data.get_i32_le(),
                            position: data.get_i32_le(),
                        })
                    }
                    CHARACTER_DETACH => Ok(Self::CharacterDetach),
                    other => Err(MessageError::InvalidCharacterCommand(other)),
                }
            }
            StreamType::Actor => {
                ensure_len("vehicle state", data, VehicleState::HEADER_LEN)?;
                let time = data.get_i32_le();
                let engine_rpm = data.get_f32_le();
                let engine_acceleration = data.get_f32_le();
                let engine_clutch = data.get_f32_le();
                let engine_gear = data.get_i32_le();
                let steering = data.get_f32_le();
                let brake = data.get_f32_le();
                let wheel_speed = data.get_f32_le();
                let flag_mask = data.get_u32_le();
                let light_mask = data.get_u32_le();
                let position = Vector3::read(&mut data);
                Ok(Self::Vehicle(VehicleState {
                    time,
                    engine_rpm,
                    engine_acceleration,
                    engine_clutch,
                    engine_gear,
                    steering,
                    brake,
                    wheel_speed,
                    flag_mask,
                    light_mask,
                    position,
                    node_data: Bytes::copy_from_slice(data),
                }))
            }
            StreamType::Chat | StreamType::Ai => Ok(Self::Raw(Bytes::copy_from_slice(data))),
        }
    }

    /// Encode a character position record; used as the session heartbeat.
    pub fn character_position(position: Vector3, rotation: f32, animation_time: f32) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::CHARACTER_POSITION_LEN);
        buf.put_i32_le(CHARACTER_POSITION);
        buf.put_f32_le(position.x);
        buf.put_f32_le(position.y);
        buf.put_f32_le(position.z);
        buf.put_f32_le(rotation);
        buf.put_f32_le(animation_time);
        put_fixed_str(&mut buf, IDLE_ANIMATION, 10);
        buf.freeze()
    }
}

/// Encode a PRIVATE_CHAT payload addressed to `target`.
pub fn private_chat_payload(target: u32, text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + PRIVATE_CHAT_TEXT_LEN);
    buf.put_u32_le(target);
    put_fixed_str(&mut buf, text, PRIVATE_CHAT_TEXT_LEN);
    buf.freeze()
}

/// Decode the text of an inbound PRIVATE_CHAT payload.
///
/// Servers relay private messages either with the target prefix or as bare
/// text; anything at least as long as the prefixed layout is treated as such.
pub fn private_chat_text(payload: &[u8]) -> String {
    if payload.len() >= 4 + PRIVATE_CHAT_TEXT_LEN {
        decode_text(&payload[4..])
    } else {
        decode_text(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_is_uppercase_sha1() {
        assert_eq!(hash_password(""), "DA39A3EE5E6B4B0D3255BFEF95601890AFD80709");
        assert_eq!(hash_password("abc"), "A9993E364706816ABA3E25717850C26C9CD0D89D");
    }

    #[test]
    fn test_server_info_roundtrip() {
        let info = ServerInfo {
            protocol_version: RORNET_VERSION.to_string(),
            terrain_name: "simple2".to_string(),
            server_name: "Test Server".to_string(),
            has_password: true,
            info: "welcome".to_string(),
        };
        let bytes = info.to_bytes();
        assert_eq!(bytes.len(), ServerInfo::LEN);
        assert_eq!(ServerInfo::from_bytes(&bytes).unwrap(), info);
    }

    #[test]
    fn test_server_info_too_short() {
        let result = ServerInfo::from_bytes(&[0u8; 10]);
        assert!(matches!(result, Err(MessageError::TooShort { actual: 10, .. })));
    }

    #[test]
    fn test_user_info_field_offsets() {
        let mut info = UserInfo::bot("Bridge", "tok", &hash_password(""), "en-US");
        info.unique_id = 7;
        let bytes = info.to_bytes();

        assert_eq!(bytes.len(), UserInfo::LEN);
        assert_eq!(&bytes[0..4], &7u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &8i32.to_le_bytes(), "bot auth flag");
        assert_eq!(&bytes[16..22], b"Bridge");
        assert_eq!(bytes[22], 0);
        assert_eq!(UserInfo::from_bytes(&bytes).unwrap(), info);
    }

    #[test]
    fn test_long_strings_are_truncated_on_char_boundary() {
        let mut info = UserInfo::default();
        info.language = "ééééééé".to_string(); // 14 bytes into a 10-byte field
        let decoded = UserInfo::from_bytes(&info.to_bytes()).unwrap();
        assert_eq!(decoded.language, "ééééé");
    }

    #[test]
    fn test_auth_status_flags() {
        let status = AuthStatus(AuthStatus::MOD.0 | AuthStatus::RANKED.0);
        assert!(status.contains(AuthStatus::MOD));
        assert!(!status.contains(AuthStatus::ADMIN));
        assert!(status.is_authenticated());
        assert_eq!(status.tag(), "M");
        assert!(!AuthStatus::NONE.is_authenticated());
    }

    #[test]
    fn test_stream_register_layouts() {
        let chat = StreamRegister::chat();
        let bytes = chat.to_bytes();
        assert_eq!(bytes.len(), StreamRegister::LEN);
        assert_eq!(StreamRegister::from_bytes(&bytes).unwrap(), chat);

        let actor = StreamRegister {
            stream_type: StreamType::Actor,
            status: 0,
            origin_source_id: 4,
            origin_stream_id: 11,
            name: "agoras.truck".to_string(),
            data: StreamRegisterData::Actor {
                buffer_size: 512,
                timestamp: -1,
                skin: "red".to_string(),
                section_config: String::new(),
            },
        };
        let bytes = actor.to_bytes();
        assert_eq!(bytes.len(), StreamRegister::LEN);
        assert_eq!(StreamRegister::from_bytes(&bytes).unwrap(), actor);
    }

    #[test]
    fn test_invalid_stream_type() {
        let mut bytes = BytesMut::from(&StreamRegister::chat().to_bytes()[..]);
        bytes[0..4].copy_from_slice(&9i32.to_le_bytes());
        assert_eq!(
            StreamRegister::from_bytes(&bytes),
            Err(MessageError::InvalidStreamType(9))
        );
    }

    #[test]
    fn test_character_position_parses_back() {
        let position = Vector3 { x: 1.0, y: 2.0, z: 3.0 };
        let bytes = StreamPayload::character_position(position, 0.5, 2.0);
        assert_eq!(bytes.len(), StreamPayload::CHARACTER_POSITION_LEN);

        let parsed = StreamPayload::parse(StreamType::Character, &bytes).unwrap();
        assert_eq!(
            parsed,
            StreamPayload::CharacterPosition {
                position,
                rotation: 0.5,
                animation_time: 2.0,
                animation_mode: IDLE_ANIMATION.to_string(),
            }
        );
    }

    #[test]
    fn test_vehicle_state_keeps_node_data() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(1000);
        for v in [900.0f32, 0.5, 0.0] {
            buf.put_f32_le(v);
        }
        buf.put_i32_le(3);
        for v in [0.1f32, 0.0, 12.5] {
            buf.put_f32_le(v);
        }
        buf.put_u32_le(0b1000);
        buf.put_u32_le(0);
        for v in [10.0f32, 20.0, 30.0] {
            buf.put_f32_le(v);
        }
        buf.put_slice(&[1, 2, 3, 4]);

        let StreamPayload::Vehicle(state) = StreamPayload::parse(StreamType::Actor, &buf).unwrap() else {
            panic!("expected vehicle state");
        };
        assert_eq!(state.engine_gear, 3);
        assert_eq!(state.wheel_speed, 12.5);
        assert_eq!(state.position, Vector3 { x: 10.0, y: 20.0, z: 30.0 });
        assert_eq!(&state.node_data[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_character_data_with_bad_command() {
        let result = StreamPayload::parse(StreamType::Character, &42i32.to_le_bytes());
        assert_eq!(result, Err(MessageError::InvalidCharacterCommand(42)));
    }

    #[test]
    fn test_private_chat_payload_layout() {
        let payload = private_chat_payload(5, "psst");
        assert_eq!(payload.len(), 4 + PRIVATE_CHAT_TEXT_LEN);
        assert_eq!(&payload[0..4], &5u32.to_le_bytes());
        assert_eq!(private_chat_text(&payload), "psst");
        assert_eq!(private_chat_text(b"bare\0\0"), "bare");
    }

    #[test]
    fn test_distance() {
        let a = Vector3::default();
        let b = Vector3 { x: 3.0, y: 4.0, z: 0.0 };
        assert_eq!(a.distance(&b), 5.0);
    }
}
