//! Fixed-header framing for RoRnet streams.
//!
//! Every message on the wire is a 16-byte header followed by the payload and,
//! when enabled, a CRC32 trailer:
//!
//! ```text
//! +-----------+-----------+-----------+-----------+-----------+-----------+
//! | command   | source    | stream_id | size      | payload   | crc32 (*) |
//! | u32 LE    | u32 LE    | u32 LE    | u32 LE    | size bytes| u32 LE    |
//! +-----------+-----------+-----------+-----------+-----------+-----------+
//! ```
//!
//! `size` counts payload bytes only. The checksum covers header and payload.
//! Decoding is a pure function over an accumulating buffer: [`decode`] never
//! hands out a partial frame, and [`FrameBuffer`] keeps leftover bytes around
//! until the rest of the frame arrives.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 16;

/// Size of the optional CRC32 trailer in bytes.
pub const CHECKSUM_LEN: usize = 4;

/// RoRnet message type codes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client announces its protocol version; server answers with server info.
    Hello = 1025,
    /// Server is full.
    ServerFull = 1026,
    /// Wrong server password.
    WrongPassword = 1027,
    /// Client protocol version not accepted.
    WrongVersion = 1028,
    /// Client is banned.
    Banned = 1029,
    /// Client accepted; payload is the final user info.
    Welcome = 1030,
    /// Server version string.
    ServerVersion = 1031,
    /// Server settings (terrain name).
    ServerSettings = 1032,
    /// User info record, sent in both directions.
    UserInfo = 1033,
    /// Master server info.
    MasterServerInfo = 1034,
    /// Network quality indicator.
    NetQuality = 1035,
    /// Script command, both directions.
    GameCmd = 1036,
    /// A user joined.
    UserJoin = 1037,
    /// A user left; payload is the reason.
    UserLeave = 1038,
    /// Public chat line, UTF-8.
    Chat = 1039,
    /// Private chat line, UTF-8.
    PrivateChat = 1040,
    /// Create a stream.
    StreamRegister = 1041,
    /// Result of an actor stream registration.
    StreamRegisterResult = 1042,
    /// Remove a stream.
    StreamUnregister = 1043,
    /// Stream data.
    StreamData = 1044,
    /// Stream data that may be discarded under load.
    StreamDataDiscardable = 1045,
    /// Pre-2.x user info.
    UserInfoLegacy = 1003,
}

impl MessageType {
    /// Map a wire code to a message type. Returns `None` for unknown codes.
    pub fn from_code(code: u32) -> Option<Self> {
        let message_type = match code {
            1025 => Self::Hello,
            1026 => Self::ServerFull,
            1027 => Self::WrongPassword,
            1028 => Self::WrongVersion,
            1029 => Self::Banned,
            1030 => Self::Welcome,
            1031 => Self::ServerVersion,
            1032 => Self::ServerSettings,
            1033 => Self::UserInfo,
            1034 => Self::MasterServerInfo,
            1035 => Self::NetQuality,
            1036 => Self::GameCmd,
            1037 => Self::UserJoin,
            1038 => Self::UserLeave,
            1039 => Self::Chat,
            1040 => Self::PrivateChat,
            1041 => Self::StreamRegister,
            1042 => Self::StreamRegisterResult,
            1043 => Self::StreamUnregister,
            1044 => Self::StreamData,
            1045 => Self::StreamDataDiscardable,
            1003 => Self::UserInfoLegacy,
            _ => return None,
        };
        Some(message_type)
    }

    /// The wire code of this message type.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// What the decoder does with a header whose type code it does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownTypePolicy {
    /// Treat the frame as a protocol violation.
    #[default]
    Reject,
    /// Consume and skip the frame.
    Ignore,
}

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 8192, the RoRnet ceiling.
    pub max_payload_size: u32,
    /// Append and verify a CRC32 trailer. Default: `true`.
    pub checksum: bool,
    /// Handling of unknown type codes. Default: [`UnknownTypePolicy::Reject`].
    pub unknown_types: UnknownTypePolicy,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 8192,
            checksum: true,
            unknown_types: UnknownTypePolicy::Reject,
        }
    }
}

impl FrameConfig {
    fn trailer_len(&self) -> usize {
        if self.checksum { CHECKSUM_LEN } else { 0 }
    }
}

/// One discrete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type.
    pub message_type: MessageType,
    /// Slot (unique id) of the sender. 0 is the server.
    pub source: u32,
    /// Stream the message belongs to.
    pub stream_id: u32,
    /// Payload bytes. The declared length on the wire is always `payload.len()`.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame with the given payload.
    pub fn new(
        message_type: MessageType,
        source: u32,
        stream_id: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            message_type,
            source,
            stream_id,
            payload: payload.into(),
        }
    }

    /// Create a frame without payload.
    pub fn empty(message_type: MessageType, source: u32, stream_id: u32) -> Self {
        Self::new(message_type, source, stream_id, Bytes::new())
    }

    /// Length written into the `size` header field.
    pub fn declared_length(&self) -> usize {
        self.payload.len()
    }

    /// Total number of bytes this frame occupies on the wire.
    pub fn encoded_len(&self, config: &FrameConfig) -> usize {
        HEADER_LEN + self.payload.len() + config.trailer_len()
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The declared or actual payload size.
        size: u64,
        /// The configured maximum.
        max: u32,
    },

    /// The CRC32 trailer does not match header and payload.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes.
        expected: u32,
        /// Checksum carried by the frame.
        actual: u32,
    },

    /// The header carries a type code this client does not know.
    #[error("unknown message type code {0}")]
    UnknownMessageType(u32),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the error is a protocol violation (as opposed to transport loss).
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::PayloadTooLarge { .. } | Self::ChecksumMismatch { .. } | Self::UnknownMessageType(_)
        )
    }
}

/// Result of a single [`decode`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame and the number of bytes it occupied.
    Frame(Frame, usize),
    /// A complete frame with an unknown type code was skipped.
    Skipped {
        /// The unknown type code.
        code: u32,
        /// Bytes to discard.
        consumed: usize,
    },
    /// The buffer does not yet hold a complete frame.
    NeedMoreData,
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Append the wire form of `frame` to `buf`.
pub fn encode_into(frame: &Frame, config: &FrameConfig, buf: &mut BytesMut) -> Result<(), FrameError> {
    let len = frame.payload.len();
    if len as u64 > u64::from(config.max_payload_size) {
        return Err(FrameError::PayloadTooLarge {
            size: len as u64,
            max: config.max_payload_size,
        });
    }

    let start = buf.len();
    buf.reserve(frame.encoded_len(config));
    buf.put_u32_le(frame.message_type.code());
    buf.put_u32_le(frame.source);
    buf.put_u32_le(frame.stream_id);
    buf.put_u32_le(len as u32);
    buf.put_slice(&frame.payload);
    if config.checksum {
        let crc = checksum(&buf[start..]);
        buf.put_u32_le(crc);
    }
    Ok(())
}

/// Encode `frame` into a fresh buffer.
pub fn encode(frame: &Frame, config: &FrameConfig) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::with_capacity(frame.encoded_len(config));
    encode_into(frame, config, &mut buf)?;
    Ok(buf.freeze())
}

/// Try to decode one frame from the front of `buf`.
///
/// Never consumes anything itself; the caller advances by the returned count.
/// An oversized declared length is reported as soon as the header is
/// available, without waiting for the payload.
pub fn decode(buf: &[u8], config: &FrameConfig) -> Result<Decoded, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(Decoded::NeedMoreData);
    }

    let mut header = &buf[..HEADER_LEN];
    let code = header.get_u32_le();
    let source = header.get_u32_le();
    let stream_id = header.get_u32_le();
    let size = header.get_u32_le();

    if size > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: u64::from(size),
            max: config.max_payload_size,
        });
    }

    let message_type = MessageType::from_code(code);
    if message_type.is_none() && config.unknown_types == UnknownTypePolicy::Reject {
        return Err(FrameError::UnknownMessageType(code));
    }

    let body_end = HEADER_LEN + size as usize;
    let total = body_end + config.trailer_len();
    if buf.len() < total {
        return Ok(Decoded::NeedMoreData);
    }

    if config.checksum {
        let expected = checksum(&buf[..body_end]);
        let actual = (&buf[body_end..total]).get_u32_le();
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }
    }

    let Some(message_type) = message_type else {
        return Ok(Decoded::Skipped {
            code,
            consumed: total,
        });
    };

    let frame = Frame {
        message_type,
        source,
        stream_id,
        payload: Bytes::copy_from_slice(&buf[HEADER_LEN..body_end]),
    };
    Ok(Decoded::Frame(frame, total))
}

/// Accumulating receive buffer that yields whole frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered, not yet decoded bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pop the next complete frame, skipping unknown ones when configured to.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On error the buffer is
    /// left untouched; the caller is expected to drop the connection.
    pub fn next_frame(&mut self, config: &FrameConfig) -> Result<Option<Frame>, FrameError> {
        loop {
            match decode(&self.buf, config)? {
                Decoded::Frame(frame, consumed) => {
                    self.buf.advance(consumed);
                    return Ok(Some(frame));
                }
                Decoded::Skipped { code, consumed } => {
                    tracing::debug!(code, consumed, "skipping frame with unknown type code");
                    self.buf.advance(consumed);
                }
                Decoded::NeedMoreData => return Ok(None),
            }
        }
    }

    /// Read more bytes from `reader` into the buffer.
    ///
    /// Returns [`FrameError::ConnectionClosed`] on EOF. Cancel safe.
    pub async fn fill_from<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R) -> Result<usize, FrameError> {
        match reader.read_buf(&mut self.buf).await? {
            0 => Err(FrameError::ConnectionClosed),
            n => Ok(n),
        }
    }
}

/// Read a single frame, pulling from `reader` until one is complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    buffer: &mut FrameBuffer,
    config: &FrameConfig,
) -> Result<Frame, FrameError> {
    loop {
        if let Some(frame) = buffer.next_frame(config)? {
            return Ok(frame);
        }
        buffer.fill_from(reader).await?;
    }
}

/// Encode and write a single frame, then flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame: &Frame,
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let bytes = encode(frame, config)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn default_config() -> FrameConfig {
        FrameConfig::default()
    }

    fn chat_frame(text: &str) -> Frame {
        Frame::new(MessageType::Chat, 3, 10, text.as_bytes().to_vec())
    }

    #[test]
    fn test_roundtrip_reports_full_length() {
        let config = default_config();
        let frame = chat_frame("hello world");
        let bytes = encode(&frame, &config).unwrap();

        let decoded = decode(&bytes, &config).unwrap();
        assert_eq!(decoded, Decoded::Frame(frame, bytes.len()));
    }

    #[test]
    fn test_roundtrip_without_checksum() {
        let config = FrameConfig {
            checksum: false,
            ..Default::default()
        };
        let frame = Frame::empty(MessageType::StreamUnregister, 7, 12);
        let bytes = encode(&frame, &config).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);

        let decoded = decode(&bytes, &config).unwrap();
        assert_eq!(decoded, Decoded::Frame(frame, HEADER_LEN));
    }

    #[test]
    fn test_header_is_little_endian() {
        let config = FrameConfig {
            checksum: false,
            ..Default::default()
        };
        let bytes = encode(&chat_frame("hi"), &config).unwrap();
        assert_eq!(&bytes[0..4], &1039u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &3u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &10u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &2u32.to_le_bytes());
        assert_eq!(&bytes[16..], b"hi");
    }

    #[test]
    fn test_byte_at_a_time_yields_exactly_one_frame() {
        let config = default_config();
        let frame = chat_frame("streamed one byte at a time");
        let bytes = encode(&frame, &config).unwrap();

        let mut buffer = FrameBuffer::new();
        for (i, byte) in bytes.iter().enumerate() {
            buffer.extend(&[*byte]);
            let result = buffer.next_frame(&config).unwrap();
            if i + 1 < bytes.len() {
                assert!(result.is_none(), "frame produced early at byte {i}");
            } else {
                assert_eq!(result, Some(frame.clone()));
            }
        }
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_frame(&config).unwrap(), None);
    }

    #[test]
    fn test_back_to_back_frames_dont_merge() {
        let config = default_config();
        let mut buffer = FrameBuffer::new();
        buffer.extend(&encode(&chat_frame("aaa"), &config).unwrap());
        buffer.extend(&encode(&chat_frame("bbb"), &config).unwrap());

        let first = buffer.next_frame(&config).unwrap().unwrap();
        let second = buffer.next_frame(&config).unwrap().unwrap();
        assert_eq!(&first.payload[..], b"aaa");
        assert_eq!(&second.payload[..], b"bbb");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_oversized_declared_length_is_malformed_with_header_only() {
        let config = FrameConfig {
            max_payload_size: 16,
            ..Default::default()
        };
        let mut header = BytesMut::new();
        header.put_u32_le(MessageType::Chat.code());
        header.put_u32_le(1);
        header.put_u32_le(10);
        header.put_u32_le(1024);

        let result = decode(&header, &config);
        assert!(
            matches!(result, Err(FrameError::PayloadTooLarge { size: 1024, max: 16 })),
            "oversized frame must be malformed, not NeedMoreData"
        );
        assert!(result.unwrap_err().is_malformed());
    }

    #[test]
    fn test_oversized_payload_rejected_on_encode() {
        let config = FrameConfig {
            max_payload_size: 16,
            ..Default::default()
        };
        let frame = Frame::new(MessageType::Chat, 1, 10, vec![0u8; 1024]);
        assert!(matches!(
            encode(&frame, &config),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_corrupted_payload_fails_checksum() {
        let config = default_config();
        let mut bytes = BytesMut::from(&encode(&chat_frame("hello"), &config).unwrap()[..]);
        bytes[HEADER_LEN] ^= 0xFF;

        assert!(matches!(
            decode(&bytes, &config),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_type_rejected_by_default() {
        let config = default_config();
        let mut bytes = BytesMut::new();
        bytes.put_u32_le(4242);
        bytes.put_u32_le(0);
        bytes.put_u32_le(0);
        bytes.put_u32_le(0);

        assert!(matches!(
            decode(&bytes, &config),
            Err(FrameError::UnknownMessageType(4242))
        ));
    }

    #[test]
    fn test_unknown_type_skipped_when_ignored() {
        let config = FrameConfig {
            checksum: false,
            unknown_types: UnknownTypePolicy::Ignore,
            ..Default::default()
        };
        let mut buffer = FrameBuffer::new();
        let mut unknown = BytesMut::new();
        unknown.put_u32_le(4242);
        unknown.put_u32_le(0);
        unknown.put_u32_le(0);
        unknown.put_u32_le(3);
        unknown.put_slice(b"xyz");
        buffer.extend(&unknown);
        buffer.extend(&encode(&chat_frame("after"), &config).unwrap());

        let frame = buffer.next_frame(&config).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"after");
    }

    #[test]
    fn test_every_known_code_maps_back() {
        for code in (1025..=1045).chain(std::iter::once(1003)) {
            let message_type = MessageType::from_code(code).unwrap();
            assert_eq!(message_type.code(), code);
        }
        assert_eq!(MessageType::from_code(1046), None);
    }

    #[tokio::test]
    async fn test_read_write_over_duplex() {
        let (mut client, mut server) = duplex(8); // tiny buffer forces partial reads
        let config = default_config();
        let frame = chat_frame("this message is larger than the pipe");

        let write_config = config.clone();
        let write_frame_copy = frame.clone();
        let write_task = tokio::spawn(async move {
            write_frame(&mut client, &write_frame_copy, &write_config)
                .await
                .unwrap();
        });

        let mut buffer = FrameBuffer::new();
        let received = read_frame(&mut server, &mut buffer, &config).await.unwrap();
        write_task.await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn test_connection_closed_mid_frame() {
        let (mut client, mut server) = duplex(64);
        let config = default_config();
        let bytes = encode(&chat_frame("truncated"), &config).unwrap();
        client.write_all(&bytes[..10]).await.unwrap();
        drop(client);

        let mut buffer = FrameBuffer::new();
        let result = read_frame(&mut server, &mut buffer, &config).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }
}
