//! # Frame
//!
//! The `frame` module implements WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//! A frame is the smallest unit on the wire; one or more frames make up a [`Message`].
//!
//! ### Frame Binary Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! Frames come in two categories:
//!
//! - **Data Frames**: `OpCode::Text`, `OpCode::Binary` and `OpCode::Continuation`.
//! - **Control Frames**: `OpCode::Close`, `OpCode::Ping` and `OpCode::Pong`. They are never
//!   fragmented and carry at most 125 bytes of payload.
//!
//! No extension is ever negotiated, so all three RSV bits must be zero.
//!
//! ### Message Construction
//!
//! ```rust
//! use wsduplex::{frame::Message, close::CloseCode};
//!
//! let text = Message::text("Hello, WebSocket!");
//! let ping = Message::ping("are you there?");
//! let close = Message::close(Some(CloseCode::Normal), b"bye");
//! assert_eq!(close.close_code(), Some(CloseCode::Normal));
//! ```
use bytes::Bytes;

use crate::{close, close::CloseCode, WebSocketError};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest possible frame header: 2 fixed bytes, 8 bytes of extended length and a 4 byte mask.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// WebSocket operation code (OpCode) that determines the semantic meaning and handling of a frame.
///
/// The numeric values for each OpCode are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// - Continuation = 0x0
/// - Text = 0x1
/// - Binary = 0x2
/// - Close = 0x8
/// - Ping = 0x9
/// - Pong = 0xA
///
/// The ranges 0x3-0x7 and 0xB-0xF are reserved and rejected when parsing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`, `Ping`, or `Pong`).
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    /// Interprets the low nibble of the first header byte.
    ///
    /// Reserved opcodes fail with [`WebSocketError::InvalidOpCode`].
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Decoded frame header.
///
/// Parsing happens in two steps because the size of the header is only known after the
/// first two bytes: [`FrameHeader::parse`] reads the fixed part, then
/// [`FrameHeader::feed_extended_header`] folds in the
/// [`extended_header_size`](FrameHeader::extended_header_size) bytes that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment of a message.
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    /// Whether a mask key follows the length.
    pub masked: bool,
    /// Payload length. Holds the 7-bit length code until the extended header is fed.
    pub length: u64,
    /// Mask key in wire order, set once the extended header has been fed.
    pub mask_key: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Parses the fixed two bytes of a frame.
    ///
    /// Fails on reserved opcodes. RSV bits are reported, not rejected.
    pub fn parse(head: [u8; 2]) -> Result<Self, WebSocketError> {
        Ok(Self {
            fin: head[0] & 0b1000_0000 != 0,
            rsv1: head[0] & 0b0100_0000 != 0,
            rsv2: head[0] & 0b0010_0000 != 0,
            rsv3: head[0] & 0b0001_0000 != 0,
            opcode: OpCode::try_from(head[0] & 0b0000_1111)?,
            masked: head[1] & 0b1000_0000 != 0,
            length: u64::from(head[1] & 0b0111_1111),
            mask_key: None,
        })
    }

    /// Bytes used by the extended length field: 0, 2 or 8.
    pub fn extended_length_size(&self) -> usize {
        match self.length {
            126 => 2,
            127 => 8,
            _ => 0,
        }
    }

    /// Bytes following the fixed header: extended length plus the mask key, if any.
    pub fn extended_header_size(&self) -> usize {
        self.extended_length_size() + self.masked as usize * 4
    }

    /// Folds the extended header into `length` and `mask_key`.
    ///
    /// `extended` must hold exactly [`extended_header_size`](Self::extended_header_size) bytes.
    pub fn feed_extended_header(&mut self, extended: &[u8]) {
        let len_size = self.extended_length_size();
        match len_size {
            2 => self.length = u64::from(u16::from_be_bytes([extended[0], extended[1]])),
            8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&extended[..8]);
                self.length = u64::from_be_bytes(raw);
            }
            _ => {}
        }

        if self.masked {
            let mut key = [0u8; 4];
            key.copy_from_slice(&extended[len_size..len_size + 4]);
            self.mask_key = Some(key);
        }
    }

    /// Checks the invariants every frame must satisfy regardless of the connection.
    ///
    /// Call after the extended header has been fed.
    pub fn validate(&self) -> Result<(), WebSocketError> {
        if self.rsv1 || self.rsv2 || self.rsv3 {
            return Err(WebSocketError::ReservedBitsNotZero);
        }
        // the most significant bit of a 64-bit length must be zero
        if self.length >> 63 != 0 {
            return Err(WebSocketError::InvalidLength);
        }
        if self.opcode.is_control() {
            if !self.fin {
                return Err(WebSocketError::ControlFrameFragmented);
            }
            if self.length > MAX_CONTROL_PAYLOAD as u64 {
                return Err(WebSocketError::ControlFrameTooLarge);
            }
        }
        Ok(())
    }
}

/// A single WebSocket frame.
///
/// **Note: This low-level struct should rarely be used directly.** Applications exchange
/// [`Message`]s; frames are what the codec reads and writes.
///
/// The payload of a frame is always kept in clear. On a decoded frame `mask` is the key the
/// frame arrived with (the payload has already been unmasked). On an outgoing frame `mask`
/// is the key the encoder applies while writing.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    pub opcode: OpCode,
    pub(crate) mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    /// Returns whether the frame is (or was, on the wire) masked.
    #[inline(always)]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Returns the mask key.
    #[inline(always)]
    pub fn mask_key(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Assigns a fresh random mask key, as every client frame requires.
    pub(crate) fn mask(&mut self) {
        self.mask = Some(rand::random());
    }

    /// Formats the frame header into `head` and returns its size.
    ///
    /// The smallest length encoding that fits is used: 7 bits up to 125 bytes, 16 bits up
    /// to 65535 bytes, 64 bits beyond.
    ///
    /// # Panics
    /// Panics if `head` is shorter than the header, at most `MAX_HEAD_SIZE` bytes.
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len <= MAX_CONTROL_PAYLOAD {
            head[1] = len as u8;
            2
        } else if len <= u16::MAX as usize {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}

/// Converts a message into a single final frame with no mask.
impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Frame::new(true, message.opcode, None, message.payload)
    }
}

/// A complete WebSocket message.
///
/// Reassembled from one or more frames on the way in, split into one or more frames on the
/// way out. The opcode is never [`OpCode::Continuation`] and the payload is never masked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The operation code indicating the type of message (Text, Binary, Close, etc.)
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Message {
    /// Creates a text message.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: payload.into(),
        }
    }

    /// Creates a binary message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Ping,
            payload: payload.into(),
        }
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Pong,
            payload: payload.into(),
        }
    }

    /// Creates a close message. With `None` as code the payload is empty and `reason` is ignored.
    pub fn close(code: Option<CloseCode>, reason: impl AsRef<[u8]>) -> Self {
        Self {
            opcode: OpCode::Close,
            payload: close::encode_payload(code, reason.as_ref()).into(),
        }
    }

    /// Extracts the status code of a Close message.
    ///
    /// # Returns
    /// - `Some(CloseCode)` if the payload holds at least two bytes
    /// - `None` otherwise
    pub fn close_code(&self) -> Option<CloseCode> {
        let code = u16::from_be_bytes(self.payload.get(0..2)?.try_into().ok()?);
        Some(CloseCode::from(code))
    }

    /// Extracts the reason of a Close message, if present and valid UTF-8.
    pub fn close_reason(&self) -> Option<&str> {
        std::str::from_utf8(self.payload.get(2..)?).ok()
    }

    /// Returns the payload as text.
    ///
    /// Text messages produced by the reader are always valid UTF-8. For other payloads
    /// this fails with [`WebSocketError::InvalidUTF8`].
    pub fn as_str(&self) -> Result<&str, WebSocketError> {
        crate::utf8::parse_str(&self.payload)
    }
}

impl From<Message> for (OpCode, Bytes) {
    fn from(val: Message) -> Self {
        (val.opcode, val.payload)
    }
}

impl From<(OpCode, Bytes)> for Message {
    fn from((opcode, payload): (OpCode, Bytes)) -> Self {
        Self { opcode, payload }
    }
}
