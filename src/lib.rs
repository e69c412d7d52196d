//! # wsduplex
//! Implementation of the WebSocket protocol (RFC 6455) as a message layer over any async byte stream.
//!
//! The crate takes care of everything that happens after the HTTP upgrade: parsing and validating
//! frames, masking, reassembling fragmented messages, validating UTF-8 and driving the closing
//! handshake. The connection itself is any `tokio::io::AsyncRead + AsyncWrite + Unpin` value: a
//! `TcpStream`, a TLS stream, an upgraded hyper connection or an in-memory pipe.
//!
//! Pure helpers for the opening handshake live in [`handshake`]; they build and check the HTTP
//! headers but never perform any I/O.
//!
//! # Features
//! - `logging`: Enables debug logging of the connection lifecycle using the `log` crate.
//! - `simd`: Validates UTF-8 with `simdutf8`.
//!
//! # Example
//! ```rust
//! use futures::SinkExt;
//! use wsduplex::{frame::Message, Options, WebSocket};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> wsduplex::Result<()> {
//! let (client_io, server_io) = tokio::io::duplex(4096);
//!
//! let mut client = WebSocket::client(client_io, Options::default());
//! let mut server = WebSocket::server(server_io, Options::default());
//!
//! client.send(Message::text("Hello")).await?;
//!
//! let message = server.read().await?;
//! assert_eq!(message.as_str()?, "Hello");
//!
//! client.close(None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Closing
//! Any protocol violation detected while reading is answered with a Close frame carrying the
//! matching status code (see [`WebSocketError::close_code`]) before the error is returned. A Close
//! frame from the peer is answered with an empty Close frame and surfaced as
//! [`WebSocketError::ClosedByPeer`].
#![cfg_attr(docsrs, feature(doc_cfg))]

mod native;

pub mod close;
pub mod codec;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod utf8;

use thiserror::Error;

pub use native::*;

use close::CloseCode;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
///
/// This type alias simplifies function signatures within the WebSocket module by providing a
/// standard result type for operations that may return a `WebSocketError`.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur during WebSocket operations.
///
/// The errors are broadly categorized into:
///
/// - Protocol errors (e.g., invalid frames, incorrect sequence of operations)
/// - Data validation errors (e.g., invalid UTF-8, oversized payloads)
/// - Handshake errors (e.g., header issues)
/// - I/O and system-level errors
///
/// Protocol and data errors are fatal to the connection. [`WebSocketError::close_code`] gives the
/// status code sent to the peer when one of them is detected.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Occurs when receiving a new Text or Binary frame before the previous fragmented
    /// message was completed.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// Indicates that a text message or close frame reason contains invalid UTF-8 data.
    /// According to RFC 6455, all text payloads must be valid UTF-8.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// Occurs when receiving a continuation frame without a preceding initial frame.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// Returned when receiving an HTTP status code that is not valid for WebSocket handshake.
    /// Only 101 is valid for a successful upgrade.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Indicates that the HTTP "Upgrade" header is either missing or does not contain
    /// the required "websocket" value during connection handshake.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// Indicates that the HTTP "Connection" header is either missing or does not contain
    /// the required "upgrade" value during connection handshake.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// Returned when attempting to perform operations on a closed WebSocket connection.
    /// Once a connection is closed, no further communication is possible.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Indicates that a received close frame has an invalid format, such as
    /// containing a payload of 1 byte (close frames must be either empty or ≥2 bytes).
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    /// Occurs when a close frame contains a status code that must not be sent on the wire
    /// (e.g., 1005, 1006, or a code in the unassigned ranges).
    #[error("Invalid close code")]
    InvalidCloseCode,

    /// Indicates that reserved bits in the WebSocket frame header are set. No extension is
    /// negotiated, so they must all be 0.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// Occurs when a control frame (ping, pong, or close) is received with the FIN bit
    /// not set. RFC 6455 requires that control frames must not be fragmented.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A 64-bit payload length with its most significant bit set.
    #[error("Invalid payload length")]
    InvalidLength,

    /// Indicates that a received control frame exceeds the maximum allowed size of 125 bytes.
    #[error("Control frame too large")]
    ControlFrameTooLarge,

    /// Occurs when a frame's payload, or the reassembled message, exceeds the configured limit.
    #[error("Frame too large")]
    FrameTooLarge,

    /// Indicates receipt of a frame with a reserved opcode.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// A server received a frame that was not masked.
    #[error("Frame from client is not masked")]
    UnmaskedFrame,

    /// A client received a frame that was masked.
    #[error("Frame from server is masked")]
    UnexpectedMask,

    /// The stream ended without a closing handshake, possibly in the middle of a frame.
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// The peer sent a Close frame. An empty Close frame has already been sent in reply.
    #[error("Connection closed by peer (code={code:?}, reason={reason:?})")]
    ClosedByPeer {
        /// Status code of the peer's Close frame, if it carried one.
        code: Option<CloseCode>,
        /// Reason of the peer's Close frame, possibly empty.
        reason: String,
    },

    /// Returned when the "Sec-WebSocket-Version" header is not set to 13 during handshake.
    #[error("Sec-Websocket-Version must be 13")]
    InvalidSecWebsocketVersion,

    /// Occurs during handshake when the required "Sec-WebSocket-Key" header is missing from
    /// the client request.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingSecWebSocketKey,

    /// The "Sec-WebSocket-Accept" header of the server response does not match the key sent.
    #[error("Sec-WebSocket-Accept does not match the key")]
    InvalidAcceptKey,

    /// Returned when the URL scheme is not one of "ws", "wss", "http" or "https".
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// Wraps errors from URL parsing that may occur when processing WebSocket URLs.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps standard I/O errors that may occur during WebSocket communication,
    /// such as connection resets.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors from building handshake requests and responses.
    #[error(transparent)]
    HTTPError(#[from] http::Error),
}

impl WebSocketError {
    /// Status code sent to the peer when this error ends a connection.
    ///
    /// `None` means either that the Close frame carries no status code (a reply to
    /// [`WebSocketError::ClosedByPeer`]) or that the error does not concern the connection
    /// at all, see [`WebSocketError::closes_connection`].
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::UnexpectedEof => Some(CloseCode::Normal),
            Self::ReservedBitsNotZero
            | Self::InvalidFragment
            | Self::InvalidContinuationFrame
            | Self::ControlFrameFragmented
            | Self::ControlFrameTooLarge
            | Self::InvalidLength
            | Self::UnmaskedFrame
            | Self::UnexpectedMask
            | Self::InvalidCloseFrame
            | Self::InvalidCloseCode => Some(CloseCode::Protocol),
            Self::InvalidUTF8 => Some(CloseCode::Invalid),
            Self::FrameTooLarge => Some(CloseCode::Size),
            Self::InvalidOpCode(_) | Self::IoError(_) => Some(CloseCode::Error),
            _ => None,
        }
    }

    /// Returns whether the error ends the connection and triggers the closing handshake.
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::ClosedByPeer { .. }) || self.close_code().is_some()
    }
}
