//! # Close
//!
//! Status codes carried by Close frames, as defined in
//! [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).
//!
//! A Close frame payload is either empty or starts with a 2-byte big-endian status code,
//! optionally followed by a UTF-8 encoded reason. Closing with no status code at all is
//! expressed as `Option<CloseCode>::None` throughout the crate.
use crate::{utf8, Result, WebSocketError};

/// Status code indicating why a WebSocket connection was closed.
///
/// Codes in the 1000-1015 range are defined by the RFC. Anything else received from a
/// peer is kept as [`CloseCode::Other`] so it can be inspected and, if not allowed,
/// rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: the purpose for which the connection was established has been fulfilled.
    Normal,
    /// 1001: an endpoint is going away, such as a server going down.
    Away,
    /// 1002: an endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// 1003: an endpoint received a type of data it cannot accept.
    Unsupported,
    /// 1005: no status code was present. Must never be sent on the wire.
    Status,
    /// 1006: the connection was closed abnormally. Must never be sent on the wire.
    Abnormal,
    /// 1007: a message contained data inconsistent with its type, such as invalid UTF-8.
    Invalid,
    /// 1008: a message violated the endpoint's policy.
    Policy,
    /// 1009: a message was too big to process.
    Size,
    /// 1010: the client expected the server to negotiate an extension.
    Extension,
    /// 1011: the server encountered an unexpected condition.
    Error,
    /// 1012: the service is restarting.
    Restart,
    /// 1013: the service is overloaded, try again later.
    Again,
    /// 1015: the TLS handshake failed. Must never be sent on the wire.
    Tls,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Returns whether this code may legally appear in a Close frame.
    ///
    /// Codes 1005, 1006 and 1015 are reserved for local reporting, codes below 1000 are
    /// unused, and 1016-2999 are reserved for future revisions of the protocol.
    /// 3000-4999 are available to libraries and applications.
    pub fn is_allowed(&self) -> bool {
        match *self {
            Self::Status | Self::Abnormal | Self::Tls => false,
            Self::Other(code) => (3000..=4999).contains(&code),
            _ => true,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            1015 => Self::Tls,
            code => Self::Other(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Other(code) => code,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

/// Builds a Close frame payload. `None` produces an empty payload.
pub(crate) fn encode_payload(code: Option<CloseCode>, reason: &[u8]) -> Vec<u8> {
    match code {
        None => Vec::new(),
        Some(code) => {
            let mut payload = Vec::with_capacity(2 + reason.len());
            payload.extend_from_slice(&u16::from(code).to_be_bytes());
            payload.extend_from_slice(reason);
            payload
        }
    }
}

/// Parses a received Close frame payload into its status code and reason.
///
/// An empty payload yields `(None, "")`. A single byte, a code that must not be sent on
/// the wire, or a reason that is not valid UTF-8 are protocol errors.
pub(crate) fn decode_payload(payload: &[u8]) -> Result<(Option<CloseCode>, String)> {
    match payload.len() {
        0 => Ok((None, String::new())),
        1 => Err(WebSocketError::InvalidCloseFrame),
        _ => {
            let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
            if !code.is_allowed() {
                return Err(WebSocketError::InvalidCloseCode);
            }

            let reason = utf8::parse_str(&payload[2..])?;
            Ok((Some(code), reason.to_owned()))
        }
    }
}
