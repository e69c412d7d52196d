use super::{MAX_PAYLOAD_READ, MAX_READ_BUFFER};

/// Configuration options for a WebSocket connection.
///
/// `Options` are passed to [`WebSocket::new`](super::WebSocket::new) and fixed for the lifetime
/// of the connection.
///
/// # Example
/// ```rust
/// use wsduplex::Options;
///
/// let options = Options::default()
///     .with_max_payload_read(64 * 1024)
///     .with_fragment_size(16 * 1024)
///     .with_auto_pong(false);
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    /// Maximum allowed payload size of a single incoming frame, in bytes.
    ///
    /// If a frame exceeds this size, the connection is closed with
    /// [`CloseCode::Size`](crate::close::CloseCode::Size).
    ///
    /// Default: 1 MiB (1,048,576 bytes) as defined in [`MAX_PAYLOAD_READ`]
    pub max_payload_read: Option<usize>,

    /// Maximum size allowed for the buffer that accumulates fragmented messages.
    ///
    /// WebSocket messages can be split into multiple fragments for transmission. These fragments
    /// are accumulated in a read buffer until the complete message is received. Once the total
    /// size of accumulated fragments exceeds this limit, the connection is closed.
    ///
    /// Default: 2 MiB (2,097,152 bytes) as defined in [`MAX_READ_BUFFER`], or twice the
    /// configured `max_payload_read` value if that is set.
    pub max_read_buffer: Option<usize>,

    /// Whether the masking rules of RFC 6455 are enforced on incoming frames.
    ///
    /// When `true`, a server rejects unmasked frames and a client rejects masked frames. When
    /// `false`, both are accepted and masked payloads are unmasked.
    ///
    /// Default: `true`
    pub mask_enforcement: bool,

    /// Whether a Pong is sent automatically in reply to every Ping.
    ///
    /// The Ping is delivered to the reader either way.
    ///
    /// Default: `true`
    pub auto_pong: bool,

    /// Largest payload of an outgoing data frame. Longer messages are sent as a sequence of
    /// fragments. `None` sends every message as a single frame.
    ///
    /// Default: `None`
    pub fragment_size: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_payload_read: None,
            max_read_buffer: None,
            mask_enforcement: true,
            auto_pong: true,
            fragment_size: None,
        }
    }
}

impl Options {
    /// Sets the maximum payload size of a single incoming frame.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Sets the maximum size of a reassembled fragmented message.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    /// Enables or disables the masking rules on incoming frames.
    pub fn with_mask_enforcement(self, enforce: bool) -> Self {
        Self {
            mask_enforcement: enforce,
            ..self
        }
    }

    /// Enables or disables the automatic Pong reply.
    pub fn with_auto_pong(self, auto_pong: bool) -> Self {
        Self { auto_pong, ..self }
    }

    /// Splits outgoing Text and Binary messages into fragments of at most `size` bytes.
    ///
    /// A `size` of 0 turns fragmentation off.
    pub fn with_fragment_size(self, size: usize) -> Self {
        Self {
            fragment_size: (size > 0).then_some(size),
            ..self
        }
    }

    pub(super) fn payload_limit(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    pub(super) fn read_buffer_limit(&self) -> usize {
        self.max_read_buffer.unwrap_or(
            self.max_payload_read
                .map(|payload_read| payload_read.saturating_mul(2))
                .unwrap_or(MAX_READ_BUFFER),
        )
    }
}
