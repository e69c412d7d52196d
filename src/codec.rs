//! Frame codec for use with [`tokio_util::codec::Framed`].
//!
//! The [`Decoder`] turns the byte stream into [`Frame`]s and the [`Encoder`] turns frames
//! back into bytes. Neither looks at more than one frame at a time: reassembling messages is
//! the job of [`ReadHalf`](crate::ReadHalf).
use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, FrameHeader, MAX_HEAD_SIZE},
    mask, Role, WebSocketError,
};

/// Represents the reading state of a WebSocket frame.
enum ReadState {
    /// The fixed two bytes are parsed, waiting for the extended length and mask key.
    Header(FrameHeader),
    /// The header is complete, waiting for the payload.
    Payload(FrameHeader, usize),
}

/// A combined codec that provides both encoding and decoding functionality for WebSocket frames.
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl From<(Decoder, Encoder)> for Codec {
    fn from((decoder, encoder): (Decoder, Encoder)) -> Self {
        Self { decoder, encoder }
    }
}

impl codec::Decoder for Codec {
    type Item = <Decoder as codec::Decoder>::Item;
    type Error = <Decoder as codec::Decoder>::Error;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }

    #[inline]
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode_eof(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = <Encoder as codec::Encoder<Frame>>::Error;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}

/// A decoder for WebSocket frames.
///
/// The decoder keeps the partially parsed frame between calls, so the bytes of a frame may
/// arrive in any number of reads. Every frame is validated before its payload is buffered:
///
/// - RSV bits must be clear and the opcode must not be reserved
/// - control frames must be final and carry at most 125 bytes
/// - the payload must not exceed `max_payload_size`
/// - the mask bit must match the role of the connection, unless mask enforcement is off
///
/// Masked payloads are unmasked in place before the frame is returned.
pub struct Decoder {
    /// Current reading state.
    state: Option<ReadState>,
    /// Role of the endpoint doing the reading.
    role: Role,
    /// Maximum allowed size for the frame payload.
    max_payload_size: usize,
    /// Whether frames masked the wrong way for `role` are rejected.
    enforce_masking: bool,
}

impl Decoder {
    /// Creates a new `Decoder`.
    ///
    /// # Parameters
    /// - `role`: the role of the endpoint reading the frames.
    /// - `max_payload_size`: the maximum allowed payload size, in bytes.
    /// - `enforce_masking`: reject unmasked frames on a server and masked frames on a client.
    pub fn new(role: Role, max_payload_size: usize, enforce_masking: bool) -> Self {
        Self {
            state: None,
            role,
            max_payload_size,
            enforce_masking,
        }
    }

    fn check_masking(&self, header: &FrameHeader) -> Result<(), WebSocketError> {
        if !self.enforce_masking {
            return Ok(());
        }

        match (self.role, header.masked) {
            (Role::Server, false) => Err(WebSocketError::UnmaskedFrame),
            (Role::Client, true) => Err(WebSocketError::UnexpectedMask),
            _ => Ok(()),
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    /// Decodes WebSocket frames from a `BytesMut` buffer, managing header and payload parsing.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))`: a complete frame with its payload in clear.
    /// - `Ok(None)`: more data is needed to complete the frame.
    /// - `Err(WebSocketError)`: a protocol violation or invalid frame structure.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    let header = FrameHeader::parse([src[0], src[1]])?;
                    if header.rsv1 || header.rsv2 || header.rsv3 {
                        return Err(WebSocketError::ReservedBitsNotZero);
                    }
                    src.advance(2);

                    self.state = Some(ReadState::Header(header));
                }
                Some(ReadState::Header(mut header)) => {
                    let size = header.extended_header_size();
                    if src.remaining() < size {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    header.feed_extended_header(&src[..size]);
                    src.advance(size);

                    header.validate()?;
                    self.check_masking(&header)?;

                    let payload_len =
                        usize::try_from(header.length).map_err(|_| WebSocketError::FrameTooLarge)?;
                    if payload_len > self.max_payload_size {
                        return Err(WebSocketError::FrameTooLarge);
                    }
                    src.reserve(payload_len.saturating_sub(src.len()));

                    self.state = Some(ReadState::Payload(header, payload_len));
                }
                Some(ReadState::Payload(header, payload_len)) => {
                    if src.remaining() < payload_len {
                        self.state = Some(ReadState::Payload(header, payload_len));
                        return Ok(None);
                    }

                    let mut payload = src.split_to(payload_len);
                    if let Some(key) = header.mask_key {
                        mask::apply_mask(&mut payload, key);
                    }

                    break Ok(Some(Frame::new(
                        header.fin,
                        header.opcode,
                        header.mask_key,
                        payload.freeze(),
                    )));
                }
            }
        }
    }

    /// Decodes what is left once the stream has reached EOF.
    ///
    /// A clean EOF between frames ends the stream. EOF in the middle of a frame is
    /// [`WebSocketError::UnexpectedEof`].
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && self.state.is_none() => Ok(None),
            None => Err(WebSocketError::UnexpectedEof),
        }
    }
}

/// WebSocket frame encoder for serializing `Frame` instances into a buffer.
///
/// Frames carrying a mask key are masked while being copied into the output buffer, so the
/// payload of the frame itself is never modified.
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut header = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut header[..]);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&header[..size]);

        match frame.mask {
            Some(key) => {
                let start = dst.len();
                dst.resize(start + frame.payload.len(), 0);
                mask::apply_mask_into(&mut dst[start..], &frame.payload, key);
            }
            None => dst.extend_from_slice(&frame.payload),
        }

        Ok(())
    }
}
