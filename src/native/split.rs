//! Read and write halves of a WebSocket connection.

use std::task::{ready, Context, Poll};

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};

use crate::{
    close::{self, CloseCode},
    frame::{Frame, Message, OpCode, MAX_CONTROL_PAYLOAD},
    utf8, Result, WebSocketError,
};

use super::{Options, Role};

// ================ ReadHalf ====================

/// The read half of a WebSocket connection, responsible for turning frames into messages.
///
/// [`ReadHalf`] follows a sans-io design, meaning it does not handle I/O operations directly.
/// Instead, the caller provides a [`futures::Stream`] of frames on each call, usually a
/// [`Framed`](tokio_util::codec::Framed) stream driven by [`Decoder`](crate::codec::Decoder).
///
/// [`ReadHalf`] reassembles fragmented messages and validates Text messages, but does not reply
/// to anything: answering Pings and Close frames is the job of [`WebSocket`](super::WebSocket).
///
/// After a Close frame, the end of the stream or any error, [`ReadHalf`] no longer accepts
/// reads and returns [`WebSocketError::ConnectionClosed`] for all subsequent read attempts.
pub struct ReadHalf {
    /// Opcode of the fragmented message being reassembled.
    fragment: Option<OpCode>,
    /// Accumulated data from fragmented frames.
    accumulated: BytesMut,
    /// Incremental UTF-8 state of a fragmented Text message.
    validator: utf8::Validator,
    /// Maximum size of a reassembled message.
    max_read_buffer: usize,
    /// Indicates if the connection has been closed.
    pub(super) is_closed: bool,
}

impl ReadHalf {
    pub(super) fn new(opts: &Options) -> Self {
        Self {
            fragment: None,
            accumulated: BytesMut::with_capacity(1024),
            validator: utf8::Validator::new(),
            max_read_buffer: opts.read_buffer_limit(),
            is_closed: false,
        }
    }

    /// Processes an incoming frame.
    ///
    /// - `Text` and `Binary` frames start a message. A final frame is returned as a message right
    ///   away, without copying. Starting a message while another is being reassembled is an error.
    /// - `Continuation` frames extend the message being reassembled. The final one completes it.
    /// - `Ping` and `Pong` frames are returned as-is and may arrive between fragments.
    /// - A `Close` frame is parsed and reported as [`WebSocketError::ClosedByPeer`].
    ///
    /// # Returns
    /// - `Ok(Some(Message))` if a message is complete.
    /// - `Ok(None)` if the frame is part of a fragmented message that is not complete yet.
    /// - `Err(WebSocketError)` on a protocol violation.
    fn on_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    return Err(WebSocketError::InvalidFragment);
                }

                if frame.fin {
                    if frame.opcode == OpCode::Text {
                        utf8::parse_str(&frame.payload)?;
                    }
                    return Ok(Some(Message::from((frame.opcode, frame.payload))));
                }

                if frame.payload.len() > self.max_read_buffer {
                    return Err(WebSocketError::FrameTooLarge);
                }

                self.fragment = Some(frame.opcode);
                self.accumulated.extend_from_slice(&frame.payload);
                if frame.opcode == OpCode::Text {
                    self.validator.feed(&self.accumulated, false)?;
                }

                Ok(None)
            }
            OpCode::Continuation => {
                let opcode = self
                    .fragment
                    .ok_or(WebSocketError::InvalidContinuationFrame)?;

                if self.accumulated.len() + frame.payload.len() > self.max_read_buffer {
                    return Err(WebSocketError::FrameTooLarge);
                }

                self.accumulated.extend_from_slice(&frame.payload);
                if opcode == OpCode::Text {
                    self.validator.feed(&self.accumulated, frame.fin)?;
                }

                if !frame.fin {
                    return Ok(None);
                }

                // hand the buffer over and start from a small one again
                let payload =
                    std::mem::replace(&mut self.accumulated, BytesMut::with_capacity(1024));
                self.fragment = None;
                self.validator.reset();

                Ok(Some(Message::from((opcode, payload.freeze()))))
            }
            OpCode::Ping | OpCode::Pong => {
                if !frame.fin {
                    return Err(WebSocketError::ControlFrameFragmented);
                }
                Ok(Some(Message::from((frame.opcode, frame.payload))))
            }
            OpCode::Close => {
                if !frame.fin {
                    return Err(WebSocketError::ControlFrameFragmented);
                }
                let (code, reason) = close::decode_payload(&frame.payload)?;
                Err(WebSocketError::ClosedByPeer { code, reason })
            }
        }
    }

    /// Polls `stream` until a complete message is available.
    ///
    /// Frames that do not complete a message are consumed silently. The end of the stream is
    /// reported as [`WebSocketError::UnexpectedEof`].
    ///
    /// # Returns
    /// - `Poll::Ready(Ok(Message))`: a complete message was received
    /// - `Poll::Ready(Err(WebSocketError))`: the connection is closed or broke the protocol
    /// - `Poll::Pending`: more data is needed
    pub fn poll_message<S>(&mut self, stream: &mut S, cx: &mut Context<'_>) -> Poll<Result<Message>>
    where
        S: futures::Stream<Item = Result<Frame>> + Unpin,
    {
        while !self.is_closed {
            let res = match ready!(stream.poll_next_unpin(cx)) {
                Some(res) => res,
                None => {
                    self.is_closed = true;
                    return Poll::Ready(Err(WebSocketError::UnexpectedEof));
                }
            };

            match res.and_then(|frame| self.on_frame(frame)) {
                Ok(Some(message)) => return Poll::Ready(Ok(message)),
                Ok(None) => {}
                Err(err) => {
                    self.is_closed = true;
                    return Poll::Ready(Err(err));
                }
            }
        }

        Poll::Ready(Err(WebSocketError::ConnectionClosed))
    }
}

// ================ WriteHalf ====================

/// Write half of the WebSocket connection.
///
/// [`WriteHalf`] turns messages into frames and closes the connection gracefully. It handles:
///
/// - Masking of frames when acting as a client
/// - Splitting messages into fragments when a fragment size is configured
/// - Protocol-compliant connection closure
///
/// Once a Close frame has been queued no other frame is accepted and
/// [`WebSocketError::ConnectionClosed`] is returned instead.
///
/// # Connection Closure
/// When closing the connection, [`WriteHalf`] follows the WebSocket protocol by:
///
/// 1. Sending a [`OpCode::Close`] frame to the peer
/// 2. Flushing any pending frames
/// 3. Closing the underlying stream
pub struct WriteHalf {
    role: Role,
    fragment_size: Option<usize>,
    close_state: Option<CloseState>,
}

/// Represents the various states involved in gracefully closing a WebSocket connection.
enum CloseState {
    /// The `Close` frame is waiting for the sink to be ready.
    Sending(Frame),
    /// The `Close` frame has been queued, pending data is being flushed.
    Flushing,
    /// The underlying stream is being shut down.
    Closing,
    /// The connection is fully closed.
    Done,
}

impl WriteHalf {
    pub(super) fn new(role: Role, opts: &Options) -> Self {
        Self {
            role,
            fragment_size: opts.fragment_size,
            close_state: None,
        }
    }

    /// Returns whether a Close frame has been queued or sent.
    pub fn is_closing(&self) -> bool {
        self.close_state.is_some()
    }

    /// Polls the readiness of the `WriteHalf` to send a new message.
    ///
    /// # Returns
    /// - `Poll::Ready(Ok(()))` if the `WriteHalf` is ready to send.
    /// - `Poll::Ready(Err(WebSocketError::ConnectionClosed))` if a Close frame was already queued.
    pub fn poll_ready<S>(&mut self, stream: &mut S, cx: &mut Context<'_>) -> Poll<Result<()>>
    where
        S: futures::Sink<Frame, Error = WebSocketError> + Unpin,
    {
        if self.close_state.is_some() {
            return Poll::Ready(Err(WebSocketError::ConnectionClosed));
        }

        stream.poll_ready_unpin(cx)
    }

    /// Queues a message on `stream`.
    ///
    /// Text and Binary messages longer than the fragment size are queued as several frames.
    /// A Close message moves the write half into its closing sequence, after which only
    /// [`poll_flush`](Self::poll_flush) and [`poll_close`](Self::poll_close) make progress.
    pub fn start_send<S>(&mut self, stream: &mut S, message: Message) -> Result<()>
    where
        S: futures::Sink<Frame, Error = WebSocketError> + Unpin,
    {
        if self.close_state.is_some() {
            return Err(WebSocketError::ConnectionClosed);
        }

        if message.opcode.is_control() && message.payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ControlFrameTooLarge);
        }

        match self.fragment_size {
            Some(size) if !message.opcode.is_control() && message.payload.len() > size => {
                let payload = message.payload;
                let total_len = payload.len();
                let mut offset = 0;

                while offset < total_len {
                    let end = (offset + size).min(total_len);
                    let opcode = if offset == 0 {
                        message.opcode
                    } else {
                        OpCode::Continuation
                    };

                    let frame = Frame::new(end == total_len, opcode, None, payload.slice(offset..end));
                    self.send_frame(stream, frame)?;

                    offset = end;
                }

                Ok(())
            }
            _ => {
                if message.opcode == OpCode::Close {
                    self.close_state = Some(CloseState::Flushing);
                }
                self.send_frame(stream, Frame::from(message))
            }
        }
    }

    fn send_frame<S>(&mut self, stream: &mut S, mut frame: Frame) -> Result<()>
    where
        S: futures::Sink<Frame, Error = WebSocketError> + Unpin,
    {
        if self.role == Role::Client {
            frame.mask();
        }
        stream.start_send_unpin(frame)
    }

    /// Polls to flush all pending frames in the `WriteHalf`.
    pub fn poll_flush<S>(&mut self, stream: &mut S, cx: &mut Context<'_>) -> Poll<Result<()>>
    where
        S: futures::Sink<Frame, Error = WebSocketError> + Unpin,
    {
        stream.poll_flush_unpin(cx)
    }

    /// Queues a Close frame with `code` unless the closing sequence has already started.
    ///
    /// With `None` the Close frame carries no payload. The frame is sent by
    /// [`poll_close`](Self::poll_close).
    pub fn begin_close(&mut self, code: Option<CloseCode>) {
        if self.close_state.is_none() {
            let mut frame = Frame::from(Message::close(code, []));
            if self.role == Role::Client {
                frame.mask();
            }
            self.close_state = Some(CloseState::Sending(frame));
        }
    }

    /// Polls the connection to close the [`WriteHalf`] by initiating a graceful shutdown.
    ///
    /// The `poll_close` function guides the closure process through several stages:
    /// 1. **Sending**: Sends a `Close` frame to the peer, [`CloseCode::Normal`] unless
    ///    [`begin_close`](Self::begin_close) chose otherwise.
    /// 2. **Flushing**: Ensures the `Close` frame and any pending frames are fully flushed.
    /// 3. **Closing**: Closes the underlying stream once the frames are flushed.
    /// 4. **Done**: Marks the connection as closed.
    ///
    /// An error in any stage ends the sequence: the write half is `Done` and the error is
    /// returned once.
    pub fn poll_close<S>(&mut self, stream: &mut S, cx: &mut Context<'_>) -> Poll<Result<()>>
    where
        S: futures::Sink<Frame, Error = WebSocketError> + Unpin,
    {
        loop {
            match self.close_state.take() {
                None => self.begin_close(Some(CloseCode::Normal)),
                Some(CloseState::Sending(frame)) => match stream.poll_ready_unpin(cx) {
                    Poll::Pending => {
                        self.close_state = Some(CloseState::Sending(frame));
                        break Poll::Pending;
                    }
                    Poll::Ready(res) => {
                        self.close_state = Some(CloseState::Done);
                        res?;
                        stream.start_send_unpin(frame)?;
                        self.close_state = Some(CloseState::Flushing);
                    }
                },
                Some(CloseState::Flushing) => match stream.poll_flush_unpin(cx) {
                    Poll::Pending => {
                        self.close_state = Some(CloseState::Flushing);
                        break Poll::Pending;
                    }
                    Poll::Ready(res) => {
                        self.close_state = Some(CloseState::Done);
                        res?;
                        self.close_state = Some(CloseState::Closing);
                    }
                },
                Some(CloseState::Closing) => match stream.poll_close_unpin(cx) {
                    Poll::Pending => {
                        self.close_state = Some(CloseState::Closing);
                        break Poll::Pending;
                    }
                    Poll::Ready(res) => {
                        self.close_state = Some(CloseState::Done);
                        break Poll::Ready(res);
                    }
                },
                Some(CloseState::Done) => {
                    self.close_state = Some(CloseState::Done);
                    break Poll::Ready(Ok(()));
                }
            }
        }
    }
}
