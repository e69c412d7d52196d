//! WebSocket connection over any Tokio byte stream.

mod options;
mod split;

use std::{
    collections::VecDeque,
    future::poll_fn,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use futures::task::AtomicWaker;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{codec, Result, WebSocketError};

use codec::Codec;

// Re-exports
pub use crate::close::CloseCode;
pub use crate::frame::{Frame, Message, OpCode};
pub use options::Options;
pub use split::{ReadHalf, WriteHalf};

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames with a payload size larger than this limit will be rejected to ensure memory safety
/// and prevent excessively large messages from impacting performance.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum allowed read buffer size, set to 2 MiB.
///
/// When the reassembly buffer of a fragmented message exceeds this size the connection is
/// closed, to prevent unbounded memory growth.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// Side of the connection an endpoint plays.
///
/// A client masks every frame it sends and expects unmasked frames. A server does the opposite.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Lifecycle of a [`WebSocket`].
///
/// A connection only moves forward: `Open`, then `Closing` once a Close frame is about to be
/// sent, then `Closed` once the underlying stream has been shut down.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Closing,
    Closed,
}

#[derive(Clone, Copy)]
enum ContextKind {
    Read,
    Write,
}

/// Wakes both the reading and the writing task.
///
/// The read path writes too (Pong replies and Close frames), so whichever task polls the
/// underlying stream must wake the other one when it makes progress.
#[derive(Default)]
struct WakeProxy {
    read_waker: AtomicWaker,
    write_waker: AtomicWaker,
}

impl futures::task::ArcWake for WakeProxy {
    fn wake_by_ref(this: &Arc<Self>) {
        this.read_waker.wake();
        this.write_waker.wake();
    }
}

impl WakeProxy {
    #[inline]
    fn set_waker(&self, kind: ContextKind, waker: &futures::task::Waker) {
        match kind {
            ContextKind::Read => {
                self.read_waker.register(waker);
            }
            ContextKind::Write => {
                self.write_waker.register(waker);
            }
        }
    }

    #[inline(always)]
    fn with_context<F, R>(self: &Arc<Self>, f: F) -> R
    where
        F: FnOnce(&mut Context<'_>) -> R,
    {
        let waker = futures::task::waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        f(&mut cx)
    }
}

// ================== WebSocket ====================

/// A WebSocket connection over the byte stream `S`.
///
/// `WebSocket` reads complete [`Message`]s and writes them, taking care of the protocol along
/// the way:
///
/// - fragmented messages are reassembled, Text messages are validated as UTF-8
/// - Pings are answered with a Pong (see [`Options::with_auto_pong`]) and still delivered
/// - a protocol violation is answered with a Close frame carrying the matching
///   [`CloseCode`] before the error is returned
/// - a Close frame from the peer is answered with an empty Close frame and returned as
///   [`WebSocketError::ClosedByPeer`]
///
/// After the connection is closed every read and write fails with
/// [`WebSocketError::ConnectionClosed`].
///
/// `WebSocket` implements [`futures::Stream`] and [`futures::Sink`], so
/// [`StreamExt::split`](futures::StreamExt::split) gives a read half and a write half that can
/// be moved to different tasks.
///
/// # Example
/// ```rust
/// use futures::{SinkExt, StreamExt};
/// use wsduplex::{frame::Message, Options, WebSocket, WebSocketError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> wsduplex::Result<()> {
/// let (client_io, server_io) = tokio::io::duplex(4096);
///
/// let server = tokio::spawn(async move {
///     let mut ws = WebSocket::server(server_io, Options::default());
///     // echo until the client leaves
///     while let Some(message) = ws.next().await {
///         match message {
///             Ok(message) if !message.opcode.is_control() => ws.send(message).await?,
///             Ok(_) => {}
///             Err(WebSocketError::ClosedByPeer { .. }) => break,
///             Err(err) => return Err(err),
///         }
///     }
///     Ok::<_, WebSocketError>(())
/// });
///
/// let mut ws = WebSocket::client(client_io, Options::default());
/// ws.send(Message::binary(vec![1, 2, 3])).await?;
/// assert_eq!(ws.read().await?, Message::binary(vec![1, 2, 3]));
/// ws.close(None).await?;
///
/// server.await.unwrap()?;
/// # Ok(())
/// # }
/// ```
pub struct WebSocket<S> {
    stream: Framed<S, Codec>,
    read_half: ReadHalf,
    write_half: WriteHalf,
    wake_proxy: Arc<WakeProxy>,
    obligated_sends: VecDeque<Message>,
    flush_sends: bool,
    auto_pong: bool,
    role: Role,
    state: StreamState,
    /// Error returned once the closing handshake it triggered has been carried out.
    pending_error: Option<WebSocketError>,
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an established connection, after the opening handshake.
    pub fn new(role: Role, io: S, options: Options) -> Self {
        let decoder = codec::Decoder::new(role, options.payload_limit(), options.mask_enforcement);
        let codec = Codec::from((decoder, codec::Encoder));

        #[cfg(feature = "logging")]
        log::debug!(
            "Established {role} websocket with settings max_payload_read={} max_read_buffer={} \
            mask_enforcement={} auto_pong={} fragment_size={:?}",
            options.payload_limit(),
            options.read_buffer_limit(),
            options.mask_enforcement,
            options.auto_pong,
            options.fragment_size,
        );

        Self {
            stream: Framed::new(io, codec),
            read_half: ReadHalf::new(&options),
            write_half: WriteHalf::new(role, &options),
            wake_proxy: Arc::new(WakeProxy::default()),
            obligated_sends: VecDeque::new(),
            flush_sends: false,
            auto_pong: options.auto_pong,
            role,
            state: StreamState::Open,
            pending_error: None,
        }
    }

    /// Wraps the client side of a connection.
    pub fn client(io: S, options: Options) -> Self {
        Self::new(Role::Client, io, options)
    }

    /// Wraps the server side of a connection.
    pub fn server(io: S, options: Options) -> Self {
        Self::new(Role::Server, io, options)
    }

    /// Returns whether this end is the client or the server.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns where the connection is in its lifecycle.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Returns a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// Polls for the next complete message.
    ///
    /// Errors that end the connection are returned only after the Close frame they call for has
    /// been sent and the underlying stream shut down. Failures during that teardown are not
    /// reported.
    pub fn poll_next_message(&mut self, cx: &mut Context<'_>) -> Poll<Result<Message>> {
        let wake_proxy = Arc::clone(&self.wake_proxy);
        wake_proxy.set_waker(ContextKind::Read, cx.waker());

        loop {
            if self.pending_error.is_some() {
                ready!(wake_proxy.with_context(|cx| self.poll_teardown(cx)));
                if let Some(err) = self.pending_error.take() {
                    return Poll::Ready(Err(err));
                }
            }

            if self.state != StreamState::Open {
                return Poll::Ready(Err(WebSocketError::ConnectionClosed));
            }

            let res =
                wake_proxy.with_context(|cx| self.read_half.poll_message(&mut self.stream, cx));
            match res {
                Poll::Ready(Ok(message)) => {
                    if message.opcode == OpCode::Ping && self.auto_pong {
                        self.obligated_sends
                            .push_back(Message::pong(message.payload.clone()));

                        // the pong goes out with the next poll if the sink is busy
                        let res = wake_proxy.with_context(|cx| self.poll_flush_obligated(cx));
                        if let Poll::Ready(Err(err)) = res {
                            self.on_error(err);
                        }
                    }
                    return Poll::Ready(Ok(message));
                }
                Poll::Ready(Err(err)) => {
                    if !err.closes_connection() {
                        return Poll::Ready(Err(err));
                    }
                    self.on_error(err);
                }
                Poll::Pending => {
                    let res = wake_proxy.with_context(|cx| self.poll_flush_obligated(cx));
                    if let Poll::Ready(Err(err)) = res {
                        self.on_error(err);
                        continue;
                    }
                    return Poll::Pending;
                }
            }
        }
    }

    /// Reads the next complete message.
    ///
    /// Pings are returned too, after the automatic Pong has been queued. See
    /// [`poll_next_message`](Self::poll_next_message).
    pub async fn read(&mut self) -> Result<Message> {
        poll_fn(|cx| self.poll_next_message(cx)).await
    }

    /// Sends a message and flushes it.
    pub async fn write(&mut self, message: Message) -> Result<()> {
        futures::SinkExt::send(self, message).await
    }

    /// Flushes the messages written so far.
    pub async fn flush(&mut self) -> Result<()> {
        futures::SinkExt::flush(self).await
    }

    /// Closes the connection.
    ///
    /// Sends a Close frame with `code`, an empty one with `None`, then shuts down the
    /// underlying stream. If the connection is already closing this only waits for that to
    /// finish, and the code is ignored. Closing a closed connection does nothing.
    pub async fn close(&mut self, code: Option<CloseCode>) -> Result<()> {
        self.initiate_close(code);

        poll_fn(|cx| {
            let wake_proxy = Arc::clone(&self.wake_proxy);
            wake_proxy.set_waker(ContextKind::Write, cx.waker());
            wake_proxy.with_context(|cx| self.poll_teardown(cx))
        })
        .await;

        Ok(())
    }

    /// Moves out of `Open` and queues the Close frame. Only the first call has any effect.
    fn initiate_close(&mut self, code: Option<CloseCode>) {
        if self.state != StreamState::Open {
            return;
        }

        #[cfg(feature = "logging")]
        log::debug!("Closing {} websocket with code {:?}", self.role, code);

        self.state = StreamState::Closing;
        self.read_half.is_closed = true;
        self.obligated_sends.clear();
        self.write_half.begin_close(code);
    }

    fn on_error(&mut self, err: WebSocketError) {
        #[cfg(feature = "logging")]
        log::debug!("{} websocket failed: {err}", self.role);

        self.initiate_close(err.close_code());
        self.pending_error = Some(err);
    }

    /// Drives the closing sequence of the write half to the end.
    fn poll_teardown(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if let Err(_err) = ready!(self.write_half.poll_close(&mut self.stream, cx)) {
            #[cfg(feature = "logging")]
            log::debug!("Ignoring error while closing {} websocket: {_err}", self.role);
        }

        self.state = StreamState::Closed;
        // a reader parked on the stream would otherwise wait for the peer
        self.wake_proxy.read_waker.wake();
        Poll::Ready(())
    }

    fn poll_flush_obligated(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.write_half.is_closing() {
            self.obligated_sends.clear();
            self.flush_sends = false;
            return Poll::Ready(Ok(()));
        }

        while !self.obligated_sends.is_empty() {
            ready!(self.write_half.poll_ready(&mut self.stream, cx))?;

            if let Some(next) = self.obligated_sends.pop_front() {
                self.write_half.start_send(&mut self.stream, next)?;
                self.flush_sends = true;
            }
        }

        if self.flush_sends {
            ready!(self.write_half.poll_flush(&mut self.stream, cx))?;
            self.flush_sends = false;
        }

        Poll::Ready(Ok(()))
    }
}

/// Yields messages until the connection is closed.
///
/// An error that ends the connection is yielded once, then the stream ends.
impl<S> futures::Stream for WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(this.poll_next_message(cx)) {
            Err(WebSocketError::ConnectionClosed) => Poll::Ready(None),
            res => Poll::Ready(Some(res)),
        }
    }
}

/// Sending a Close message starts the closing sequence; `poll_close` completes it.
impl<S> futures::Sink<Message> for WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = WebSocketError;

    fn poll_ready(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        let this = self.get_mut();
        if this.state != StreamState::Open {
            return Poll::Ready(Err(WebSocketError::ConnectionClosed));
        }

        let wake_proxy = Arc::clone(&this.wake_proxy);
        wake_proxy.set_waker(ContextKind::Write, cx.waker());
        wake_proxy.with_context(|cx| {
            ready!(this.poll_flush_obligated(cx))?;
            this.write_half.poll_ready(&mut this.stream, cx)
        })
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> std::result::Result<(), Self::Error> {
        let this = self.get_mut();
        if this.state != StreamState::Open {
            return Err(WebSocketError::ConnectionClosed);
        }

        let is_close = item.opcode == OpCode::Close;
        #[cfg(feature = "logging")]
        let code = item.close_code();

        this.write_half.start_send(&mut this.stream, item)?;

        if is_close {
            #[cfg(feature = "logging")]
            log::debug!("Closing {} websocket with code {:?}", this.role, code);

            this.state = StreamState::Closing;
            this.read_half.is_closed = true;
            this.obligated_sends.clear();
        }

        Ok(())
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        let this = self.get_mut();
        if this.state == StreamState::Closed {
            return Poll::Ready(Ok(()));
        }

        let wake_proxy = Arc::clone(&this.wake_proxy);
        wake_proxy.set_waker(ContextKind::Write, cx.waker());
        wake_proxy.with_context(|cx| this.write_half.poll_flush(&mut this.stream, cx))
    }

    fn poll_close(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        let this = self.get_mut();
        this.initiate_close(Some(CloseCode::Normal));

        let wake_proxy = Arc::clone(&this.wake_proxy);
        wake_proxy.set_waker(ContextKind::Write, cx.waker());
        ready!(wake_proxy.with_context(|cx| this.poll_teardown(cx)));

        Poll::Ready(Ok(()))
    }
}
