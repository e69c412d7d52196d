use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tokio_util::codec::Framed;
use wsduplex::{
    close::CloseCode,
    codec::{Codec, Decoder, Encoder},
    frame::{Frame, Message, OpCode},
    Options, Role, StreamState, WebSocket, WebSocketError,
};

fn init_logger() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();
}

/// Frame level access to the other end of a connection. Accepts frames masked or not.
type RawPeer = Framed<DuplexStream, Codec>;

fn raw_peer(io: DuplexStream) -> RawPeer {
    let decoder = Decoder::new(Role::Server, wsduplex::MAX_PAYLOAD_READ, false);
    Framed::new(io, Codec::from((decoder, Encoder)))
}

/// A server under test and a raw peer standing in for the client.
fn server_with_raw_client(options: Options) -> (WebSocket<DuplexStream>, RawPeer) {
    let (a, b) = duplex(256 * 1024);
    (WebSocket::server(a, options), raw_peer(b))
}

/// A client under test and a raw peer standing in for the server.
fn client_with_raw_server(options: Options) -> (WebSocket<DuplexStream>, RawPeer) {
    let (a, b) = duplex(256 * 1024);
    (WebSocket::client(a, options), raw_peer(b))
}

fn connected(options: Options) -> (WebSocket<DuplexStream>, WebSocket<DuplexStream>) {
    let (a, b) = duplex(256 * 1024);
    (
        WebSocket::client(a, options.clone()),
        WebSocket::server(b, options),
    )
}

/// Frame as a client sends it, with the key of RFC 6455 Section 5.7.
fn masked(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Frame {
    Frame::new(fin, opcode, Some([0x37, 0xfa, 0x21, 0x3d]), payload)
}

fn unmasked(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Frame {
    Frame::new(fin, opcode, None, payload)
}

/// Reads the Close frame the connection under test sent, and checks it carries `code`.
async fn expect_close(peer: &mut RawPeer, code: Option<CloseCode>) {
    let frame = peer.next().await.expect("close frame").expect("valid frame");
    assert_eq!(frame.opcode, OpCode::Close);

    let message = Message::from((frame.opcode, frame.payload));
    assert_eq!(message.close_code(), code);
    if code.is_none() {
        assert!(message.payload.is_empty());
    }
}

#[tokio::test]
async fn round_trip_both_directions() {
    init_logger();
    let (mut client, mut server) = connected(Options::default());

    client.write(Message::text("Hello")).await.unwrap();
    assert_eq!(server.read().await.unwrap(), Message::text("Hello"));

    server.write(Message::text("World")).await.unwrap();
    assert_eq!(client.read().await.unwrap(), Message::text("World"));

    for len in [0usize, 125, 126, 65535, 65536, 200_000] {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let expected = Message::binary(payload.clone());

        let (sent, received) = tokio::join!(
            client.write(Message::binary(payload)),
            server.read()
        );
        sent.unwrap();
        assert_eq!(received.unwrap(), expected, "len={len}");
    }
}

#[tokio::test]
async fn fragments_are_reassembled() {
    let (mut server, mut peer) = server_with_raw_client(Options::default());

    peer.send(masked(false, OpCode::Text, "He")).await.unwrap();
    peer.send(masked(false, OpCode::Continuation, "ll")).await.unwrap();
    peer.send(masked(true, OpCode::Continuation, "o")).await.unwrap();

    let message = server.read().await.unwrap();
    assert_eq!(message.opcode, OpCode::Text);
    assert_eq!(message.as_str().unwrap(), "Hello");
}

#[tokio::test]
async fn outgoing_fragmentation() {
    let options = Options::default().with_fragment_size(2);
    let (mut client, mut peer) = client_with_raw_server(options);

    client.write(Message::text("Hello")).await.unwrap();

    let mut frames = Vec::new();
    for _ in 0..3 {
        frames.push(peer.next().await.unwrap().unwrap());
    }

    assert!(frames.iter().all(Frame::is_masked));
    assert_eq!(
        frames
            .iter()
            .map(|frame| (frame.fin, frame.opcode))
            .collect::<Vec<_>>(),
        vec![
            (false, OpCode::Text),
            (false, OpCode::Continuation),
            (true, OpCode::Continuation),
        ]
    );

    let payload: Vec<u8> = frames
        .iter()
        .flat_map(|frame| frame.payload.iter().copied())
        .collect();
    assert_eq!(payload, b"Hello");
}

#[tokio::test]
async fn fragmented_message_between_connections() {
    let options = Options::default().with_fragment_size(1000);
    let (mut client, mut server) = connected(options);

    let text = "κόσμε ".repeat(1000);
    client.write(Message::text(text.clone())).await.unwrap();

    let message = server.read().await.unwrap();
    assert_eq!(message.as_str().unwrap(), text);
}

#[tokio::test]
async fn continuation_without_start_is_protocol_error() {
    let (mut server, mut peer) = server_with_raw_client(Options::default());

    peer.send(masked(true, OpCode::Continuation, "orphan"))
        .await
        .unwrap();

    assert!(matches!(
        server.read().await,
        Err(WebSocketError::InvalidContinuationFrame)
    ));
    expect_close(&mut peer, Some(CloseCode::Protocol)).await;
    assert_eq!(server.state(), StreamState::Closed);
}

#[tokio::test]
async fn new_message_during_fragment_is_protocol_error() {
    let (mut server, mut peer) = server_with_raw_client(Options::default());

    peer.send(masked(false, OpCode::Binary, "first")).await.unwrap();
    peer.send(masked(true, OpCode::Binary, "second")).await.unwrap();

    assert!(matches!(
        server.read().await,
        Err(WebSocketError::InvalidFragment)
    ));
    expect_close(&mut peer, Some(CloseCode::Protocol)).await;
}

#[tokio::test]
async fn ping_between_fragments() {
    let (mut server, mut peer) = server_with_raw_client(Options::default());

    peer.send(masked(false, OpCode::Text, "Hel")).await.unwrap();
    peer.send(masked(true, OpCode::Ping, "keepalive")).await.unwrap();
    peer.send(masked(true, OpCode::Continuation, "lo")).await.unwrap();

    assert_eq!(server.read().await.unwrap(), Message::ping("keepalive"));
    assert_eq!(server.read().await.unwrap(), Message::text("Hello"));

    let pong = peer.next().await.unwrap().unwrap();
    assert_eq!(pong.opcode, OpCode::Pong);
    assert_eq!(pong.payload, Bytes::from_static(b"keepalive"));
}

#[tokio::test]
async fn auto_pong_can_be_disabled() {
    let (mut server, mut peer) = server_with_raw_client(Options::default().with_auto_pong(false));

    peer.send(masked(true, OpCode::Ping, "p")).await.unwrap();
    assert_eq!(server.read().await.unwrap(), Message::ping("p"));

    server.write(Message::text("no pong before me")).await.unwrap();
    let frame = peer.next().await.unwrap().unwrap();
    assert_eq!(frame.opcode, OpCode::Text);
}

#[tokio::test]
async fn invalid_utf8_closes_with_1007() {
    let (mut server, mut peer) = server_with_raw_client(Options::default());

    peer.send(masked(true, OpCode::Text, &b"\xC0\x80"[..]))
        .await
        .unwrap();

    assert!(matches!(
        server.read().await,
        Err(WebSocketError::InvalidUTF8)
    ));
    expect_close(&mut peer, Some(CloseCode::Invalid)).await;
}

#[tokio::test]
async fn invalid_utf8_detected_before_last_fragment() {
    let (mut server, mut peer) = server_with_raw_client(Options::default());

    // the final fragment never comes
    peer.send(masked(false, OpCode::Text, &b"ok\xED\xA0\x80"[..]))
        .await
        .unwrap();

    assert!(matches!(
        server.read().await,
        Err(WebSocketError::InvalidUTF8)
    ));
    expect_close(&mut peer, Some(CloseCode::Invalid)).await;
}

#[tokio::test]
async fn server_rejects_unmasked_frames() {
    let (mut server, mut peer) = server_with_raw_client(Options::default());

    peer.send(unmasked(true, OpCode::Text, "plain")).await.unwrap();

    assert!(matches!(
        server.read().await,
        Err(WebSocketError::UnmaskedFrame)
    ));
    expect_close(&mut peer, Some(CloseCode::Protocol)).await;
}

#[tokio::test]
async fn client_rejects_masked_frames() {
    let (mut client, mut peer) = client_with_raw_server(Options::default());

    peer.send(masked(true, OpCode::Text, "masked")).await.unwrap();

    assert!(matches!(
        client.read().await,
        Err(WebSocketError::UnexpectedMask)
    ));

    let close = peer.next().await.unwrap().unwrap();
    assert!(close.is_masked());
    assert_eq!(&close.payload[..], &1002u16.to_be_bytes());
}

#[tokio::test]
async fn lenient_masking_policy() {
    let options = Options::default().with_mask_enforcement(false);

    let (mut server, mut peer) = server_with_raw_client(options.clone());
    peer.send(unmasked(true, OpCode::Text, "plain")).await.unwrap();
    assert_eq!(server.read().await.unwrap(), Message::text("plain"));

    let (mut client, mut peer) = client_with_raw_server(options);
    peer.send(masked(true, OpCode::Text, "masked")).await.unwrap();
    assert_eq!(client.read().await.unwrap(), Message::text("masked"));
}

#[tokio::test]
async fn oversized_frame_closes_with_1009() {
    let options = Options::default().with_max_payload_read(16);
    let (mut server, mut peer) = server_with_raw_client(options);

    peer.send(masked(true, OpCode::Binary, vec![0u8; 17]))
        .await
        .unwrap();

    assert!(matches!(
        server.read().await,
        Err(WebSocketError::FrameTooLarge)
    ));
    expect_close(&mut peer, Some(CloseCode::Size)).await;
}

#[tokio::test]
async fn oversized_message_closes_with_1009() {
    let options = Options::default()
        .with_max_payload_read(16)
        .with_max_read_buffer(20);
    let (mut server, mut peer) = server_with_raw_client(options);

    peer.send(masked(false, OpCode::Binary, vec![0u8; 16]))
        .await
        .unwrap();
    peer.send(masked(true, OpCode::Continuation, vec![0u8; 16]))
        .await
        .unwrap();

    assert!(matches!(
        server.read().await,
        Err(WebSocketError::FrameTooLarge)
    ));
    expect_close(&mut peer, Some(CloseCode::Size)).await;
}

#[tokio::test]
async fn reserved_opcode_closes_with_1011() {
    let (mut client, mut peer) = client_with_raw_server(Options::default());

    // FIN + opcode 0x3, empty payload
    peer.get_mut().write_all(&[0x83, 0x00]).await.unwrap();

    assert!(matches!(
        client.read().await,
        Err(WebSocketError::InvalidOpCode(0x3))
    ));
    expect_close(&mut peer, Some(CloseCode::Error)).await;
}

#[tokio::test]
async fn reserved_bits_are_protocol_error() {
    let (mut client, mut peer) = client_with_raw_server(Options::default());

    // FIN + RSV1 + Text, empty payload
    peer.get_mut().write_all(&[0xC1, 0x00]).await.unwrap();

    assert!(matches!(
        client.read().await,
        Err(WebSocketError::ReservedBitsNotZero)
    ));
    expect_close(&mut peer, Some(CloseCode::Protocol)).await;
}

#[tokio::test]
async fn fragmented_control_frame_is_protocol_error() {
    let (mut client, mut peer) = client_with_raw_server(Options::default());

    peer.send(unmasked(false, OpCode::Ping, "p")).await.unwrap();

    assert!(matches!(
        client.read().await,
        Err(WebSocketError::ControlFrameFragmented)
    ));
    expect_close(&mut peer, Some(CloseCode::Protocol)).await;
}

#[tokio::test]
async fn peer_close_is_answered() {
    let (mut server, mut peer) = server_with_raw_client(Options::default());

    let close = Frame::from(Message::close(Some(CloseCode::Away), "going away"));
    peer.send(masked(close.fin, close.opcode, close.payload))
        .await
        .unwrap();

    match server.read().await {
        Err(WebSocketError::ClosedByPeer { code, reason }) => {
            assert_eq!(code, Some(CloseCode::Away));
            assert_eq!(reason, "going away");
        }
        other => panic!("unexpected {other:?}"),
    }

    expect_close(&mut peer, None).await;
    // the server shut down its side
    assert!(peer.next().await.is_none());
    assert_eq!(server.state(), StreamState::Closed);

    assert!(matches!(
        server.read().await,
        Err(WebSocketError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn invalid_peer_close_code() {
    let (mut server, mut peer) = server_with_raw_client(Options::default());

    // 1005 must never be sent
    peer.send(masked(true, OpCode::Close, 1005u16.to_be_bytes().to_vec()))
        .await
        .unwrap();

    assert!(matches!(
        server.read().await,
        Err(WebSocketError::InvalidCloseCode)
    ));
    expect_close(&mut peer, Some(CloseCode::Protocol)).await;
}

#[tokio::test]
async fn one_byte_close_payload() {
    let (mut client, mut peer) = client_with_raw_server(Options::default());

    peer.send(unmasked(true, OpCode::Close, vec![0x03u8]))
        .await
        .unwrap();

    assert!(matches!(
        client.read().await,
        Err(WebSocketError::InvalidCloseFrame)
    ));
    expect_close(&mut peer, Some(CloseCode::Protocol)).await;
}

#[tokio::test]
async fn close_handshake_between_connections() {
    init_logger();
    let (mut client, mut server) = connected(Options::default());

    client.close(Some(CloseCode::Normal)).await.unwrap();
    assert_eq!(client.state(), StreamState::Closed);

    match server.read().await {
        Err(WebSocketError::ClosedByPeer { code, .. }) => assert_eq!(code, Some(CloseCode::Normal)),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(server.state(), StreamState::Closed);
}

#[tokio::test]
async fn writes_after_close_fail() {
    let (mut client, mut peer) = client_with_raw_server(Options::default());

    client.close(None).await.unwrap();
    expect_close(&mut peer, None).await;

    assert!(matches!(
        client.write(Message::text("too late")).await,
        Err(WebSocketError::ConnectionClosed)
    ));
    assert!(matches!(
        client.read().await,
        Err(WebSocketError::ConnectionClosed)
    ));

    // only the first close sends anything
    client.close(Some(CloseCode::Away)).await.unwrap();
    assert!(peer.next().await.is_none());
}

#[tokio::test]
async fn close_message_through_sink() {
    let (mut client, mut peer) = client_with_raw_server(Options::default());

    client
        .send(Message::close(Some(CloseCode::Policy), "policy"))
        .await
        .unwrap();
    assert_eq!(client.state(), StreamState::Closing);

    let frame = peer.next().await.unwrap().unwrap();
    let message = Message::from((frame.opcode, frame.payload));
    assert_eq!(message.close_code(), Some(CloseCode::Policy));
    assert_eq!(message.close_reason(), Some("policy"));

    SinkExt::close(&mut client).await.unwrap();
    assert_eq!(client.state(), StreamState::Closed);
    assert!(peer.next().await.is_none());
}

#[tokio::test]
async fn eof_without_close_frame() {
    let (mut server, peer) = server_with_raw_client(Options::default());
    drop(peer);

    assert!(matches!(
        server.read().await,
        Err(WebSocketError::UnexpectedEof)
    ));
    assert_eq!(server.state(), StreamState::Closed);
}

#[tokio::test]
async fn eof_in_the_middle_of_a_frame() {
    let (mut server, mut peer) = server_with_raw_client(Options::default());

    // masked Binary frame announcing 10 bytes, only 2 arrive
    peer.get_mut()
        .write_all(&[0x82, 0x8A, 1, 2, 3, 4, 0xAA, 0xBB])
        .await
        .unwrap();
    drop(peer);

    assert!(matches!(
        server.read().await,
        Err(WebSocketError::UnexpectedEof)
    ));
}

#[tokio::test]
async fn stream_ends_after_close() {
    let (mut client, mut server) = connected(Options::default());

    client.write(Message::text("last words")).await.unwrap();
    client.close(None).await.unwrap();

    assert_eq!(
        server.next().await.unwrap().unwrap(),
        Message::text("last words")
    );
    assert!(matches!(
        server.next().await,
        Some(Err(WebSocketError::ClosedByPeer { code: None, .. }))
    ));
    assert!(server.next().await.is_none());
}

#[tokio::test]
async fn split_halves_in_separate_tasks() {
    let (client, server) = connected(Options::default());

    let echo = tokio::spawn(async move {
        let (mut sink, mut stream) = server.split();
        while let Some(Ok(message)) = stream.next().await {
            if message.opcode == OpCode::Text {
                sink.send(message).await.unwrap();
            }
        }
    });

    let (mut sink, mut stream) = client.split();
    let reader = tokio::spawn(async move {
        let mut received = Vec::new();
        while received.len() < 100 {
            match stream.next().await {
                Some(Ok(message)) => received.push(message),
                other => panic!("unexpected {other:?}"),
            }
        }
        received
    });

    for i in 0..100 {
        sink.send(Message::text(format!("message {i}"))).await.unwrap();
    }

    let received = reader.await.unwrap();
    for (i, message) in received.iter().enumerate() {
        assert_eq!(message.as_str().unwrap(), format!("message {i}"));
    }

    sink.close().await.unwrap();
    echo.await.unwrap();
}

#[tokio::test]
async fn local_close_ends_waiting_reader() {
    let (client, mut peer) = client_with_raw_server(Options::default());
    let (mut sink, mut stream) = client.split();

    let reader = tokio::spawn(async move { stream.next().await });
    // let the reader park on the silent peer
    tokio::task::yield_now().await;

    sink.close().await.unwrap();
    expect_close(&mut peer, Some(CloseCode::Normal)).await;

    let next = tokio::time::timeout(std::time::Duration::from_millis(500), reader)
        .await
        .expect("reader woken by the close")
        .unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn cancelled_read_keeps_partial_frame() {
    let (mut ws, mut peer) = client_with_raw_server(Options::default());

    let mut bytes = vec![0x81, 11];
    bytes.extend_from_slice(b"hello world");

    peer.get_mut().write_all(&bytes[..5]).await.unwrap();
    let res = tokio::time::timeout(std::time::Duration::from_millis(50), ws.read()).await;
    assert!(res.is_err());

    peer.get_mut().write_all(&bytes[5..]).await.unwrap();
    assert_eq!(ws.read().await.unwrap(), Message::text("hello world"));
    assert_eq!(ws.state(), StreamState::Open);
}
