//! End-to-end tests driving the server over loopback TCP with a raw client.

use rover_link::{ServerConfig, ServerEvent, ServerHandle, WsServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

struct Harness {
    handle: ServerHandle,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    commands: mpsc::UnboundedReceiver<String>,
    addr: SocketAddr,
}

async fn start_server() -> Harness {
    let config = ServerConfig {
        address: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    };
    let (sink_tx, commands) = mpsc::unbounded_channel::<String>();
    let (handle, mut events) = WsServer::new(config, Arc::new(sink_tx)).start();

    let addr = match next_event(&mut events).await {
        ServerEvent::Started { addr } => addr,
        other => panic!("expected Started, got {other:?}"),
    };

    Harness {
        handle,
        events,
        commands,
        addr,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Connect and complete the upgrade handshake, returning the raw stream.
async fn connect_upgraded(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET / HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {SAMPLE_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let response = read_until_blank_line(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(response.contains(&format!("Sec-WebSocket-Accept: {SAMPLE_ACCEPT}")));
    stream
}

async fn read_until_blank_line(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    tokio::time::timeout(Duration::from_secs(2), async {
        while !buf.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut byte).await.unwrap();
            assert_ne!(n, 0, "connection closed during handshake");
            buf.push(byte[0]);
        }
    })
    .await
    .expect("timed out reading handshake response");
    String::from_utf8(buf).unwrap()
}

/// Build a client-style masked frame.
fn masked_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let key = [0x37, 0xFA, 0x21, 0x3D];
    let mut frame = vec![0x80 | opcode];
    let len = payload.len();
    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len <= 65535 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(&key);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
    frame
}

async fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("timed out reading frame")
        .expect("read failed");
    buf
}

/// Wait for the server to close the connection (EOF or reset).
async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    match tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("timed out waiting for close")
    {
        Ok(n) => assert_eq!(n, 0, "expected EOF, got data"),
        Err(_) => {}, // reset also counts as closed
    }
}

/// Drain events until `count` handshakes have completed.
async fn wait_handshakes(events: &mut mpsc::UnboundedReceiver<ServerEvent>, count: usize) {
    let mut seen = 0;
    while seen < count {
        if let ServerEvent::HandshakeComplete { .. } = next_event(events).await {
            seen += 1;
        }
    }
}

#[tokio::test]
async fn handshake_exchange_is_byte_exact() {
    let mut harness = start_server().await;

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    let request = format!(
        "GET / HTTP/1.1\r\nSec-WebSocket-Key: {SAMPLE_KEY}\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let response = read_until_blank_line(&mut stream).await;
    assert_eq!(
        response,
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n\
             \r\n"
        )
    );

    loop {
        if let ServerEvent::HandshakeComplete { .. } = next_event(&mut harness.events).await {
            break;
        }
    }
    assert_eq!(harness.handle.stats().handshakes_completed(), 1);
}

#[tokio::test]
async fn text_command_reaches_sink_verbatim() {
    let mut harness = start_server().await;
    let mut client = connect_upgraded(harness.addr).await;

    client
        .write_all(&masked_frame(0x1, b"motor left 30"))
        .await
        .unwrap();

    let command = tokio::time::timeout(Duration::from_secs(2), harness.commands.recv())
        .await
        .expect("timed out waiting for command")
        .expect("sink channel closed");
    assert_eq!(command, "motor left 30");

    let handle = harness.handle.clone();
    wait_until(move || handle.status().last_message.as_deref() == Some("motor left 30")).await;
    assert_eq!(harness.handle.stats().messages_received(), 1);
}

#[tokio::test]
async fn missing_key_drops_connection_without_response() {
    let harness = start_server().await;

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: robot\r\n\r\n")
        .await
        .unwrap();

    // No error response, no 101: the socket just closes
    expect_closed(&mut stream).await;

    let handle = harness.handle.clone();
    wait_until(move || handle.status().connected_clients == 0).await;
}

#[tokio::test]
async fn broadcast_reaches_only_handshake_complete_clients() {
    let mut harness = start_server().await;

    let mut alpha = connect_upgraded(harness.addr).await;
    let mut beta = connect_upgraded(harness.addr).await;
    wait_handshakes(&mut harness.events, 2).await;

    // Third client connects but never sends a handshake
    let mut pending = TcpStream::connect(harness.addr).await.unwrap();
    let handle = harness.handle.clone();
    wait_until(move || handle.status().connected_clients == 3).await;

    harness.handle.broadcast_text("telemetry:1");

    let expected = {
        let mut frame = vec![0x81, 11];
        frame.extend_from_slice(b"telemetry:1");
        frame
    };
    assert_eq!(read_exact(&mut alpha, expected.len()).await, expected);
    assert_eq!(read_exact(&mut beta, expected.len()).await, expected);

    // The pending client must receive nothing
    let mut buf = [0u8; 1];
    let got = tokio::time::timeout(Duration::from_millis(200), pending.read(&mut buf)).await;
    assert!(got.is_err(), "pending client unexpectedly received data");

    // Removing the pending client must not disturb the others
    drop(pending);
    let handle = harness.handle.clone();
    wait_until(move || handle.status().connected_clients == 2).await;

    harness.handle.broadcast_text("telemetry:1");
    assert_eq!(read_exact(&mut alpha, expected.len()).await, expected);
    assert_eq!(read_exact(&mut beta, expected.len()).await, expected);

    assert_eq!(harness.handle.stats().broadcasts_sent(), 2);
}

#[tokio::test]
async fn broadcast_binary_builds_binary_frame() {
    let mut harness = start_server().await;
    let mut client = connect_upgraded(harness.addr).await;

    loop {
        if let ServerEvent::HandshakeComplete { .. } = next_event(&mut harness.events).await {
            break;
        }
    }

    harness.handle.broadcast_binary(vec![0x10, 0x20, 0x30]);

    let frame = read_exact(&mut client, 5).await;
    assert_eq!(frame, vec![0x82, 3, 0x10, 0x20, 0x30]);
}

#[tokio::test]
async fn truncated_frame_abandons_only_that_connection() {
    let mut harness = start_server().await;

    let mut victim = connect_upgraded(harness.addr).await;
    let mut survivor = connect_upgraded(harness.addr).await;
    wait_handshakes(&mut harness.events, 2).await;

    // Declares 10 masked payload bytes but sends only the mask key
    victim
        .write_all(&[0x81, 0x80 | 10, 1, 2, 3, 4])
        .await
        .unwrap();
    expect_closed(&mut victim).await;

    let handle = harness.handle.clone();
    wait_until(move || handle.status().connected_clients == 1).await;

    // The survivor still receives broadcasts
    harness.handle.broadcast_text("ok");
    assert_eq!(read_exact(&mut survivor, 4).await, vec![0x81, 2, b'o', b'k']);

    // Nothing was forwarded downstream
    assert!(harness.commands.try_recv().is_err());
}

#[tokio::test]
async fn unmasked_inbound_frame_abandons_connection() {
    let mut harness = start_server().await;
    let mut client = connect_upgraded(harness.addr).await;

    // Server-style frame without the mask bit
    client.write_all(&[0x81, 2, b'h', b'i']).await.unwrap();
    expect_closed(&mut client).await;

    let handle = harness.handle.clone();
    wait_until(move || handle.status().connected_clients == 0).await;
    assert!(harness.commands.try_recv().is_err());
}

#[tokio::test]
async fn invalid_utf8_drops_message_but_keeps_connection() {
    let mut harness = start_server().await;
    let mut client = connect_upgraded(harness.addr).await;

    client
        .write_all(&masked_frame(0x1, &[0xFF, 0xFE, 0xFD]))
        .await
        .unwrap();
    // The server takes one decode per read; wait until it has consumed the
    // bad frame so the next write lands in a fresh read
    let stats = harness.handle.stats();
    wait_until(move || stats.frames_skipped() == 1).await;
    client.write_all(&masked_frame(0x1, b"ok")).await.unwrap();

    let command = tokio::time::timeout(Duration::from_secs(2), harness.commands.recv())
        .await
        .expect("timed out waiting for command")
        .expect("sink channel closed");
    assert_eq!(command, "ok");
    assert_eq!(harness.handle.status().connected_clients, 1);
}

#[tokio::test]
async fn non_text_opcodes_are_skipped() {
    let mut harness = start_server().await;
    let mut client = connect_upgraded(harness.addr).await;

    for (sent, opcode) in [0x2u8, 0x8, 0x9, 0xA].into_iter().enumerate() {
        client
            .write_all(&masked_frame(opcode, b"payload"))
            .await
            .unwrap();
        // One decode per read; wait for the skip so the frames land in
        // separate reads
        let stats = harness.handle.stats();
        wait_until(move || stats.frames_skipped() as usize == sent + 1).await;
    }
    client.write_all(&masked_frame(0x1, b"after")).await.unwrap();

    let command = tokio::time::timeout(Duration::from_secs(2), harness.commands.recv())
        .await
        .expect("timed out waiting for command")
        .expect("sink channel closed");
    assert_eq!(command, "after");
}

#[tokio::test]
async fn disconnect_removes_exactly_one_entry() {
    let mut harness = start_server().await;

    let first = connect_upgraded(harness.addr).await;
    let mut second = connect_upgraded(harness.addr).await;

    let handle = harness.handle.clone();
    wait_until(move || handle.status().connected_clients == 2).await;

    drop(first);
    let handle = harness.handle.clone();
    wait_until(move || handle.status().connected_clients == 1).await;

    // Exactly one disconnect is observed even though both the reader and
    // writer paths notice the closure
    let mut disconnects = 0;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), harness.events.recv()).await
    {
        if matches!(event, ServerEvent::ClientDisconnected { .. }) {
            disconnects += 1;
        }
    }
    assert_eq!(disconnects, 1);

    // The remaining client is untouched
    harness.handle.broadcast_text("still here");
    let expected = {
        let mut frame = vec![0x81, 10];
        frame.extend_from_slice(b"still here");
        frame
    };
    assert_eq!(read_exact(&mut second, expected.len()).await, expected);
}

#[tokio::test]
async fn stop_closes_every_connection() {
    let mut harness = start_server().await;
    let mut client = connect_upgraded(harness.addr).await;

    let handle = harness.handle.clone();
    wait_until(move || handle.status().connected_clients == 1).await;

    harness.handle.stop();
    loop {
        if next_event(&mut harness.events).await == ServerEvent::Stopped {
            break;
        }
    }
    assert!(!harness.handle.is_running());
    assert_eq!(harness.handle.status().connected_clients, 0);
    expect_closed(&mut client).await;
}
