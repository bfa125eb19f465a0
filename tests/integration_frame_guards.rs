//! Frame-level rejections: oversize bodies, tampered checksums, bad
//! versions, undecodable payloads. Each one is fatal to its session.

mod common;

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use common::{read_packet, ChannelListener, CountingSessionListener, NullListener, WIRE_MAX};
use framelink::protocol::{encode_frame, Packet};
use framelink::{TcpClient, TcpServer};

async fn wait_for_reason(listener: &CountingSessionListener, needle: &str) -> String {
    for _ in 0..100 {
        if let Some(reason) = listener
            .close_reasons
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.contains(needle))
        {
            return reason.clone();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let seen = listener.close_reasons.lock().unwrap().clone();
    panic!("no close reason containing {needle:?}; saw {seen:?}");
}

/// E4: a message past the client's body limit closes the client session
/// before anything reaches the wire.
#[tokio::test]
async fn oversize_send_closes_client_without_reaching_server() {
    let wire_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = wire_listener.local_addr().unwrap().to_string();

    let (listener, _rx) = ChannelListener::new();
    let mut client = TcpClient::new(addr);
    client
        .register_message_listener(listener)
        .set_max_body_length(16);
    client.dial().await.unwrap();

    let (mut peer, _) = wire_listener.accept().await.unwrap();

    client.send("seventeen bytes!!".to_string()).await.unwrap();

    let session = client.session().unwrap();
    timeout(Duration::from_secs(2), session.closed())
        .await
        .expect("client session did not close");
    let reason = session.close_reason().unwrap();
    assert!(
        reason.contains("exceed max limit"),
        "unexpected close reason: {reason}"
    );

    // Nothing was written before the limit check fired: the peer sees
    // either silence or a bare connection drop, never a frame.
    match timeout(Duration::from_millis(300), read_packet(&mut peer)).await {
        Err(_) | Ok(Err(_)) => {}
        Ok(Ok(packet)) => panic!("server received a frame from an oversize send: {packet:?}"),
    }
}

/// The receive path enforces the same limit against the advertised length.
#[tokio::test]
async fn oversize_frame_closes_receiving_session() {
    let lifecycle = CountingSessionListener::default();
    let mut server = TcpServer::new("127.0.0.1:0");
    server
        .register_message_listener(NullListener)
        .register_session_listener(lifecycle.clone())
        .set_max_body_length(16);
    server.run().await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let frame = encode_frame(&Packet::data(vec![0x55; 17]), WIRE_MAX).unwrap();
    stream.write_all(&frame).await.unwrap();

    let reason = wait_for_reason(&lifecycle, "exceed max limit").await;
    assert!(reason.contains("17"), "reason lost the size: {reason}");

    server.stop();
}

/// E5: a frame whose body was flipped in flight fails checksum validation.
#[tokio::test]
async fn tampered_body_closes_session_with_checksum_reason() {
    let lifecycle = CountingSessionListener::default();
    let mut server = TcpServer::new("127.0.0.1:0");
    server
        .register_message_listener(NullListener)
        .register_session_listener(lifecycle.clone());
    server.run().await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();

    // Man-in-the-middle: flip one body byte, keep the checksum field.
    let mut frame = encode_frame(&Packet::data(b"integrity".to_vec()), WIRE_MAX)
        .unwrap()
        .to_vec();
    frame[5] ^= 0x01;
    stream.write_all(&frame).await.unwrap();

    wait_for_reason(&lifecycle, "Checksum").await;

    server.stop();
}

/// An unrecognized version byte is fatal.
#[tokio::test]
async fn unknown_version_closes_session() {
    let lifecycle = CountingSessionListener::default();
    let mut server = TcpServer::new("127.0.0.1:0");
    server
        .register_message_listener(NullListener)
        .register_session_listener(lifecycle.clone());
    server.run().await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut frame = encode_frame(&Packet::data(b"x".to_vec()), WIRE_MAX)
        .unwrap()
        .to_vec();
    frame[0] = 0x07;
    stream.write_all(&frame).await.unwrap();

    wait_for_reason(&lifecycle, "is wrong").await;

    server.stop();
}

/// A frame that passes the checksum but fails the user codec is fatal too.
#[tokio::test]
async fn undecodable_payload_closes_session() {
    let lifecycle = CountingSessionListener::default();
    let mut server = TcpServer::new("127.0.0.1:0");
    server
        .register_message_listener(NullListener)
        .register_session_listener(lifecycle.clone());
    server.run().await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    // Valid frame, invalid utf-8 for the string codec.
    let frame = encode_frame(&Packet::data(vec![0xFF, 0xFE, 0xFD]), WIRE_MAX).unwrap();
    stream.write_all(&frame).await.unwrap();

    wait_for_reason(&lifecycle, "decode").await;

    server.stop();
}
