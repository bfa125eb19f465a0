//! Broadcast semantics: every peer except the sender gets the message once.

mod common;

use std::time::Duration;

use tokio::time::timeout;

use common::ChannelListener;
use framelink::{BroadcastListener, TcpClient, TcpServer};

#[tokio::test]
async fn broadcast_reaches_all_other_sessions_exactly_once() {
    let mut server = TcpServer::new("127.0.0.1:0");
    server.register_message_listener(BroadcastListener);
    server.run().await.unwrap();
    let addr = server.local_addr().unwrap().to_string();

    let (listener_a, mut rx_a) = ChannelListener::new();
    let (listener_b, mut rx_b) = ChannelListener::new();
    let (listener_c, mut rx_c) = ChannelListener::new();

    let mut client_a = TcpClient::new(addr.clone());
    client_a.register_message_listener(listener_a);
    client_a.dial().await.unwrap();

    let mut client_b = TcpClient::new(addr.clone());
    client_b.register_message_listener(listener_b);
    client_b.dial().await.unwrap();

    let mut client_c = TcpClient::new(addr);
    client_c.register_message_listener(listener_c);
    client_c.dial().await.unwrap();

    // All three must be registered before the send, or the broadcast
    // snapshot could miss one.
    for _ in 0..100 {
        if server.session_count().await == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.session_count().await, 3);

    client_a.send("ping".to_string()).await.unwrap();

    let got_b = timeout(Duration::from_secs(1), rx_b.recv())
        .await
        .expect("B got nothing")
        .unwrap();
    let got_c = timeout(Duration::from_secs(1), rx_c.recv())
        .await
        .expect("C got nothing")
        .unwrap();
    assert_eq!(got_b, "ping");
    assert_eq!(got_c, "ping");

    // Exactly once for B and C, never for the sender.
    assert!(timeout(Duration::from_millis(300), rx_a.recv()).await.is_err());
    assert!(timeout(Duration::from_millis(300), rx_b.recv()).await.is_err());
    assert!(timeout(Duration::from_millis(300), rx_c.recv()).await.is_err());

    client_a.hangup("done").await;
    client_b.hangup("done").await;
    client_c.hangup("done").await;
    server.stop();
}
