//! Shared helpers: listeners that expose what they saw, and raw-socket
//! functions that speak the wire format directly.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use framelink::protocol::{self, FrameError, Packet};
use framelink::{MessageListener, Session, SessionListener};

pub const WIRE_MAX: u32 = 4 * 1024 * 1024;

/// Forwards every received message to a channel the test can await.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageListener<String> for ChannelListener {
    async fn on_message(&self, message: String, _session: &Arc<Session<String>>) {
        let _ = self.tx.send(message);
    }
}

/// Replies "Hi!" to "Hello!" and stays quiet otherwise.
pub struct EchoListener;

#[async_trait]
impl MessageListener<String> for EchoListener {
    async fn on_message(&self, message: String, session: &Arc<Session<String>>) {
        if message == "Hello!" {
            let _ = session.send("Hi!".to_string()).await;
        }
    }
}

/// Swallows everything.
pub struct NullListener;

#[async_trait]
impl MessageListener<String> for NullListener {
    async fn on_message(&self, _message: String, _session: &Arc<Session<String>>) {}
}

/// Counts lifecycle events and records close reasons.
#[derive(Clone, Default)]
pub struct CountingSessionListener {
    pub created: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub close_reasons: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SessionListener<String> for CountingSessionListener {
    async fn on_session_create(&self, _session: &Arc<Session<String>>) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_session_close(&self, session: &Arc<Session<String>>) {
        self.close_reasons
            .lock()
            .unwrap()
            .push(session.close_reason().unwrap_or_default());
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Write one data frame carrying `body` straight onto a raw socket.
pub async fn send_data_frame(stream: &mut TcpStream, body: &[u8]) {
    protocol::write_frame(stream, &Packet::data(body.to_vec()), WIRE_MAX)
        .await
        .unwrap();
}

pub async fn send_packet(stream: &mut TcpStream, packet: &Packet) {
    protocol::write_frame(stream, packet, WIRE_MAX).await.unwrap();
}

pub async fn read_packet(stream: &mut TcpStream) -> Result<Packet, FrameError> {
    protocol::read_frame(stream, WIRE_MAX).await
}
