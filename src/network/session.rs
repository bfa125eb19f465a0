//! Per-connection session state.
//!
//! A session represents one accepted or dialed connection. It exclusively
//! owns the connection: closing the session tears down both I/O loops and
//! with them the socket. All mutators are thread-safe; `last_active` is an
//! atomic offset from the creation instant.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::Packet;

/// Capacity of the per-session outbound message queue.
pub const SEND_QUEUE_CAPACITY: usize = 16;

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session is closed; no further sends are accepted.
    #[error("session is not running")]
    NotRunning,
}

/// Lifecycle of a session. The only transition is `Created` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Created,
    Closed,
}

/// Initial per-session parameters, taken from the owning endpoint's
/// defaults at creation time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionConfig {
    pub read_deadline: Duration,
    pub write_deadline: Duration,
    pub heartbeat: Duration,
    pub debug: bool,
}

/// Receiving ends of the session's queues, handed to the writer loop.
pub(crate) struct SessionPipes<M> {
    pub outbound_rx: mpsc::Receiver<M>,
    pub control_rx: mpsc::Receiver<Packet>,
}

/// One accepted or dialed connection.
pub struct Session<M> {
    id: Uuid,
    remote_addr: SocketAddr,
    closed: AtomicBool,
    close_reason: Mutex<Option<String>>,
    attributes: RwLock<HashMap<String, String>>,
    read_deadline: RwLock<Duration>,
    write_deadline: RwLock<Duration>,
    heartbeat: RwLock<Duration>,
    created_at: Instant,
    last_active_ms: AtomicU64,
    outbound_tx: mpsc::Sender<M>,
    control_tx: mpsc::Sender<Packet>,
    cancel: CancellationToken,
    registry: Weak<SessionRegistry<M>>,
    debug: bool,
}

impl<M: Send + 'static> Session<M> {
    pub(crate) fn new(
        remote_addr: SocketAddr,
        config: SessionConfig,
        registry: Weak<SessionRegistry<M>>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, SessionPipes<M>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);

        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            remote_addr,
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            attributes: RwLock::new(HashMap::new()),
            read_deadline: RwLock::new(config.read_deadline),
            write_deadline: RwLock::new(config.write_deadline),
            heartbeat: RwLock::new(config.heartbeat),
            created_at: Instant::now(),
            last_active_ms: AtomicU64::new(0),
            outbound_tx,
            control_tx,
            cancel,
            registry,
            debug: config.debug,
        });

        let pipes = SessionPipes {
            outbound_rx,
            control_rx,
        };
        (session, pipes)
    }

    /// Enqueue an outbound application message.
    ///
    /// Blocks only while the bounded send queue is full. Fails once the
    /// session is closed.
    pub async fn send(&self, message: M) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::NotRunning);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SessionError::NotRunning),
            res = self.outbound_tx.send(message) => res.map_err(|_| SessionError::NotRunning),
        }
    }

    /// Close the session.
    ///
    /// Idempotent: the first call records the reason, updates `last_active`
    /// and fires the close signal; later calls are no-ops.
    pub fn close(&self, reason: impl Into<String>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let reason = reason.into();
        if let Ok(mut slot) = self.close_reason.lock() {
            *slot = Some(reason.clone());
        }
        self.touch();
        if self.debug {
            debug!(sid = %self.id, remote = %self.remote_addr, %reason, "session close");
        }
        self.cancel.cancel();
    }

    /// Resolves once the close signal has fired.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_closed() {
            SessionStatus::Closed
        } else {
            SessionStatus::Created
        }
    }

    /// Reason recorded by the first `close` call, if any.
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Last instant a packet was sent or received on this session. Updated
    /// on creation, on every successful send and receive, and on close.
    pub fn last_active(&self) -> Instant {
        self.created_at + Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed))
    }

    /// Time elapsed since `last_active`.
    pub fn idle_time(&self) -> Duration {
        self.last_active().elapsed()
    }

    pub(crate) fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_active_ms.store(elapsed, Ordering::Relaxed);
    }

    pub fn read_deadline(&self) -> Duration {
        *self.read_deadline.read().expect("read_deadline lock")
    }

    pub fn set_read_deadline(&self, deadline: Duration) {
        *self.read_deadline.write().expect("read_deadline lock") = deadline;
    }

    pub fn write_deadline(&self) -> Duration {
        *self.write_deadline.read().expect("write_deadline lock")
    }

    pub fn set_write_deadline(&self, deadline: Duration) {
        *self.write_deadline.write().expect("write_deadline lock") = deadline;
    }

    pub fn heartbeat(&self) -> Duration {
        *self.heartbeat.read().expect("heartbeat lock")
    }

    pub fn set_heartbeat(&self, heartbeat: Duration) {
        *self.heartbeat.write().expect("heartbeat lock") = heartbeat;
    }

    pub fn attr(&self, key: &str) -> Option<String> {
        self.attributes.read().expect("attributes lock").get(key).cloned()
    }

    pub fn set_attr(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .write()
            .expect("attributes lock")
            .insert(key.into(), value.into());
    }

    /// Snapshot of all sessions registered on the owning server, this one
    /// included. Empty for client-side sessions and after server shutdown.
    pub async fn server_sessions(&self) -> Vec<Arc<Session<M>>> {
        match self.registry.upgrade() {
            Some(registry) => registry.snapshot().await,
            None => Vec::new(),
        }
    }

    /// Messages sitting in the send queue, not yet picked up by the writer.
    pub(crate) fn queued_messages(&self) -> usize {
        self.outbound_tx.max_capacity() - self.outbound_tx.capacity()
    }

    /// Hand a protocol packet (a PONG reply) to the writer's control lane.
    pub(crate) async fn send_control(&self, packet: Packet) -> Result<(), SessionError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SessionError::NotRunning),
            res = self.control_tx.send(packet) => res.map_err(|_| SessionError::NotRunning),
        }
    }

    pub(crate) fn debug_enabled(&self) -> bool {
        self.debug
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests() -> Arc<Self> {
        let config = SessionConfig {
            read_deadline: Duration::from_secs(5),
            write_deadline: Duration::from_secs(5),
            heartbeat: Duration::from_secs(13),
            debug: false,
        };
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("loopback addr");
        let (session, pipes) = Session::new(addr, config, Weak::new(), CancellationToken::new());
        std::mem::forget(pipes);
        session
    }
}

/// Server-side registry of live sessions, keyed by session id.
///
/// Sessions hold a weak reference back to it for broadcast-style listeners;
/// the server holds the only strong one.
pub(crate) struct SessionRegistry<M> {
    sessions: tokio::sync::RwLock<HashMap<Uuid, Arc<Session<M>>>>,
}

impl<M: Send + 'static> SessionRegistry<M> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: tokio::sync::RwLock::new(HashMap::new()),
        })
    }

    pub async fn insert(&self, session: Arc<Session<M>>) {
        self.sessions.write().await.insert(session.id(), session);
    }

    pub async fn remove(&self, id: &Uuid) {
        self.sessions.write().await.remove(id);
    }

    pub async fn snapshot(&self) -> Vec<Arc<Session<M>>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_is_idempotent_and_records_first_reason() {
        let session = Session::<String>::new_for_tests();
        assert_eq!(session.status(), SessionStatus::Created);
        assert!(!session.is_closed());

        session.close("first");
        session.close("second");
        session.close("third");

        assert_eq!(session.status(), SessionStatus::Closed);
        assert_eq!(session.close_reason().as_deref(), Some("first"));
        session.closed().await;
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let session = Session::<String>::new_for_tests();
        session.close("done");
        let err = session.send("late".into()).await.unwrap_err();
        assert!(matches!(err, SessionError::NotRunning));
    }

    #[tokio::test]
    async fn send_blocked_on_full_queue_unblocks_on_close() {
        let session = Session::<String>::new_for_tests();
        for _ in 0..SEND_QUEUE_CAPACITY {
            session.send("fill".into()).await.unwrap();
        }

        let blocked = {
            let session = session.clone();
            tokio::spawn(async move { session.send("overflow".into()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        session.close("full queue");
        let result = blocked.await.unwrap();
        assert!(matches!(result, Err(SessionError::NotRunning)));
    }

    #[tokio::test]
    async fn attributes_are_mutable() {
        let session = Session::<String>::new_for_tests();
        assert_eq!(session.attr("user"), None);
        session.set_attr("user", "alice");
        assert_eq!(session.attr("user").as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn deadlines_are_mutable_after_creation() {
        let session = Session::<String>::new_for_tests();
        session.set_read_deadline(Duration::from_secs(42));
        session.set_write_deadline(Duration::from_secs(24));
        session.set_heartbeat(Duration::from_secs(2));
        assert_eq!(session.read_deadline(), Duration::from_secs(42));
        assert_eq!(session.write_deadline(), Duration::from_secs(24));
        assert_eq!(session.heartbeat(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn touch_moves_last_active_forward() {
        let session = Session::<String>::new_for_tests();
        let before = session.last_active();
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.touch();
        assert!(session.last_active() >= before);
        assert!(session.idle_time() < Duration::from_millis(20));
    }
}
