//! The TCP client: dial one server, run the same per-connection runtime.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::runtime::{drive_session, ReadTimeoutPolicy, RuntimeOptions};
use super::session::{Session, SessionConfig, SessionError};
use super::{CLIENT_DEFAULT_READ_DEADLINE, DEFAULT_HEARTBEAT, DEFAULT_WRITE_DEADLINE};
use crate::codec::{Codec, StringCodec};
use crate::listener::MessageListener;
use crate::protocol::DEFAULT_MAX_BODY_LENGTH;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("client already running")]
    AlreadyRunning,

    #[error("client is not running")]
    NotRunning,
}

impl From<SessionError> for ClientError {
    fn from(_: SessionError) -> Self {
        ClientError::NotRunning
    }
}

/// Client lifecycle. Configuration is only open in `Preparing`; a client
/// that hung up may dial again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Preparing,
    Running,
    Stop,
}

/// A client for one server connection.
///
/// Mirrors the server builder without the accept loop or registry: one
/// session, one codec, one message listener. The client originates
/// heartbeats when the connection idles, so its reader survives read
/// timeouts by default.
pub struct TcpClient<M> {
    name: Uuid,
    target: String,
    status: Arc<RwLock<ClientStatus>>,
    debug: bool,
    max_body_length: u32,
    read_deadline: Duration,
    write_deadline: Duration,
    heartbeat: Duration,
    read_timeout_policy: ReadTimeoutPolicy,
    codec: Arc<dyn Codec<Message = M>>,
    message_listener: Option<Arc<dyn MessageListener<M>>>,
    session: Arc<RwLock<Option<Arc<Session<M>>>>>,
}

impl TcpClient<String> {
    /// A client speaking the default stringifying codec.
    pub fn new(target: impl Into<String>) -> Self {
        Self::with_codec(target, StringCodec)
    }
}

impl<M: Send + Sync + 'static> TcpClient<M> {
    /// A client with an explicit codec; fixes the message type.
    pub fn with_codec(target: impl Into<String>, codec: impl Codec<Message = M>) -> Self {
        Self {
            name: Uuid::new_v4(),
            target: target.into(),
            status: Arc::new(RwLock::new(ClientStatus::Preparing)),
            debug: false,
            max_body_length: DEFAULT_MAX_BODY_LENGTH,
            read_deadline: CLIENT_DEFAULT_READ_DEADLINE,
            write_deadline: DEFAULT_WRITE_DEADLINE,
            heartbeat: DEFAULT_HEARTBEAT,
            read_timeout_policy: ReadTimeoutPolicy::Continue,
            codec: Arc::new(codec),
            message_listener: None,
            session: Arc::new(RwLock::new(None)),
        }
    }

    fn check_preparing(&self) {
        if self.status() != ClientStatus::Preparing {
            panic!("cannot change client configuration while running or stopped");
        }
    }

    /// Required: the callback invoked with every decoded message.
    pub fn register_message_listener(
        &mut self,
        listener: impl MessageListener<M> + 'static,
    ) -> &mut Self {
        self.check_preparing();
        self.message_listener = Some(Arc::new(listener));
        self
    }

    /// Swap the codec for another of the same message type.
    pub fn set_codec(&mut self, codec: impl Codec<Message = M>) -> &mut Self {
        self.check_preparing();
        self.codec = Arc::new(codec);
        self
    }

    pub fn set_max_body_length(&mut self, max_bytes: u32) -> &mut Self {
        self.check_preparing();
        self.max_body_length = max_bytes;
        self
    }

    pub fn set_read_deadline(&mut self, deadline: Duration) -> &mut Self {
        self.check_preparing();
        self.read_deadline = deadline;
        self
    }

    pub fn set_write_deadline(&mut self, deadline: Duration) -> &mut Self {
        self.check_preparing();
        self.write_deadline = deadline;
        self
    }

    /// Idle interval after which the client pings. Must stay below the read
    /// deadline so an idle but healthy connection keeps itself alive.
    pub fn set_heartbeat(&mut self, heartbeat: Duration) -> &mut Self {
        self.check_preparing();
        self.heartbeat = heartbeat;
        if self.heartbeat >= self.read_deadline {
            panic!("heartbeat must be less than the read deadline");
        }
        self
    }

    /// Reader behavior on an idle read timeout; `Continue` by default.
    pub fn set_read_timeout_policy(&mut self, policy: ReadTimeoutPolicy) -> &mut Self {
        self.check_preparing();
        self.read_timeout_policy = policy;
        self
    }

    /// Toggle per-packet and heartbeat debug events.
    pub fn set_debug(&mut self, on: bool) -> &mut Self {
        self.check_preparing();
        self.debug = on;
        self
    }

    /// Connect and start the connection runtime. Panics when no message
    /// listener is registered; connect failures are returned. Dialing again
    /// after a hangup opens a fresh session.
    pub async fn dial(&self) -> Result<(), ClientError> {
        if self.message_listener.is_none() {
            panic!("message listener not registered");
        }
        if self.status() == ClientStatus::Running {
            return Err(ClientError::AlreadyRunning);
        }

        let stream = TcpStream::connect(&self.target).await?;
        let remote_addr = stream.peer_addr()?;

        let config = SessionConfig {
            read_deadline: self.read_deadline,
            write_deadline: self.write_deadline,
            heartbeat: self.heartbeat,
            debug: self.debug,
        };
        let (session, pipes) = Session::new(
            remote_addr,
            config,
            std::sync::Weak::new(),
            CancellationToken::new(),
        );

        *self.session.write().expect("session lock") = Some(session.clone());
        *self.status.write().expect("status lock") = ClientStatus::Running;
        info!(name = %self.name, remote = %remote_addr, "client dialed");

        let opts = RuntimeOptions {
            max_body_length: self.max_body_length,
            read_timeout_policy: self.read_timeout_policy,
        };
        let codec = self.codec.clone();
        let listener = self
            .message_listener
            .clone()
            .expect("listener checked above");
        let status = self.status.clone();
        let session_slot = self.session.clone();
        let name = self.name;

        tokio::spawn(async move {
            drive_session(stream, session.clone(), pipes, codec, listener, opts).await;

            // Only this connection's monitor may flip the status; after a
            // redial the slot holds a newer session.
            let still_current = session_slot
                .read()
                .expect("session lock")
                .as_ref()
                .map(|s| s.id())
                == Some(session.id());
            if still_current {
                let mut st = status.write().expect("status lock");
                if *st == ClientStatus::Running {
                    *st = ClientStatus::Stop;
                }
            }
            info!(name = %name, remote = %session.remote_addr(), "client connection closed");
        });

        Ok(())
    }

    /// Enqueue a message. Fails with `NotRunning` unless the client is
    /// `Running`; blocks only while the bounded send queue is full.
    pub async fn send(&self, message: M) -> Result<(), ClientError> {
        if self.status() != ClientStatus::Running {
            return Err(ClientError::NotRunning);
        }
        let session = self.session().ok_or(ClientError::NotRunning)?;
        session.send(message).await?;
        Ok(())
    }

    /// Close the connection. Buffered outbound messages get up to five
    /// 200 ms ticks to drain first. Idempotent.
    pub async fn hangup(&self, reason: &str) {
        {
            let mut st = self.status.write().expect("status lock");
            if *st == ClientStatus::Stop {
                return;
            }
            *st = ClientStatus::Stop;
        }

        let Some(session) = self.session() else {
            return;
        };

        for tick in (1..=5).rev() {
            if session.queued_messages() == 0 {
                break;
            }
            if self.debug {
                debug!(name = %self.name, tick, "waiting for send queue before hangup");
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        session.close(reason);
        if self.debug {
            debug!(name = %self.name, remote = %session.remote_addr(), %reason, "client hangup");
        }
    }

    pub fn status(&self) -> ClientStatus {
        *self.status.read().expect("status lock")
    }

    pub fn is_running(&self) -> bool {
        self.status() == ClientStatus::Running
    }

    /// The session of the current (or last) connection.
    pub fn session(&self) -> Option<Arc<Session<M>>> {
        self.session.read().expect("session lock").clone()
    }

    /// Client identity, also usable as a session attribute value.
    pub fn name(&self) -> Uuid {
        self.name
    }

    /// Remote address of the current connection.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.session().map(|s| s.remote_addr())
    }
}
