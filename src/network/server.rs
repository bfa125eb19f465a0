//! The TCP server: listen, accept, per-session runtimes, registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::runtime::{drive_session, ReadTimeoutPolicy, RuntimeOptions};
use super::session::{Session, SessionConfig, SessionRegistry};
use super::{DEFAULT_HEARTBEAT, DEFAULT_READ_DEADLINE, DEFAULT_WRITE_DEADLINE};
use crate::codec::{Codec, StringCodec};
use crate::listener::{MessageListener, SessionListener};
use crate::protocol::DEFAULT_MAX_BODY_LENGTH;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server is not in the Preparing state")]
    NotPreparing,
}

/// Server lifecycle. Configuration is only open in `Preparing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Preparing,
    Running,
    Stop,
}

/// Everything the accept loop and the per-connection tasks share.
struct ServerShared<M> {
    registry: Arc<SessionRegistry<M>>,
    codec: Arc<dyn Codec<Message = M>>,
    message_listener: Arc<dyn MessageListener<M>>,
    session_listener: Option<Arc<dyn SessionListener<M>>>,
    read_deadline: Duration,
    write_deadline: Duration,
    heartbeat: Duration,
    max_body_length: u32,
    read_timeout_policy: ReadTimeoutPolicy,
    debug: bool,
    cancel: CancellationToken,
}

/// A session-oriented TCP server.
///
/// Builder-style configuration while `Preparing`, then `run` binds the
/// listener and spawns the accept loop. Every accepted connection becomes a
/// [`Session`] served by its own reader/writer pair.
pub struct TcpServer<M> {
    addr: String,
    status: ServerStatus,
    debug: bool,
    max_body_length: u32,
    default_read_deadline: Duration,
    default_write_deadline: Duration,
    default_heartbeat: Duration,
    read_timeout_policy: ReadTimeoutPolicy,
    codec: Arc<dyn Codec<Message = M>>,
    message_listener: Option<Arc<dyn MessageListener<M>>>,
    session_listener: Option<Arc<dyn SessionListener<M>>>,
    registry: Arc<SessionRegistry<M>>,
    cancel: CancellationToken,
    local_addr: Option<SocketAddr>,
}

impl TcpServer<String> {
    /// A server speaking the default stringifying codec.
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_codec(addr, StringCodec)
    }
}

impl<M: Send + Sync + 'static> TcpServer<M> {
    /// A server with an explicit codec; fixes the message type.
    pub fn with_codec(addr: impl Into<String>, codec: impl Codec<Message = M>) -> Self {
        Self {
            addr: addr.into(),
            status: ServerStatus::Preparing,
            debug: false,
            max_body_length: DEFAULT_MAX_BODY_LENGTH,
            default_read_deadline: DEFAULT_READ_DEADLINE,
            default_write_deadline: DEFAULT_WRITE_DEADLINE,
            default_heartbeat: DEFAULT_HEARTBEAT,
            read_timeout_policy: ReadTimeoutPolicy::Disconnect,
            codec: Arc::new(codec),
            message_listener: None,
            session_listener: None,
            registry: SessionRegistry::new(),
            cancel: CancellationToken::new(),
            local_addr: None,
        }
    }

    /// Configuration outside `Preparing` is a caller bug.
    fn check_preparing(&self) {
        if self.status != ServerStatus::Preparing {
            panic!("cannot change server configuration while running or stopped");
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

    /// Optional: session create/close callbacks.
    pub fn register_session_listener(
        &mut self,
        listener: impl SessionListener<M> + 'static,
    ) -> &mut Self {
        self.check_preparing();
        self.session_listener = Some(Arc::new(listener));
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

    /// Heartbeat interval for new sessions. Must stay below the default
    /// read deadline or an idle peer would be dropped before it could ping.
    pub fn set_heartbeat(&mut self, heartbeat: Duration) -> &mut Self {
        self.check_preparing();
        self.default_heartbeat = heartbeat;
        if self.default_heartbeat >= self.default_read_deadline {
            panic!("heartbeat must be less than the read deadline");
        }
        self
    }

    pub fn set_default_read_deadline(&mut self, deadline: Duration) -> &mut Self {
        self.check_preparing();
        self.default_read_deadline = deadline;
        self
    }

    pub fn set_default_write_deadline(&mut self, deadline: Duration) -> &mut Self {
        self.check_preparing();
        self.default_write_deadline = deadline;
        self
    }

    /// Reader behavior on an idle read timeout; `Disconnect` by default.
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

    /// Bind, start accepting and return. Panics when no message listener is
    /// registered; bind failures are returned.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        if self.status != ServerStatus::Preparing {
            return Err(ServerError::NotPreparing);
        }
        let message_listener = self
            .message_listener
            .clone()
            .unwrap_or_else(|| panic!("message listener not registered"));

        let listener = TcpListener::bind(&self.addr).await?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        self.status = ServerStatus::Running;

        let shared = Arc::new(ServerShared {
            registry: self.registry.clone(),
            codec: self.codec.clone(),
            message_listener,
            session_listener: self.session_listener.clone(),
            read_deadline: self.default_read_deadline,
            write_deadline: self.default_write_deadline,
            heartbeat: self.default_heartbeat,
            max_body_length: self.max_body_length,
            read_timeout_policy: self.read_timeout_policy,
            debug: self.debug,
            cancel: self.cancel.clone(),
        });

        tokio::spawn(accept_loop(listener, shared));
        info!(addr = %local_addr, "server listening");
        Ok(())
    }

    /// Fire the stop signal and return immediately. Idempotent. Live
    /// sessions observe the cancellation and close themselves.
    pub fn stop(&mut self) {
        if self.status == ServerStatus::Stop {
            return;
        }
        self.status = ServerStatus::Stop;
        self.cancel.cancel();
        info!(addr = ?self.local_addr, "server stopped");
    }

    /// Snapshot of the live session registry.
    pub async fn sessions(&self) -> Vec<Arc<Session<M>>> {
        self.registry.snapshot().await
    }

    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Bound address, available once `run` returned.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl<M> Drop for TcpServer<M> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop<M: Send + Sync + 'static>(
    listener: TcpListener,
    shared: Arc<ServerShared<M>>,
) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                debug!("stop handling accept");
                break;
            }
            res = listener.accept() => match res {
                Ok((stream, addr)) => {
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, addr, shared).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            }
        }
    }
    // Dropping the listener here closes the listening socket.
}

async fn handle_connection<M: Send + Sync + 'static>(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<ServerShared<M>>,
) {
    let config = SessionConfig {
        read_deadline: shared.read_deadline,
        write_deadline: shared.write_deadline,
        heartbeat: shared.heartbeat,
        debug: shared.debug,
    };
    let (session, pipes) = Session::new(
        addr,
        config,
        Arc::downgrade(&shared.registry),
        shared.cancel.child_token(),
    );

    shared.registry.insert(session.clone()).await;
    if shared.debug {
        debug!(sid = %session.id(), remote = %addr, "session create");
    }
    if let Some(listener) = &shared.session_listener {
        listener.on_session_create(&session).await;
    }

    let opts = RuntimeOptions {
        max_body_length: shared.max_body_length,
        read_timeout_policy: shared.read_timeout_policy,
    };
    drive_session(
        stream,
        session.clone(),
        pipes,
        shared.codec.clone(),
        shared.message_listener.clone(),
        opts,
    )
    .await;

    // Reached via the session's own close or via server shutdown; the
    // latter has not latched the status yet.
    session.close("server stopped");
    session.touch();

    shared.registry.remove(&session.id()).await;
    if let Some(listener) = &shared.session_listener {
        listener.on_session_close(&session).await;
    }
    if shared.debug {
        debug!(sid = %session.id(), remote = %addr, "conn close");
    }
}
