//! Network module - sessions, the connection runtime, server and client.

mod client;
mod runtime;
mod server;
mod session;

pub use client::{ClientError, ClientStatus, TcpClient};
pub use runtime::ReadTimeoutPolicy;
pub use server::{ServerError, ServerStatus, TcpServer};
pub use session::{Session, SessionError, SessionStatus, SEND_QUEUE_CAPACITY};

use std::time::Duration;

/// Default idle read deadline for server-side sessions.
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(5);

/// Default idle read deadline for the client, which rides out long idle
/// periods and keeps the connection alive with heartbeats.
pub const CLIENT_DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(42);

/// Default deadline for completing one outbound write.
pub const DEFAULT_WRITE_DEADLINE: Duration = Duration::from_secs(5);

/// Default idle interval after which the writer sends a PING.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(13);
