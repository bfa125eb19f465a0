//! Framelink - session-oriented, length-prefixed framing over TCP.
//!
//! A server accepts many concurrent connections and a client dials one
//! server; both sides speak the same checksum-validated packet protocol and
//! keep idle connections alive with PING/PONG heartbeats. Decoded
//! application messages are dispatched to a user-supplied listener through a
//! pluggable codec.
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use framelink::{MessageListener, Session, TcpClient, TcpServer};
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl MessageListener<String> for Greeter {
//!     async fn on_message(&self, message: String, session: &Arc<Session<String>>) {
//!         if message == "Hello!" {
//!             let _ = session.send("Hi!".to_string()).await;
//!         }
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut server = TcpServer::new("127.0.0.1:8888");
//! server.register_message_listener(Greeter);
//! server.run().await?;
//!
//! let mut client = TcpClient::new("127.0.0.1:8888");
//! client.register_message_listener(Greeter);
//! client.dial().await?;
//! client.send("Hello!".to_string()).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod listener;
pub mod network;
pub mod protocol;

pub use codec::{BincodeCodec, Codec, CodecError, StringCodec};
pub use listener::{BroadcastListener, MessageListener, SessionListener};
pub use network::{
    ClientError, ClientStatus, ReadTimeoutPolicy, ServerError, ServerStatus, Session,
    SessionError, SessionStatus, TcpClient, TcpServer,
};
pub use protocol::{FrameError, HeartbeatCmd, Packet};
