//! Listener seams consumed by the connection runtime.
//!
//! The message listener is required on both endpoints; the session lifecycle
//! listener is optional and server-side only.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::network::Session;

/// Invoked with every decoded application message, in wire order.
///
/// The session argument is the connection the message arrived on; replies go
/// back through its `send`. On the client side it is the client's own
/// session.
#[async_trait]
pub trait MessageListener<M>: Send + Sync {
    async fn on_message(&self, message: M, session: &Arc<Session<M>>);
}

/// Optional server-side lifecycle callbacks.
#[async_trait]
pub trait SessionListener<M>: Send + Sync {
    async fn on_session_create(&self, session: &Arc<Session<M>>);
    async fn on_session_close(&self, session: &Arc<Session<M>>);
}

/// Example listener: re-emits every received message to all other sessions
/// registered on the owning server. The sender does not receive its own
/// message back.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastListener;

#[async_trait]
impl<M> MessageListener<M> for BroadcastListener
where
    M: Clone + Send + Sync + 'static,
{
    async fn on_message(&self, message: M, session: &Arc<Session<M>>) {
        let peers = session.server_sessions().await;
        debug!(sid = %session.id(), peers = peers.len(), "broadcasting message");

        for peer in peers {
            if peer.id() == session.id() {
                continue;
            }
            if let Err(e) = peer.send(message.clone()).await {
                debug!(sid = %peer.id(), error = %e, "broadcast skipped peer");
            }
        }
    }
}
