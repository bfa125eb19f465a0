//! The per-connection runtime: one reader task and one writer task.
//!
//! Server and client drive their connections through the same pair of
//! loops; the only behavioral split is what the reader does when the read
//! deadline passes with no bytes on the wire.

use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::codec::Codec;
use crate::listener::MessageListener;
use crate::network::session::{Session, SessionPipes};
use crate::protocol::{self, FrameError, HeartbeatCmd, Packet};

/// What the reader does when the read deadline passes without any bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTimeoutPolicy {
    /// Close the session. Server default: a quiet peer is presumed gone.
    Disconnect,
    /// Treat the deadline as a tick and keep reading. Client default: the
    /// heartbeat originator must ride out idle reads.
    Continue,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RuntimeOptions {
    pub max_body_length: u32,
    pub read_timeout_policy: ReadTimeoutPolicy,
}

/// Run a session to completion.
///
/// Spawns the reader and writer, waits for the session's close signal
/// (fired by either loop, by an explicit `close`, or by parent
/// cancellation), then joins both tasks. Dropping the socket halves closes
/// the connection.
pub(crate) async fn drive_session<M: Send + Sync + 'static>(
    stream: TcpStream,
    session: Arc<Session<M>>,
    pipes: SessionPipes<M>,
    codec: Arc<dyn Codec<Message = M>>,
    listener: Arc<dyn MessageListener<M>>,
    opts: RuntimeOptions,
) {
    let (read_half, write_half) = stream.into_split();

    let reader = tokio::spawn(read_loop(
        read_half,
        session.clone(),
        codec.clone(),
        listener,
        opts,
    ));
    let writer = tokio::spawn(write_loop(write_half, session.clone(), pipes, codec, opts));

    session.closed().await;
    let _ = tokio::join!(reader, writer);
}

async fn read_loop<M: Send + Sync + 'static>(
    mut reader: OwnedReadHalf,
    session: Arc<Session<M>>,
    codec: Arc<dyn Codec<Message = M>>,
    listener: Arc<dyn MessageListener<M>>,
    opts: RuntimeOptions,
) {
    loop {
        let deadline = session.read_deadline();

        // The idle deadline applies to the version byte alone: a timeout
        // here means no frame has started.
        let version = tokio::select! {
            _ = session.closed() => {
                if session.debug_enabled() {
                    debug!(sid = %session.id(), "session read done");
                }
                return;
            }
            res = timeout(deadline, protocol::read_version(&mut reader)) => match res {
                Err(_) => match opts.read_timeout_policy {
                    ReadTimeoutPolicy::Continue => continue,
                    ReadTimeoutPolicy::Disconnect => {
                        session.close("read deadline exceeded");
                        return;
                    }
                },
                Ok(Err(FrameError::Eof)) => {
                    session.close("EOF");
                    return;
                }
                Ok(Err(e)) => {
                    session.close(format!("read error: {e}"));
                    return;
                }
                Ok(Ok(v)) => v,
            }
        };

        // A frame has started; stalling inside it is fatal regardless of
        // policy.
        let packet = match timeout(
            deadline,
            protocol::read_frame_rest(&mut reader, version, opts.max_body_length),
        )
        .await
        {
            Err(_) => {
                session.close("read deadline exceeded inside frame");
                return;
            }
            Ok(Err(e)) => {
                session.close(e.to_string());
                return;
            }
            Ok(Ok(packet)) => packet,
        };

        if dispatch(&session, &codec, &listener, packet).await.is_err() {
            return;
        }
    }
}

/// Route one validated packet: heartbeat handling or codec decode plus
/// listener dispatch. An `Err` return means the session was closed.
async fn dispatch<M: Send + Sync + 'static>(
    session: &Arc<Session<M>>,
    codec: &Arc<dyn Codec<Message = M>>,
    listener: &Arc<dyn MessageListener<M>>,
    packet: Packet,
) -> Result<(), ()> {
    if packet.is_heartbeat() {
        session.touch();

        let cmd = match packet.body() {
            [b] => HeartbeatCmd::from_byte(*b),
            _ => None,
        };
        match cmd {
            Some(HeartbeatCmd::Ping) => {
                if session.debug_enabled() {
                    debug!(sid = %session.id(), checksum = packet.checksum(), "heartbeat ping received");
                }
                if session
                    .send_control(Packet::heartbeat(HeartbeatCmd::Pong))
                    .await
                    .is_err()
                {
                    return Err(());
                }
            }
            Some(HeartbeatCmd::Pong) => {
                if session.debug_enabled() {
                    debug!(sid = %session.id(), checksum = packet.checksum(), "heartbeat pong received");
                }
            }
            None => {
                if session.debug_enabled() {
                    debug!(sid = %session.id(), body_len = packet.body_len(), "heartbeat with unknown command");
                }
            }
        }
        return Ok(());
    }

    match codec.decode(packet.body(), session) {
        Err(e) => {
            session.close(format!("packet decode error: {e}"));
            Err(())
        }
        Ok(message) => {
            session.touch();
            if session.debug_enabled() {
                debug!(sid = %session.id(), len = packet.body_len(), checksum = packet.checksum(), "packet received");
            }
            listener.on_message(message, session).await;
            Ok(())
        }
    }
}

async fn write_loop<M: Send + Sync + 'static>(
    mut writer: OwnedWriteHalf,
    session: Arc<Session<M>>,
    pipes: SessionPipes<M>,
    codec: Arc<dyn Codec<Message = M>>,
    opts: RuntimeOptions,
) {
    let SessionPipes {
        mut outbound_rx,
        mut control_rx,
    } = pipes;

    loop {
        let heartbeat = session.heartbeat();

        tokio::select! {
            _ = session.closed() => {
                if session.debug_enabled() {
                    debug!(sid = %session.id(), "session write done");
                }
                return;
            }
            msg = outbound_rx.recv() => {
                let Some(msg) = msg else { return };
                let body = match codec.encode(&msg, &session) {
                    Ok(body) => body,
                    Err(e) => {
                        session.close(format!("encode data error: {e}"));
                        return;
                    }
                };
                // encode_frame enforces the body-length limit.
                let packet = Packet::data(body);
                if write_packet(&mut writer, &session, &packet, opts.max_body_length)
                    .await
                    .is_err()
                {
                    return;
                }
            }
            pkt = control_rx.recv() => {
                let Some(packet) = pkt else { return };
                if write_packet(&mut writer, &session, &packet, opts.max_body_length)
                    .await
                    .is_err()
                {
                    return;
                }
                if session.debug_enabled() {
                    debug!(sid = %session.id(), "heartbeat pong sent");
                }
            }
            _ = tokio::time::sleep(heartbeat) => {
                // Fresh traffic since the timer was armed: skip this tick.
                if session.idle_time() < heartbeat {
                    continue;
                }
                let packet = Packet::heartbeat(HeartbeatCmd::Ping);
                if write_packet(&mut writer, &session, &packet, opts.max_body_length)
                    .await
                    .is_err()
                {
                    return;
                }
                if session.debug_enabled() {
                    debug!(sid = %session.id(), checksum = packet.checksum(), "heartbeat ping sent");
                }
            }
        }
    }
}

/// Serialize one packet to the socket under a freshly armed write deadline.
/// Any failure closes the session; success updates `last_active`.
async fn write_packet<M: Send + 'static>(
    writer: &mut OwnedWriteHalf,
    session: &Arc<Session<M>>,
    packet: &Packet,
    max_body_length: u32,
) -> Result<(), ()> {
    let deadline = session.write_deadline();

    match timeout(deadline, protocol::write_frame(writer, packet, max_body_length)).await {
        Err(_) => {
            session.close("write deadline exceeded");
            Err(())
        }
        Ok(Err(e)) => {
            session.close(e.to_string());
            Err(())
        }
        Ok(Ok(())) => {
            session.touch();
            if session.debug_enabled() {
                debug!(sid = %session.id(), len = packet.body_len(), checksum = packet.checksum(), "packet send");
            }
            Ok(())
        }
    }
}
