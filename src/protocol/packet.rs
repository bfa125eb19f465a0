//! Wire packet type.
//!
//! A packet is one unit of the framing protocol: a version byte, the body
//! and an Adler-32 checksum over the body. Two versions are recognized:
//! `DATA` frames carry a codec-encoded application message, `HEARTBEAT`
//! frames carry a single command byte (ping or pong).

use adler32::RollingAdler32;

/// Version byte of application data frames.
pub const DATA_VERSION: u8 = 0x2A;

/// Version byte of heartbeat frames.
pub const HEARTBEAT_VERSION: u8 = 0xFF;

/// Default maximum packet body length (4 MiB).
pub const DEFAULT_MAX_BODY_LENGTH: u32 = 4 * 1024 * 1024;

/// Adler-32 of a packet body. Header and checksum bytes are excluded.
pub fn body_checksum(body: &[u8]) -> u32 {
    RollingAdler32::from_buffer(body).hash()
}

/// Heartbeat command carried in the single body byte of a heartbeat frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeartbeatCmd {
    Ping = 0x00,
    Pong = 0x01,
}

impl HeartbeatCmd {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(HeartbeatCmd::Ping),
            0x01 => Some(HeartbeatCmd::Pong),
            _ => None,
        }
    }
}

/// One unit of the wire protocol.
///
/// The checksum is stored as received (or as computed at construction), so a
/// decoded packet can be validated with [`Packet::checksum_ok`] before its
/// body is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    version: u8,
    body: Vec<u8>,
    checksum: u32,
}

impl Packet {
    /// Assemble a packet from raw decoded fields.
    pub fn new(version: u8, body: Vec<u8>, checksum: u32) -> Self {
        Self {
            version,
            body,
            checksum,
        }
    }

    /// Build a data packet; the checksum is computed from the body.
    pub fn data(body: Vec<u8>) -> Self {
        let checksum = body_checksum(&body);
        Self {
            version: DATA_VERSION,
            body,
            checksum,
        }
    }

    /// Build a heartbeat packet with a one-byte command body.
    pub fn heartbeat(cmd: HeartbeatCmd) -> Self {
        Self::new(HEARTBEAT_VERSION, vec![cmd as u8], body_checksum(&[cmd as u8]))
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body length as carried in the frame header.
    pub fn body_len(&self) -> u32 {
        self.body.len() as u32
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Whether the stored checksum matches the body.
    pub fn checksum_ok(&self) -> bool {
        self.checksum == body_checksum(&self.body)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.version == HEARTBEAT_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_packet_carries_valid_checksum() {
        let p = Packet::data(b"payload".to_vec());
        assert_eq!(p.version(), DATA_VERSION);
        assert!(p.checksum_ok());
    }

    #[test]
    fn heartbeat_packet_shape() {
        let ping = Packet::heartbeat(HeartbeatCmd::Ping);
        assert_eq!(ping.version(), HEARTBEAT_VERSION);
        assert_eq!(ping.body(), &[0x00]);
        assert_eq!(ping.body_len(), 1);
        assert!(ping.checksum_ok());

        let pong = Packet::heartbeat(HeartbeatCmd::Pong);
        assert_eq!(pong.body(), &[0x01]);
    }

    #[test]
    fn tampered_body_fails_checksum() {
        let mut p = Packet::data(b"abc".to_vec());
        p.body[1] ^= 0x01;
        assert!(!p.checksum_ok());
    }

    #[test]
    fn heartbeat_cmd_from_byte() {
        assert_eq!(HeartbeatCmd::from_byte(0), Some(HeartbeatCmd::Ping));
        assert_eq!(HeartbeatCmd::from_byte(1), Some(HeartbeatCmd::Pong));
        assert_eq!(HeartbeatCmd::from_byte(2), None);
    }
}
