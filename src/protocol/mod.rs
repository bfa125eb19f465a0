//! Protocol module - the binary wire format.
//!
//! One frame per packet:
//! - 1 byte version (`0x2A` data, `0xFF` heartbeat)
//! - 4 bytes body length (big-endian)
//! - body
//! - 4 bytes Adler-32 of the body (big-endian)

mod packet;
mod wire;

pub use packet::*;
pub use wire::*;
