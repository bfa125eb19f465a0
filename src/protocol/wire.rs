//! Bit-exact frame encoding and decoding.
//!
//! Frame layout, all integers big-endian, no padding:
//!
//! ```text
//!  0        1                 5                    5+L              9+L
//!  +--------+-----------------+--------------------+----------------+
//!  | ver(1) | length(4) be32  | body(L bytes)      | checksum(4)    |
//!  +--------+-----------------+--------------------+----------------+
//! ```
//!
//! Decoding is strictly sequential: each call consumes exactly one frame or
//! fails. There is no buffering of partial frames across calls. The length
//! guard fires before the body is read, so an oversized advertisement never
//! consumes body bytes.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::packet::{body_checksum, Packet, DATA_VERSION, HEARTBEAT_VERSION};

/// Version byte plus the four body-length bytes.
pub const HEADER_LEN: usize = 5;

/// Trailing Adler-32 field.
pub const CHECKSUM_LEN: usize = 4;

/// Frame-level failures. All of them are fatal to the session that
/// encountered them.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Ver(0x{0:02X}) is wrong")]
    UnknownVersion(u8),

    #[error("packet size({size}) exceed max limit ({max})")]
    BodyTooLarge { size: u32, max: u32 },

    #[error("short read on packet {segment}")]
    ShortRead { segment: &'static str },

    #[error("EOF")]
    Eof,

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

fn segment_err(e: io::Error, segment: &'static str) -> FrameError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FrameError::ShortRead { segment }
    } else {
        FrameError::Io(e)
    }
}

fn check_version(version: u8) -> Result<(), FrameError> {
    if version != DATA_VERSION && version != HEARTBEAT_VERSION {
        return Err(FrameError::UnknownVersion(version));
    }
    Ok(())
}

/// Serialize a packet into one contiguous wire frame.
///
/// Fails with [`FrameError::BodyTooLarge`] when the body exceeds
/// `max_body_length`.
pub fn encode_frame(packet: &Packet, max_body_length: u32) -> Result<Bytes, FrameError> {
    let len = packet.body().len();
    if len as u64 > u64::from(max_body_length) {
        return Err(FrameError::BodyTooLarge {
            size: len as u32,
            max: max_body_length,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + len + CHECKSUM_LEN);
    buf.put_u8(packet.version());
    buf.put_u32(len as u32);
    buf.put_slice(packet.body());
    buf.put_u32(packet.checksum());
    Ok(buf.freeze())
}

/// Decode exactly one frame from an in-memory buffer.
///
/// Used by tests and harnesses; the connection runtime reads frames with
/// [`read_frame`] instead. Trailing bytes after the frame are ignored.
pub fn decode_frame(buf: &[u8], max_body_length: u32) -> Result<Packet, FrameError> {
    let version = *buf.first().ok_or(FrameError::ShortRead { segment: "version" })?;
    check_version(version)?;

    let len_bytes = buf
        .get(1..HEADER_LEN)
        .ok_or(FrameError::ShortRead { segment: "length" })?;
    let size = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
    if size > max_body_length {
        return Err(FrameError::BodyTooLarge {
            size,
            max: max_body_length,
        });
    }

    let body_end = HEADER_LEN + size as usize;
    let body = buf
        .get(HEADER_LEN..body_end)
        .ok_or(FrameError::ShortRead { segment: "body" })?;

    let sum_bytes = buf
        .get(body_end..body_end + CHECKSUM_LEN)
        .ok_or(FrameError::ShortRead { segment: "checksum" })?;
    let checksum = u32::from_be_bytes([sum_bytes[0], sum_bytes[1], sum_bytes[2], sum_bytes[3]]);

    if checksum != body_checksum(body) {
        return Err(FrameError::ChecksumMismatch);
    }

    Ok(Packet::new(version, body.to_vec(), checksum))
}

/// Read the leading version byte of the next frame.
///
/// Split out from [`read_frame_rest`] so the caller can apply its idle
/// deadline to this read alone: a timeout here means no frame has started,
/// while a timeout mid-frame means the peer stalled inside one.
pub async fn read_version<R>(reader: &mut R) -> Result<u8, FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_u8().await {
        Ok(v) => Ok(v),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::Eof),
        Err(e) => Err(FrameError::Io(e)),
    }
}

/// Read the remainder of a frame whose version byte has been consumed.
pub async fn read_frame_rest<R>(
    reader: &mut R,
    version: u8,
    max_body_length: u32,
) -> Result<Packet, FrameError>
where
    R: AsyncRead + Unpin,
{
    check_version(version)?;

    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| segment_err(e, "length"))?;
    let size = u32::from_be_bytes(len_buf);
    if size > max_body_length {
        return Err(FrameError::BodyTooLarge {
            size,
            max: max_body_length,
        });
    }

    let mut body = vec![0u8; size as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| segment_err(e, "body"))?;

    let mut sum_buf = [0u8; 4];
    reader
        .read_exact(&mut sum_buf)
        .await
        .map_err(|e| segment_err(e, "checksum"))?;
    let checksum = u32::from_be_bytes(sum_buf);

    if checksum != body_checksum(&body) {
        return Err(FrameError::ChecksumMismatch);
    }

    Ok(Packet::new(version, body, checksum))
}

/// Read one complete frame.
pub async fn read_frame<R>(reader: &mut R, max_body_length: u32) -> Result<Packet, FrameError>
where
    R: AsyncRead + Unpin,
{
    let version = read_version(reader).await?;
    read_frame_rest(reader, version, max_body_length).await
}

/// Serialize and write one frame.
pub async fn write_frame<W>(
    writer: &mut W,
    packet: &Packet,
    max_body_length: u32,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode_frame(packet, max_body_length)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
