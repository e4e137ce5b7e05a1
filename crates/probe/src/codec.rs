//! Wire codec for the status-query protocol.
//!
//! Every packet is `varint(length) ‖ varint(packet id) ‖ payload`, where the
//! length covers the id and the payload. Strings are `varint(byte length) ‖
//! utf-8`.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProbeError, ProbeResult};

/// Longest legal varint encoding of an `i32`.
pub const MAX_VARINT_BYTES: usize = 5;

/// Largest packet the prober accepts (2 MiB).
pub const MAX_PACKET_BYTES: usize = 2 * 1024 * 1024;

/// Handshake, status request and status response share id `0x00`.
pub const HANDSHAKE_ID: i32 = 0x00;
pub const STATUS_ID: i32 = 0x00;
pub const PING_ID: i32 = 0x01;

/// Next state requested by the handshake: status.
const NEXT_STATE_STATUS: i32 = 1;

/// Append `value` as a varint (two's complement for negatives).
pub fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut remaining = u32::from_ne_bytes(value.to_ne_bytes());
    loop {
        let byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Decode a varint from the front of `buf`, advancing it.
///
/// # Errors
///
/// `UnexpectedEof` when `buf` ends mid-varint, `VarIntTooLong` past five bytes.
pub fn read_varint(buf: &mut &[u8]) -> ProbeResult<i32> {
    let mut value: u32 = 0;
    for position in 0..MAX_VARINT_BYTES {
        let Some((&byte, rest)) = buf.split_first() else {
            return Err(ProbeError::UnexpectedEof { context: "varint" });
        };
        *buf = rest;
        value |= u32::from(byte & 0x7f) << (7 * position);
        if byte & 0x80 == 0 {
            return Ok(i32::from_ne_bytes(value.to_ne_bytes()));
        }
    }
    Err(ProbeError::VarIntTooLong)
}

/// Decode a varint straight from a stream.
///
/// # Errors
///
/// Read failures, and `VarIntTooLong` past five bytes.
pub async fn read_varint_from<R: AsyncRead + Unpin>(
    reader: &mut R,
    context: &'static str,
) -> ProbeResult<i32> {
    let mut value: u32 = 0;
    for position in 0..MAX_VARINT_BYTES {
        let byte = reader
            .read_u8()
            .await
            .map_err(|e| ProbeError::read(&e, context))?;
        value |= u32::from(byte & 0x7f) << (7 * position);
        if byte & 0x80 == 0 {
            return Ok(i32::from_ne_bytes(value.to_ne_bytes()));
        }
    }
    Err(ProbeError::VarIntTooLong)
}

/// Append a length-prefixed UTF-8 string.
pub fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, i32::try_from(value.len()).unwrap_or(i32::MAX));
    buf.extend_from_slice(value.as_bytes());
}

/// Decode a length-prefixed UTF-8 string from the front of `buf`.
///
/// # Errors
///
/// Negative or oversized lengths, truncation and invalid UTF-8.
pub fn read_string(buf: &mut &[u8]) -> ProbeResult<String> {
    let declared = read_varint(buf)?;
    let len = usize::try_from(declared)
        .map_err(|_| ProbeError::malformed(format!("negative string length {declared}")))?;
    if len > MAX_PACKET_BYTES {
        return Err(ProbeError::too_large(len, MAX_PACKET_BYTES));
    }
    if len > buf.len() {
        return Err(ProbeError::UnexpectedEof { context: "string" });
    }
    let (bytes, rest) = buf.split_at(len);
    *buf = rest;
    String::from_utf8(bytes.to_vec()).map_err(|e| ProbeError::malformed(e.to_string()))
}

/// Frame `payload` as packet `id`.
#[must_use]
pub fn encode_packet(id: i32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + MAX_VARINT_BYTES);
    write_varint(&mut body, id);
    body.extend_from_slice(payload);

    let mut packet = Vec::with_capacity(body.len() + MAX_VARINT_BYTES);
    write_varint(&mut packet, i32::try_from(body.len()).unwrap_or(i32::MAX));
    packet.extend_from_slice(&body);
    packet
}

/// Handshake announcing a status query for `host:port`.
#[must_use]
pub fn handshake(protocol_version: i32, host: &str, port: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(host.len() + 16);
    write_varint(&mut payload, protocol_version);
    write_string(&mut payload, host);
    payload.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut payload, NEXT_STATE_STATUS);
    encode_packet(HANDSHAKE_ID, &payload)
}

/// Empty status request.
#[must_use]
pub fn status_request() -> Vec<u8> {
    encode_packet(STATUS_ID, &[])
}

/// Ping carrying `token`, echoed back by the server.
#[must_use]
pub fn ping(token: i64) -> Vec<u8> {
    encode_packet(PING_ID, &token.to_be_bytes())
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Fail unless this packet has id `expected`.
    ///
    /// # Errors
    ///
    /// `UnexpectedPacket` on mismatch.
    pub fn expect_id(self, expected: i32) -> ProbeResult<Self> {
        if self.id == expected {
            Ok(self)
        } else {
            Err(ProbeError::UnexpectedPacket {
                expected,
                actual: self.id,
            })
        }
    }

    /// The status response JSON.
    ///
    /// # Errors
    ///
    /// See [`read_string`].
    pub fn status_json(&self) -> ProbeResult<String> {
        let mut payload = self.payload.as_slice();
        read_string(&mut payload)
    }

    /// The echoed ping token.
    ///
    /// # Errors
    ///
    /// `Malformed` unless the payload is exactly eight bytes.
    pub fn pong_token(&self) -> ProbeResult<i64> {
        let bytes: [u8; 8] = self
            .payload
            .as_slice()
            .try_into()
            .map_err(|_| ProbeError::malformed(format!("pong of {} bytes", self.payload.len())))?;
        Ok(i64::from_be_bytes(bytes))
    }
}

/// Read one packet from `reader`.
///
/// # Errors
///
/// Read failures, lengths outside `1..=MAX_PACKET_BYTES`, and bad ids.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> ProbeResult<Packet> {
    let declared = read_varint_from(reader, "packet length").await?;
    let len = usize::try_from(declared)
        .ok()
        .filter(|len| *len > 0)
        .ok_or_else(|| ProbeError::malformed(format!("packet length {declared}")))?;
    if len > MAX_PACKET_BYTES {
        return Err(ProbeError::too_large(len, MAX_PACKET_BYTES));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ProbeError::read(&e, "packet body"))?;

    let mut cursor = body.as_slice();
    let id = read_varint(&mut cursor)?;
    Ok(Packet {
        id,
        payload: cursor.to_vec(),
    })
}
