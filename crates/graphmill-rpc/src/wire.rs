//! The on-wire format.
//!
//! Every message is a frame `{packet_type: u8, payload_len: u32, payload}`
//! with little-endian integers. A `Call`/`FastCall`/`Control` payload
//! starts with a `u64` dispatch id; id `0` is reserved for portable calls,
//! whose payload continues with a length-prefixed name string and an
//! `is_request` byte. Strings and blobs are `u32`-length-prefixed. The
//! framing is stable across versions; only function-pointer-derived
//! dispatch ids are binary-specific, portable calls are not.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use graphmill_core::id::ProcId;

use crate::error::RpcError;

/// Bytes in a frame header: packet type byte plus payload length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Dispatch id reserved for portable (name-dispatched) calls.
pub const PORTABLE_DISPATCH_ID: u64 = 0;

/// Kind of a framed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Regular call, dispatched through the deferred handler pool.
    Call = 0,
    /// Dispatched inline on the receive thread, for short
    /// latency-critical messages.
    FastCall = 1,
    /// Framework-internal call: dispatched inline and excluded from user
    /// call counters.
    Control = 2,
    /// Sequencing point; carries no payload.
    Barrier = 3,
}

impl PacketType {
    /// Decodes a packet type byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PacketType::Call),
            1 => Some(PacketType::FastCall),
            2 => Some(PacketType::Control),
            3 => Some(PacketType::Barrier),
            _ => None,
        }
    }

    /// Whether this packet counts against user call counters.
    pub fn counted(self) -> bool {
        matches!(self, PacketType::Call | PacketType::FastCall)
    }
}

/// Appends one frame to `out`.
pub fn encode_frame(out: &mut Vec<u8>, packet: PacketType, payload: &[u8]) {
    out.push(packet as u8);
    // Writing to a Vec cannot fail.
    let _ = out.write_u32::<LittleEndian>(payload.len() as u32);
    out.extend_from_slice(payload);
}

/// Parses one complete frame from the front of `buf`.
///
/// Returns `(packet, payload, bytes_consumed)`, `Ok(None)` when the buffer
/// does not yet hold a complete frame, and an error on an unknown packet
/// type byte.
pub fn decode_frame(
    buf: &[u8],
    source: ProcId,
) -> Result<Option<(PacketType, &[u8], usize)>, RpcError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let packet =
        PacketType::from_u8(buf[0]).ok_or(RpcError::MalformedFrame { source_proc: source })?;
    let mut len_bytes = &buf[1..FRAME_HEADER_LEN];
    let payload_len = len_bytes
        .read_u32::<LittleEndian>()
        .map_err(|_| RpcError::MalformedFrame { source_proc: source })? as usize;
    let total = FRAME_HEADER_LEN + payload_len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some((packet, &buf[FRAME_HEADER_LEN..total], total)))
}

/// Builds a call payload: dispatch id followed by serialized args.
pub fn encode_call(dispatch_id: u64, args: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + args.len());
    let _ = payload.write_u64::<LittleEndian>(dispatch_id);
    payload.extend_from_slice(args);
    payload
}

/// Splits a call payload into its dispatch id and argument bytes.
pub fn split_call(payload: &[u8], source: ProcId) -> Result<(u64, &[u8]), RpcError> {
    let mut reader = payload;
    let dispatch_id = reader
        .read_u64::<LittleEndian>()
        .map_err(|_| RpcError::MalformedFrame { source_proc: source })?;
    Ok((dispatch_id, reader))
}

/// Builds a portable call payload: reserved id 0, name, request flag, args.
pub fn encode_portable(name: &str, is_request: bool, args: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + 4 + name.len() + 1 + args.len());
    let _ = payload.write_u64::<LittleEndian>(PORTABLE_DISPATCH_ID);
    write_str(&mut payload, name);
    payload.push(is_request as u8);
    payload.extend_from_slice(args);
    payload
}

/// Splits the remainder of a portable payload (after the reserved id)
/// into name, request flag and argument bytes.
pub fn split_portable(rest: &[u8], source: ProcId) -> Result<(&str, bool, &[u8]), RpcError> {
    let (name, after_name) = read_str(rest, source)?;
    let (&flag, args) = after_name
        .split_first()
        .ok_or(RpcError::MalformedFrame { source_proc: source })?;
    Ok((name, flag != 0, args))
}

/// Appends a `u32`-length-prefixed UTF-8 string.
pub fn write_str(out: &mut Vec<u8>, s: &str) {
    let _ = out.write_u32::<LittleEndian>(s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

/// Reads a `u32`-length-prefixed UTF-8 string, returning it and the rest.
pub fn read_str(buf: &[u8], source: ProcId) -> Result<(&str, &[u8]), RpcError> {
    let mut reader = buf;
    let len = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| RpcError::MalformedFrame { source_proc: source })? as usize;
    if reader.len() < len {
        return Err(RpcError::MalformedFrame { source_proc: source });
    }
    let (raw, rest) = reader.split_at(len);
    let s = std::str::from_utf8(raw)
        .map_err(|_| RpcError::MalformedFrame { source_proc: source })?;
    Ok((s, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: ProcId = ProcId(1);

    #[test]
    fn frames_parse_incrementally() {
        let mut wire = Vec::new();
        encode_frame(&mut wire, PacketType::Call, b"abc");
        encode_frame(&mut wire, PacketType::Barrier, b"");

        // A partial header parses to nothing.
        assert!(decode_frame(&wire[..3], SRC).unwrap().is_none());
        // A header without the full payload parses to nothing.
        assert!(decode_frame(&wire[..FRAME_HEADER_LEN + 1], SRC).unwrap().is_none());

        let (packet, payload, consumed) = decode_frame(&wire, SRC).unwrap().unwrap();
        assert_eq!(packet, PacketType::Call);
        assert_eq!(payload, b"abc");

        let (packet, payload, rest_consumed) =
            decode_frame(&wire[consumed..], SRC).unwrap().unwrap();
        assert_eq!(packet, PacketType::Barrier);
        assert!(payload.is_empty());
        assert_eq!(consumed + rest_consumed, wire.len());
    }

    #[test]
    fn unknown_packet_type_is_malformed() {
        let mut wire = vec![9u8];
        wire.extend_from_slice(&3u32.to_le_bytes());
        wire.extend_from_slice(b"xyz");
        assert!(matches!(
            decode_frame(&wire, SRC),
            Err(RpcError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn call_payload_layout() {
        let payload = encode_call(42, b"args");
        let (id, rest) = split_call(&payload, SRC).unwrap();
        assert_eq!(id, 42);
        assert_eq!(rest, b"args");
    }

    #[test]
    fn portable_payload_layout() {
        let payload = encode_portable("merge_counts", true, b"blob");
        let (id, rest) = split_call(&payload, SRC).unwrap();
        assert_eq!(id, PORTABLE_DISPATCH_ID);

        let (name, is_request, args) = split_portable(rest, SRC).unwrap();
        assert_eq!(name, "merge_counts");
        assert!(is_request);
        assert_eq!(args, b"blob");
    }

    #[test]
    fn control_packets_are_not_counted() {
        assert!(PacketType::Call.counted());
        assert!(PacketType::FastCall.counted());
        assert!(!PacketType::Control.counted());
        assert!(!PacketType::Barrier.counted());
    }
}
