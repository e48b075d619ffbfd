//! Transport frame codec.
//!
//! Wraps an already-encoded envelope for transmission. On a stream
//! transport a frame is a varint byte length followed by the envelope
//! bytes; on a packet transport, a frame *is* one envelope - the transport
//! itself carries the boundary.

use alloc::vec::Vec;

use crate::varint::{read_varint, write_varint};

/// Which framing discipline a transport needs, inferred from the
/// transport's declared kind at channel construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Ordered, reliable byte pipe; frames require a length prefix.
    Stream,
    /// Atomic datagrams; each receive is one whole envelope.
    Packet,
}

/// Outcome of attempting to decode one frame from a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecode<'a> {
    /// A full frame was present. `consumed` bytes should be dropped from the
    /// front of the buffer; `payload` is the envelope bytes.
    Complete { consumed: usize, payload: &'a [u8] },
    /// Not enough bytes buffered yet. Retain the buffer and wait for more.
    Incomplete,
    /// The bytes present can never form a valid frame (e.g. an over-long
    /// length varint). The caller should discard the frame.
    Malformed,
}

/// Encodes `payload` (an already-serialized envelope) as one transport
/// frame, appending to `out`.
pub fn encode_frame(payload: &[u8], kind: TransportKind, out: &mut Vec<u8>) {
    match kind {
        TransportKind::Stream => {
            write_varint(payload.len() as u64, out);
            out.extend_from_slice(payload);
        }
        TransportKind::Packet => {
            out.extend_from_slice(payload);
        }
    }
}

/// Attempts to decode one frame from the front of `buf`.
pub fn decode_frame(buf: &[u8], kind: TransportKind) -> FrameDecode<'_> {
    match kind {
        TransportKind::Stream => decode_stream_frame(buf),
        TransportKind::Packet => decode_packet_frame(buf),
    }
}

fn decode_stream_frame(buf: &[u8]) -> FrameDecode<'_> {
    let mut pos = 0usize;
    let len = match read_varint(buf, &mut pos) {
        Ok(len) => len,
        Err(crate::error::DecodeError::Incomplete) => return FrameDecode::Incomplete,
        Err(crate::error::DecodeError::Malformed) => return FrameDecode::Malformed,
    };

    let len = match usize::try_from(len) {
        Ok(len) => len,
        Err(_) => return FrameDecode::Malformed,
    };

    let end = match pos.checked_add(len) {
        Some(end) => end,
        None => return FrameDecode::Malformed,
    };

    if end > buf.len() {
        return FrameDecode::Incomplete;
    }

    FrameDecode::Complete {
        consumed: end,
        payload: &buf[pos..end],
    }
}

fn decode_packet_frame(buf: &[u8]) -> FrameDecode<'_> {
    if buf.is_empty() {
        return FrameDecode::Incomplete;
    }
    FrameDecode::Complete {
        consumed: buf.len(),
        payload: buf,
    }
}
