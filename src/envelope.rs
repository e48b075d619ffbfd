//! Envelope codec.
//!
//! Serializes the six RPC envelope fields as a tag-length-value record using
//! the varint codec. Field order on the wire is not significant:
//! decoders accept any permutation, missing fields take documented
//! defaults, and unknown field numbers are skipped rather than rejected.

use alloc::vec::Vec;

use crate::addr::{Address, WILDCARD};
use crate::error::DecodeError;
use crate::varint::{
    WireType, read_length_delimited, read_tag, read_varint, skip_field, write_length_delimited,
    write_tag, write_varint,
};

/// Field numbers fixed by the schema. Any peer implementation sharing this
/// schema must use the same numbers.
const FIELD_SOURCE: u32 = 1;
const FIELD_DESTINATION: u32 = 2;
const FIELD_MESSAGE_ID: u32 = 3;
const FIELD_SERVICE_ID: u32 = 4;
const FIELD_METHOD_ID: u32 = 5;
const FIELD_PAYLOAD: u32 = 6;

/// The RPC envelope: source, destination, correlation id, service/method
/// selector, and opaque payload. No other metadata travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub source: Address,
    pub destination: Address,
    /// 0 means event / fire-and-forget.
    pub message_id: u16,
    pub service_id: u16,
    pub method_id: u32,
    pub payload: Vec<u8>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            source: WILDCARD,
            destination: WILDCARD,
            message_id: 0,
            service_id: 0,
            method_id: 0,
            payload: Vec::new(),
        }
    }
}

/// Encodes an envelope. Every field is always emitted - the implementer has
/// not proven bit-level equivalence with a reference encoder that elides
/// default-valued fields, so to avoid cross-peer disagreement all six
/// fields are written unconditionally.
pub fn encode(msg: &Envelope, out: &mut Vec<u8>) {
    write_tag(FIELD_SOURCE, WireType::Varint, out);
    write_varint(msg.source, out);

    write_tag(FIELD_DESTINATION, WireType::Varint, out);
    write_varint(msg.destination, out);

    write_tag(FIELD_MESSAGE_ID, WireType::Varint, out);
    write_varint(u64::from(msg.message_id), out);

    write_tag(FIELD_SERVICE_ID, WireType::Varint, out);
    write_varint(u64::from(msg.service_id), out);

    write_tag(FIELD_METHOD_ID, WireType::Varint, out);
    write_varint(u64::from(msg.method_id), out);

    write_tag(FIELD_PAYLOAD, WireType::LengthDelimited, out);
    write_length_delimited(&msg.payload, out);
}

/// Decodes an envelope from a complete, bounded byte slice (the payload of
/// one already-fully-received frame). Any failure - including a field that
/// would run past the end of `buf` - is reported as `Malformed`: there is
/// no "wait for more data" concept at this layer, since the caller only
/// ever hands us bytes the frame codec has already determined are complete.
pub fn decode(buf: &[u8]) -> Result<Envelope, DecodeError> {
    let mut msg = Envelope::default();
    let mut pos = 0usize;

    while pos < buf.len() {
        let (field_number, wire_type) = read_tag(buf, &mut pos).map_err(|_| DecodeError::Malformed)?;

        match (field_number, wire_type) {
            (FIELD_SOURCE, WireType::Varint) => {
                msg.source = read_varint(buf, &mut pos).map_err(|_| DecodeError::Malformed)?;
            }
            (FIELD_DESTINATION, WireType::Varint) => {
                msg.destination = read_varint(buf, &mut pos).map_err(|_| DecodeError::Malformed)?;
            }
            (FIELD_MESSAGE_ID, WireType::Varint) => {
                let v = read_varint(buf, &mut pos).map_err(|_| DecodeError::Malformed)?;
                msg.message_id = v as u16;
            }
            (FIELD_SERVICE_ID, WireType::Varint) => {
                let v = read_varint(buf, &mut pos).map_err(|_| DecodeError::Malformed)?;
                msg.service_id = v as u16;
            }
            (FIELD_METHOD_ID, WireType::Varint) => {
                let v = read_varint(buf, &mut pos).map_err(|_| DecodeError::Malformed)?;
                msg.method_id = v as u32;
            }
            (FIELD_PAYLOAD, WireType::LengthDelimited) => {
                let bytes = read_length_delimited(buf, &mut pos).map_err(|_| DecodeError::Malformed)?;
                msg.payload = bytes.to_vec();
            }
            (_, wt) => {
                skip_field(buf, &mut pos, wt).map_err(|_| DecodeError::Malformed)?;
            }
        }
    }

    if pos != buf.len() {
        return Err(DecodeError::Malformed);
    }

    Ok(msg)
}
