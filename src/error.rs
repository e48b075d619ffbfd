//! RPC error taxonomy.
//!
//! These are protocol-level errors produced by the channel itself, not
//! application errors - those are carried inside the payload by convention
//! and are outside this core's concern.

/// Protocol-level error code.
///
/// Discriminants are fixed and part of the wire-adjacent ABI: peers on the
/// same bus may compare an error code carried inside a payload by
/// convention, so these values must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
#[repr(u8)]
pub enum RpcError {
    /// Success.
    Ok = 0,
    /// A pending call's deadline elapsed before a response arrived.
    Timeout = 1,
    /// An envelope could not be decoded from an otherwise-complete frame.
    ParseError = 2,
    /// `send` failed, or the transport reported an unrecoverable condition.
    TransportError = 3,
    /// Reserved for higher layers; the core drops unhandled requests
    /// silently rather than synthesizing this error.
    HandlerNotFound = 4,
    /// Reserved fallback.
    Unknown = 5,
}

impl RpcError {
    /// `true` for [`RpcError::Ok`].
    pub fn ok(self) -> bool {
        matches!(self, RpcError::Ok)
    }
}

impl core::fmt::Display for RpcError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RpcError::Ok => write!(f, "OK"),
            RpcError::Timeout => write!(f, "RPC timeout"),
            RpcError::ParseError => write!(f, "Parse error"),
            RpcError::TransportError => write!(f, "Transport error"),
            RpcError::HandlerNotFound => write!(f, "Handler not found"),
            RpcError::Unknown => write!(f, "Unknown error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RpcError {}

/// Combines a result value with RPC-level error status, mirroring the
/// reference core's `Result<T>` (value-with-sidecar-error, so the payload
/// is still inspectable on a non-`Ok` outcome rather than being discarded).
#[derive(Debug, Clone)]
pub struct RpcResult<T> {
    pub value: T,
    pub error: RpcError,
}

impl<T> RpcResult<T> {
    pub fn ok(&self) -> bool {
        self.error.ok()
    }
}

/// Decode-time failure for the varint/envelope/framing codecs.
///
/// Never exposed to pending-call continuations: inbound decode failures are
/// discarded by the channel, not reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough bytes buffered yet; retry once more data arrives.
    Incomplete,
    /// The bytes present can never form a valid value (over-long varint,
    /// group wire-type, truncated fixed-size field, short length-prefix).
    Malformed,
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::Incomplete => write!(f, "incomplete data"),
            DecodeError::Malformed => write!(f, "malformed data"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}
