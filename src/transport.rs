//! Transport contract (consumed, not implemented here).
//!
//! Concrete transports (UART, TCP, UDP, CAN) are out of scope for this
//! crate; this module only defines the interface the channel polls.
//! Every operation is non-blocking: `available` and `recv` never suspend,
//! and `send` is assumed non-blocking or short-blocking at the
//! implementer's discretion.

use crate::framing::TransportKind;

/// Byte-level transport polled by [`crate::channel::RpcChannel`].
///
/// Implementations choose [`TransportKind::Stream`] when the transport is
/// an ordered, reliable byte pipe that needs length-prefixed framing, or
/// [`TransportKind::Packet`] when each `recv` already returns one whole
/// envelope's worth of bytes.
pub trait Transport {
    /// Returns `true` if a call to `recv` would return at least one byte
    /// right now. Must not block.
    fn available(&mut self) -> bool;

    /// Reads into `buf`, returning the number of bytes written. `0` means
    /// nothing is ready right now; this is not an error. Must not block.
    fn recv(&mut self, buf: &mut [u8]) -> usize;

    /// Writes `bytes` to the transport. Returns `false` on an unrecoverable
    /// send failure.
    fn send(&mut self, bytes: &[u8]) -> bool;

    /// Declares whether this transport needs length-prefixed framing.
    fn kind(&self) -> TransportKind;
}
