//! Peer addressing.
//!
//! Addresses are 64-bit identifiers. Two values are reserved and must never
//! be assigned to a real peer.

/// A peer identifier.
pub type Address = u64;

/// "Unspecified peer" - accepted by every local peer as a destination, and
/// used as the expected-source key of a pending call that will accept a
/// response from any peer.
pub const WILDCARD: Address = 0x0000_0000_0000_0000;

/// "Any local destination accepts" - a broadcast destination.
pub const BROADCAST: Address = 0xFFFF_FFFF_FFFF_FFFF;

/// Returns `true` if `dst` should be accepted as addressed to `local`.
pub(crate) fn accepts(local: Address, dst: Address) -> bool {
    dst == WILDCARD || dst == local || dst == BROADCAST
}
