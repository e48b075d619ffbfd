//! A lightweight RPC runtime over a pluggable byte transport, for peers that
//! exchange self-describing tag-length-value messages and address one
//! another by 64-bit identifier (see the crate's `SPEC_FULL.md` for the full
//! design).
//!
//! `no_std` by default; enable the `std` feature for a default wall-clock
//! [`clock::Clock`] implementation and `std::error::Error` impls, useful on
//! hosts and in tests.
//!
//! The five cooperating pieces, leaves first:
//! - [`varint`] - base-128 varint, fixed32/64, zig-zag, length-delimited codec.
//! - [`envelope`] - the six-field RPC envelope, serialized with [`varint`].
//! - [`framing`] - wraps an envelope for a stream or packet transport.
//! - [`msgid`] - non-zero, wrap-safe correlation id generator.
//! - [`channel`] - the dispatcher: [`channel::RpcChannel`].

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod addr;
pub mod channel;
pub mod clock;
pub mod envelope;
pub mod error;
pub mod framing;
pub mod msgid;
pub mod transport;
pub mod varint;

pub use addr::{Address, BROADCAST, WILDCARD};
pub use channel::{ChannelConfig, RpcChannel};
pub use clock::Clock;
pub use envelope::Envelope;
pub use error::{DecodeError, RpcError, RpcResult};
pub use framing::{FrameDecode, TransportKind};
pub use transport::Transport;

#[cfg(feature = "std")]
pub use clock::SystemClock;
