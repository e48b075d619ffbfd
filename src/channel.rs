//! RPC channel - the heart of the core.
//!
//! A single-threaded, event-driven dispatcher: it owns a receive buffer, a
//! table of outstanding calls keyed by (peer, service, id), a table of
//! registered handlers keyed by (service, method), and a reference to a
//! transport. `process()` pumps incoming bytes through the frame and
//! envelope codecs, routes decoded envelopes, times out calls, and
//! serializes outgoing envelopes.
//!
//! Nothing here is thread-safe: a channel is driven from one thread by
//! repeated calls to [`RpcChannel::process`].

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use tracing::{debug, trace, warn};

use crate::addr::{Address, WILDCARD, accepts};
use crate::clock::Clock;
use crate::envelope::{self, Envelope};
use crate::error::RpcError;
use crate::framing::{self, FrameDecode, TransportKind};
use crate::msgid::MessageIdGenerator;
use crate::transport::Transport;

/// Construction-time tunables.
///
/// Mirrors the teacher's const-generic, builder-style configuration of
/// fixed-size buffers, generalized to a runtime struct since the receive
/// buffer here is heap-backed and grows on demand rather than being a single
/// fixed-size stack array.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    default_timeout_ms: u32,
    initial_rx_capacity: usize,
    max_rx_capacity: usize,
}

impl ChannelConfig {
    /// Starts from a default timeout and the reference core's sizing
    /// (256-byte initial buffer, doubling up to a 64 KiB ceiling).
    pub fn new(default_timeout_ms: u32) -> Self {
        Self {
            default_timeout_ms,
            initial_rx_capacity: 256,
            max_rx_capacity: 64 * 1024,
        }
    }

    pub fn with_initial_rx_capacity(mut self, capacity: usize) -> Self {
        self.initial_rx_capacity = capacity;
        self
    }

    pub fn with_max_rx_capacity(mut self, capacity: usize) -> Self {
        self.max_rx_capacity = capacity;
        self
    }
}

/// Key for the pending-call table: (expected-source-address, service id,
/// message id). `source` may be [`WILDCARD`], meaning "accept a response
/// from any peer for this id".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    source: Address,
    service_id: u16,
    message_id: u16,
}

/// Key for the handler table: (service id, method id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HandlerKey {
    service_id: u16,
    method_id: u32,
}

/// A continuation invoked once with the response payload (or an empty slice
/// on failure) and a result code. Boxed rather than dispatched through a
/// trait object with a vtable of its own, since embedded targets want one
/// allocation per outstanding call, not a full trait hierarchy.
type Continuation = Box<dyn FnMut(&[u8], RpcError)>;

/// A registered handler, invoked with (payload, message id, source
/// address). Sees id = 0 for events; for non-zero ids it is responsible for
/// sending a response itself via [`RpcChannel::send_response`].
type Handler = Box<dyn FnMut(&[u8], u16, Address)>;

struct PendingCall {
    /// Destination address originally used for the outbound call. Compared
    /// against the responding envelope's source to confirm the match
    /// ("response match requires destination equality, not just key
    /// presence").
    destination: Address,
    deadline_ms: u32,
    continuation: Continuation,
}

/// The RPC channel. Generic over the byte transport it polls and the clock
/// it reads deadlines from, so tests can supply a fake clock without
/// depending on wall-clock time.
pub struct RpcChannel<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    kind: TransportKind,
    local_address: Address,
    default_timeout_ms: u32,
    id_gen: MessageIdGenerator,
    pending_calls: BTreeMap<PendingKey, PendingCall>,
    handlers: BTreeMap<HandlerKey, Handler>,
    rx_buffer: Vec<u8>,
    rx_pos: usize,
    initial_rx_capacity: usize,
    max_rx_capacity: usize,
}

impl<T: Transport, C: Clock> RpcChannel<T, C> {
    /// Builds a channel over `transport`, addressed as `local_address`,
    /// reading time from `clock`. The transport's declared [`TransportKind`]
    /// decides whether inbound/outbound frames get a length prefix.
    pub fn with_clock(transport: T, local_address: Address, config: ChannelConfig, clock: C) -> Self {
        let kind = transport.kind();
        debug!(
            local_address,
            ?kind,
            default_timeout_ms = config.default_timeout_ms,
            "rpc channel constructed"
        );
        Self {
            rx_buffer: vec![0u8; config.initial_rx_capacity],
            rx_pos: 0,
            initial_rx_capacity: config.initial_rx_capacity,
            max_rx_capacity: config.max_rx_capacity,
            kind,
            transport,
            clock,
            local_address,
            default_timeout_ms: config.default_timeout_ms,
            id_gen: MessageIdGenerator::new(),
            pending_calls: BTreeMap::new(),
            handlers: BTreeMap::new(),
        }
    }

    /// Number of outstanding calls. Exposed mainly for tests asserting a
    /// call resolved or timed out ("`pending_calls_` size returns to 0").
    pub fn pending_call_count(&self) -> usize {
        self.pending_calls.len()
    }

    /// Registers a handler for (service, method). A later registration for
    /// the same pair replaces the earlier one.
    pub fn register(
        &mut self,
        service_id: u16,
        method_id: u32,
        handler: impl FnMut(&[u8], u16, Address) + 'static,
    ) {
        self.handlers
            .insert(HandlerKey { service_id, method_id }, Box::new(handler));
    }

    /// Issues a correlated request. `timeout_ms` overrides the channel's
    /// default deadline for this call only. If the transport write fails,
    /// `continuation` is invoked immediately with [`RpcError::TransportError`]
    /// and no pending entry is created.
    pub fn call(
        &mut self,
        destination: Address,
        service_id: u16,
        method_id: u32,
        payload: impl Into<Vec<u8>>,
        timeout_ms: Option<u32>,
        mut continuation: impl FnMut(&[u8], RpcError) + 'static,
    ) {
        let message_id = self.id_gen.generate_for(self.local_address, destination);
        let envelope = Envelope {
            source: self.local_address,
            destination,
            message_id,
            service_id,
            method_id,
            payload: payload.into(),
        };

        if !self.send_envelope(&envelope) {
            continuation(&[], RpcError::TransportError);
            return;
        }

        let deadline_ms = self
            .clock
            .now_ms()
            .wrapping_add(timeout_ms.unwrap_or(self.default_timeout_ms));
        let key = PendingKey { source: destination, service_id, message_id };
        trace!(destination, service_id, message_id, deadline_ms, "call armed");
        self.pending_calls.insert(
            key,
            PendingCall { destination, deadline_ms, continuation: Box::new(continuation) },
        );
    }

    /// Sends a fire-and-forget event (message id 0). Returns `false` on
    /// transport failure; the pending-call table is never touched.
    pub fn send_event(
        &mut self,
        destination: Address,
        service_id: u16,
        method_id: u32,
        payload: impl Into<Vec<u8>>,
    ) -> bool {
        let envelope = Envelope {
            source: self.local_address,
            destination,
            message_id: 0,
            service_id,
            method_id,
            payload: payload.into(),
        };
        self.send_envelope(&envelope)
    }

    /// Sends a response to an earlier request, reusing its `message_id`.
    /// The handler that received the request is responsible for
    /// calling this - the core never synthesizes a reply on its own.
    pub fn send_response(
        &mut self,
        destination: Address,
        service_id: u16,
        method_id: u32,
        message_id: u16,
        payload: impl Into<Vec<u8>>,
    ) -> bool {
        let envelope = Envelope {
            source: self.local_address,
            destination,
            message_id,
            service_id,
            method_id,
            payload: payload.into(),
        };
        self.send_envelope(&envelope)
    }

    /// Runs one servicing pass: the deadline sweep, then the ingest loop.
    /// The order is deliberate - timeouts fire before a long-delayed
    /// response might otherwise be matched to a call that already expired.
    pub fn process(&mut self) {
        self.check_timeouts();
        self.process_incoming_messages();
    }

    /// Collects expired keys before removing and firing any
    /// continuations, so a continuation that re-arms a new call cannot
    /// perturb the sweep in progress (a safe erase-while-iterating idiom).
    fn check_timeouts(&mut self) {
        let now = self.clock.now_ms();
        let expired: Vec<PendingKey> = self
            .pending_calls
            .iter()
            .filter(|(_, call)| now >= call.deadline_ms)
            .map(|(key, _)| *key)
            .collect();

        for key in expired {
            if let Some(mut pending) = self.pending_calls.remove(&key) {
                debug!(
                    source = key.source,
                    service_id = key.service_id,
                    message_id = key.message_id,
                    "pending call timed out"
                );
                (pending.continuation)(&[], RpcError::Timeout);
            }
        }
    }

    /// One frame-decode attempt per transport `recv`, matching the
    /// reference engine's control flow precisely: this crate does not drain
    /// every fully-buffered frame before polling the transport again, since
    /// the partial-read scenario depends on that exact shape.
    fn process_incoming_messages(&mut self) {
        if !self.transport.available() {
            return;
        }

        while self.transport.available() {
            if !self.ensure_rx_capacity() {
                break;
            }

            let received = self.transport.recv(&mut self.rx_buffer[self.rx_pos..]);
            if received == 0 {
                break;
            }
            self.rx_pos += received;

            let outcome = {
                let buf = &self.rx_buffer[..self.rx_pos];
                match framing::decode_frame(buf, self.kind) {
                    FrameDecode::Complete { consumed, payload } => {
                        Some((consumed, envelope::decode(payload)))
                    }
                    FrameDecode::Incomplete | FrameDecode::Malformed => None,
                }
            };

            match outcome {
                Some((consumed, Ok(envelope))) => {
                    self.route(envelope);
                    self.compact(consumed);
                }
                Some((consumed, Err(_))) => {
                    trace!(consumed, "discarding envelope that failed to decode");
                    self.compact(consumed);
                }
                None => break,
            }
        }
    }

    /// Doubles the receive buffer on demand; if doing so would exceed
    /// `max_rx_capacity`, the buffer is reset instead of growing unboundedly
    /// and the transport is treated as desynchronized for this servicing
    /// pass.
    fn ensure_rx_capacity(&mut self) -> bool {
        if self.rx_pos < self.rx_buffer.len() {
            return true;
        }

        let doubled = self.rx_buffer.len().saturating_mul(2).max(1);
        if doubled > self.max_rx_capacity {
            warn!(
                capacity = self.rx_buffer.len(),
                max = self.max_rx_capacity,
                "receive buffer ceiling reached, resetting"
            );
            self.rx_buffer.clear();
            self.rx_buffer.resize(self.initial_rx_capacity, 0);
            self.rx_pos = 0;
            return false;
        }

        self.rx_buffer.resize(doubled, 0);
        true
    }

    fn compact(&mut self, consumed: usize) {
        self.rx_buffer.copy_within(consumed..self.rx_pos, 0);
        self.rx_pos -= consumed;
    }

    /// Address-filters, then tries the event path or the two-step
    /// response match before falling back to the request path.
    fn route(&mut self, envelope: Envelope) {
        if !accepts(self.local_address, envelope.destination) {
            trace!(destination = envelope.destination, "dropping mis-addressed envelope");
            return;
        }

        if envelope.message_id == 0 {
            self.dispatch_handler(envelope.service_id, envelope.method_id, &envelope.payload, 0, envelope.source);
            return;
        }

        let targeted_key =
            PendingKey { source: envelope.source, service_id: envelope.service_id, message_id: envelope.message_id };
        if let Some(pending) = self.pending_calls.get(&targeted_key) {
            if pending.destination == envelope.source {
                let mut pending = self.pending_calls.remove(&targeted_key).unwrap();
                (pending.continuation)(&envelope.payload, RpcError::Ok);
                return;
            }
        }

        let any_peer_key =
            PendingKey { source: WILDCARD, service_id: envelope.service_id, message_id: envelope.message_id };
        if let Some(pending) = self.pending_calls.get(&any_peer_key) {
            if pending.destination == WILDCARD {
                let mut pending = self.pending_calls.remove(&any_peer_key).unwrap();
                (pending.continuation)(&envelope.payload, RpcError::Ok);
                return;
            }
        }

        self.dispatch_handler(
            envelope.service_id,
            envelope.method_id,
            &envelope.payload,
            envelope.message_id,
            envelope.source,
        );
    }

    fn dispatch_handler(&mut self, service_id: u16, method_id: u32, payload: &[u8], message_id: u16, source: Address) {
        let key = HandlerKey { service_id, method_id };
        if let Some(handler) = self.handlers.get_mut(&key) {
            handler(payload, message_id, source);
        } else {
            trace!(service_id, method_id, message_id, "no handler registered, dropping");
        }
    }

    fn send_envelope(&mut self, envelope: &Envelope) -> bool {
        let mut payload = Vec::new();
        envelope::encode(envelope, &mut payload);
        let mut framed = Vec::new();
        framing::encode_frame(&payload, self.kind, &mut framed);

        let ok = self.transport.send(&framed);
        if !ok {
            warn!(destination = envelope.destination, "transport send failed");
        }
        ok
    }
}

#[cfg(feature = "std")]
impl<T: Transport> RpcChannel<T, crate::clock::SystemClock> {
    /// Convenience constructor using the default [`crate::clock::SystemClock`].
    pub fn new(transport: T, local_address: Address, config: ChannelConfig) -> Self {
        Self::with_clock(transport, local_address, config, crate::clock::SystemClock::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use core::cell::RefCell;

    /// An in-memory transport whose inbound bytes and clock are scripted by
    /// the test, so every end-to-end scenario can be reproduced
    /// deterministically without real time or real sockets.
    struct FakeTransport {
        inbox: Vec<Vec<u8>>,
        sent: Rc<RefCell<Vec<Vec<u8>>>>,
        kind: TransportKind,
        fail_send: bool,
    }

    impl FakeTransport {
        fn new(kind: TransportKind) -> Self {
            Self { inbox: Vec::new(), sent: Rc::new(RefCell::new(Vec::new())), kind, fail_send: false }
        }

        fn push_chunk(&mut self, chunk: Vec<u8>) {
            self.inbox.push(chunk);
        }
    }

    impl Transport for FakeTransport {
        fn available(&mut self) -> bool {
            !self.inbox.is_empty()
        }

        fn recv(&mut self, buf: &mut [u8]) -> usize {
            if self.inbox.is_empty() {
                return 0;
            }
            let chunk = &mut self.inbox[0];
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk.drain(..n);
            if chunk.is_empty() {
                self.inbox.remove(0);
            }
            n
        }

        fn send(&mut self, bytes: &[u8]) -> bool {
            if self.fail_send {
                return false;
            }
            self.sent.borrow_mut().push(bytes.to_vec());
            true
        }

        fn kind(&self) -> TransportKind {
            self.kind
        }
    }

    #[derive(Clone, Default)]
    struct FakeClock {
        now: Rc<RefCell<u32>>,
    }

    impl FakeClock {
        fn set(&self, ms: u32) {
            *self.now.borrow_mut() = ms;
        }
    }

    impl Clock for FakeClock {
        fn now_ms(&self) -> u32 {
            *self.now.borrow()
        }
    }

    fn frame(env: &Envelope, kind: TransportKind) -> Vec<u8> {
        let mut payload = Vec::new();
        envelope::encode(env, &mut payload);
        let mut out = Vec::new();
        framing::encode_frame(&payload, kind, &mut out);
        out
    }

    #[test]
    fn happy_path_request_response() {
        let transport = FakeTransport::new(TransportKind::Packet);
        let clock = FakeClock::default();
        let mut channel =
            RpcChannel::with_clock(transport, 0x01, ChannelConfig::new(1000), clock.clone());

        let result = Rc::new(RefCell::new(None));
        let result_clone = result.clone();
        channel.call(0x02, 7, 3, vec![0xAA], None, move |payload, error| {
            *result_clone.borrow_mut() = Some((payload.to_vec(), error));
        });
        assert_eq!(channel.pending_call_count(), 1);

        let reply = Envelope {
            source: 0x02,
            destination: 0x01,
            message_id: 1,
            service_id: 7,
            method_id: 3,
            payload: vec![0xBB],
        };
        channel.transport.push_chunk(frame(&reply, TransportKind::Packet));
        channel.process();

        assert_eq!(channel.pending_call_count(), 0);
        let (payload, error) = result.borrow_mut().take().unwrap();
        assert_eq!(payload, vec![0xBB]);
        assert_eq!(error, RpcError::Ok);
    }

    #[test]
    fn timeout_then_late_reply_is_dropped() {
        let transport = FakeTransport::new(TransportKind::Packet);
        let clock = FakeClock::default();
        let mut channel =
            RpcChannel::with_clock(transport, 0x01, ChannelConfig::new(1000), clock.clone());

        let result = Rc::new(RefCell::new(None));
        let result_clone = result.clone();
        channel.call(0x02, 7, 3, vec![0xAA], None, move |payload, error| {
            *result_clone.borrow_mut() = Some((payload.to_vec(), error));
        });

        clock.set(1000);
        channel.process();

        let (payload, error) = result.borrow_mut().take().unwrap();
        assert!(payload.is_empty());
        assert_eq!(error, RpcError::Timeout);
        assert_eq!(channel.pending_call_count(), 0);

        // A late reply with the same id now finds no pending entry and, with
        // no handler registered at (7, 3), is dropped silently.
        let reply = Envelope { source: 0x02, destination: 0x01, message_id: 1, service_id: 7, method_id: 3, payload: vec![0xCC] };
        channel.transport.push_chunk(frame(&reply, TransportKind::Packet));
        channel.process();
        assert!(result.borrow().is_none());
    }

    #[test]
    fn broadcast_response_match() {
        let transport = FakeTransport::new(TransportKind::Packet);
        let clock = FakeClock::default();
        let mut channel =
            RpcChannel::with_clock(transport, 0x01, ChannelConfig::new(1000), clock.clone());

        let result = Rc::new(RefCell::new(None));
        let result_clone = result.clone();
        // destination = WILDCARD: an any-peer call, accepting the first
        // matching reply from any source. The generator's first id is 1.
        channel.call(WILDCARD, 9, 5, Vec::new(), None, move |payload, error| {
            *result_clone.borrow_mut() = Some((payload.to_vec(), error));
        });
        assert_eq!(channel.pending_call_count(), 1);

        let reply = Envelope { source: 0x77, destination: 0x01, message_id: 1, service_id: 9, method_id: 5, payload: vec![0x01] };
        channel.transport.push_chunk(frame(&reply, TransportKind::Packet));
        channel.process();

        assert_eq!(channel.pending_call_count(), 0);
        let (payload, error) = result.borrow_mut().take().unwrap();
        assert_eq!(payload, vec![0x01]);
        assert_eq!(error, RpcError::Ok);
    }

    #[test]
    fn event_delivery_touches_no_pending_call() {
        let transport = FakeTransport::new(TransportKind::Packet);
        let clock = FakeClock::default();
        let mut channel =
            RpcChannel::with_clock(transport, 0x01, ChannelConfig::new(1000), clock.clone());

        let seen = Rc::new(RefCell::new(None));
        let seen_clone = seen.clone();
        channel.register(2, 4, move |payload: &[u8], id, source| {
            *seen_clone.borrow_mut() = Some((payload.to_vec(), id, source));
        });

        let event = Envelope { source: 0x42, destination: 0x01, message_id: 0, service_id: 2, method_id: 4, payload: vec![0x01, 0x02] };
        channel.transport.push_chunk(frame(&event, TransportKind::Packet));
        channel.process();

        let (payload, id, source) = seen.borrow_mut().take().unwrap();
        assert_eq!(payload, vec![0x01, 0x02]);
        assert_eq!(id, 0);
        assert_eq!(source, 0x42);
        assert_eq!(channel.pending_call_count(), 0);
    }

    #[test]
    fn partial_stream_read_waits_for_full_frame() {
        let transport = FakeTransport::new(TransportKind::Stream);
        let clock = FakeClock::default();
        let mut channel =
            RpcChannel::with_clock(transport, 0x01, ChannelConfig::new(1000), clock.clone());

        let seen = Rc::new(RefCell::new(0usize));
        let seen_clone = seen.clone();
        channel.register(2, 4, move |_: &[u8], _, _| {
            *seen_clone.borrow_mut() += 1;
        });

        let event = Envelope { source: 0x42, destination: 0x01, message_id: 0, service_id: 2, method_id: 4, payload: vec![0xAA; 20] };
        let full = frame(&event, TransportKind::Stream);

        // Each `process()` call attempts exactly one decode; an incomplete
        // frame breaks the ingest loop rather than draining every queued
        // chunk, so the handler fires only once the third tick supplies the
        // rest of the frame.
        channel.transport.push_chunk(full[..3].to_vec());
        channel.process();
        assert_eq!(*seen.borrow(), 0);

        channel.transport.push_chunk(full[3..5].to_vec());
        channel.process();
        assert_eq!(*seen.borrow(), 0);

        channel.transport.push_chunk(full[5..].to_vec());
        channel.process();

        assert_eq!(*seen.borrow(), 1);
        assert_eq!(channel.rx_pos, 0, "buffer should be compacted to empty after the frame lands");
    }

    #[test]
    fn mis_addressed_envelope_is_dropped() {
        let transport = FakeTransport::new(TransportKind::Packet);
        let clock = FakeClock::default();
        let mut channel =
            RpcChannel::with_clock(transport, 0x01, ChannelConfig::new(1000), clock.clone());

        let fired = Rc::new(RefCell::new(false));
        let fired_clone = fired.clone();
        channel.register(1, 1, move |_: &[u8], _, _| {
            *fired_clone.borrow_mut() = true;
        });

        let envelope = Envelope { source: 0x09, destination: 0x05, message_id: 0, service_id: 1, method_id: 1, payload: Vec::new() };
        channel.transport.push_chunk(frame(&envelope, TransportKind::Packet));
        channel.process();

        assert!(!*fired.borrow());
    }

    #[test]
    fn transport_send_failure_resolves_immediately_without_arming() {
        let mut transport = FakeTransport::new(TransportKind::Packet);
        transport.fail_send = true;
        let clock = FakeClock::default();
        let mut channel =
            RpcChannel::with_clock(transport, 0x01, ChannelConfig::new(1000), clock.clone());

        let result = Rc::new(RefCell::new(None));
        let result_clone = result.clone();
        channel.call(0x02, 1, 1, Vec::new(), None, move |_, error| {
            *result_clone.borrow_mut() = Some(error);
        });

        assert_eq!(result.borrow_mut().take(), Some(RpcError::TransportError));
        assert_eq!(channel.pending_call_count(), 0);
    }

    #[test]
    fn receive_buffer_grows_and_resets_past_ceiling() {
        let transport = FakeTransport::new(TransportKind::Stream);
        let clock = FakeClock::default();
        let config = ChannelConfig::new(1000).with_initial_rx_capacity(4).with_max_rx_capacity(8);
        let mut channel = RpcChannel::with_clock(transport, 0x01, config, clock);

        // A single long run of varint continuation bytes that never forms a
        // complete frame. Each `process()` tick fills whatever free space
        // `ensure_rx_capacity` just granted, then hits `Incomplete` and
        // breaks, so growth happens one step per tick: 4 -> 8 (allowed,
        // within the ceiling), then 8 -> 16 on the next tick is rejected and
        // the buffer resets instead of growing unboundedly.
        channel.transport.push_chunk(vec![0x80; 20]);

        channel.process();
        assert_eq!(channel.rx_buffer.len(), 4);
        assert_eq!(channel.rx_pos, 4);

        channel.process();
        assert_eq!(channel.rx_buffer.len(), 8);
        assert_eq!(channel.rx_pos, 8);

        channel.process();
        assert_eq!(channel.rx_pos, 0);
        assert_eq!(channel.rx_buffer.len(), 4, "resets to the initial capacity once the ceiling is exceeded");
    }
}
