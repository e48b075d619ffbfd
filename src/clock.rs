//! Platform time source.
//!
//! The reference core exposes `get_current_time_ms()` as a weakly-linked
//! symbol so embedders can override it with a platform-specific clock. This
//! crate expresses the same extension point as a trait instead, since Rust
//! has no portable weak-symbol story: pass a `Clock` implementation to the
//! channel at construction and swap it for a platform source on embedded
//! targets.

/// Returns current time in milliseconds, monotonically non-decreasing
/// within any window shorter than 2^31 ms.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Default clock backed by `std::time::Instant`, available on hosts that
/// enable the `std` feature. Embedded targets should supply their own
/// `Clock` implementation (e.g. backed by a hardware tick counter).
#[cfg(feature = "std")]
#[derive(Debug, Default)]
pub struct SystemClock {
    start: std::sync::OnceLock<std::time::Instant>,
}

#[cfg(feature = "std")]
impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        let start = self.start.get_or_init(std::time::Instant::now);
        start.elapsed().as_millis() as u32
    }
}
