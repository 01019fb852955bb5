//! Time management for data loggers
//!
//! Sensor timing is measured in milliseconds on a free-running 32-bit
//! counter, the same shape as `millis()` on a microcontroller. The counter
//! wraps after ~49 days; every elapsed-time calculation goes through
//! [`elapsed`] so the wrap is harmless.
//!
//! Sources provided here:
//! - [`MonotonicClock`] reads the host clock (requires `std`)
//! - [`MockClock`] is set by hand or steps on every read, for tests
//!
//! Boards implement [`TimeSource`] over their own timer.

use core::cell::Cell;

/// Point in time on the millisecond counter
pub type Instant = fugit::TimerInstantU32<1_000>;

/// Span of time on the millisecond counter
pub type Duration = fugit::MillisDurationU32;

/// Time elapsed from `since` to `now`, correct across counter wrap
pub fn elapsed(since: Instant, now: Instant) -> Duration {
    Duration::from_ticks(now.ticks().wrapping_sub(since.ticks()))
}

/// Source of time for sensor timing
pub trait TimeSource {
    /// Current reading of the millisecond counter
    fn now(&self) -> Instant;
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Host clock, counting from construction (requires std)
#[cfg(feature = "std")]
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl MonotonicClock {
    /// Start counting at zero
    pub fn new() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

#[cfg(feature = "std")]
impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl TimeSource for MonotonicClock {
    fn now(&self) -> Instant {
        // Truncation reproduces the wrap of a hardware counter
        Instant::from_ticks(self.start.elapsed().as_millis() as u32)
    }
}

/// Manually driven clock for tests and simulation
///
/// With a non-zero step the clock advances by that many milliseconds
/// after every read, so busy-wait loops make progress without real time
/// passing.
#[derive(Debug, Default)]
pub struct MockClock {
    now_ms: Cell<u32>,
    step_ms: Cell<u32>,
}

impl MockClock {
    /// Clock frozen at `start_ms`
    pub fn new(start_ms: u32) -> Self {
        Self { now_ms: Cell::new(start_ms), step_ms: Cell::new(0) }
    }

    /// Clock that advances `step_ms` after every read
    pub fn auto_step(start_ms: u32, step_ms: u32) -> Self {
        Self { now_ms: Cell::new(start_ms), step_ms: Cell::new(step_ms) }
    }

    /// Jump to an absolute time
    pub fn set(&self, ms: u32) {
        self.now_ms.set(ms);
    }

    /// Move forward by `ms`
    pub fn advance(&self, ms: u32) {
        self.now_ms.set(self.now_ms.get().wrapping_add(ms));
    }

    /// Current time without stepping
    pub fn peek(&self) -> u32 {
        self.now_ms.get()
    }
}

impl TimeSource for MockClock {
    fn now(&self) -> Instant {
        let now = self.now_ms.get();
        self.now_ms.set(now.wrapping_add(self.step_ms.get()));
        Instant::from_ticks(now)
    }
}
