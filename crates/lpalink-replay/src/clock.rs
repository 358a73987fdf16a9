//! Monotonic time sources and the shared stop signal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A monotonic nanosecond clock that can also sleep.
///
/// Send and receive timestamps must come from the same clock for latency
/// figures to mean anything.
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin.
    fn now_ns(&self) -> u64;

    /// Suspend the calling thread.
    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Wall time from `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// A clock that only moves when told to.
///
/// `sleep` advances the clock instantly and records the requested duration,
/// which makes pacing decisions observable in tests and dry runs.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration_ns(duration), Ordering::SeqCst);
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

/// Cooperative cancellation shared by the sender and the receiver.
///
/// Checked once per loop iteration; an in-flight read, write or sleep is
/// never interrupted.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let a = clock.now_ns();
        clock.sleep(Duration::from_millis(2));
        let b = clock.now_ns();
        assert!(b >= a + 2_000_000);
    }

    #[test]
    fn manual_clock_records_sleeps() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_micros(5));
        clock.sleep(Duration::from_millis(1));
        clock.sleep(Duration::ZERO);

        assert_eq!(clock.now_ns(), 1_005_000);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1), Duration::ZERO]);
    }

    #[test]
    fn clock_through_reference_and_arc() {
        let clock = Arc::new(ManualClock::new());
        let by_ref = &*clock;
        by_ref.sleep(Duration::from_nanos(10));
        Clock::sleep(&clock, Duration::from_nanos(5));
        assert_eq!(clock.now_ns(), 15);
    }

    #[test]
    fn stop_signal_is_shared() {
        let stop = StopSignal::new();
        let other = stop.clone();
        assert!(!other.is_stopped());
        stop.stop();
        assert!(other.is_stopped());
    }
}
