use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Wall-clock source for the consumer loop's heartbeat and pause polling.
///
/// The loop never blocks on a wait primitive; it only asks for the current time, sleeps while
/// paused, and yields while spinning on the busy flag. Tests inject a [`VirtualClock`] so those
/// paths are deterministic.
pub trait HostClock: Send + Sync {
    /// Monotonic time since the clock's origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);

    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually advanced clock.
///
/// `sleep` advances virtual time by the requested amount and yields the OS thread, so a paused
/// consumer keeps making progress without real delays.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now_ns: AtomicU64,
}

impl VirtualClock {
    pub const fn new() -> Self {
        Self {
            now_ns: AtomicU64::new(0),
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }

    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.now_ns.fetch_add(ns, Ordering::AcqRel);
    }
}

impl HostClock for VirtualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_ns())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_only_moves_when_told() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now_ns(), 5_000_000);
        clock.sleep(Duration::from_micros(250));
        assert_eq!(clock.now(), Duration::from_micros(5_250));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
