use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

/// Time source for every wait in the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

/// Wall clock. Sleeps carry a random jitter so polling does not look robotic.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    /// Fraction of each sleep randomised in both directions, e.g. 0.15.
    pub jitter: f64,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { jitter: 0.15 }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        let secs = d.as_secs_f64();
        let spread = secs * self.jitter;
        let actual = if spread > 0.0 {
            secs + rand::thread_rng().gen_range(-spread..spread)
        } else {
            secs
        };
        thread::sleep(Duration::from_secs_f64(actual.max(0.001)));
    }
}

/// Virtual clock for tests: `sleep` advances time instantly.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset_us: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_us: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, d: Duration) {
        self.offset_us.fetch_add(d.as_micros() as u64, Ordering::SeqCst);
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.offset_us.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

/// Sleep up to `total` in small slices, returning early once `stop()` holds.
/// Returns true when interrupted.
pub fn sleep_until_cancelled(clock: &dyn Clock, total: Duration, stop: impl Fn() -> bool) -> bool {
    let slice = Duration::from_millis(200);
    let deadline = clock.now() + total;
    loop {
        if stop() {
            return true;
        }
        let now = clock.now();
        if now >= deadline {
            return false;
        }
        clock.sleep(slice.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_secs(5));
        assert_eq!(clock.now() - start, Duration::from_secs(5));
        let shared = clock.clone();
        shared.sleep(Duration::from_millis(250));
        assert_eq!(clock.elapsed(), Duration::from_millis(5250));
    }

    #[test]
    fn cancellable_sleep_runs_to_deadline() {
        let clock = ManualClock::new();
        let interrupted = sleep_until_cancelled(&clock, Duration::from_secs(3), || false);
        assert!(!interrupted);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn cancellable_sleep_stops_early() {
        let clock = ManualClock::new();
        let flag = AtomicBool::new(true);
        assert!(sleep_until_cancelled(&clock, Duration::from_secs(60), || flag.load(Ordering::SeqCst)));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn system_clock_without_jitter_sleeps() {
        let clock = SystemClock { jitter: 0.0 };
        let start = clock.now();
        clock.sleep(Duration::from_millis(5));
        assert!(clock.now() - start >= Duration::from_millis(5));
    }
}
