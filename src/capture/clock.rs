use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(not(target_os = "linux"))]
use std::time::Instant;

/// Monotonic time source for capture windows and dead-time.
///
/// Timestamps are microseconds; zero is reserved to mean "no edge", so
/// implementations never return it.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> u64;

    fn now_ms(&self) -> u64 {
        self.now_us() / 1_000
    }
}

/// On Linux this reads `CLOCK_MONOTONIC`, the base GPIO interrupt events are
/// stamped with, so window timing and edge timestamps share one time line.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    #[cfg(not(target_os = "linux"))]
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "linux"))]
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
        unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        let micros = (ts.tv_sec as u64)
            .saturating_mul(1_000_000)
            .saturating_add(ts.tv_nsec as u64 / 1_000);
        micros.max(1)
    }
}

#[cfg(not(target_os = "linux"))]
impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX - 1);
        elapsed + 1
    }
}

/// Hand-driven clock for deterministic tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(start_us.max(1)),
        }
    }

    pub fn set_us(&self, now_us: u64) {
        self.now_us.store(now_us.max(1), Ordering::SeqCst);
    }

    pub fn advance_us(&self, delta_us: u64) {
        self.now_us.fetch_add(delta_us, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: u64) {
        self.advance_us(delta_ms * 1_000);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}
