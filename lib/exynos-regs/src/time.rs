// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Microsecond clock plus a busy-delay primitive.
///
/// The clock is assumed not to run backwards across a sleep; callers
/// computing elapsed time use saturating subtraction so a violation shows up
/// as zero, not as a wrapped huge value.
pub trait Timebase: Send + Sync {
    fn now_us(&self) -> u64;

    fn delay_us(&self, us: u32);
}

/// Wall-clock timebase.
#[derive(Debug)]
pub struct SystemTimebase {
    origin: Instant,
}

impl SystemTimebase {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimebase {
    fn default() -> Self {
        Self::new()
    }
}

impl Timebase for SystemTimebase {
    fn now_us(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    fn delay_us(&self, us: u32) {
        std::thread::sleep(Duration::from_micros(u64::from(us)));
    }
}

/// A clock that only moves when somebody delays on it or advances it.
///
/// This is what the simulator and the tests run on: a poll loop that would
/// spin for 50ms of real time finishes instantly, and elapsed times come out
/// exact.
#[derive(Debug, Default)]
pub struct VirtualTimebase {
    now: AtomicU64,
}

impl VirtualTimebase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }
}

impl Timebase for VirtualTimebase {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn delay_us(&self, us: u32) {
        self.advance(u64::from(us));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_moves_across_a_delay() {
        let tb = SystemTimebase::new();
        let t0 = tb.now_us();
        tb.delay_us(200);
        assert!(tb.now_us() >= t0 + 200);
    }

    #[test]
    fn virtual_clock_only_moves_when_told() {
        let tb = VirtualTimebase::new();
        assert_eq!(tb.now_us(), 0);
        tb.delay_us(10);
        tb.advance(5);
        assert_eq!(tb.now_us(), 15);
    }
}
