/// Source of time for the node.
///
/// Uptime is a 32-bit millisecond counter, like the one a microcontroller
/// keeps since boot. It wraps after roughly 49.7 days and all arithmetic on
/// it must use wrapping operations.
pub trait Clock {
    /// Milliseconds since boot.
    fn uptime_ms(&self) -> u32;

    /// Milliseconds since the Unix epoch, if a wall clock is available.
    fn epoch_ms(&self) -> Option<u64> {
        None
    }
}

/// Blocking delay. The whole node stalls for the duration.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// Delay backed by `std::thread::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
}

/// Clock measuring uptime from its creation.
///
/// With the `clock` feature the wall time can be enabled through
/// [`SystemClock::with_wall_time`].
#[derive(Clone, Debug)]
pub struct SystemClock {
    started: std::time::Instant,
    wall_time: bool,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: std::time::Instant::now(),
            wall_time: false,
        }
    }

    #[cfg(feature = "clock")]
    pub fn with_wall_time(mut self) -> Self {
        self.wall_time = true;
        self
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn uptime_ms(&self) -> u32 {
        // Truncation reproduces the 32-bit counter wraparound.
        self.started.elapsed().as_millis() as u32
    }

    fn epoch_ms(&self) -> Option<u64> {
        if !self.wall_time {
            return None;
        }

        #[cfg(feature = "clock")]
        {
            u64::try_from(chrono::Utc::now().timestamp_millis()).ok()
        }

        #[cfg(not(feature = "clock"))]
        {
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Clock, Delay};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Manually advanced clock shared with a [`ManualDelay`], so that every
    /// delay moves time forward.
    #[derive(Clone, Debug, Default)]
    pub struct ManualClock {
        now: Rc<Cell<u32>>,
    }

    impl ManualClock {
        pub fn advance(&self, ms: u32) {
            self.now.set(self.now.get().wrapping_add(ms));
        }

        pub fn set(&self, ms: u32) {
            self.now.set(ms);
        }

        pub fn delay(&self) -> ManualDelay {
            ManualDelay {
                clock: self.clone(),
                total: 0,
            }
        }
    }

    impl Clock for ManualClock {
        fn uptime_ms(&self) -> u32 {
            self.now.get()
        }
    }

    #[derive(Clone, Debug)]
    pub struct ManualDelay {
        clock: ManualClock,
        pub total: u64,
    }

    impl Delay for ManualDelay {
        fn delay_ms(&mut self, ms: u32) {
            self.total += ms as u64;
            self.clock.advance(ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_without_wall_time_has_no_epoch() {
        let clock = SystemClock::new();
        assert_eq!(clock.epoch_ms(), None);
    }

    #[test]
    fn manual_delay_moves_the_clock() {
        let clock = testing::ManualClock::default();
        let mut delay = clock.delay();
        delay.delay_ms(500);
        delay.delay_ms(250);
        assert_eq!(clock.uptime_ms(), 750);
        assert_eq!(delay.total, 750);
    }
}
