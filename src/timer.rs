use crate::bus::Device;
use std::time::{Duration, Instant};

/// ~60 Hz tick period.
const TICK_STEP: Duration = Duration::from_micros(16_667);

/// Free-running one-byte tick counter. `update` catches up to the wall
/// clock in whole steps, advancing the stored origin with each step so
/// residual time carries into the next call instead of accumulating drift.
pub struct Timer {
    time: u8,
    last_tick: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            time: 0,
            last_tick: Instant::now(),
        }
    }

    pub fn update(&mut self) {
        let now = Instant::now();
        while now.duration_since(self.last_tick) >= TICK_STEP {
            self.time = self.time.wrapping_add(1);
            self.last_tick += TICK_STEP;
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Timer {
    fn read(&mut self, _addr: u64) -> u8 {
        self.time
    }

    fn write(&mut self, _addr: u64, _data: u8) {
        // Read-only port.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn advances_near_60hz() {
        let mut timer = Timer::new();

        let start = timer.read(0);
        timer.update();
        sleep(Duration::from_millis(25));
        timer.update();
        let mid = timer.read(0);

        sleep(Duration::from_millis(25));
        timer.update();
        let end = timer.read(0);

        // ~50ms elapsed: at least 2 ticks, allowing for scheduler jitter.
        assert!(mid >= start);
        assert!(end > start);
        assert!(end.wrapping_sub(start) >= 2);
    }

    #[test]
    fn writes_are_ignored() {
        let mut timer = Timer::new();
        timer.write(0, 0xAA);
        assert_eq!(timer.read(0), 0);
    }
}
