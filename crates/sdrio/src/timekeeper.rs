//! Device time per mainboard, counted in ticks of the master clock.

use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug)]
struct Clock {
    tick_rate: f64,
    epoch: Instant,
    base_ticks: u64,
}

impl Clock {
    fn now(&self) -> u64 {
        let elapsed = (self.epoch.elapsed().as_secs_f64() * self.tick_rate) as u64;
        self.base_ticks.saturating_add(elapsed)
    }
}

/// Free-running device clock. Time advances with the host monotonic clock
/// at the current tick rate.
#[derive(Debug)]
pub struct Timekeeper {
    clock: Mutex<Clock>,
}

impl Timekeeper {
    pub fn new(tick_rate: f64) -> Self {
        Self {
            clock: Mutex::new(Clock {
                tick_rate,
                epoch: Instant::now(),
                base_ticks: 0,
            }),
        }
    }

    pub fn now_ticks(&self) -> u64 {
        self.clock.lock().now()
    }

    pub fn set_time_now(&self, ticks: u64) {
        let mut clock = self.clock.lock();
        clock.base_ticks = ticks;
        clock.epoch = Instant::now();
    }

    pub fn tick_rate(&self) -> f64 {
        self.clock.lock().tick_rate
    }

    /// Change the tick rate without a jump in the current time.
    pub fn set_tick_rate(&self, tick_rate: f64) {
        let mut clock = self.clock.lock();
        clock.base_ticks = clock.now();
        clock.epoch = Instant::now();
        clock.tick_rate = tick_rate;
    }
}
