use std::time::Duration;

/// Exponential backoff for broker reconnects: the delay doubles on every
/// consecutive failure up to a cap, and resets to the floor after a
/// successful connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, cap: Duration) -> Self {
        Self {
            floor,
            cap,
            current: floor,
        }
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}
