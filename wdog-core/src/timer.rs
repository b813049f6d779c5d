/// Countdown driven by the 20 ms process tick.
///
/// `start` arms the timer with its hold time, `tick` counts it down and
/// reports the tick on which it reaches zero. A timer that was never
/// started (or already fired) ticks without effect.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    hold: u16, // reload value in ticks
    rest: u16, // remaining ticks, 0 = idle
}

impl Timer {
    pub fn new(hold: u16) -> Timer {
        Timer { hold, rest: 0 }
    }

    /// Change the hold time. Takes effect on the next `start`.
    pub fn set_hold(&mut self, hold: u16) {
        self.hold = hold;
    }

    pub fn start(&mut self) {
        self.rest = self.hold;
    }

    pub fn stop(&mut self) {
        self.rest = 0;
    }

    pub fn running(&self) -> bool {
        self.rest > 0
    }

    /// Advance one tick. Returns true exactly once, on the tick where the
    /// countdown reaches zero.
    pub fn tick(&mut self) -> bool {
        if self.rest == 0 {
            return false;
        }
        self.rest -= 1;
        self.rest == 0
    }
}
