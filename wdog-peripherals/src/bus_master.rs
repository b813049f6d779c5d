//! Stand-in for the feedback-bus master on host runs. A real master
//! polls the 130 address slots back to back, then leaves the line quiet
//! until the next cycle; the transport derives its timing from exactly
//! that pattern.

use wdog_core::constants::bus;
use wdog_core::rsbus::{ByteSink, RsBus};

pub struct BusMaster {
    transitions_left: u16,
    quiet_left: u8,
    pub cycles: u64,
}

impl BusMaster {
    pub fn new() -> BusMaster {
        BusMaster {
            transitions_left: bus::SLOTS_PER_CYCLE,
            quiet_left: 0,
            cycles: 0,
        }
    }

    /// Advance one millisecond of polling. Transitions are bunched so a
    /// full cycle plus the quiet gap comes out near the real bus rate of
    /// about 30 ms per cycle.
    pub fn on_ms(&mut self, rsbus: &mut RsBus, sink: &mut dyn ByteSink) {
        if self.transitions_left > 0 {
            let burst = self.transitions_left.min(5);
            for _ in 0..burst {
                rsbus.on_transition(sink);
            }
            self.transitions_left -= burst;
            if self.transitions_left == 0 {
                // quiet long enough for the slave to see the cycle end
                self.quiet_left = bus::IDLE_LIMIT_MS + 2;
            }
        } else if self.quiet_left > 0 {
            self.quiet_left -= 1;
            if self.quiet_left == 0 {
                self.transitions_left = bus::SLOTS_PER_CYCLE;
                self.cycles += 1;
            }
        }
        rsbus.on_ms();
    }
}

impl Default for BusMaster {
    fn default() -> BusMaster {
        BusMaster::new()
    }
}
