use crate::constants::timing;

/// Drive mode for the lamps inside the emergency push buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LampMode {
    Off,
    On,
    Flash,
    FlashFast,
}

/// Flash generator for the button lamps, clocked by the 20 ms tick.
/// The panel LEDs are plain on/off and need no generator.
pub struct FlashLamp {
    mode: LampMode,
    lit: bool,
    rest: u8, // ticks until the next toggle
}

impl FlashLamp {
    pub fn new() -> FlashLamp {
        FlashLamp {
            mode: LampMode::Off,
            lit: false,
            rest: 0,
        }
    }

    fn half_period(mode: LampMode) -> u8 {
        match mode {
            LampMode::Flash => timing::FLASH_TICKS,
            LampMode::FlashFast => timing::FLASH_FAST_TICKS,
            _ => 0,
        }
    }

    pub fn set(&mut self, mode: LampMode) {
        self.mode = mode;
        self.lit = mode != LampMode::Off; // flashing starts lit
        self.rest = FlashLamp::half_period(mode);
    }

    pub fn mode(&self) -> LampMode {
        self.mode
    }

    pub fn lit(&self) -> bool {
        self.lit
    }

    pub fn tick(&mut self) {
        match self.mode {
            LampMode::Flash | LampMode::FlashFast => {
                if self.rest > 0 {
                    self.rest -= 1;
                } else {
                    self.rest = FlashLamp::half_period(self.mode);
                    self.lit = !self.lit;
                }
            }
            _ => {}
        }
    }
}

impl Default for FlashLamp {
    fn default() -> FlashLamp {
        FlashLamp::new()
    }
}

#[cfg(test)]
mod led_tests {
    use super::*;

    #[test]
    fn steady_modes_do_not_toggle() {
        let mut lamp = FlashLamp::new();
        lamp.set(LampMode::On);
        for _ in 0..100 {
            lamp.tick();
        }
        assert!(lamp.lit());
        lamp.set(LampMode::Off);
        for _ in 0..100 {
            lamp.tick();
        }
        assert!(!lamp.lit());
    }

    #[test]
    fn flash_toggles_at_the_half_period() {
        let mut lamp = FlashLamp::new();
        lamp.set(LampMode::Flash);
        assert!(lamp.lit());
        for _ in 0..=timing::FLASH_TICKS {
            lamp.tick();
        }
        assert!(!lamp.lit());
        for _ in 0..=timing::FLASH_TICKS {
            lamp.tick();
        }
        assert!(lamp.lit());
    }

    #[test]
    fn fast_flash_is_faster() {
        let mut lamp = FlashLamp::new();
        lamp.set(LampMode::FlashFast);
        for _ in 0..=timing::FLASH_FAST_TICKS {
            lamp.tick();
        }
        assert!(!lamp.lit());
    }
}
