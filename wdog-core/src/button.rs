use crate::constants::cv;
use crate::constants::timing;
use crate::constants::MAX_INPUT_PINS;
use crate::cv::CvStore;

/// How a button input is reported over the feedback bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonMode {
    /// Reported for a configured hold time after each push.
    Push { hold_ticks: u8 },
    /// Each push flips the reported value.
    Toggle,
}

/// One debounced opto-coupler input. The integrator climbs while the pin
/// reads high and falls while it reads low; only the bounds flip the
/// stable value. A fresh push freezes the input for the debounce hold.
#[derive(Debug, Clone, Copy)]
pub struct Button {
    pub mode: ButtonMode,
    integrator: u8,
    hold: u8, // remaining debounce ticks, input ignored while > 0
    pub pushed: bool,
    pub toggle: bool,
}

impl Button {
    pub fn new(mode: ButtonMode) -> Button {
        Button {
            mode,
            integrator: timing::INTEGRATOR_LOW,
            hold: 0,
            pushed: false,
            toggle: false,
        }
    }

    /// Sample the raw pin level, once per 20 ms tick.
    pub fn tick(&mut self, level: bool) {
        if self.hold > 0 {
            self.hold -= 1;
            return;
        }
        if !level && self.integrator > timing::INTEGRATOR_LOW {
            self.integrator -= 1;
        }
        if level && self.integrator < timing::INTEGRATOR_HIGH {
            self.integrator += 1;
        }
        if self.integrator >= timing::INTEGRATOR_HIGH && !self.pushed {
            self.pushed = true;
            self.hold = timing::DEBOUNCE_HOLD_TICKS;
            self.toggle = !self.toggle;
        }
        if self.integrator <= timing::INTEGRATOR_LOW && self.pushed {
            self.pushed = false;
        }
    }
}

/// The four X8 button inputs plus emergency-edge tracking.
pub struct Buttons {
    pub pins: [Button; MAX_INPUT_PINS],
    emergency_pin: usize, // index into pins; MAX_INPUT_PINS = none
    prev_emergency: bool,
}

impl Buttons {
    /// Button modes and the emergency pin come from the CV table.
    /// A hold-time CV of zero makes that button a toggle.
    pub fn from_store(store: &dyn CvStore) -> Buttons {
        let mut pins = [Button::new(ButtonMode::Toggle); MAX_INPUT_PINS];
        for (i, pin) in pins.iter_mut().enumerate() {
            let hold = store.read(cv::T_PUSH_1 + i);
            if hold != 0 {
                pin.mode = ButtonMode::Push { hold_ticks: hold };
            }
        }
        let raw = store.read(cv::EMERGENCY_PIN) as usize;
        let emergency_pin = if raw >= 1 && raw <= MAX_INPUT_PINS {
            raw - 1
        } else {
            MAX_INPUT_PINS
        };
        Buttons {
            pins,
            emergency_pin,
            prev_emergency: false,
        }
    }

    /// Reset all debounce state, as after a decoder reset.
    pub fn clear(&mut self) {
        for pin in self.pins.iter_mut() {
            let mode = pin.mode;
            *pin = Button::new(mode);
        }
        self.prev_emergency = false;
    }

    /// Sample all pins from a level bitmask, bit 0 = pin 1.
    pub fn tick(&mut self, levels: u8) {
        for (i, pin) in self.pins.iter_mut().enumerate() {
            pin.tick(levels & (1 << i) != 0);
        }
    }

    pub fn emergency_pushed(&self) -> bool {
        self.emergency_pin < MAX_INPUT_PINS && self.pins[self.emergency_pin].pushed
    }

    /// True exactly once per push of the emergency button.
    pub fn emergency_edge(&mut self) -> bool {
        let now = self.emergency_pushed();
        let edge = now && !self.prev_emergency;
        if now != self.prev_emergency {
            self.prev_emergency = now;
        }
        edge
    }

    pub fn is_emergency(&self, pin: usize) -> bool {
        pin == self.emergency_pin
    }
}
