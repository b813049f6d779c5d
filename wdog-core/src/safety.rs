use log::{debug, info};

use crate::button::{ButtonMode, Buttons};
use crate::constants::cv;
use crate::constants::timing;
use crate::constants::MAX_INPUT_PINS;
use crate::cv::CvStore;
use crate::led::{FlashLamp, LampMode};
use crate::rsbus::RsBus;
use crate::timer::Timer;

/// Safety supervisor states. STARTUP is the sole entry point; every
/// recovery path leads back through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Startup,
    /// No computer in control; the relay is on for manual operation.
    Local,
    /// Emergency button pushed while in LOCAL; relay is off.
    LPushed,
    /// A computer sends watchdog commands; the watchdog timer runs.
    Remote,
    /// Watchdog expired; watching whether trains still move.
    WStop,
    /// Watchdog expired and trains kept moving; relay is off.
    WRelayOff,
    /// Emergency pushed in REMOTE; the computer gets time to stop trains.
    PcWait,
    /// Grace period over; watching whether the computer managed it.
    RStop,
    /// The computer did not stop the trains; relay is off.
    RRelayOff,
    /// The computer stopped everything; waiting for human intervention.
    RStopped,
}

impl State {
    /// Feedback nibble for this state; only four states are observable
    /// downstream, the rest are transient.
    fn report_bits(self) -> Option<u8> {
        match self {
            State::Local => Some(0b0001),
            State::Remote => Some(0b0010),
            State::LPushed => Some(0b0100),
            State::RRelayOff => Some(0b1000),
            _ => None,
        }
    }
}

/// The track-power cutoff relay.
pub trait Relay {
    fn energize(&mut self);
    fn release(&mut self);
}

/// The three panel LEDs; exactly one announcement at a time.
pub trait StatusLeds {
    fn local(&mut self);
    fn remote(&mut self);
    fn fault(&mut self);
}

struct ReportSlot {
    hold: u16,    // push-button report hold, 20 ms ticks
    wait: u16,    // remaining hold
    last: bool,   // level last put on the bus
}

/// Per-button feedback bookkeeping. Ordinary buttons report their
/// debounced level (push) or toggle flag; the emergency button instead
/// follows a flag the state machine raises and lowers, so a push only
/// becomes visible downstream when it had a safety meaning.
pub struct ButtonReporter {
    slots: [ReportSlot; MAX_INPUT_PINS],
    emergency_flag: bool,
    allow_new_on: bool, // a push-mode emergency must drop before re-reporting
    enabled: bool,
}

impl ButtonReporter {
    pub fn from_store(store: &dyn CvStore) -> ButtonReporter {
        let mut i = 0;
        let slots = [(); MAX_INPUT_PINS].map(|_| {
            let hold = store.read(cv::T_PUSH_1 + i) as u16;
            i += 1;
            ReportSlot { hold, wait: 0, last: false }
        });
        ButtonReporter {
            slots,
            emergency_flag: false,
            allow_new_on: true,
            enabled: store.read(cv::SEND_FB) != 0,
        }
    }

    fn set_emergency(&mut self) {
        self.emergency_flag = true;
    }

    fn clear_emergency(&mut self) {
        self.emergency_flag = false;
    }

    /// The button nibble. The emergency button always occupies the top
    /// bit; the remaining buttons fill the low bits in pin order.
    fn nibble(&self, buttons: &Buttons) -> u8 {
        let mut value = 0;
        let mut next = 0;
        for (i, slot) in self.slots.iter().enumerate() {
            let bit = if buttons.is_emergency(i) {
                3
            } else {
                let b = next;
                next += 1;
                b
            };
            if slot.last {
                value |= 1 << bit;
            }
        }
        value
    }

    fn handle_emergency(&mut self, i: usize, mode: ButtonMode) -> bool {
        let slot = &mut self.slots[i];
        match mode {
            ButtonMode::Toggle => {
                if self.emergency_flag != slot.last {
                    slot.last = self.emergency_flag;
                    return true;
                }
                false
            }
            ButtonMode::Push { .. } => {
                if self.emergency_flag && self.allow_new_on {
                    slot.last = true;
                    slot.wait = slot.hold;
                    self.allow_new_on = false;
                    return true;
                }
                if slot.wait > 0 {
                    slot.wait -= 1;
                    return false;
                }
                if !self.emergency_flag {
                    self.allow_new_on = true;
                }
                if slot.last {
                    slot.last = false;
                    return true;
                }
                false
            }
        }
    }

    fn handle_ordinary(&mut self, i: usize, buttons: &Buttons) -> bool {
        let pin = &buttons.pins[i];
        let slot = &mut self.slots[i];
        match pin.mode {
            ButtonMode::Push { .. } => {
                if slot.wait > 0 {
                    slot.wait -= 1;
                    return false;
                }
                if pin.pushed {
                    slot.wait = slot.hold;
                }
                if pin.pushed != slot.last {
                    slot.last = pin.pushed;
                    return true;
                }
                false
            }
            ButtonMode::Toggle => {
                if pin.toggle != slot.last {
                    slot.last = pin.toggle;
                    return true;
                }
                false
            }
        }
    }

    /// Called every 20 ms, after the state machine ran. Sends one button
    /// nibble when any reported value changed.
    pub fn tick(&mut self, buttons: &Buttons, bus: &mut RsBus) {
        if !self.enabled {
            return;
        }
        let mut send = false;
        for i in 0..MAX_INPUT_PINS {
            let changed = if buttons.is_emergency(i) {
                self.handle_emergency(i, buttons.pins[i].mode)
            } else {
                self.handle_ordinary(i, buttons)
            };
            send = send || changed;
        }
        if send {
            bus.send_report(self.nibble(buttons), true);
        }
    }
}

/// The safety state machine plus the timers it runs on. Commands arrive
/// through `watchdog_command`, `movement_observed` and `reset_command`;
/// `tick` advances everything once per 20 ms.
pub struct Supervisor {
    state: State,
    watchdog: Timer,
    pc_grace: Timer,
    move_check: Timer,
    watchdog_seen: bool,
    trains_moving: bool,
    pub lamp: FlashLamp,
    pub feedback: ButtonReporter,
}

impl Supervisor {
    pub fn from_store(store: &dyn CvStore) -> Supervisor {
        let watchdog_ticks =
            store.read(cv::T_WATCHDOG) as u16 * timing::TICKS_PER_SECOND;
        let grace_ticks =
            store.read(cv::T_TRAIN_MOVE) as u16 * timing::TICKS_PER_100_MS;
        let check_ticks =
            store.read(cv::T_CHECK_MOVE) as u16 * timing::TICKS_PER_100_MS;
        Supervisor {
            state: State::Startup,
            watchdog: Timer::new(watchdog_ticks),
            pc_grace: Timer::new(grace_ticks),
            move_check: Timer::new(check_ticks),
            watchdog_seen: false,
            trains_moving: false,
            lamp: FlashLamp::new(),
            feedback: ButtonReporter::from_store(store),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// A watchdog accessory command arrived. Restarts the timer in every
    /// state, so repeated commands while in REMOTE only push the
    /// deadline out.
    pub fn watchdog_command(&mut self) {
        self.watchdog.start();
        self.watchdog_seen = true;
    }

    /// A locomotive command with nonzero speed was seen. Sticky until
    /// a transition consumes it.
    pub fn movement_observed(&mut self) {
        self.trains_moving = true;
    }

    /// Broadcast reset. Back to STARTUP, except while a relay-off state
    /// holds an active safety cutoff that must not be masked.
    pub fn reset_command(&mut self) {
        match self.state {
            State::LPushed | State::WRelayOff | State::RRelayOff => {}
            _ => {
                debug!("track reset, back to startup");
                self.state = State::Startup;
            }
        }
    }

    fn take_watchdog_seen(&mut self) -> bool {
        let seen = self.watchdog_seen;
        self.watchdog_seen = false;
        seen
    }

    fn enter(&mut self, next: State, bus: &mut RsBus) {
        info!("state {:?} -> {:?}", self.state, next);
        self.state = next;
        if let Some(bits) = next.report_bits() {
            bus.send_report(bits, false);
        }
    }

    /// One 20 ms tick. Buttons must have been sampled already.
    pub fn tick(
        &mut self,
        buttons: &mut Buttons,
        bus: &mut RsBus,
        relay: &mut dyn Relay,
        leds: &mut dyn StatusLeds,
    ) {
        self.lamp.tick();
        self.watchdog.tick();
        self.pc_grace.tick();
        self.move_check.tick();
        bus.connect();
        self.run_state_machine(buttons, bus, relay, leds);
        self.feedback.tick(buttons, bus);
    }

    fn run_state_machine(
        &mut self,
        buttons: &mut Buttons,
        bus: &mut RsBus,
        relay: &mut dyn Relay,
        leds: &mut dyn StatusLeds,
    ) {
        match self.state {
            State::Startup => {
                relay.energize();
                leds.local();
                self.lamp.set(LampMode::On);
                self.feedback.clear_emergency();
                self.enter(State::Local, bus);
            }
            State::Local => {
                if self.take_watchdog_seen() {
                    leds.remote();
                    self.enter(State::Remote, bus);
                } else if buttons.emergency_edge() {
                    relay.release();
                    self.lamp.set(LampMode::Flash);
                    self.feedback.set_emergency();
                    self.enter(State::LPushed, bus);
                }
            }
            State::LPushed => {
                if buttons.emergency_edge() {
                    self.enter(State::Startup, bus);
                }
            }
            State::Remote => {
                if self.take_watchdog_seen() {
                    // all is well
                } else if !self.watchdog.running() {
                    leds.fault();
                    self.move_check.start();
                    self.trains_moving = false;
                    self.enter(State::WStop, bus);
                } else if buttons.emergency_edge() {
                    self.lamp.set(LampMode::Flash);
                    self.feedback.set_emergency();
                    self.pc_grace.start();
                    self.enter(State::PcWait, bus);
                }
            }
            State::WStop => {
                if self.trains_moving {
                    relay.release();
                    self.lamp.set(LampMode::FlashFast);
                    self.enter(State::WRelayOff, bus);
                } else if !self.move_check.running() {
                    self.enter(State::Startup, bus);
                }
            }
            State::WRelayOff => {
                if buttons.emergency_edge() {
                    self.enter(State::Startup, bus);
                }
            }
            State::PcWait => {
                if !self.pc_grace.running() {
                    leds.fault();
                    self.move_check.start();
                    self.trains_moving = false;
                    self.enter(State::RStop, bus);
                }
            }
            State::RStop => {
                if self.trains_moving {
                    relay.release();
                    self.lamp.set(LampMode::FlashFast);
                    self.enter(State::RRelayOff, bus);
                } else if !self.move_check.running() {
                    self.enter(State::RStopped, bus);
                }
            }
            State::RStopped => {
                if buttons.emergency_edge() || self.trains_moving {
                    self.enter(State::Startup, bus);
                }
            }
            State::RRelayOff => {
                if buttons.emergency_edge() {
                    self.enter(State::Startup, bus);
                }
            }
        }
    }
}
