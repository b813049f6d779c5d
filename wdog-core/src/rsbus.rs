use heapless::spsc::Queue;
use log::{debug, info, warn};

use rsbus_protocol::feedback::{generate_feedback_byte, ModuleType};

use crate::constants::bus;

/// Where transport bytes leave the decoder. The target writes the UART
/// data register here; the host build forwards over a socket.
pub trait ByteSink {
    fn send(&mut self, byte: u8);
}

/// Feedback-bus transport. The master polls the 130 address slots with
/// one line transition each; we may put one byte on the wire per polling
/// cycle, only in our own slot. A quiet gap ends the cycle, a long quiet
/// period means the master reset and we must register again.
///
/// Outbound bytes wait in a short queue, oldest first. When the queue is
/// full, or when the master goes inactive, bytes are dropped with a
/// warning; loss is accepted, re-sync is the recovery.
pub struct RsBus {
    module: ModuleType,
    address: u8, // our slot, 1..=128, 0 = not configured
    layer1_active: bool,
    connected: bool,
    queue: Queue<(u8, u8), 5>, // (slot, byte), spsc capacity 4
    polled: u16,               // transitions seen in the current cycle
    idle_ms: u8,
    inactive_ms: u8,
    pub dropped: u32,
}

impl RsBus {
    pub fn new(address: u8, module: ModuleType) -> RsBus {
        RsBus {
            module,
            address,
            layer1_active: false,
            connected: false,
            queue: Queue::new(),
            polled: 0,
            idle_ms: 0,
            inactive_ms: 0,
            dropped: 0,
        }
    }

    pub fn active(&self) -> bool {
        self.layer1_active
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    fn enqueue(&mut self, slot: u8, byte: u8) {
        if self.queue.enqueue((slot, byte)).is_err() {
            self.dropped += 1;
            warn!("feedback byte dropped, transmit queue full");
        }
    }

    /// Queue one report nibble for our own slot.
    pub fn send_report(&mut self, data: u8, high_nibble: bool) {
        if self.address == 0 {
            return;
        }
        let byte = generate_feedback_byte(data, high_nibble, self.module);
        debug!("queue report nibble {:#04x}", byte);
        self.enqueue(self.address, byte);
    }

    /// Answer a configuration read with a full byte, low nibble first,
    /// on the shared reply slot.
    pub fn send_cv_value(&mut self, value: u8) {
        info!("report configuration value {}", value);
        let low = generate_feedback_byte(value & 0x0F, false, self.module);
        let high = generate_feedback_byte(value >> 4, true, self.module);
        self.enqueue(bus::REGISTRATION_SLOT, low);
        self.enqueue(bus::REGISTRATION_SLOT, high);
    }

    /// Register with the master: an empty nibble pair on the shared slot.
    /// Called every tick; does nothing once connected or while the bus
    /// is down.
    pub fn connect(&mut self) {
        if !self.layer1_active || self.connected || self.address == 0 {
            return;
        }
        // the handshake must go out as a pair
        if self.queue.capacity() - self.queue.len() < 2 {
            return;
        }
        info!("registering with feedback master, slot {}", self.address);
        self.enqueue(
            bus::REGISTRATION_SLOT,
            generate_feedback_byte(0, false, self.module),
        );
        self.enqueue(
            bus::REGISTRATION_SLOT,
            generate_feedback_byte(0, true, self.module),
        );
        self.connected = true;
    }

    /// One polling transition on the bus line. The slot whose number
    /// equals the transition count gets the wire.
    pub fn on_transition(&mut self, sink: &mut dyn ByteSink) {
        if let Some(&(slot, byte)) = self.queue.peek() {
            if self.layer1_active && slot as u16 == self.polled {
                // slot 0 is never granted; the first cycle only counts
                if slot > 0 {
                    sink.send(byte);
                }
                self.queue.dequeue();
            } else if slot > bus::MAX_SLAVE_ADDRESS {
                self.queue.dequeue();
                self.dropped += 1;
            }
        }
        self.polled += 1;
        self.idle_ms = 0;
    }

    /// One millisecond of wall time. Detects the end-of-cycle gap and
    /// master inactivity.
    pub fn on_ms(&mut self) {
        self.idle_ms = self.idle_ms.saturating_add(1);
        self.inactive_ms = self.inactive_ms.saturating_add(1);

        if self.idle_ms > bus::IDLE_LIMIT_MS {
            self.idle_ms = 0;
            if self.polled == bus::SLOTS_PER_CYCLE {
                // a complete cycle means the signal is good
                self.layer1_active = true;
                self.inactive_ms = 0;
            } else {
                self.layer1_active = false;
            }
            self.polled = 0;
        }

        if self.inactive_ms >= bus::INACTIVE_LIMIT_MS {
            self.inactive_ms = 0;
            self.layer1_active = false;
            self.connected = false;
            let mut lost = 0;
            while self.queue.dequeue().is_some() {
                lost += 1;
            }
            if lost > 0 {
                self.dropped += lost;
                warn!("feedback master inactive, {} queued byte(s) lost", lost);
            } else {
                info!("feedback master inactive, will register again");
            }
        }
    }
}
