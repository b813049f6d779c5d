use heapless::spsc::Queue;
use log::warn;

use crate::constants::dcc;
use crate::constants::MAX_PACKET_SIZE;

/// A complete track packet, address byte through XOR byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub size: usize,
    pub data: [u8; MAX_PACKET_SIZE],
}

impl Packet {
    pub fn new() -> Packet {
        Packet {
            size: 0,
            data: [0; MAX_PACKET_SIZE],
        }
    }

    /// The XOR of all bytes including the error byte must come out zero.
    pub fn checksum_ok(&self) -> bool {
        self.data[..self.size].iter().fold(0, |acc, b| acc ^ b) == 0
    }
}

impl Default for Packet {
    fn default() -> Packet {
        Packet::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    AwaitPreamble, // counting consecutive one bits
    AwaitLeadZero, // preamble seen, waiting for the packet start bit
    AwaitByte,     // shifting in eight data bits
    AwaitTrailer,  // zero = another byte follows, one = packet end
}

/// Track-signal datalink layer. Fed one decoded bit at a time from the
/// sampling interrupt, it assembles packets and hands them to the process
/// loop through a single-entry queue. A packet completing while the
/// previous one is still unread is dropped, never overwritten.
pub struct BitDecoder {
    state: RecvState,
    ones: u8,
    bits: u8,
    byte: u8,
    packet: Packet,
    slot: Queue<Packet, 2>, // spsc capacity 1
    pub overruns: u32,
}

impl BitDecoder {
    pub fn new() -> BitDecoder {
        BitDecoder {
            state: RecvState::AwaitPreamble,
            ones: 0,
            bits: 0,
            byte: 0,
            packet: Packet::new(),
            slot: Queue::new(),
            overruns: 0,
        }
    }

    fn restart(&mut self) {
        self.state = RecvState::AwaitPreamble;
        self.ones = 0;
    }

    /// Consume one bit sampled from the track.
    pub fn on_sample(&mut self, bit: bool) {
        match self.state {
            RecvState::AwaitPreamble => {
                if bit {
                    self.ones = self.ones.saturating_add(1);
                    if self.ones >= dcc::PREAMBLE_MIN_ONES {
                        self.state = RecvState::AwaitLeadZero;
                    }
                } else {
                    self.ones = 0;
                }
            }
            RecvState::AwaitLeadZero => {
                // extra ones only lengthen the preamble
                if !bit {
                    self.packet = Packet::new();
                    self.bits = 0;
                    self.byte = 0;
                    self.state = RecvState::AwaitByte;
                }
            }
            RecvState::AwaitByte => {
                self.byte = (self.byte << 1) | bit as u8;
                self.bits += 1;
                if self.bits == 8 {
                    if self.packet.size == MAX_PACKET_SIZE {
                        // longer than anything we answer, resync
                        self.restart();
                        return;
                    }
                    self.packet.data[self.packet.size] = self.byte;
                    self.packet.size += 1;
                    self.state = RecvState::AwaitTrailer;
                }
            }
            RecvState::AwaitTrailer => {
                if bit {
                    self.complete();
                    self.restart();
                } else {
                    self.bits = 0;
                    self.byte = 0;
                    self.state = RecvState::AwaitByte;
                }
            }
        }
    }

    fn complete(&mut self) {
        if self.packet.size < 2 {
            return; // address and error byte at minimum
        }
        if self.slot.enqueue(self.packet).is_err() {
            self.overruns += 1;
            warn!("packet dropped, previous one still unread");
        }
    }

    /// Fetch the pending packet, if any. Called from the process loop.
    pub fn take(&mut self) -> Option<Packet> {
        self.slot.dequeue()
    }
}

impl Default for BitDecoder {
    fn default() -> BitDecoder {
        BitDecoder::new()
    }
}
