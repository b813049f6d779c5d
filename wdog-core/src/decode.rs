use crate::constants::cv;
use crate::constants::dcc;
use crate::constants::timing;
use crate::cv::DecoderConfig;
use crate::receiver::Packet;

/// Configuration-variable operation, taken from the CC bits of the
/// access instruction byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvOperation {
    Nop,
    Verify,
    BitOp,
    Write,
}

impl CvOperation {
    fn from_cc_bits(byte: u8) -> CvOperation {
        match (byte >> 2) & 0b11 {
            0b01 => CvOperation::Verify,
            0b10 => CvOperation::BitOp,
            0b11 => CvOperation::Write,
            _ => CvOperation::Nop,
        }
    }
}

/// Whether the request arrived on the programming track or over a
/// normal operations packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvMode {
    Service,
    Main,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvRequest {
    pub op: CvOperation,
    pub index: u16, // 0-based: CV1 is index 0
    pub data: u8,
}

/// What a track packet means to this decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ignore,
    /// Broadcast reset packet.
    Reset,
    /// Basic accessory command for one of our addresses (or broadcast).
    /// `device` is relative to our first address.
    Accessory {
        device: u16,
        gate: u8,
        activate: bool,
    },
    /// Basic accessory command for some other decoder. The supervisor
    /// only cares that the master is alive, not who was addressed.
    OtherAccessory {
        address: u16,
    },
    /// Extended accessory command for our address (or broadcast).
    ExtendedAccessory {
        aspect: u8,
    },
    /// One of the loco functions F1..F4 changed on our loco address.
    LocoFunction {
        device: u8,
        on: bool,
    },
    /// Some engine, any engine, was told to move.
    LocoSpeedNonZero,
    /// Configuration access, service mode or on the main.
    CvAccess {
        mode: CvMode,
        req: CvRequest,
    },
}

/// Datalink-to-command layer. One instance per decoder; `analyze` is fed
/// every packet the receiver completes and classifies it against the
/// configured addresses.
pub struct Classifier {
    cfg: DecoderConfig,
    first_coil: u16, // first global port address (decoder address * 4)
    last_coil: u16,
    first_loco: u16,
    last_loco: u16,
    last_f1_f4: u8, // 255 until the first function frame is seen
    sm_active: bool,
    sm_last_tick: u32,
    pub signal_quality: u8, // checksum error count, readable as a CV
}

impl Classifier {
    pub fn new(cfg: DecoderConfig) -> Classifier {
        let valid = cfg.first_address != dcc::INVALID_DECODER_ADDRESS;
        let first_coil = if valid { cfg.first_address * 4 } else { u16::MAX };
        let last_coil = if !valid {
            0
        } else if cfg.skip_uneven {
            first_coil + (dcc::DEVICES_PER_DECODER - 1) * 2 + 1
        } else {
            first_coil + dcc::DEVICES_PER_DECODER - 1
        };
        let last_loco = if cfg.skip_uneven {
            cfg.loco_address + 1
        } else {
            cfg.loco_address
        };
        Classifier {
            cfg,
            first_coil,
            last_coil,
            first_loco: cfg.loco_address,
            last_loco,
            last_f1_f4: 255,
            sm_active: false,
            sm_last_tick: 0,
            signal_quality: 0,
        }
    }

    /// Classify one packet. `now_tick` is the 20 ms process tick counter,
    /// used for the service-mode timeout.
    pub fn analyze(&mut self, pkt: &Packet, now_tick: u32) -> Command {
        if !pkt.checksum_ok() {
            self.signal_quality = self.signal_quality.wrapping_add(1);
            return Command::Ignore;
        }
        if self.sm_active
            && now_tick.wrapping_sub(self.sm_last_tick) >= timing::SERVICE_MODE_TICKS
        {
            self.sm_active = false;
        }
        match pkt.data[0] {
            0 => self.broadcast(pkt, now_tick),
            1..=127 => self.loco_7bit(pkt, now_tick),
            128..=191 => self.basic_accessory(pkt),
            192..=231 => self.loco_14bit(pkt),
            232..=254 => Command::Ignore, // reserved
            255 => self.idle(now_tick),
        }
    }

    fn broadcast(&mut self, pkt: &Packet, now_tick: u32) -> Command {
        if pkt.data[1] == 0 {
            // reset packet, also opens service mode
            self.sm_active = true;
            self.sm_last_tick = now_tick;
        }
        Command::Reset
    }

    fn idle(&mut self, now_tick: u32) -> Command {
        if self.sm_active {
            self.sm_last_tick = now_tick; // idle packets keep service mode open
        }
        Command::Ignore
    }

    fn loco_7bit(&mut self, pkt: &Packet, now_tick: u32) -> Command {
        if self.sm_active && (112..=127).contains(&pkt.data[0]) {
            return self.service_mode(pkt, now_tick);
        }
        self.sm_active = false;
        match pkt.data[1] & 0b1110_0000 {
            // speed and direction, either direction
            0b0100_0000 | 0b0110_0000 => {
                if speed_steps(pkt.data[1]) > 0 {
                    Command::LocoSpeedNonZero
                } else {
                    Command::Ignore
                }
            }
            _ => Command::Ignore,
        }
    }

    /// Direct-mode programming frame on the programming track.
    /// {preamble} 0 0111CCAA 0 AAAAAAAA 0 DDDDDDDD 0 EEEEEEEE 1
    fn service_mode(&mut self, pkt: &Packet, now_tick: u32) -> Command {
        self.sm_last_tick = now_tick;
        if pkt.size != 4 {
            return Command::Ignore; // register mode not supported
        }
        Command::CvAccess {
            mode: CvMode::Service,
            req: CvRequest {
                op: CvOperation::from_cc_bits(pkt.data[0]),
                index: ((pkt.data[0] as u16 & 0b11) << 8) | pkt.data[1] as u16,
                data: pkt.data[2],
            },
        }
    }

    fn basic_accessory(&mut self, pkt: &Packet) -> Command {
        self.sm_active = false;
        if pkt.data[1] >= 0b1000_0000 && !self.cfg.extended_accessory {
            return self.basic_form(pkt);
        }
        if pkt.data[1] < 0b1000_0000 && self.cfg.extended_accessory {
            return self.extended_form(pkt);
        }
        Command::Ignore
    }

    /// {preamble} 0 10AAAAAA 0 1AAACDDD 0 EEEEEEEE 1
    fn basic_form(&mut self, pkt: &Packet) -> Command {
        // address low bits from byte 0, high bits inverted in byte 1
        let mut address = (pkt.data[0] as u16 & 0b0011_1111)
            | ((!pkt.data[1] as u16 & 0b0111_0000) << 2);
        // Lenz master stations count from 1 and mishandle the address
        // block boundaries, so undo that here
        if self.cfg.lenz_master {
            address = match address {
                0 => 64,
                64 => 128,
                128 => 192,
                192 => 256,
                other => other,
            };
            address -= 1;
        }
        let port = (pkt.data[1] as u16 & 0b0000_0110) >> 1;
        let gate = pkt.data[1] & 0b0000_0001;
        let activate = pkt.data[1] & 0b0000_1000 != 0;

        if pkt.size == 6 {
            // long-form configuration access aimed at an accessory address
            if address == self.cfg.first_address {
                return Command::CvAccess {
                    mode: CvMode::Main,
                    req: cv_request_at(pkt, 2),
                };
            }
            return Command::Ignore;
        }
        if pkt.size != 3 {
            return Command::Ignore;
        }

        let device = if address < self.cfg.first_address {
            port
        } else if self.cfg.skip_uneven {
            (address - self.cfg.first_address) * 2 + (port >> 1)
        } else {
            (address - self.cfg.first_address) * 4 + port
        };
        if address == dcc::BROADCAST_BASIC {
            return Command::Accessory { device, gate, activate };
        }
        let coil = address * 4 + port;
        if coil >= self.first_coil && coil <= self.last_coil {
            Command::Accessory { device, gate, activate }
        } else {
            Command::OtherAccessory { address }
        }
    }

    /// {preamble} 0 10AAAAAA 0 0AAA0AA1 0 000XXXXX 0 EEEEEEEE 1
    fn extended_form(&mut self, pkt: &Packet) -> Command {
        let address = ((pkt.data[1] as u16 & 0b0000_0110) >> 1)
            | ((pkt.data[0] as u16 & 0b0011_1111) << 2)
            | ((!pkt.data[1] as u16 & 0b0111_0000) >> 4);
        if pkt.size == 6 {
            if address == self.cfg.first_address {
                return Command::CvAccess {
                    mode: CvMode::Main,
                    req: cv_request_at(pkt, 2),
                };
            }
            return Command::Ignore;
        }
        if pkt.size != 4 {
            return Command::Ignore;
        }
        if address == dcc::BROADCAST_EXTENDED || address == self.cfg.first_address {
            Command::ExtendedAccessory {
                aspect: pkt.data[2] & 0b0001_1111,
            }
        } else {
            Command::OtherAccessory { address }
        }
    }

    /// {preamble} 0 11AAAAAA 0 AAAAAAAA 0 instruction bytes 0 EEEEEEEE 1
    fn loco_14bit(&mut self, pkt: &Packet) -> Command {
        self.sm_active = false;
        let address = ((pkt.data[0] as u16 & 0b0011_1111) << 8) | pkt.data[1] as u16;
        match pkt.data[2] & 0b1110_0000 {
            0b0100_0000 | 0b0110_0000 => {
                if speed_steps(pkt.data[2]) > 0 {
                    return Command::LocoSpeedNonZero;
                }
            }
            _ => {}
        }
        if address < self.first_loco || address > self.last_loco {
            return Command::Ignore;
        }
        match pkt.data[2] & 0b1110_0000 {
            // function group one carries F0..F4; F1..F4 drive our devices
            0b1000_0000 => self.function_group_one(pkt.data[2] & 0b0000_1111),
            // long-form configuration access over the loco address
            0b1110_0000 if pkt.data[2] & 0b0001_0000 == 0 => Command::CvAccess {
                mode: CvMode::Main,
                req: cv_request_at(pkt, 2),
            },
            _ => Command::Ignore,
        }
    }

    /// One command may flip several functions at once; we report only the
    /// lowest changed one and pick up the rest on the retransmission.
    fn function_group_one(&mut self, f1_f4: u8) -> Command {
        if f1_f4 == self.last_f1_f4 {
            return Command::Ignore; // retransmission
        }
        if self.last_f1_f4 == 255 {
            self.last_f1_f4 = f1_f4; // first observation sets the baseline
            return Command::Ignore;
        }
        for device in 0..4u8 {
            let mask = 1 << device;
            if (f1_f4 ^ self.last_f1_f4) & mask != 0 {
                let on = f1_f4 & mask != 0;
                if on {
                    self.last_f1_f4 |= mask;
                } else {
                    self.last_f1_f4 &= !mask;
                }
                return Command::LocoFunction { device, on };
            }
        }
        Command::Ignore
    }
}

/// 28/128-step speed byte to a plain step count; 0 means stopped,
/// including the emergency-stop codes.
fn speed_steps(speed_byte: u8) -> u8 {
    let speed = ((speed_byte & 0b0000_1111) << 1) + ((speed_byte & 0b0001_0000) >> 4);
    if speed < 4 {
        0
    } else {
        speed - 3
    }
}

/// Long-form access instruction starting at `offset`:
/// 1110CCAA 0 AAAAAAAA 0 DDDDDDDD
fn cv_request_at(pkt: &Packet, offset: usize) -> CvRequest {
    CvRequest {
        op: CvOperation::from_cc_bits(pkt.data[offset]),
        index: ((pkt.data[offset] as u16 & 0b11) << 8) | pkt.data[offset + 1] as u16,
        data: pkt.data[offset + 2],
    }
}

#[cfg(test)]
mod decode_tests {
    use super::*;
    use crate::constants::cv as cvidx;
    use crate::cv::{CvStore, CvTable};

    fn packet(bytes: &[u8]) -> Packet {
        let mut pkt = Packet::new();
        let mut xor = 0;
        for (i, b) in bytes.iter().enumerate() {
            pkt.data[i] = *b;
            xor ^= *b;
        }
        pkt.data[bytes.len()] = xor;
        pkt.size = bytes.len() + 1;
        pkt
    }

    fn classifier_at(address: u8) -> Classifier {
        let mut table = CvTable::new();
        table.write(cvidx::ADDR_LOW, address);
        table.write(cvidx::ADDR_HIGH, 0);
        table.write(cvidx::CMD_STATION, 0);
        Classifier::new(DecoderConfig::from_store(&table))
    }

    fn basic_accessory(address: u16, port: u8, gate: u8, activate: bool) -> Packet {
        let b0 = 0b1000_0000 | (address & 0b0011_1111) as u8;
        let high = ((address >> 6) & 0b111) as u8;
        let b1 = 0b1000_0000
            | ((!high & 0b111) << 4)
            | ((activate as u8) << 3)
            | (port << 1)
            | gate;
        packet(&[b0, b1])
    }

    #[test]
    fn bad_checksum_counts_and_ignores() {
        let mut cl = classifier_at(3);
        let mut pkt = basic_accessory(3, 0, 1, true);
        pkt.data[pkt.size - 1] ^= 0xFF;
        assert_eq!(cl.analyze(&pkt, 0), Command::Ignore);
        assert_eq!(cl.signal_quality, 1);
    }

    #[test]
    fn reset_packet() {
        let mut cl = classifier_at(3);
        assert_eq!(cl.analyze(&packet(&[0, 0]), 0), Command::Reset);
    }

    #[test]
    fn own_accessory_command() {
        let mut cl = classifier_at(3);
        let pkt = basic_accessory(3, 0, 1, true);
        assert_eq!(
            cl.analyze(&pkt, 0),
            Command::Accessory { device: 0, gate: 1, activate: true }
        );
    }

    #[test]
    fn foreign_accessory_keeps_the_master_alive_signal() {
        let mut cl = classifier_at(3);
        let pkt = basic_accessory(9, 2, 0, true);
        assert_eq!(cl.analyze(&pkt, 0), Command::OtherAccessory { address: 9 });
    }

    #[test]
    fn lenz_master_address_shift() {
        let mut table = CvTable::new();
        table.write(cvidx::ADDR_LOW, 3);
        table.write(cvidx::ADDR_HIGH, 0);
        table.write(cvidx::CMD_STATION, 1);
        let mut cl = Classifier::new(DecoderConfig::from_store(&table));
        // a Lenz master counts addresses from 1, so its raw address 4
        // is our decoder address 3
        let pkt = basic_accessory(4, 0, 1, true);
        assert_eq!(
            cl.analyze(&pkt, 0),
            Command::Accessory { device: 0, gate: 1, activate: true }
        );
    }

    #[test]
    fn loco_speed_above_zero_is_reported_for_any_address() {
        let mut cl = classifier_at(3);
        // 7-bit address 12, forward, step byte 0b0110_0110
        let pkt = packet(&[12, 0b0110_0110]);
        assert_eq!(cl.analyze(&pkt, 0), Command::LocoSpeedNonZero);
        // stop (speed code 0) stays quiet
        let pkt = packet(&[12, 0b0110_0000]);
        assert_eq!(cl.analyze(&pkt, 0), Command::Ignore);
        // emergency stop code 1 also counts as stopped
        let pkt = packet(&[12, 0b0110_0001]);
        assert_eq!(cl.analyze(&pkt, 0), Command::Ignore);
    }

    #[test]
    fn function_group_one_baseline_then_edges() {
        let mut cl = classifier_at(3);
        let loco = 3 + dcc::LOCO_ADDRESS_OFFSET;
        let frame = |f: u8| {
            packet(&[
                0b1100_0000 | (loco >> 8) as u8,
                (loco & 0xFF) as u8,
                0b1000_0000 | f,
            ])
        };
        // first frame only records the baseline
        assert_eq!(cl.analyze(&frame(0b0000), 0), Command::Ignore);
        // F1 switches on
        assert_eq!(
            cl.analyze(&frame(0b0001), 0),
            Command::LocoFunction { device: 0, on: true }
        );
        // retransmission of the same state
        assert_eq!(cl.analyze(&frame(0b0001), 0), Command::Ignore);
        // F1 off and F3 on arrive together; lowest change wins first
        assert_eq!(
            cl.analyze(&frame(0b0100), 0),
            Command::LocoFunction { device: 0, on: false }
        );
        // the retransmission delivers the remaining change
        assert_eq!(
            cl.analyze(&frame(0b0100), 0),
            Command::LocoFunction { device: 2, on: true }
        );
    }

    #[test]
    fn pom_over_loco_address() {
        let mut cl = classifier_at(3);
        let loco = 3 + dcc::LOCO_ADDRESS_OFFSET;
        // write CV10 = 7: 1110CCAA with CC=11, index 9
        let pkt = packet(&[
            0b1100_0000 | (loco >> 8) as u8,
            (loco & 0xFF) as u8,
            0b1110_1100,
            9,
            7,
        ]);
        assert_eq!(
            cl.analyze(&pkt, 0),
            Command::CvAccess {
                mode: CvMode::Main,
                req: CvRequest { op: CvOperation::Write, index: 9, data: 7 },
            }
        );
    }

    #[test]
    fn pom_for_someone_elses_loco_is_ignored() {
        let mut cl = classifier_at(3);
        let loco = 99 + dcc::LOCO_ADDRESS_OFFSET;
        let pkt = packet(&[
            0b1100_0000 | (loco >> 8) as u8,
            (loco & 0xFF) as u8,
            0b1110_1100,
            9,
            7,
        ]);
        assert_eq!(cl.analyze(&pkt, 0), Command::Ignore);
    }

    #[test]
    fn service_mode_needs_a_reset_first() {
        let mut cl = classifier_at(3);
        let sm = packet(&[0b0111_1100, 9, 7]); // direct write CV10
        // without a preceding reset this is a plain loco packet
        assert_eq!(cl.analyze(&sm, 0), Command::Ignore);
        // after a reset the same frame is a service-mode request
        assert_eq!(cl.analyze(&packet(&[0, 0]), 1), Command::Reset);
        assert_eq!(
            cl.analyze(&sm, 1),
            Command::CvAccess {
                mode: CvMode::Service,
                req: CvRequest { op: CvOperation::Write, index: 9, data: 7 },
            }
        );
    }

    #[test]
    fn service_mode_times_out() {
        let mut cl = classifier_at(3);
        assert_eq!(cl.analyze(&packet(&[0, 0]), 0), Command::Reset);
        let sm = packet(&[0b0111_1100, 9, 7]);
        // two ticks later the window has closed
        assert_eq!(cl.analyze(&sm, timing::SERVICE_MODE_TICKS), Command::Ignore);
    }

    #[test]
    fn skip_uneven_merges_port_pairs() {
        let mut table = CvTable::new();
        table.write(cvidx::ADDR_LOW, 2);
        table.write(cvidx::ADDR_HIGH, 0);
        table.write(cvidx::CMD_STATION, 0);
        table.write(cvidx::SKIP_UNEVEN, 1);
        let mut cl = Classifier::new(DecoderConfig::from_store(&table));
        // port 3 on the next address up still belongs to us
        let pkt = basic_accessory(3, 3, 1, true);
        assert_eq!(
            cl.analyze(&pkt, 0),
            Command::Accessory { device: 3, gate: 1, activate: true }
        );
    }
}
