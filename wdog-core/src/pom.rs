use log::{info, warn};

use crate::constants::cv;
use crate::constants::timing;
use crate::cv::{persisted, CvStore};
use crate::decode::{CvMode, CvOperation, CvRequest};
use crate::rsbus::RsBus;

/// Service-mode acknowledgement output. The target pulls extra current
/// from the programming track for the given number of milliseconds.
pub trait AckPin {
    fn pulse(&mut self, ms: u8);
}

const ACK_MS: u8 = 6;

/// What the caller must do after a configuration operation was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvOutcome {
    None,
    /// Re-read the CV table and start over.
    Restart,
    /// Restore factory defaults, then restart.
    FactoryReset,
}

/// Configuration access protocol, service mode and on the main alike.
/// Requests are applied only on the second identical transmission; a
/// single corrupted or spurious packet can therefore never reprogram
/// the decoder. The two observations must fall within a two second
/// window.
pub struct CvProtocol {
    last: Option<CvRequest>,
    attempts: u8,
    window: u16, // ticks since the window opened
    pub search_active: bool,
}

impl CvProtocol {
    pub fn new() -> CvProtocol {
        CvProtocol {
            last: None,
            attempts: 0,
            window: 0,
            search_active: false,
        }
    }

    /// 20 ms tick; closes the retransmission window after two seconds.
    pub fn tick(&mut self) {
        self.window += 1;
        if self.window > timing::POM_WINDOW_TICKS {
            self.attempts = 0;
            self.last = None;
            self.window = 0;
        }
    }

    /// Handle one configuration request.
    pub fn cv_operation(
        &mut self,
        mode: CvMode,
        req: CvRequest,
        store: &mut dyn CvStore,
        bus: &mut RsBus,
        ack: &mut dyn AckPin,
        signal_quality: u8,
    ) -> CvOutcome {
        if self.last == Some(req) {
            self.attempts = self.attempts.saturating_add(1);
        } else {
            self.attempts = 1;
            self.last = Some(req);
        }
        if self.attempts != 2 {
            return CvOutcome::None;
        }

        // CV513 and up alias back onto the low range
        let index = (req.index & 0x1FF) as usize;
        if index >= cv::TABLE_SIZE {
            warn!("configuration index {} out of range", index + 1);
            return CvOutcome::None;
        }

        match req.op {
            CvOperation::Nop => CvOutcome::None,
            CvOperation::Verify => {
                self.verify(mode, index, req.data, store, bus, ack, signal_quality);
                CvOutcome::None
            }
            CvOperation::Write => self.write(mode, index, req.data, store, ack),
            CvOperation::BitOp => {
                // bit operations exist in service mode only
                if mode == CvMode::Service {
                    self.bit_operation(index, req.data, store, ack);
                }
                CvOutcome::None
            }
        }
    }

    fn live_value(&self, index: usize, store: &dyn CvStore, signal_quality: u8) -> u8 {
        match index {
            cv::SEARCH => self.search_active as u8,
            cv::DCC_QUALITY => signal_quality,
            _ => store.read(index),
        }
    }

    fn verify(
        &mut self,
        mode: CvMode,
        index: usize,
        data: u8,
        store: &dyn CvStore,
        bus: &mut RsBus,
        ack: &mut dyn AckPin,
        signal_quality: u8,
    ) {
        match mode {
            // on the programming track: acknowledge a match
            CvMode::Service => {
                if store.read(index) == data {
                    ack.pulse(ACK_MS);
                }
            }
            // on the main we have a feedback channel, so instead of the
            // match/no-match game we report the stored value itself
            CvMode::Main => {
                bus.send_cv_value(self.live_value(index, store, signal_quality));
            }
        }
    }

    fn write(
        &mut self,
        mode: CvMode,
        index: usize,
        data: u8,
        store: &mut dyn CvStore,
        ack: &mut dyn AckPin,
    ) -> CvOutcome {
        // the reset sentinel written to the vendor id wipes everything
        if index == cv::VENDOR_ID && data == cv::RESET_SENTINEL {
            if mode == CvMode::Service {
                ack.pulse(ACK_MS);
            }
            info!("factory reset requested");
            return CvOutcome::FactoryReset;
        }
        // restart without touching the stored values
        if index == cv::RESTART && data != 0 {
            info!("restart requested");
            return CvOutcome::Restart;
        }
        // find function: blink until written back to zero
        if index == cv::SEARCH {
            self.search_active = data != 0;
            return CvOutcome::None;
        }
        if persisted(index) {
            store.write(index, data);
            info!("CV{} = {}", index + 1, data);
            if mode == CvMode::Service {
                ack.pulse(ACK_MS);
                return CvOutcome::Restart;
            }
        }
        CvOutcome::None
    }

    /// Data is 111KDBBB: K write/verify, D the bit value, BBB the position.
    fn bit_operation(
        &mut self,
        index: usize,
        data: u8,
        store: &mut dyn CvStore,
        ack: &mut dyn AckPin,
    ) {
        let mask = 1 << (data & 0b0000_0111);
        let value = data & 0b0000_1000 != 0;
        if data & 0b0001_0000 != 0 {
            if persisted(index) {
                let mut byte = store.read(index);
                if value {
                    byte |= mask;
                } else {
                    byte &= !mask;
                }
                store.write(index, byte);
                ack.pulse(ACK_MS);
            }
        } else if (store.read(index) & mask != 0) == value {
            ack.pulse(ACK_MS);
        }
    }
}

impl Default for CvProtocol {
    fn default() -> CvProtocol {
        CvProtocol::new()
    }
}

#[cfg(test)]
mod pom_tests {
    use super::*;
    use crate::constants::bus;
    use crate::cv::CvTable;
    use rsbus_protocol::feedback::ModuleType;

    struct Ack(u8);

    impl AckPin for Ack {
        fn pulse(&mut self, _ms: u8) {
            self.0 += 1;
        }
    }

    fn write_req(index: u16, data: u8) -> CvRequest {
        CvRequest { op: CvOperation::Write, index, data }
    }

    fn parts() -> (CvProtocol, CvTable, RsBus, Ack) {
        (
            CvProtocol::new(),
            CvTable::new(),
            RsBus::new(5, ModuleType::SwitchWithFeedback),
            Ack(0),
        )
    }

    #[test]
    fn single_transmission_does_nothing() {
        let (mut p, mut t, mut b, mut a) = parts();
        let req = write_req(cv::RS_ADDR as u16, 9);
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        assert_ne!(t.read(cv::RS_ADDR), 9);
    }

    #[test]
    fn second_identical_transmission_applies_exactly_once() {
        let (mut p, mut t, mut b, mut a) = parts();
        let req = write_req(cv::RS_ADDR as u16, 9);
        for _ in 0..5 {
            p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        }
        assert_eq!(t.read(cv::RS_ADDR), 9);
        // a third copy must not re-trigger anything
        t.write(cv::RS_ADDR, 1);
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        assert_eq!(t.read(cv::RS_ADDR), 1);
    }

    #[test]
    fn differing_request_resets_the_count() {
        let (mut p, mut t, mut b, mut a) = parts();
        p.cv_operation(CvMode::Main, write_req(cv::RS_ADDR as u16, 9), &mut t, &mut b, &mut a, 0);
        p.cv_operation(CvMode::Main, write_req(cv::RS_ADDR as u16, 8), &mut t, &mut b, &mut a, 0);
        p.cv_operation(CvMode::Main, write_req(cv::RS_ADDR as u16, 9), &mut t, &mut b, &mut a, 0);
        assert_ne!(t.read(cv::RS_ADDR), 9);
    }

    #[test]
    fn window_expires_after_two_seconds() {
        let (mut p, mut t, mut b, mut a) = parts();
        let req = write_req(cv::RS_ADDR as u16, 9);
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        for _ in 0..=timing::POM_WINDOW_TICKS {
            p.tick();
        }
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        assert_ne!(t.read(cv::RS_ADDR), 9);
    }

    #[test]
    fn high_index_aliases_onto_the_low_range() {
        let (mut p, mut t, mut b, mut a) = parts();
        // CV513 on the wire is index 512, which aliases to index 0
        let req = write_req(512, 7);
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        assert_eq!(t.read(cv::ADDR_LOW), 7);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let (mut p, mut t, mut b, mut a) = parts();
        let req = write_req(cv::TABLE_SIZE as u16, 7);
        let r1 = p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        let r2 = p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        assert_eq!(r1, CvOutcome::None);
        assert_eq!(r2, CvOutcome::None);
    }

    #[test]
    fn unlisted_cv_is_not_written() {
        let (mut p, mut t, mut b, mut a) = parts();
        let req = write_req(cv::VERSION as u16, 3);
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        assert_ne!(t.read(cv::VERSION), 3);
    }

    #[test]
    fn reset_sentinel_requests_a_factory_reset() {
        let (mut p, mut t, mut b, mut a) = parts();
        let req = write_req(cv::VENDOR_ID as u16, cv::RESET_SENTINEL);
        assert_eq!(
            p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0),
            CvOutcome::None
        );
        assert_eq!(
            p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0),
            CvOutcome::FactoryReset
        );
    }

    #[test]
    fn restart_cv_requests_a_restart() {
        let (mut p, mut t, mut b, mut a) = parts();
        let req = write_req(cv::RESTART as u16, 1);
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        assert_eq!(
            p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0),
            CvOutcome::Restart
        );
    }

    #[test]
    fn search_cv_drives_the_blink_flag() {
        let (mut p, mut t, mut b, mut a) = parts();
        let on = write_req(cv::SEARCH as u16, 1);
        p.cv_operation(CvMode::Main, on, &mut t, &mut b, &mut a, 0);
        p.cv_operation(CvMode::Main, on, &mut t, &mut b, &mut a, 0);
        assert!(p.search_active);
        let off = write_req(cv::SEARCH as u16, 0);
        p.cv_operation(CvMode::Main, off, &mut t, &mut b, &mut a, 0);
        p.cv_operation(CvMode::Main, off, &mut t, &mut b, &mut a, 0);
        assert!(!p.search_active);
    }

    #[test]
    fn service_write_acks_and_restarts() {
        let (mut p, mut t, mut b, mut a) = parts();
        let req = write_req(cv::RS_ADDR as u16, 9);
        p.cv_operation(CvMode::Service, req, &mut t, &mut b, &mut a, 0);
        assert_eq!(
            p.cv_operation(CvMode::Service, req, &mut t, &mut b, &mut a, 0),
            CvOutcome::Restart
        );
        assert_eq!(a.0, 1);
        assert_eq!(t.read(cv::RS_ADDR), 9);
    }

    #[test]
    fn service_verify_acks_only_on_match() {
        let (mut p, mut t, mut b, mut a) = parts();
        let hit = CvRequest {
            op: CvOperation::Verify,
            index: cv::VERSION as u16,
            data: crate::cv::DEFAULTS[cv::VERSION],
        };
        p.cv_operation(CvMode::Service, hit, &mut t, &mut b, &mut a, 0);
        p.cv_operation(CvMode::Service, hit, &mut t, &mut b, &mut a, 0);
        assert_eq!(a.0, 1);
        let miss = CvRequest { op: CvOperation::Verify, index: cv::VERSION as u16, data: 0 };
        p.cv_operation(CvMode::Service, miss, &mut t, &mut b, &mut a, 0);
        p.cv_operation(CvMode::Service, miss, &mut t, &mut b, &mut a, 0);
        assert_eq!(a.0, 1);
    }

    struct Wire(Vec<u8>);

    impl crate::rsbus::ByteSink for Wire {
        fn send(&mut self, byte: u8) {
            self.0.push(byte);
        }
    }

    fn drain(b: &mut RsBus, wire: &mut Wire) {
        for _ in 0..4 {
            for _ in 0..bus::SLOTS_PER_CYCLE {
                b.on_transition(wire);
            }
            for _ in 0..=bus::IDLE_LIMIT_MS {
                b.on_ms();
            }
        }
    }

    fn reported_value(b: &mut RsBus) -> u8 {
        use rsbus_protocol::feedback::parse_feedback_byte;
        let mut wire = Wire(Vec::new());
        drain(b, &mut wire);
        assert_eq!(wire.0.len(), 2);
        let low = parse_feedback_byte(wire.0[0]).unwrap();
        let high = parse_feedback_byte(wire.0[1]).unwrap();
        high.data << 4 | low.data
    }

    #[test]
    fn main_verify_reports_the_value_over_the_bus() {
        let (mut p, mut t, mut b, mut a) = parts();
        drain(&mut b, &mut Wire(Vec::new())); // bring the link up
        let req = CvRequest { op: CvOperation::Verify, index: cv::VERSION as u16, data: 0 };
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 0);
        assert_eq!(reported_value(&mut b), crate::cv::DEFAULTS[cv::VERSION]);
        assert_eq!(a.0, 0); // no ack pulse on the main
    }

    #[test]
    fn quality_counter_is_read_live() {
        let (mut p, mut t, mut b, mut a) = parts();
        drain(&mut b, &mut Wire(Vec::new()));
        let req = CvRequest {
            op: CvOperation::Verify,
            index: cv::DCC_QUALITY as u16,
            data: 0,
        };
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 7);
        p.cv_operation(CvMode::Main, req, &mut t, &mut b, &mut a, 7);
        assert_eq!(reported_value(&mut b), 7);
    }

    #[test]
    fn service_bit_operations() {
        let (mut p, mut t, mut b, mut a) = parts();
        // write bit 2 of CV10 to 1: 111 K=1 D=1 BBB=010
        let req = CvRequest {
            op: CvOperation::BitOp,
            index: cv::RS_ADDR as u16,
            data: 0b1111_1010,
        };
        p.cv_operation(CvMode::Service, req, &mut t, &mut b, &mut a, 0);
        p.cv_operation(CvMode::Service, req, &mut t, &mut b, &mut a, 0);
        assert_eq!(a.0, 1);
        assert_ne!(t.read(cv::RS_ADDR) & 0b100, 0);
        // verify the same bit: 111 K=0 D=1 BBB=010
        let req = CvRequest {
            op: CvOperation::BitOp,
            index: cv::RS_ADDR as u16,
            data: 0b1110_1010,
        };
        p.cv_operation(CvMode::Service, req, &mut t, &mut b, &mut a, 0);
        p.cv_operation(CvMode::Service, req, &mut t, &mut b, &mut a, 0);
        assert_eq!(a.0, 2);
    }
}
