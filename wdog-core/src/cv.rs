use log::info;

use crate::constants::bus;
use crate::constants::cv;
use crate::constants::dcc;

/// Defaults for the configuration-variable table, one entry per CV
/// starting at CV1. Restored wholesale on a factory reset.
pub const DEFAULTS: [u8; cv::TABLE_SIZE] = [
    1,    // CV1  accessory address, low part
    0,    // CV2
    5,    // CV3
    5,    // CV4
    5,    // CV5
    5,    // CV6
    9,    // CV7  software version
    0x0D, // CV8  vendor id
    0x80, // CV9  address high part, 0x80 = not programmed
    127,  // CV10 feedback-bus address
    0, 0, 0, 0, 0, 0, 0, 0, // CV11..CV18
    1,    // CV19 master station type, 1 = Lenz
    0,    // CV20 feedback retransmissions
    0,    // CV21 skip uneven addresses
    0,    // CV22
    0,    // CV23 find function
    0,    // CV24
    0,    // CV25 restart on write
    0,    // CV26 checksum error count
    128,  // CV27 decoder type
    0,    // CV28 bidirectional comms
    0x80, // CV29 configuration
    0x0D, // CV30 second vendor byte
    0, 0, // CV31, CV32
    1,    // CV33 send button feedback
    4,    // CV34 emergency button pin
    5,    // CV35 watchdog hold, seconds
    20,   // CV36 PC stop grace, 100 ms steps
    50,   // CV37 movement check interval, 100 ms steps
    0, 0, // CV38, CV39 button 1 and 2 hold (0 = toggle)
    150, 150, // CV40, CV41 button 3 and 4 hold, 20 ms steps
];

/// Backing store for the configuration variables. The core keeps its
/// working copy in RAM; an implementation decides what actually survives
/// a restart (EEPROM on the target, a file on the host).
pub trait CvStore {
    fn read(&self, index: usize) -> u8;
    fn write(&mut self, index: usize, value: u8);
    fn restore_defaults(&mut self);
}

/// Plain array-backed store, volatile across restarts.
pub struct CvTable {
    values: [u8; cv::TABLE_SIZE],
}

impl CvTable {
    pub fn new() -> CvTable {
        CvTable { values: DEFAULTS }
    }

    pub fn from_values(values: [u8; cv::TABLE_SIZE]) -> CvTable {
        CvTable { values }
    }
}

impl Default for CvTable {
    fn default() -> CvTable {
        CvTable::new()
    }
}

impl CvStore for CvTable {
    fn read(&self, index: usize) -> u8 {
        self.values[index]
    }

    fn write(&mut self, index: usize, value: u8) {
        self.values[index] = value;
    }

    fn restore_defaults(&mut self) {
        self.values = DEFAULTS;
        info!("restored factory defaults");
    }
}

/// CVs whose writes are kept across a restart. Everything else stays
/// RAM-only, matching the behavior of the volatile CVs.
pub fn persisted(index: usize) -> bool {
    matches!(
        index,
        cv::ADDR_LOW
            | cv::ADDR_HIGH
            | cv::RS_ADDR
            | cv::CMD_STATION..=cv::SKIP_UNEVEN
            | cv::SEND_FB..=cv::T_PUSH_4
    )
}

/// True when the vendor signature bytes carry the expected values.
/// A store that fails this check is treated as corrupt and reset.
pub fn signature_ok(store: &dyn CvStore) -> bool {
    store.read(cv::VENDOR_ID) == cv::VENDOR_SIGNATURE
        && store.read(cv::VENDOR_ID_2) == cv::VENDOR_SIGNATURE
}

/// Addressing and behavior settings derived from the CV table once at
/// startup. The rest of the core reads these instead of raw CVs.
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    pub first_address: u16,     // first accessory decoder address we answer
    pub last_address: u16,      // last accessory decoder address we answer
    pub loco_address: u16,      // address for configuration over loco packets
    pub rs_address: u8,         // feedback-bus slot, 0 = unset
    pub extended_accessory: bool,
    pub skip_uneven: bool,
    pub lenz_master: bool,      // master counts accessory addresses from 1
    pub send_button_feedback: bool,
    pub emergency_pin: u8,      // 1-based input pin, 0 = none
}

impl DecoderConfig {
    pub fn from_store(store: &dyn CvStore) -> DecoderConfig {
        let low = store.read(cv::ADDR_LOW);
        let high = store.read(cv::ADDR_HIGH);
        let extended = store.read(cv::CONFIG) & 0x40 != 0;

        // Decoder address convention: CV1 + CV9 * 64 (basic) or CV1 + CV9 * 256
        // (extended). CV1 ranges 0..63; bit 7 of CV9 marks an unprogrammed
        // decoder.
        let combined = if extended {
            (((high & 0x07) as u16) << 8) + low as u16
        } else {
            (((high & 0x07) as u16) << 6) + low as u16
        };
        let first_address = if high & 0x80 != 0 || low > 63 || combined > 511 {
            dcc::INVALID_DECODER_ADDRESS
        } else {
            combined
        };

        let skip_uneven = store.read(cv::SKIP_UNEVEN) != 0;
        let span = if skip_uneven { 1 } else { 0 };
        let last_address = if first_address == dcc::INVALID_DECODER_ADDRESS {
            dcc::INVALID_DECODER_ADDRESS
        } else {
            first_address + span
        };

        // An uninitialised decoder still listens on the address just below
        // the offset, so it can be given its address over a loco packet.
        let loco_address = if first_address == dcc::INVALID_DECODER_ADDRESS
            || first_address > 255
        {
            dcc::LOCO_ADDRESS_OFFSET - 1
        } else {
            first_address + dcc::LOCO_ADDRESS_OFFSET
        };

        let raw_rs = store.read(cv::RS_ADDR);
        let rs_address = if raw_rs > bus::MAX_SLAVE_ADDRESS { 0 } else { raw_rs };

        DecoderConfig {
            first_address,
            last_address,
            loco_address,
            rs_address,
            extended_accessory: extended,
            skip_uneven,
            lenz_master: store.read(cv::CMD_STATION) == 1,
            send_button_feedback: store.read(cv::SEND_FB) != 0,
            emergency_pin: store.read(cv::EMERGENCY_PIN),
        }
    }

    /// True when `address` is one of ours.
    pub fn answers(&self, address: u16) -> bool {
        self.first_address != dcc::INVALID_DECODER_ADDRESS
            && address >= self.first_address
            && address <= self.last_address
    }
}
