// Bit positions inside an RS-bus feedback byte. The byte is framed
// least-significant-bit first, so the parity bit follows the UART start bit
// immediately; because of this order the transmit hardware cannot compute
// the parity itself and it has to be filled in here.
pub const DATA_0: u8 = 7; // feedback bit 1 or 5
pub const DATA_1: u8 = 6; // feedback bit 2 or 6
pub const DATA_2: u8 = 5; // feedback bit 3 or 7
pub const DATA_3: u8 = 4; // feedback bit 4 or 8
pub const NIBBLE: u8 = 3; // low or high order nibble
pub const TT_BIT_0: u8 = 2;
pub const TT_BIT_1: u8 = 1;
pub const PARITY: u8 = 0;

/// Kind of module announced in the two TT bits of every report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    SwitchWithFeedback, // accessory decoder that also reports
    Feedback,           // pure feedback module (cannot switch anything)
}

/// Represents one decoded RS-bus report: 4 data bits plus the nibble select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub data: u8, // logical bits 0..3
    pub high_nibble: bool,
}

impl Report {
    pub fn new(data: u8, high_nibble: bool) -> Self {
        Report {
            data: data & 0x0F,
            high_nibble,
        }
    }

    /// Wire encoding of this report as a feedback-module byte
    pub fn serialize(&self) -> u8 {
        generate_feedback_byte(self.data, self.high_nibble, ModuleType::Feedback)
    }
}

/// Assembles the full feedback byte: data bits, nibble select, module type
/// and even parity over the seven payload+type bits
pub fn generate_feedback_byte(data: u8, high_nibble: bool, module: ModuleType) -> u8 {
    let mut byte = ((data & 0x01) << DATA_0)
        | ((data & 0x02) << (DATA_1 - 1))
        | ((data & 0x04) << (DATA_2 - 2))
        | ((data & 0x08) << (DATA_3 - 3));
    if high_nibble {
        byte |= 1 << NIBBLE;
    }
    byte |= match module {
        ModuleType::SwitchWithFeedback => 1 << TT_BIT_0,
        ModuleType::Feedback => 1 << TT_BIT_1,
    };
    // Even parity across the whole byte; the parity bit itself is bit 0
    if (byte >> 1).count_ones() % 2 == 1 {
        byte |= 1 << PARITY;
    }
    byte
}

/// Extracts data bits and nibble select from a feedback byte.
/// Returns None on a parity error.
pub fn parse_feedback_byte(byte: u8) -> Option<Report> {
    if byte.count_ones() % 2 != 0 {
        return None;
    }
    let data = ((byte >> DATA_0) & 0x01)
        | (((byte >> DATA_1) & 0x01) << 1)
        | (((byte >> DATA_2) & 0x01) << 2)
        | (((byte >> DATA_3) & 0x01) << 3);
    Some(Report {
        data,
        high_nibble: byte & (1 << NIBBLE) != 0,
    })
}

#[cfg(test)]
mod feedback_tests {
    use super::*;

    #[test]
    fn data_bits_land_in_the_upper_half() {
        let byte = generate_feedback_byte(0b0001, false, ModuleType::Feedback);
        assert_eq!(byte & (1 << DATA_0), 1 << DATA_0);
        assert_eq!(byte & (1 << NIBBLE), 0);
    }

    #[test]
    fn every_byte_has_even_parity() {
        for data in 0..16u8 {
            for &high in &[false, true] {
                let byte = generate_feedback_byte(data, high, ModuleType::Feedback);
                assert_eq!(byte.count_ones() % 2, 0);
            }
        }
    }

    #[test]
    fn parse_recovers_data_and_nibble() {
        for data in 0..16u8 {
            for &high in &[false, true] {
                let byte = generate_feedback_byte(data, high, ModuleType::Feedback);
                let report = parse_feedback_byte(byte).unwrap();
                assert_eq!(report.data, data);
                assert_eq!(report.high_nibble, high);
            }
        }
    }

    #[test]
    fn parity_error_is_rejected() {
        let byte = generate_feedback_byte(0b1010, true, ModuleType::Feedback);
        assert_eq!(parse_feedback_byte(byte ^ (1 << DATA_2)), None);
    }
}
